//! Cache-line-aligned raw buffers
//!
//! Container value arrays and coordinate storage live in manually allocated,
//! zero-initialised blocks. Raw allocation (rather than `Vec`) gives three
//! things the engine relies on: cache-line alignment for the blocked dense
//! kernels, stable addresses that recorded stage closures may capture, and
//! `*mut` access from `&self` so disjoint tile ranges can be written
//! concurrently during pipeline execution.

use bytemuck::Zeroable;
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::marker::PhantomData;

use crate::config::CACHE_LINE_BYTES;

/// A fixed-length, zero-initialised, cache-line-aligned allocation
pub struct RawBuffer<T> {
    ptr: *mut T,
    len: usize,
    layout: Layout,
    _marker: PhantomData<T>,
}

impl<T: Zeroable> RawBuffer<T> {
    /// Allocate `len` elements, all bytes zero.
    ///
    /// All-zero bytes are a valid `T` by the `Zeroable` bound.
    pub fn zeroed(len: usize) -> Self {
        if len == 0 || std::mem::size_of::<T>() == 0 {
            return Self {
                ptr: std::ptr::null_mut(),
                len,
                layout: Layout::new::<u8>(),
                _marker: PhantomData,
            };
        }

        let size = len * std::mem::size_of::<T>();
        let align = CACHE_LINE_BYTES.max(std::mem::align_of::<T>());
        let layout = Layout::from_size_align(size, align).expect("invalid buffer layout");
        let ptr = unsafe { alloc_zeroed(layout) } as *mut T;
        if ptr.is_null() {
            handle_alloc_error(layout);
        }

        Self {
            ptr,
            len,
            layout,
            _marker: PhantomData,
        }
    }
}

impl<T> RawBuffer<T> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw base pointer.
    ///
    /// Obtained through `&self` on purpose: during tile execution multiple
    /// workers write disjoint `[lo, hi)` ranges of the same buffer. Callers
    /// must keep their writes inside their own tile range.
    pub fn ptr(&self) -> *mut T {
        self.ptr
    }

    pub fn as_slice(&self) -> &[T] {
        if self.len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        if self.len == 0 {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl<T> Drop for RawBuffer<T> {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { dealloc(self.ptr as *mut u8, self.layout) };
        }
    }
}

// The buffer is a plain memory region; range-partitioned access is the
// caller's contract.
unsafe impl<T: Send> Send for RawBuffer<T> {}
unsafe impl<T: Sync> Sync for RawBuffer<T> {}

impl<T: std::fmt::Debug> std::fmt::Debug for RawBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBuffer")
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_contents() {
        let buf: RawBuffer<f64> = RawBuffer::zeroed(37);
        assert_eq!(buf.len(), 37);
        assert!(buf.as_slice().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_alignment() {
        let buf: RawBuffer<u32> = RawBuffer::zeroed(1000);
        assert_eq!(buf.ptr() as usize % CACHE_LINE_BYTES, 0);
    }

    #[test]
    fn test_empty() {
        let buf: RawBuffer<f64> = RawBuffer::zeroed(0);
        assert!(buf.is_empty());
        assert_eq!(buf.as_slice().len(), 0);
    }

    #[test]
    fn test_write_read() {
        let mut buf: RawBuffer<i64> = RawBuffer::zeroed(8);
        buf.as_mut_slice()[3] = -42;
        assert_eq!(buf.as_slice()[3], -42);
        assert_eq!(buf.as_slice()[4], 0);
    }

    #[test]
    fn test_bool_buffer() {
        let buf: RawBuffer<bool> = RawBuffer::zeroed(16);
        assert!(buf.as_slice().iter().all(|&b| !b));
    }
}
