//! Sparse/dense vector container
//!
//! A vector owns a raw value array of its full logical length plus a
//! [`Coordinates`] instance tracking which positions are assigned. Unassigned
//! positions are readable (they hold `T::zero()`) but carry no semantic
//! value. The allocation never shrinks.
//!
//! Internals are boxed so that stage closures may capture raw pointers that
//! survive moves of the `Vector` handle. Any observation of materialised
//! state (`nnz`, `get`, iteration) and the destructor first flush the
//! pipeline referencing this vector, so recorded pointers never outlive the
//! data they point into.

use std::cell::UnsafeCell;

use crate::buffer::RawBuffer;
use crate::coords::Coordinates;
use crate::engine::Context;
use crate::error::{Error, Result};
use crate::stage::{ContainerId, CoordsHandle, SharedMutPtr, SharedPtr, VecOperand};
use weft_algebra::Numeric;

pub(crate) struct VectorInner<T> {
    values: RawBuffer<T>,
    // pipeline execution mutates the coordinates through recorded handles
    // while shared borrows of the vector may exist
    coords: UnsafeCell<Coordinates>,
    id: ContainerId,
}

/// A logical sequence of length `n` over `T` with a sparsity pattern
pub struct Vector<T: Numeric> {
    inner: Box<VectorInner<T>>,
    ctx: Context,
}

impl<T: Numeric> Vector<T> {
    /// An empty vector of logical length `n`
    pub fn new(ctx: &Context, n: usize) -> Self {
        Self {
            inner: Box::new(VectorInner {
                values: RawBuffer::zeroed(n),
                coords: UnsafeCell::new(Coordinates::new(ctx.config(), n)),
                id: ContainerId::fresh(),
            }),
            ctx: ctx.clone(),
        }
    }

    /// Build from (index, value) pairs; indices must be in bounds
    pub fn from_entries(ctx: &Context, n: usize, entries: &[(usize, T)]) -> Result<Self> {
        let mut v = Self::new(ctx, n);
        for &(i, value) in entries {
            if i >= n {
                return Err(Error::Mismatch);
            }
            v.inner.coords.get_mut().assign(i);
            v.inner.values.as_mut_slice()[i] = value;
        }
        Ok(v)
    }

    /// Build a dense vector from a slice
    pub fn from_slice(ctx: &Context, values: &[T]) -> Self {
        let mut v = Self::new(ctx, values.len());
        v.inner.values.as_mut_slice().copy_from_slice(values);
        v.inner.coords.get_mut().assign_all();
        v
    }

    pub fn size(&self) -> usize {
        self.inner.values.len()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Number of assigned positions. Forces execution of any pipeline
    /// referencing this vector.
    pub fn nnz(&self) -> Result<usize> {
        self.flush()?;
        Ok(self.coords().nonzeroes())
    }

    /// The value at `i`, or `None` when unassigned. Forces execution.
    pub fn get(&self, i: usize) -> Result<Option<T>> {
        if i >= self.size() {
            return Err(Error::Mismatch);
        }
        self.flush()?;
        if self.coords().assigned(i) {
            Ok(Some(self.inner.values.as_slice()[i]))
        } else {
            Ok(None)
        }
    }

    /// All assigned (index, value) pairs, sorted by index. Forces execution.
    pub fn to_entries(&self) -> Result<Vec<(usize, T)>> {
        self.flush()?;
        let coords = self.coords();
        let values = self.inner.values.as_slice();
        let mut out: Vec<(usize, T)> = (0..coords.nonzeroes())
            .map(|k| {
                let i = coords.index(k);
                (i, values[i])
            })
            .collect();
        out.sort_unstable_by_key(|&(i, _)| i);
        Ok(out)
    }

    /// Directly assign one element. Forces execution first.
    pub fn set_element(&mut self, i: usize, value: T) -> Result {
        if i >= self.size() {
            return Err(Error::Mismatch);
        }
        self.flush()?;
        self.inner.coords.get_mut().assign(i);
        self.inner.values.as_mut_slice()[i] = value;
        Ok(())
    }

    /// Unassign every position. Forces execution first.
    pub fn clear(&mut self) -> Result {
        self.flush()?;
        self.inner.coords.get_mut().clear();
        Ok(())
    }

    /// Execute the pipeline referencing this vector, if any
    pub fn flush(&self) -> Result {
        self.ctx.flush(self.inner.id)
    }

    pub(crate) fn id(&self) -> ContainerId {
        self.inner.id
    }

    /// Shared view of the coordinates.
    ///
    /// Callers must not hold this across a flush: execution mutates the
    /// structure through the recorded handles.
    pub(crate) fn coords(&self) -> &Coordinates {
        unsafe { &*self.inner.coords.get() }
    }

    pub(crate) fn coords_handle(&self) -> CoordsHandle {
        CoordsHandle::new(self.inner.coords.get())
    }

    pub(crate) fn values_ptr(&self) -> SharedPtr<T> {
        SharedPtr::new(self.inner.values.ptr() as *const T)
    }

    pub(crate) fn values_mut_ptr(&self) -> SharedMutPtr<T> {
        SharedMutPtr::new(self.inner.values.ptr())
    }

    pub(crate) fn operand(&self) -> VecOperand {
        VecOperand {
            id: self.inner.id,
            coords: self.coords_handle(),
            len: self.size(),
        }
    }
}

impl<T: Numeric> Drop for Vector<T> {
    fn drop(&mut self) {
        // any pipeline referencing this vector must run before the raw
        // buffers go away; errors surface on the triggering primitive's
        // observers instead
        let _ = self.flush();
    }
}

impl<T: Numeric> std::fmt::Debug for Vector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vector")
            .field("size", &self.size())
            .field("id", &self.inner.id)
            .finish()
    }
}
