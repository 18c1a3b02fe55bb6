//! In-place map and user-lambda kernels
//!
//! Both preserve the sparsity pattern: the callback sees only assigned
//! positions and may not create new ones.

use crate::kernels::{for_each_index, LocalView};
use crate::stage::SharedMutPtr;
use weft_algebra::Numeric;

/// Apply `f: T -> T` in place over the tile's assigned positions
pub(crate) fn map_tile<T, F>(lo: usize, _hi: usize, x: SharedMutPtr<T>, lx: &LocalView, f: &F)
where
    T: Numeric,
    F: Fn(T) -> T,
{
    for_each_index(lx, |i| {
        let g = lo + i;
        let old = unsafe { x.read(g) };
        unsafe { x.write(g, f(old)) };
    });
}

/// Invoke a per-index callback with mutable access to the element
pub(crate) fn lambda_tile<T, F>(lo: usize, _hi: usize, x: SharedMutPtr<T>, lx: &LocalView, f: &F)
where
    T: Numeric,
    F: Fn(usize, &mut T),
{
    for_each_index(lx, |i| {
        let g = lo + i;
        unsafe { f(g, &mut *x.at(g)) };
    });
}

/// Binary variant: the callback touches elements of two vectors at each
/// index of the governing pattern
pub(crate) fn lambda_binary_tile<T, U, F>(
    lo: usize,
    _hi: usize,
    x: SharedMutPtr<T>,
    y: SharedMutPtr<U>,
    lx: &LocalView,
    f: &F,
) where
    T: Numeric,
    U: Numeric,
    F: Fn(usize, &mut T, &mut U),
{
    for_each_index(lx, |i| {
        let g = lo + i;
        unsafe { f(g, &mut *x.at(g), &mut *y.at(g)) };
    });
}
