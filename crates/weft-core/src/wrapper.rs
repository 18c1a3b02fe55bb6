//! Scalar-or-vector operand wrapper
//!
//! Primitives accept any mix of scalar and vector operands. Rather than
//! duplicating kernel bodies, a kernel reads its sources only through
//! [`SourceView`]: the scalar flavour stores the value inline and reports a
//! dense pattern, the vector flavour reads the raw value array and defers
//! to the tile-local coordinates. `IS_SCALAR` is a compile-time fact, so
//! each instantiation monomorphises to the natural loop.

use crate::descriptor::Descriptor;
use crate::kernels::{local_view, LocalView};
use crate::pipeline::Pipeline;
use crate::stage::{CoordsHandle, SharedPtr};
use weft_algebra::Numeric;

pub(crate) trait SourceView<T: Numeric>: Copy + Send + Sync + 'static {
    const IS_SCALAR: bool;

    /// Read the operand at global index `i`
    ///
    /// # Safety
    /// For vector sources `i` must be within the captured allocation and
    /// the container must be alive.
    unsafe fn get(&self, i: usize) -> T;

    /// The tile's pattern knowledge for this operand; scalars are
    /// everywhere-present
    fn local(&self, pipe: &Pipeline, dense_all: bool, lo: usize, hi: usize) -> LocalView;
}

#[derive(Clone, Copy)]
pub(crate) struct ScalarSource<T>(pub T);

impl<T: Numeric> SourceView<T> for ScalarSource<T> {
    const IS_SCALAR: bool = true;

    unsafe fn get(&self, _i: usize) -> T {
        self.0
    }

    fn local(&self, _pipe: &Pipeline, _dense_all: bool, lo: usize, hi: usize) -> LocalView {
        LocalView::Dense(hi - lo)
    }
}

#[derive(Clone, Copy)]
pub(crate) struct VectorSource<T> {
    pub values: SharedPtr<T>,
    pub coords: CoordsHandle,
}

impl<T: Numeric> SourceView<T> for VectorSource<T> {
    const IS_SCALAR: bool = false;

    unsafe fn get(&self, i: usize) -> T {
        self.values.read(i)
    }

    fn local(&self, pipe: &Pipeline, dense_all: bool, lo: usize, hi: usize) -> LocalView {
        local_view(pipe, dense_all, self.coords.const_ptr(), lo, hi)
    }
}

/// Read a value array entry or, under `use_index`, the global index itself
pub(crate) fn value_or_index_raw<T: Numeric>(descr: Descriptor, values: &SharedPtr<T>, i: usize) -> T {
    if descr.use_index() {
        T::from_f64(i as f64)
    } else {
        unsafe { values.read(i) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_source() {
        let s = ScalarSource(42i64);
        assert!(<ScalarSource<i64> as SourceView<i64>>::IS_SCALAR);
        assert_eq!(unsafe { s.get(17) }, 42);
    }

    #[test]
    fn test_value_or_index_raw() {
        let data = vec![5.0f64, 6.0];
        let p = SharedPtr::new(data.as_ptr());
        assert_eq!(value_or_index_raw(Descriptor::NO_OPERATION, &p, 1), 6.0);
        assert_eq!(value_or_index_raw(Descriptor::USE_INDEX, &p, 1), 1.0);
    }
}
