//! Dot-product kernel
//!
//! Dense: blocked multiply-then-reduce per tile, each tile's partial landing
//! in its own cache-line-padded slot. Sparse: the shorter input's stack
//! drives the loop and the longer's bitmask guards each probe.

use crate::kernels::LocalView;
use crate::stage::SharedPtr;
use weft_algebra::{BinaryOperator, Monoid, Numeric};

/// Reduce one tile of `<x, y>` into a partial value
pub(crate) fn dot_tile<T, AM, MO>(
    lo: usize,
    hi: usize,
    x: SharedPtr<T>,
    lx: &LocalView,
    y: SharedPtr<T>,
    ly: &LocalView,
    add: &AM,
    mul: &MO,
) -> T
where
    T: Numeric,
    AM: Monoid<T>,
    MO: BinaryOperator<T>,
{
    let mut acc = add.identity();

    if lx.is_dense() && ly.is_dense() {
        let bs = mul.preferred_blocksize().max(1);
        let mut i = lo;
        while i < hi {
            let end = (i + bs).min(hi);
            for g in i..end {
                let prod = mul.apply(unsafe { x.read(g) }, unsafe { y.read(g) });
                acc = add.apply(acc, prod);
            }
            i = end;
        }
    } else {
        let (drive, other) = if lx.nonzeroes() <= ly.nonzeroes() {
            (lx, ly)
        } else {
            (ly, lx)
        };
        for k in 0..drive.nonzeroes() {
            let i = drive.index(k);
            if other.assigned(i) {
                let g = lo + i;
                let prod = mul.apply(unsafe { x.read(g) }, unsafe { y.read(g) });
                acc = add.apply(acc, prod);
            }
        }
    }

    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_algebra::{Plus, Times};

    #[test]
    fn test_dense_dot_tile() {
        let a = vec![1.0f64, 2.0, 3.0];
        let b = vec![4.0f64, 5.0, 6.0];
        let acc = dot_tile(
            0,
            3,
            SharedPtr::new(a.as_ptr()),
            &LocalView::Dense(3),
            SharedPtr::new(b.as_ptr()),
            &LocalView::Dense(3),
            &Plus,
            &Times,
        );
        assert_eq!(acc, 32.0);
    }
}
