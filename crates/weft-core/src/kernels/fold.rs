//! Fold kernels: vector-to-scalar reductions and scalar/vector folds into
//! a vector
//!
//! The vector-to-scalar kernel picks among four loop shapes from the local
//! nonzero counts: dense, mask-driven, vector-driven, and the full sparse
//! loop. The cost weights compare one stack entry walked (three accesses:
//! stack slot, bitmask probe, value) against one full-loop position (two:
//! bitmask, value); an inverted mask always forces the full loop since the
//! complement of the mask stack is not enumerable.

use crate::descriptor::Descriptor;
use crate::kernels::{apply_dir, LocalView};
use crate::stage::{SharedMutPtr, SharedPtr};
use weft_algebra::{BinaryOperator, Monoid, Numeric};

/// What a fold does when the output position is unassigned: a monoid
/// elides its identity and assigns, a bare operator skips
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OnUnassigned {
    Assign,
    Skip,
}

/// Reduce the tile's selected entries of `x` into a partial value
pub(crate) fn fold_vector_tile<T, Mo, MT>(
    lo: usize,
    hi: usize,
    x: SharedPtr<T>,
    lx: &LocalView,
    mask: Option<(SharedPtr<MT>, &LocalView)>,
    monoid: &Mo,
    left: bool,
    descr: Descriptor,
) -> T
where
    T: Numeric,
    Mo: Monoid<T>,
    MT: Numeric,
{
    let n_local = hi - lo;
    let mut acc = monoid.identity();

    match mask {
        None => {
            if lx.is_dense() {
                for i in lo..hi {
                    acc = apply_dir(monoid, left, acc, unsafe { x.read(i) });
                }
            } else {
                for k in 0..lx.nonzeroes() {
                    let g = lo + lx.index(k);
                    acc = apply_dir(monoid, left, acc, unsafe { x.read(g) });
                }
            }
        }
        Some((mv, lm)) => {
            let mnz = lm.nonzeroes();
            let xnz = lx.nonzeroes();
            if descr.invert_mask() {
                // the complement is not enumerable from the mask stack
                for i in 0..n_local {
                    if lm.mask(descr, i, unsafe { mv.read(lo + i) }) && lx.assigned(i) {
                        acc = apply_dir(monoid, left, acc, unsafe { x.read(lo + i) });
                    }
                }
            } else if 3 * mnz < 2 * xnz.min(n_local) {
                // mask-driven
                for k in 0..mnz {
                    let i = lm.index(k);
                    if lm.mask(descr, i, unsafe { mv.read(lo + i) }) && lx.assigned(i) {
                        acc = apply_dir(monoid, left, acc, unsafe { x.read(lo + i) });
                    }
                }
            } else if 3 * xnz < 2 * mnz.min(n_local) {
                // vector-driven
                for k in 0..xnz {
                    let i = lx.index(k);
                    if lm.mask(descr, i, unsafe { mv.read(lo + i) }) {
                        acc = apply_dir(monoid, left, acc, unsafe { x.read(lo + i) });
                    }
                }
            } else {
                for i in 0..n_local {
                    if lx.assigned(i) && lm.mask(descr, i, unsafe { mv.read(lo + i) }) {
                        acc = apply_dir(monoid, left, acc, unsafe { x.read(lo + i) });
                    }
                }
            }
        }
    }

    acc
}

/// Fold a scalar into the tile's positions of `y`
pub(crate) fn fold_scalar_tile<T, O, MT>(
    lo: usize,
    hi: usize,
    y: SharedMutPtr<T>,
    ly: &mut LocalView,
    beta: T,
    op: &O,
    left: bool,
    on_unassigned: OnUnassigned,
    mask: Option<(SharedPtr<MT>, &LocalView)>,
    descr: Descriptor,
) where
    T: Numeric,
    O: BinaryOperator<T>,
    MT: Numeric,
{
    let n_local = hi - lo;

    // an operator leaves the pattern alone: walk the output stack directly
    if on_unassigned == OnUnassigned::Skip && !ly.is_dense() && mask.is_none() {
        for k in 0..ly.nonzeroes() {
            let g = lo + ly.index(k);
            let old = unsafe { y.read(g) };
            unsafe { y.write(g, apply_dir(op, left, old, beta)) };
        }
        return;
    }

    for i in 0..n_local {
        if let Some((mv, lm)) = &mask {
            if !lm.mask(descr, i, unsafe { mv.read(lo + i) }) {
                continue;
            }
        }
        let g = lo + i;
        if ly.assigned(i) {
            let old = unsafe { y.read(g) };
            unsafe { y.write(g, apply_dir(op, left, old, beta)) };
        } else if on_unassigned == OnUnassigned::Assign {
            ly.assign(i);
            unsafe { y.write(g, beta) };
        }
    }
}

/// Fold a vector into another: `y[i] <- y[i] (op) x[i]` wherever `x` is
/// assigned, growing `y` under monoid semantics
pub(crate) fn fold_vector_into_vector_tile<T, O, MT>(
    lo: usize,
    hi: usize,
    y: SharedMutPtr<T>,
    ly: &mut LocalView,
    x: SharedPtr<T>,
    lx: &LocalView,
    op: &O,
    left: bool,
    on_unassigned: OnUnassigned,
    mask: Option<(SharedPtr<MT>, &LocalView)>,
    descr: Descriptor,
) where
    T: Numeric,
    O: BinaryOperator<T>,
    MT: Numeric,
{
    let drive_full = lx.is_dense();
    let count = if drive_full { hi - lo } else { lx.nonzeroes() };

    for k in 0..count {
        let i = if drive_full { k } else { lx.index(k) };
        if let Some((mv, lm)) = &mask {
            if !lm.mask(descr, i, unsafe { mv.read(lo + i) }) {
                continue;
            }
        }
        let g = lo + i;
        let xv = unsafe { x.read(g) };
        if ly.assigned(i) {
            let old = unsafe { y.read(g) };
            unsafe { y.write(g, apply_dir(op, left, old, xv)) };
        } else if on_unassigned == OnUnassigned::Assign {
            ly.assign(i);
            unsafe { y.write(g, xv) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_algebra::Plus;

    const NO_MASK: Option<(SharedPtr<bool>, &LocalView)> = None;

    #[test]
    fn test_fold_vector_tile_dense() {
        let data = vec![1.0f64, 2.0, 3.0, 4.0];
        let lx = LocalView::Dense(4);
        let acc = fold_vector_tile(
            0,
            4,
            SharedPtr::new(data.as_ptr()),
            &lx,
            NO_MASK,
            &Plus,
            true,
            Descriptor::NO_OPERATION,
        );
        assert_eq!(acc, 10.0);
    }

    #[test]
    fn test_fold_scalar_tile_assign_vs_skip() {
        let mut data = vec![0.0f64; 4];
        let ptr = SharedMutPtr::new(data.as_mut_ptr());
        // dense view: every position folds
        let mut ly = LocalView::Dense(4);
        fold_scalar_tile(
            0,
            4,
            ptr,
            &mut ly,
            2.0,
            &Plus,
            true,
            OnUnassigned::Assign,
            NO_MASK,
            Descriptor::NO_OPERATION,
        );
        assert_eq!(data, vec![2.0; 4]);
    }
}
