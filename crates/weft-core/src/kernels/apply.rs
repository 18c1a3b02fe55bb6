//! Element-wise apply kernels (out-of-place `z = x (op) y`)
//!
//! Three paths per §overload: a blocked dense loop with no coordinate
//! updates, a two-phase sparse path that walks input stacks, and a masked
//! path that iterates either the masked range or the mask stack. Under
//! monoid semantics a missing operand is replaced by the identity (elided:
//! the present operand is taken as-is); under bare-operator semantics both
//! operands must be present.

use crate::descriptor::Descriptor;
use crate::kernels::{for_each_index, LocalView};
use crate::stage::{SharedMutPtr, SharedPtr};
use crate::wrapper::SourceView;
use weft_algebra::{BinaryOperator, Numeric};

/// Dense path: fixed-size-block loop, no coordinate updates
pub(crate) fn dense_apply_tile<T, O, SX, SY>(
    lo: usize,
    hi: usize,
    z: SharedMutPtr<T>,
    sx: &SX,
    sy: &SY,
    op: &O,
) where
    T: Numeric,
    O: BinaryOperator<T>,
    SX: SourceView<T>,
    SY: SourceView<T>,
{
    let bs = op.preferred_blocksize().max(1);
    let mut i = lo;
    while i < hi {
        let end = (i + bs).min(hi);
        for g in i..end {
            unsafe { z.write(g, op.apply(sx.get(g), sy.get(g))) };
        }
        i = end;
    }
}

/// Sparse two-phase path; `lz` must start cleared for this tile
pub(crate) fn sparse_apply_tile<T, O, SX, SY>(
    lo: usize,
    _hi: usize,
    z: SharedMutPtr<T>,
    lz: &mut LocalView,
    sx: &SX,
    lx: &LocalView,
    sy: &SY,
    ly: &LocalView,
    op: &O,
    monoid_semantics: bool,
) where
    T: Numeric,
    O: BinaryOperator<T>,
    SX: SourceView<T>,
    SY: SourceView<T>,
{
    if monoid_semantics {
        // phase 1: x's entries, folded with y where it is present
        for_each_index(lx, |i| {
            let g = lo + i;
            let xv = unsafe { sx.get(g) };
            let v = if ly.assigned(i) {
                op.apply(xv, unsafe { sy.get(g) })
            } else {
                xv
            };
            lz.assign(i);
            unsafe { z.write(g, v) };
        });
        // phase 2: positions where only y is present
        for_each_index(ly, |i| {
            if !lx.assigned(i) {
                let g = lo + i;
                lz.assign(i);
                unsafe { z.write(g, sy.get(g)) };
            }
        });
    } else {
        // intersection: drive by the smaller pattern
        if lx.nonzeroes() <= ly.nonzeroes() {
            for_each_index(lx, |i| {
                if ly.assigned(i) {
                    let g = lo + i;
                    lz.assign(i);
                    unsafe { z.write(g, op.apply(sx.get(g), sy.get(g))) };
                }
            });
        } else {
            for_each_index(ly, |i| {
                if lx.assigned(i) {
                    let g = lo + i;
                    lz.assign(i);
                    unsafe { z.write(g, op.apply(sx.get(g), sy.get(g))) };
                }
            });
        }
    }
}

/// Masked path: writes only where the mask predicate passes
#[allow(clippy::too_many_arguments)]
pub(crate) fn masked_apply_tile<T, O, SX, SY, MT>(
    lo: usize,
    hi: usize,
    z: SharedMutPtr<T>,
    lz: &mut LocalView,
    sx: &SX,
    lx: &LocalView,
    sy: &SY,
    ly: &LocalView,
    mv: SharedPtr<MT>,
    lm: &LocalView,
    op: &O,
    monoid_semantics: bool,
    descr: Descriptor,
) where
    T: Numeric,
    O: BinaryOperator<T>,
    SX: SourceView<T>,
    SY: SourceView<T>,
    MT: Numeric,
{
    let n_local = hi - lo;
    let mut visit = |i: usize| {
        if !lm.mask(descr, i, unsafe { mv.read(lo + i) }) {
            return;
        }
        let xp = lx.assigned(i);
        let yp = ly.assigned(i);
        let g = lo + i;
        if monoid_semantics {
            if xp || yp {
                let v = match (xp, yp) {
                    (true, true) => op.apply(unsafe { sx.get(g) }, unsafe { sy.get(g) }),
                    (true, false) => unsafe { sx.get(g) },
                    _ => unsafe { sy.get(g) },
                };
                lz.assign(i);
                unsafe { z.write(g, v) };
            }
        } else if xp && yp {
            lz.assign(i);
            unsafe { z.write(g, op.apply(sx.get(g), sy.get(g))) };
        }
    };

    // an inverted mask cannot be walked by its stack
    let by_stack = !descr.invert_mask() && !lm.is_dense() && 2 * lm.nonzeroes() < n_local;
    if by_stack {
        for k in 0..lm.nonzeroes() {
            visit(lm.index(k));
        }
    } else {
        for i in 0..n_local {
            visit(i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrapper::ScalarSource;
    use weft_algebra::Plus;

    #[test]
    fn test_dense_apply_scalar_scalar() {
        let mut out = vec![0.0f64; 6];
        let z = SharedMutPtr::new(out.as_mut_ptr());
        dense_apply_tile(0, 6, z, &ScalarSource(2.0), &ScalarSource(3.0), &Plus);
        assert_eq!(out, vec![5.0; 6]);
    }
}
