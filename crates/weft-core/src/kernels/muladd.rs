//! Multiply-add kernel: `z[i] <- z[i] (+) ((a[i] (x) x[i]) (+) y[i])`
//!
//! In-place: the output keeps its old values and pattern, growing where a
//! contribution lands on an unassigned position (additive-identity
//! elision). Any of `a`, `x`, `y` may be a scalar, which counts as present
//! everywhere. The multiplicative contribution exists where both `a` and
//! `x` are present; the additive one where `y` is (unless `y_zero` marks
//! `y` as the additive identity and phase 2 is skipped).

use crate::descriptor::Descriptor;
use crate::kernels::{for_each_index, LocalView};
use crate::stage::{SharedMutPtr, SharedPtr};
use crate::wrapper::SourceView;
use weft_algebra::{BinaryOperator, Monoid, Numeric, Semiring};

/// Fold `v` into `z` at tile-relative `i`, assigning when unassigned
fn accumulate<T: Numeric, AM: Monoid<T>>(
    z: &SharedMutPtr<T>,
    lz: &mut LocalView,
    add: &AM,
    lo: usize,
    i: usize,
    v: T,
) {
    let g = lo + i;
    if lz.assign(i) {
        let old = unsafe { z.read(g) };
        unsafe { z.write(g, add.apply(old, v)) };
    } else {
        unsafe { z.write(g, v) };
    }
}

/// Estimated element-access counts of the two sparse strategies
pub(crate) fn mul_loop_cost(masked: bool, mul_nnz: usize, y_nnz: usize) -> usize {
    (3 + usize::from(masked)) * mul_nnz + (2 + usize::from(masked)) * y_nnz
}

pub(crate) fn mask_loop_cost(y_zero: bool, mask_nnz: usize) -> usize {
    (if y_zero { 4 } else { 5 }) * mask_nnz
}

/// Sparse mul-driven two-phase path
#[allow(clippy::too_many_arguments)]
pub(crate) fn mul_add_mul_driven_tile<T, R, SA, SX, SY, MT>(
    lo: usize,
    _hi: usize,
    z: SharedMutPtr<T>,
    lz: &mut LocalView,
    sa: &SA,
    la: &LocalView,
    sx: &SX,
    lx: &LocalView,
    sy: &SY,
    ly: &LocalView,
    mask: Option<(SharedPtr<MT>, &LocalView)>,
    ring: &R,
    y_zero: bool,
    descr: Descriptor,
) where
    T: Numeric,
    R: Semiring<T>,
    SA: SourceView<T>,
    SX: SourceView<T>,
    SY: SourceView<T>,
    MT: Numeric,
{
    let add = ring.add();
    let mul = ring.mul();

    // phase 1: multiplicative contributions, driven by the smaller of the
    // two multiplicand patterns
    let (drive, other_assigned): (&LocalView, &LocalView) = if la.nonzeroes() <= lx.nonzeroes() {
        (la, lx)
    } else {
        (lx, la)
    };
    for_each_index(drive, |i| {
        if !other_assigned.assigned(i) {
            return;
        }
        if let Some((mv, lm)) = &mask {
            if !lm.mask(descr, i, unsafe { mv.read(lo + i) }) {
                return;
            }
        }
        let g = lo + i;
        let prod = mul.apply(unsafe { sa.get(g) }, unsafe { sx.get(g) });
        accumulate(&z, lz, &add, lo, i, prod);
    });

    // phase 2: fold y in, skipped when it is the additive identity
    if !y_zero {
        for_each_index(ly, |i| {
            if let Some((mv, lm)) = &mask {
                if !lm.mask(descr, i, unsafe { mv.read(lo + i) }) {
                    return;
                }
            }
            let yv = unsafe { sy.get(lo + i) };
            accumulate(&z, lz, &add, lo, i, yv);
        });
    }
}

/// Sparse mask-driven path: one pass over the mask entries
#[allow(clippy::too_many_arguments)]
pub(crate) fn mul_add_mask_driven_tile<T, R, SA, SX, SY, MT>(
    lo: usize,
    hi: usize,
    z: SharedMutPtr<T>,
    lz: &mut LocalView,
    sa: &SA,
    la: &LocalView,
    sx: &SX,
    lx: &LocalView,
    sy: &SY,
    ly: &LocalView,
    mv: SharedPtr<MT>,
    lm: &LocalView,
    ring: &R,
    y_zero: bool,
    descr: Descriptor,
) where
    T: Numeric,
    R: Semiring<T>,
    SA: SourceView<T>,
    SX: SourceView<T>,
    SY: SourceView<T>,
    MT: Numeric,
{
    let add = ring.add();
    let mul = ring.mul();
    let n_local = hi - lo;

    let mut visit = |i: usize| {
        if !lm.mask(descr, i, unsafe { mv.read(lo + i) }) {
            return;
        }
        let g = lo + i;
        let mut contribution: Option<T> = None;
        if la.assigned(i) && lx.assigned(i) {
            contribution = Some(mul.apply(unsafe { sa.get(g) }, unsafe { sx.get(g) }));
        }
        if !y_zero && ly.assigned(i) {
            let yv = unsafe { sy.get(g) };
            contribution = Some(match contribution {
                Some(c) => add.apply(c, yv),
                None => yv,
            });
        }
        if let Some(c) = contribution {
            accumulate(&z, lz, &add, lo, i, c);
        }
    };

    if descr.invert_mask() || lm.is_dense() {
        for i in 0..n_local {
            visit(i);
        }
    } else {
        for k in 0..lm.nonzeroes() {
            visit(lm.index(k));
        }
    }
}

/// Dense blocked path: all operands and the output known dense
#[allow(clippy::too_many_arguments)]
pub(crate) fn mul_add_dense_tile<T, R, SA, SX, SY>(
    lo: usize,
    hi: usize,
    z: SharedMutPtr<T>,
    sa: &SA,
    sx: &SX,
    sy: &SY,
    ring: &R,
    y_zero: bool,
) where
    T: Numeric,
    R: Semiring<T>,
    SA: SourceView<T>,
    SX: SourceView<T>,
    SY: SourceView<T>,
{
    let add = ring.add();
    let mul = ring.mul();
    let bs = mul.preferred_blocksize().max(1);

    let mut i = lo;
    while i < hi {
        let end = (i + bs).min(hi);
        for g in i..end {
            let mut v = mul.apply(unsafe { sa.get(g) }, unsafe { sx.get(g) });
            if !y_zero {
                v = add.apply(v, unsafe { sy.get(g) });
            }
            let old = unsafe { z.read(g) };
            unsafe { z.write(g, add.apply(old, v)) };
        }
        i = end;
    }
}
