//! Sparse matrix-vector gather kernel
//!
//! Computes one tile of `u <- u (+) v (x) A`, consuming the matrix in CRS
//! when the transpose descriptor routes gathers along rows and in CCS
//! otherwise. The source vector is read through its *global* coordinates:
//! an SpMV gathers non-local indices, which is exactly why the scheduler
//! guarantees its inputs are materialised and never overwritten within the
//! same pipeline.

use crate::coords::Coordinates;
use crate::descriptor::Descriptor;
use crate::kernels::LocalView;
use crate::matrix::CompressedView;
use crate::stage::{SharedMutPtr, SharedPtr};
use weft_algebra::{BinaryOperator, Monoid, Numeric, Semiring};

/// Gather the tile `[lo, hi)` of destination indices
#[allow(clippy::too_many_arguments)]
pub(crate) fn vxm_gather_tile<T, R, MT, IMT>(
    lo: usize,
    hi: usize,
    u: SharedMutPtr<T>,
    lu: &mut LocalView,
    mask: Option<(SharedPtr<MT>, &LocalView)>,
    v: SharedPtr<T>,
    v_coords: &Coordinates,
    v_len: usize,
    v_mask: Option<(SharedPtr<IMT>, &Coordinates)>,
    a: CompressedView<T>,
    ring: &R,
    descr: Descriptor,
) where
    T: Numeric,
    R: Semiring<T>,
    MT: Numeric,
    IMT: Numeric,
{
    let add = ring.add();
    let mul = ring.mul();

    for dst in lo..hi {
        let local = dst - lo;

        if let Some((mv, lm)) = &mask {
            if !lm.mask(descr, local, unsafe { mv.read(dst) }) {
                continue;
            }
        }

        // once an immutable-nonzero monoid set an output, further
        // contributions cannot change it
        if <R::Add as Monoid<T>>::HAS_IMMUTABLE_NONZEROES
            && lu.assigned(local)
            && unsafe { u.read(dst) } != add.identity()
        {
            continue;
        }

        let mut out = add.identity();
        let mut set = false;

        // inject v[dst] (x) one along the diagonal
        if descr.add_identity() && dst < v_len {
            let id_passes = match &v_mask {
                Some((imv, imc)) => imc.mask(descr, dst, unsafe { imv.read(dst) }),
                None => true,
            };
            if id_passes && (descr.dense() || v_coords.assigned(dst)) {
                out = mul.apply(unsafe { v.read(dst) }, ring.one());
                set = true;
            }
        }

        let (start, end) = unsafe { a.range(dst) };
        for k in start..end {
            let src = unsafe { a.minor(k) };
            if let Some((imv, imc)) = &v_mask {
                if !imc.mask(descr, src, unsafe { imv.read(src) }) {
                    continue;
                }
            }
            if !(descr.dense() || v_coords.assigned(src)) {
                continue;
            }
            let coeff = unsafe { a.value(k) };
            let src_val = if descr.use_index() {
                T::from_f64(src as f64)
            } else {
                unsafe { v.read(src) }
            };
            out = add.apply(mul.apply(src_val, coeff), out);
            set = true;
        }

        if descr.explicit_zero() || set {
            if lu.assign(local) {
                let old = unsafe { u.read(dst) };
                unsafe { u.write(dst, add.apply(old, out)) };
            } else {
                unsafe { u.write(dst, out) };
            }
        }
    }
}
