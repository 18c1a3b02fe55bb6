//! Sparse vector-matrix products
//!
//! `vxm` computes `u <- u (+) v (x) A`; `mxv` computes `u <- u (+) A (x) v`
//! by toggling the transpose descriptor. The governing length is the output
//! vector's; each tile gathers its destination indices from the matrix in
//! CRS (transposed gathers, i.e. along rows) or CCS (along columns).
//!
//! The source vector is gathered at arbitrary indices, so it must be
//! materialised before this stage runs and must not be overwritten within
//! the same pipeline - both enforced by the scheduler's dependence
//! analysis for SpMV stages.

use crate::descriptor::{Descriptor, Phase};
use crate::error::{Error, Result};
use crate::kernels::spmv::vxm_gather_tile;
use crate::kernels::{join_local, local_view};
use crate::matrix::Matrix;
use crate::stage::{Opcode, StageFn, StageSpec};
use crate::vector::Vector;
use weft_algebra::{Numeric, Semiring};

use super::check_mask;

/// The general form: optional output mask, optional input mask
#[allow(clippy::too_many_arguments)]
pub fn vxm_generic<T, R, M, IM>(
    u: &mut Vector<T>,
    mask: Option<&Vector<M>>,
    v: &Vector<T>,
    v_mask: Option<&Vector<IM>>,
    a: &Matrix<T>,
    ring: R,
    descr: Descriptor,
    phase: Phase,
) -> Result
where
    T: Numeric,
    R: Semiring<T>,
    M: Numeric,
    IM: Numeric,
{
    let transposed = descr.transpose_matrix();
    let (expect_v, expect_u) = if transposed {
        (a.ncols(), a.nrows())
    } else {
        (a.nrows(), a.ncols())
    };
    if v.size() != expect_v || u.size() != expect_u {
        return Err(Error::Mismatch);
    }
    if !v.context().same_scheduler(u.context()) || !a.context().same_scheduler(u.context()) {
        return Err(Error::Illegal);
    }

    let n = u.size();
    let masked = check_mask(mask, n, u.context())?;
    let mask = if masked { mask } else { None };
    let v_masked = match v_mask {
        None => false,
        Some(m) => {
            if m.size() == 0 {
                false
            } else if m.size() != v.size() {
                return Err(Error::Mismatch);
            } else {
                true
            }
        }
    };
    let v_mask = if v_masked { v_mask } else { None };

    // the gather reads and writes through different containers unless the
    // caller explicitly vouches for the overlap
    if !descr.safe_overlap() {
        if u.id() == v.id() {
            return Err(Error::Overlap);
        }
        if let Some(m) = v_mask {
            if u.id() == m.id() {
                return Err(Error::Overlap);
            }
        }
    }

    if phase.is_resize() {
        return Ok(());
    }
    if n == 0 {
        return Ok(());
    }

    let u_vals = u.values_mut_ptr();
    let u_coords = u.coords_handle();
    let v_vals = v.values_ptr();
    let v_coords = v.coords_handle();
    let v_len = v.size();
    let mask_parts = mask.map(|m| (m.values_ptr(), m.coords_handle()));
    let v_mask_parts = v_mask.map(|m| (m.values_ptr(), m.coords_handle()));
    let storage = if transposed { a.crs_view() } else { a.ccs_view() };
    let dense_descr = descr.dense();
    let dense_mask = mask.map(|m| m.coords().is_dense()).unwrap_or(true);

    let func: StageFn = Box::new(move |pipe, lo, hi| {
        let dense_all = dense_descr || pipe.all_already_dense();
        let mut lu = local_view(pipe, dense_all, u_coords.const_ptr(), lo, hi);
        let vc = unsafe { v_coords.get() };

        match (&mask_parts, &v_mask_parts) {
            (None, None) => {
                vxm_gather_tile::<T, R, bool, bool>(
                    lo, hi, u_vals, &mut lu, None, v_vals, vc, v_len, None, storage, &ring, descr,
                );
            }
            (Some((mv, mc)), None) => {
                let lm = local_view(pipe, dense_all, mc.const_ptr(), lo, hi);
                vxm_gather_tile::<T, R, M, bool>(
                    lo,
                    hi,
                    u_vals,
                    &mut lu,
                    Some((*mv, &lm)),
                    v_vals,
                    vc,
                    v_len,
                    None,
                    storage,
                    &ring,
                    descr,
                );
            }
            (None, Some((imv, imc))) => {
                let imcoords = unsafe { imc.get() };
                vxm_gather_tile::<T, R, bool, IM>(
                    lo,
                    hi,
                    u_vals,
                    &mut lu,
                    None,
                    v_vals,
                    vc,
                    v_len,
                    Some((*imv, imcoords)),
                    storage,
                    &ring,
                    descr,
                );
            }
            (Some((mv, mc)), Some((imv, imc))) => {
                let lm = local_view(pipe, dense_all, mc.const_ptr(), lo, hi);
                let imcoords = unsafe { imc.get() };
                vxm_gather_tile::<T, R, M, IM>(
                    lo,
                    hi,
                    u_vals,
                    &mut lu,
                    Some((*mv, &lm)),
                    v_vals,
                    vc,
                    v_len,
                    Some((*imv, imcoords)),
                    storage,
                    &ring,
                    descr,
                );
            }
        }

        if !dense_all {
            join_local(u_coords.const_ptr(), &lu, lo, hi);
        }
        Ok(())
    });

    let mut inputs = [None; 4];
    inputs[0] = Some(v.operand());
    if let Some(m) = mask {
        inputs[1] = Some(m.operand());
    }
    if let Some(m) = v_mask {
        inputs[2] = Some(m.operand());
    }

    u.context().clone().add_stage(StageSpec {
        func,
        opcode: Opcode::VxmGeneric,
        n,
        data_bytes: std::mem::size_of::<T>(),
        dense_descr,
        dense_mask,
        outputs: [Some(u.operand()), None],
        inputs,
        matrix: Some(a.id()),
    })
}

/// `u <- u (+) v (x) A`
pub fn vxm<T: Numeric, R: Semiring<T>>(
    u: &mut Vector<T>,
    v: &Vector<T>,
    a: &Matrix<T>,
    ring: R,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    vxm_generic(
        u,
        None::<&Vector<bool>>,
        v,
        None::<&Vector<bool>>,
        a,
        ring,
        descr,
        phase,
    )
}

pub fn vxm_masked<T: Numeric, R: Semiring<T>, M: Numeric>(
    u: &mut Vector<T>,
    mask: &Vector<M>,
    v: &Vector<T>,
    a: &Matrix<T>,
    ring: R,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    vxm_generic(
        u,
        Some(mask),
        v,
        None::<&Vector<bool>>,
        a,
        ring,
        descr,
        phase,
    )
}

/// `u <- u (+) A (x) v`: the transposed gather of `vxm`
pub fn mxv<T: Numeric, R: Semiring<T>>(
    u: &mut Vector<T>,
    a: &Matrix<T>,
    v: &Vector<T>,
    ring: R,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    vxm(u, v, a, ring, descr ^ Descriptor::TRANSPOSE_MATRIX, phase)
}

pub fn mxv_masked<T: Numeric, R: Semiring<T>, M: Numeric>(
    u: &mut Vector<T>,
    mask: &Vector<M>,
    a: &Matrix<T>,
    v: &Vector<T>,
    ring: R,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    vxm_masked(u, mask, v, a, ring, descr ^ Descriptor::TRANSPOSE_MATRIX, phase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Context;
    use weft_algebra::PlusTimes;

    fn permutation(ctx: &Context) -> Matrix<i64> {
        // maps i -> (i + 1) mod 4
        Matrix::from_entries(
            ctx,
            4,
            4,
            &[(0, 1, 1), (1, 2, 1), (2, 3, 1), (3, 0, 1)],
        )
        .unwrap()
    }

    #[test]
    fn test_vxm_permutation() {
        let ctx = Context::new();
        let a = permutation(&ctx);
        let v = Vector::from_slice(&ctx, &[1i64, 2, 3, 4]);
        let mut u: Vector<i64> = Vector::new(&ctx, 4);
        vxm(&mut u, &v, &a, PlusTimes, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
        // u[j] = v[j - 1 mod 4]
        assert_eq!(
            u.to_entries().unwrap(),
            vec![(0, 4), (1, 1), (2, 2), (3, 3)]
        );
    }

    #[test]
    fn test_mxv_is_transposed_gather() {
        let ctx = Context::new();
        let a = permutation(&ctx);
        let v = Vector::from_slice(&ctx, &[1i64, 2, 3, 4]);
        let mut u: Vector<i64> = Vector::new(&ctx, 4);
        mxv(&mut u, &a, &v, PlusTimes, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
        // u[i] = v[(i + 1) mod 4]
        assert_eq!(
            u.to_entries().unwrap(),
            vec![(0, 2), (1, 3), (2, 4), (3, 1)]
        );
    }

    #[test]
    fn test_vxm_add_identity() {
        let ctx = Context::new();
        let a = permutation(&ctx);
        let v = Vector::from_slice(&ctx, &[10i64, 20, 30, 40]);
        let mut u: Vector<i64> = Vector::new(&ctx, 4);
        vxm(&mut u, &v, &a, PlusTimes, Descriptor::ADD_IDENTITY, Phase::Execute).unwrap();
        // identity injects v[j]; the permutation adds v[j - 1 mod 4]
        assert_eq!(
            u.to_entries().unwrap(),
            vec![(0, 50), (1, 30), (2, 50), (3, 70)]
        );
    }

    #[test]
    fn test_vxm_sparse_source() {
        let ctx = Context::new();
        let a = permutation(&ctx);
        let v = Vector::from_entries(&ctx, 4, &[(1, 5i64)]).unwrap();
        let mut u: Vector<i64> = Vector::new(&ctx, 4);
        vxm(&mut u, &v, &a, PlusTimes, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
        // only column 2 receives a contribution
        assert_eq!(u.to_entries().unwrap(), vec![(2, 5)]);
    }

    #[test]
    fn test_vxm_masked_output() {
        let ctx = Context::new();
        let a = permutation(&ctx);
        let v = Vector::from_slice(&ctx, &[1i64, 2, 3, 4]);
        let mask = Vector::from_entries(&ctx, 4, &[(1, true), (3, true)]).unwrap();
        let mut u: Vector<i64> = Vector::new(&ctx, 4);
        vxm_masked(&mut u, &mask, &v, &a, PlusTimes, Descriptor::NO_OPERATION, Phase::Execute)
            .unwrap();
        assert_eq!(u.to_entries().unwrap(), vec![(1, 1), (3, 3)]);
    }

    #[test]
    fn test_vxm_dimension_mismatch() {
        let ctx = Context::new();
        let a = Matrix::from_entries(&ctx, 2, 3, &[(0, 0, 1i64)]).unwrap();
        let v = Vector::from_slice(&ctx, &[1i64, 2, 3]);
        let mut u: Vector<i64> = Vector::new(&ctx, 3);
        assert_eq!(
            vxm(&mut u, &v, &a, PlusTimes, Descriptor::NO_OPERATION, Phase::Execute).unwrap_err(),
            Error::Mismatch
        );
    }

    #[test]
    fn test_vxm_in_place_accumulation() {
        let ctx = Context::new();
        let a = permutation(&ctx);
        let v = Vector::from_slice(&ctx, &[1i64, 2, 3, 4]);
        let mut u = Vector::from_slice(&ctx, &[100i64, 100, 100, 100]);
        vxm(&mut u, &v, &a, PlusTimes, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
        assert_eq!(
            u.to_entries().unwrap(),
            vec![(0, 104), (1, 101), (2, 102), (3, 103)]
        );
    }
}
