//! Out-of-place element-wise apply: `z <- x (op) y`
//!
//! The old content of `z` is discarded. Under bare-operator semantics the
//! result exists where both operands are present (intersection); under
//! monoid semantics a lone operand is taken as-is (union, identity elided).
//! Scalar operands count as present everywhere.

use crate::descriptor::{Descriptor, Phase};
use crate::error::Result;
use crate::kernels::apply::{dense_apply_tile, masked_apply_tile, sparse_apply_tile};
use crate::kernels::{join_local, local_view, LocalView};
use crate::stage::{Opcode, StageFn, StageSpec, VecOperand};
use crate::vector::Vector;
use crate::wrapper::{ScalarSource, SourceView, VectorSource};
use weft_algebra::{BinaryOperator, Monoid, Numeric};

use super::{check_mask, Operand};

#[allow(clippy::too_many_arguments)]
fn build_apply<T, O, SX, SY, M>(
    z: &mut Vector<T>,
    sx: SX,
    x_meta: Option<VecOperand>,
    sy: SY,
    y_meta: Option<VecOperand>,
    mask: Option<&Vector<M>>,
    op: O,
    monoid_semantics: bool,
    descr: Descriptor,
) -> Result
where
    T: Numeric,
    O: BinaryOperator<T>,
    SX: SourceView<T>,
    SY: SourceView<T>,
    M: Numeric,
{
    let n = z.size();
    let z_vals = z.values_mut_ptr();
    let z_coords = z.coords_handle();
    let mask_parts = mask.map(|m| (m.values_ptr(), m.coords_handle()));
    let dense_descr = descr.dense();
    let dense_mask = mask.map(|m| m.coords().is_dense()).unwrap_or(true);
    let opcode = if mask.is_some() {
        Opcode::MaskedEWiseApply
    } else {
        Opcode::EWiseApply
    };

    let func: StageFn = Box::new(move |pipe, lo, hi| {
        let dense_all = dense_descr || pipe.all_already_dense();
        let mut lz = local_view(pipe, dense_all, z_coords.const_ptr(), lo, hi);
        let lx = sx.local(pipe, dense_all, lo, hi);
        let ly = sy.local(pipe, dense_all, lo, hi);

        // out-of-place: discard the old pattern; the global count is reset
        // once, by the tile covering index zero
        if !dense_all && lo == 0 {
            unsafe { z_coords.get() }.reset_nnz();
        }

        match &mask_parts {
            None => {
                if lx.is_dense() && ly.is_dense() {
                    lz.assign_all();
                    dense_apply_tile(lo, hi, z_vals, &sx, &sy, &op);
                } else {
                    lz.clear_all();
                    sparse_apply_tile(
                        lo,
                        hi,
                        z_vals,
                        &mut lz,
                        &sx,
                        &lx,
                        &sy,
                        &ly,
                        &op,
                        monoid_semantics,
                    );
                }
            }
            Some((mv, mc)) => {
                let lm = local_view(pipe, dense_all, mc.const_ptr(), lo, hi);
                lz.clear_all();
                masked_apply_tile(
                    lo,
                    hi,
                    z_vals,
                    &mut lz,
                    &sx,
                    &lx,
                    &sy,
                    &ly,
                    *mv,
                    &lm,
                    &op,
                    monoid_semantics,
                    descr,
                );
            }
        }

        if !dense_all {
            join_local(z_coords.const_ptr(), &lz, lo, hi);
        }
        Ok(())
    });

    let mut inputs = [None; 4];
    inputs[0] = x_meta;
    inputs[1] = y_meta;
    if let Some(m) = mask {
        inputs[2] = Some(m.operand());
    }

    z.context().clone().add_stage(StageSpec {
        func,
        opcode,
        n,
        data_bytes: std::mem::size_of::<T>(),
        dense_descr,
        dense_mask,
        outputs: [Some(z.operand()), None],
        inputs,
        matrix: None,
    })
}

#[allow(clippy::too_many_arguments)]
fn apply_dispatch<T, O, M>(
    z: &mut Vector<T>,
    x: Operand<'_, T>,
    y: Operand<'_, T>,
    mask: Option<&Vector<M>>,
    op: O,
    monoid_semantics: bool,
    descr: Descriptor,
    phase: Phase,
) -> Result
where
    T: Numeric,
    O: BinaryOperator<T>,
    M: Numeric,
{
    let n = z.size();
    x.check(n, z.context())?;
    y.check(n, z.context())?;
    let masked = check_mask(mask, n, z.context())?;
    let mask = if masked { mask } else { None };
    if phase.is_resize() {
        return Ok(());
    }
    if n == 0 {
        return Ok(());
    }

    match (x, y) {
        (Operand::Scalar(a), Operand::Scalar(b)) => build_apply(
            z,
            ScalarSource(a),
            None,
            ScalarSource(b),
            None,
            mask,
            op,
            monoid_semantics,
            descr,
        ),
        (Operand::Scalar(a), Operand::Vector(yv)) => build_apply(
            z,
            ScalarSource(a),
            None,
            VectorSource {
                values: yv.values_ptr(),
                coords: yv.coords_handle(),
            },
            Some(yv.operand()),
            mask,
            op,
            monoid_semantics,
            descr,
        ),
        (Operand::Vector(xv), Operand::Scalar(b)) => build_apply(
            z,
            VectorSource {
                values: xv.values_ptr(),
                coords: xv.coords_handle(),
            },
            Some(xv.operand()),
            ScalarSource(b),
            None,
            mask,
            op,
            monoid_semantics,
            descr,
        ),
        (Operand::Vector(xv), Operand::Vector(yv)) => build_apply(
            z,
            VectorSource {
                values: xv.values_ptr(),
                coords: xv.coords_handle(),
            },
            Some(xv.operand()),
            VectorSource {
                values: yv.values_ptr(),
                coords: yv.coords_handle(),
            },
            Some(yv.operand()),
            mask,
            op,
            monoid_semantics,
            descr,
        ),
    }
}

/// `z <- x (op) y` where both operands are present
pub fn e_wise_apply_op<T: Numeric, O: BinaryOperator<T>>(
    z: &mut Vector<T>,
    x: Operand<'_, T>,
    y: Operand<'_, T>,
    op: O,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    apply_dispatch(z, x, y, None::<&Vector<bool>>, op, false, descr, phase)
}

/// `z <- x (+) y` under monoid semantics: a lone operand is taken as-is
pub fn e_wise_apply_monoid<T: Numeric, Mo: Monoid<T>>(
    z: &mut Vector<T>,
    x: Operand<'_, T>,
    y: Operand<'_, T>,
    monoid: Mo,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    apply_dispatch(z, x, y, None::<&Vector<bool>>, monoid, true, descr, phase)
}

pub fn e_wise_apply_op_masked<T: Numeric, O: BinaryOperator<T>, M: Numeric>(
    z: &mut Vector<T>,
    mask: &Vector<M>,
    x: Operand<'_, T>,
    y: Operand<'_, T>,
    op: O,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    apply_dispatch(z, x, y, Some(mask), op, false, descr, phase)
}

pub fn e_wise_apply_monoid_masked<T: Numeric, Mo: Monoid<T>, M: Numeric>(
    z: &mut Vector<T>,
    mask: &Vector<M>,
    x: Operand<'_, T>,
    y: Operand<'_, T>,
    monoid: Mo,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    apply_dispatch(z, x, y, Some(mask), monoid, true, descr, phase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Context;
    use weft_algebra::{Plus, Times};

    #[test]
    fn test_apply_dense_vectors() {
        let ctx = Context::new();
        let x = Vector::from_slice(&ctx, &[1.0f64, 2.0, 3.0]);
        let y = Vector::from_slice(&ctx, &[10.0f64, 20.0, 30.0]);
        let mut z: Vector<f64> = Vector::new(&ctx, 3);
        e_wise_apply_op(
            &mut z,
            Operand::Vector(&x),
            Operand::Vector(&y),
            Plus,
            Descriptor::NO_OPERATION,
            Phase::Execute,
        )
        .unwrap();
        assert_eq!(z.to_entries().unwrap(), vec![(0, 11.0), (1, 22.0), (2, 33.0)]);
    }

    #[test]
    fn test_apply_op_intersection() {
        let ctx = Context::new();
        let x = Vector::from_entries(&ctx, 6, &[(0, 1i64), (2, 2), (4, 4)]).unwrap();
        let y = Vector::from_entries(&ctx, 6, &[(2, 10i64), (3, 30)]).unwrap();
        let mut z: Vector<i64> = Vector::new(&ctx, 6);
        e_wise_apply_op(
            &mut z,
            Operand::Vector(&x),
            Operand::Vector(&y),
            Times,
            Descriptor::NO_OPERATION,
            Phase::Execute,
        )
        .unwrap();
        assert_eq!(z.to_entries().unwrap(), vec![(2, 20)]);
    }

    #[test]
    fn test_apply_monoid_union() {
        let ctx = Context::new();
        let x = Vector::from_entries(&ctx, 6, &[(0, 1i64), (2, 2)]).unwrap();
        let y = Vector::from_entries(&ctx, 6, &[(2, 10i64), (5, 50)]).unwrap();
        let mut z: Vector<i64> = Vector::new(&ctx, 6);
        e_wise_apply_monoid(
            &mut z,
            Operand::Vector(&x),
            Operand::Vector(&y),
            Plus,
            Descriptor::NO_OPERATION,
            Phase::Execute,
        )
        .unwrap();
        assert_eq!(z.to_entries().unwrap(), vec![(0, 1), (2, 12), (5, 50)]);
    }

    #[test]
    fn test_apply_discards_old_output() {
        let ctx = Context::new();
        let x = Vector::from_entries(&ctx, 4, &[(1, 2i64)]).unwrap();
        let y = Vector::from_entries(&ctx, 4, &[(1, 3i64)]).unwrap();
        let mut z = Vector::from_entries(&ctx, 4, &[(0, 99i64), (3, 99)]).unwrap();
        e_wise_apply_op(
            &mut z,
            Operand::Vector(&x),
            Operand::Vector(&y),
            Plus,
            Descriptor::NO_OPERATION,
            Phase::Execute,
        )
        .unwrap();
        assert_eq!(z.to_entries().unwrap(), vec![(1, 5)]);
    }

    #[test]
    fn test_masked_apply_scalar_grows_output() {
        let ctx = Context::new();
        // scenario: z empty, x = {1@0, 2@3}, y = 10 scalar, structural mask
        // on {0,1,2,3}, operator +
        let x = Vector::from_entries(&ctx, 8, &[(0, 1i64), (3, 2)]).unwrap();
        let mask =
            Vector::from_entries(&ctx, 8, &[(0, true), (1, true), (2, true), (3, true)]).unwrap();
        let mut z: Vector<i64> = Vector::new(&ctx, 8);
        e_wise_apply_op_masked(
            &mut z,
            &mask,
            Operand::Vector(&x),
            Operand::Scalar(10),
            Plus,
            Descriptor::STRUCTURAL,
            Phase::Execute,
        )
        .unwrap();
        assert_eq!(z.nnz().unwrap(), 2);
        assert_eq!(z.to_entries().unwrap(), vec![(0, 11), (3, 12)]);
    }

    #[test]
    fn test_apply_size_mismatch() {
        let ctx = Context::new();
        let x = Vector::from_slice(&ctx, &[1.0f64, 2.0]);
        let mut z: Vector<f64> = Vector::new(&ctx, 3);
        assert!(e_wise_apply_op(
            &mut z,
            Operand::Vector(&x),
            Operand::Scalar(1.0),
            Plus,
            Descriptor::NO_OPERATION,
            Phase::Execute,
        )
        .is_err());
    }
}
