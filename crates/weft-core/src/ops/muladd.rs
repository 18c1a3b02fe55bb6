//! Semiring element-wise primitives: `eWiseAdd`, `eWiseMul`, `eWiseMulAdd`
//!
//! All three funnel into the multiply-add dispatch stage computing
//! `z[i] <- z[i] (+) ((a[i] (x) x[i]) (+) y[i])` in place. `eWiseMul` marks
//! `y` as the additive identity (phase 2 elided); `eWiseAdd` fixes `a` to
//! the multiplicative identity. Path selection between the mul-driven
//! two-phase loop and the mask-driven loop follows the estimated element
//! access counts of each.

use crate::descriptor::{Descriptor, Phase};
use crate::error::Result;
use crate::kernels::muladd::{
    mask_loop_cost, mul_add_dense_tile, mul_add_mask_driven_tile, mul_add_mul_driven_tile,
    mul_loop_cost,
};
use crate::kernels::{join_local, local_view, LocalView};
use crate::stage::{Opcode, SharedPtr, StageFn, StageSpec, VecOperand};
use crate::vector::Vector;
use crate::wrapper::{ScalarSource, SourceView, VectorSource};
use weft_algebra::{Numeric, Semiring};

use super::{check_mask, Operand};

#[allow(clippy::too_many_arguments)]
fn build_mul_add<T, R, SA, SX, SY, M>(
    z: &mut Vector<T>,
    sa: SA,
    a_meta: Option<VecOperand>,
    sx: SX,
    x_meta: Option<VecOperand>,
    sy: SY,
    y_meta: Option<VecOperand>,
    mask: Option<&Vector<M>>,
    ring: R,
    y_zero: bool,
    descr: Descriptor,
) -> Result
where
    T: Numeric,
    R: Semiring<T>,
    SA: SourceView<T>,
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

    let func: StageFn = Box::new(move |pipe, lo, hi| {
        let dense_all = dense_descr || pipe.all_already_dense();
        let mut lz = local_view(pipe, dense_all, z_coords.const_ptr(), lo, hi);
        let la = sa.local(pipe, dense_all, lo, hi);
        let lx = sx.local(pipe, dense_all, lo, hi);
        let ly = sy.local(pipe, dense_all, lo, hi);

        match &mask_parts {
            None => {
                let everything_dense = lz.is_dense()
                    && la.is_dense()
                    && lx.is_dense()
                    && (y_zero || ly.is_dense());
                if everything_dense {
                    mul_add_dense_tile(lo, hi, z_vals, &sa, &sx, &sy, &ring, y_zero);
                } else {
                    mul_add_mul_driven_tile(
                        lo,
                        hi,
                        z_vals,
                        &mut lz,
                        &sa,
                        &la,
                        &sx,
                        &lx,
                        &sy,
                        &ly,
                        None::<(SharedPtr<M>, &LocalView)>,
                        &ring,
                        y_zero,
                        descr,
                    );
                }
            }
            Some((mv, mc)) => {
                let lm = local_view(pipe, dense_all, mc.const_ptr(), lo, hi);
                let mul_nnz = la.nonzeroes().min(lx.nonzeroes());
                let y_nnz = if y_zero { 0 } else { ly.nonzeroes() };
                if mask_loop_cost(y_zero, lm.nonzeroes()) < mul_loop_cost(true, mul_nnz, y_nnz) {
                    mul_add_mask_driven_tile(
                        lo,
                        hi,
                        z_vals,
                        &mut lz,
                        &sa,
                        &la,
                        &sx,
                        &lx,
                        &sy,
                        &ly,
                        *mv,
                        &lm,
                        &ring,
                        y_zero,
                        descr,
                    );
                } else {
                    mul_add_mul_driven_tile(
                        lo,
                        hi,
                        z_vals,
                        &mut lz,
                        &sa,
                        &la,
                        &sx,
                        &lx,
                        &sy,
                        &ly,
                        Some((*mv, &lm)),
                        &ring,
                        y_zero,
                        descr,
                    );
                }
            }
        }

        if !dense_all {
            join_local(z_coords.const_ptr(), &lz, lo, hi);
        }
        Ok(())
    });

    let mut inputs = [None; 4];
    inputs[0] = a_meta;
    inputs[1] = x_meta;
    inputs[2] = y_meta;
    if let Some(m) = mask {
        inputs[3] = Some(m.operand());
    }

    z.context().clone().add_stage(StageSpec {
        func,
        opcode: Opcode::EWiseMulAddDispatch,
        n,
        data_bytes: std::mem::size_of::<T>(),
        dense_descr,
        dense_mask,
        outputs: [Some(z.operand()), None],
        inputs,
        matrix: None,
    })
}

struct SourceParts<T: Numeric> {
    scalar: Option<T>,
    vector: Option<(SharedPtr<T>, crate::stage::CoordsHandle, VecOperand)>,
}

fn parts<T: Numeric>(op: &Operand<'_, T>) -> SourceParts<T> {
    match op {
        Operand::Scalar(v) => SourceParts {
            scalar: Some(*v),
            vector: None,
        },
        Operand::Vector(v) => SourceParts {
            scalar: None,
            vector: Some((v.values_ptr(), v.coords_handle(), v.operand())),
        },
    }
}

macro_rules! with_source {
    ($parts:expr, |$src:ident, $meta:ident| $body:expr) => {
        match $parts {
            SourceParts {
                scalar: Some(v), ..
            } => {
                let $src = ScalarSource(v);
                let $meta: Option<VecOperand> = None;
                $body
            }
            SourceParts {
                vector: Some((vals, coords, meta)),
                ..
            } => {
                let $src = VectorSource {
                    values: vals,
                    coords,
                };
                let $meta = Some(meta);
                $body
            }
            _ => unreachable!(),
        }
    };
}

#[allow(clippy::too_many_arguments)]
fn mul_add_dispatch<T, R, M>(
    z: &mut Vector<T>,
    a: Operand<'_, T>,
    x: Operand<'_, T>,
    y: Operand<'_, T>,
    mask: Option<&Vector<M>>,
    ring: R,
    y_zero: bool,
    descr: Descriptor,
    phase: Phase,
) -> Result
where
    T: Numeric,
    R: Semiring<T>,
    M: Numeric,
{
    let n = z.size();
    a.check(n, z.context())?;
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

    let pa = parts(&a);
    let px = parts(&x);
    let py = parts(&y);
    with_source!(pa, |sa, a_meta| {
        with_source!(px, |sx, x_meta| {
            with_source!(py, |sy, y_meta| {
                build_mul_add(
                    z, sa, a_meta, sx, x_meta, sy, y_meta, mask, ring, y_zero, descr,
                )
            })
        })
    })
}

/// `z[i] <- z[i] (+) ((a[i] (x) x[i]) (+) y[i])`
pub fn e_wise_mul_add<T: Numeric, R: Semiring<T>>(
    z: &mut Vector<T>,
    a: Operand<'_, T>,
    x: Operand<'_, T>,
    y: Operand<'_, T>,
    ring: R,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    mul_add_dispatch(z, a, x, y, None::<&Vector<bool>>, ring, false, descr, phase)
}

pub fn e_wise_mul_add_masked<T: Numeric, R: Semiring<T>, M: Numeric>(
    z: &mut Vector<T>,
    mask: &Vector<M>,
    a: Operand<'_, T>,
    x: Operand<'_, T>,
    y: Operand<'_, T>,
    ring: R,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    mul_add_dispatch(z, a, x, y, Some(mask), ring, false, descr, phase)
}

/// `z[i] <- z[i] (+) (a[i] (x) x[i])`
pub fn e_wise_mul<T: Numeric, R: Semiring<T>>(
    z: &mut Vector<T>,
    a: Operand<'_, T>,
    x: Operand<'_, T>,
    ring: R,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    let zero = {
        use weft_algebra::Monoid;
        ring.add().identity()
    };
    mul_add_dispatch(
        z,
        a,
        x,
        Operand::Scalar(zero),
        None::<&Vector<bool>>,
        ring,
        true,
        descr,
        phase,
    )
}

/// `z[i] <- z[i] (+) (x[i] (+) y[i])`
pub fn e_wise_add<T: Numeric, R: Semiring<T>>(
    z: &mut Vector<T>,
    x: Operand<'_, T>,
    y: Operand<'_, T>,
    ring: R,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    let one = ring.one();
    mul_add_dispatch(
        z,
        Operand::Scalar(one),
        x,
        y,
        None::<&Vector<bool>>,
        ring,
        false,
        descr,
        phase,
    )
}

pub fn e_wise_add_masked<T: Numeric, R: Semiring<T>, M: Numeric>(
    z: &mut Vector<T>,
    mask: &Vector<M>,
    x: Operand<'_, T>,
    y: Operand<'_, T>,
    ring: R,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    let one = ring.one();
    mul_add_dispatch(
        z,
        Operand::Scalar(one),
        x,
        y,
        Some(mask),
        ring,
        false,
        descr,
        phase,
    )
}

pub fn e_wise_mul_masked<T: Numeric, R: Semiring<T>, M: Numeric>(
    z: &mut Vector<T>,
    mask: &Vector<M>,
    a: Operand<'_, T>,
    x: Operand<'_, T>,
    ring: R,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    let zero = {
        use weft_algebra::Monoid;
        ring.add().identity()
    };
    mul_add_dispatch(z, a, x, Operand::Scalar(zero), Some(mask), ring, true, descr, phase)
}
