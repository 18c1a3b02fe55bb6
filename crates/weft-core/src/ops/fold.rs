//! Fold primitives
//!
//! Three shapes: a vector folded into a scalar, a scalar folded into a
//! vector, and a vector folded into a vector. Each has `foldl`/`foldr`
//! direction variants and masked variants; the into-vector shapes exist for
//! both monoids (unassigned output positions become assignments) and bare
//! operators (unassigned positions are skipped).
//!
//! The into-scalar folds return a scalar, so they trigger execution of the
//! pipeline they joined - including any earlier fused stages.

use std::sync::Arc;

use crate::descriptor::{Descriptor, Phase};
use crate::error::Result;
use crate::kernels::fold::{
    fold_scalar_tile, fold_vector_into_vector_tile, fold_vector_tile, OnUnassigned,
};
use crate::kernels::{join_local, local_view, LocalView, PartialSlots};
use crate::stage::{Opcode, SharedPtr, StageFn, StageSpec};
use crate::vector::Vector;
use weft_algebra::{BinaryOperator, Monoid, Numeric};

use super::{check_mask, check_vector};

// ---- vector -> scalar ----------------------------------------------------

fn fold_to_scalar<T, Mo, M>(
    alpha: &mut T,
    x: &Vector<T>,
    mask: Option<&Vector<M>>,
    monoid: Mo,
    left: bool,
    descr: Descriptor,
    phase: Phase,
) -> Result
where
    T: Numeric,
    Mo: Monoid<T>,
    M: Numeric,
{
    let n = x.size();
    let masked = check_mask(mask, n, x.context())?;
    let mask = if masked { mask } else { None };
    if phase.is_resize() {
        return Ok(());
    }
    if n == 0 {
        return Ok(());
    }

    let slots = Arc::new(PartialSlots::new(
        x.context().config().max_tiles(n),
        monoid.identity(),
    ));
    let tile_slots = Arc::clone(&slots);

    let x_vals = x.values_ptr();
    let x_coords = x.coords_handle();
    let mask_parts = mask.map(|m| (m.values_ptr(), m.coords_handle()));
    let dense_descr = descr.dense();
    let dense_mask = mask.map(|m| m.coords().is_dense()).unwrap_or(true);

    let func: StageFn = Box::new(move |pipe, lo, hi| {
        let dense_all = dense_descr || pipe.all_already_dense();
        let lx = local_view(pipe, dense_all, x_coords.const_ptr(), lo, hi);
        let partial = match &mask_parts {
            None => fold_vector_tile(
                lo,
                hi,
                x_vals,
                &lx,
                None::<(SharedPtr<M>, &LocalView)>,
                &monoid,
                left,
                descr,
            ),
            Some((mv, mc)) => {
                let lm = local_view(pipe, dense_all, mc.const_ptr(), lo, hi);
                fold_vector_tile(lo, hi, x_vals, &lx, Some((*mv, &lm)), &monoid, left, descr)
            }
        };
        let tile = pipe.model().tile_of(lo);
        unsafe { tile_slots.store(tile, partial) };
        Ok(())
    });

    let mut inputs = [None; 4];
    inputs[0] = Some(x.operand());
    if let Some(m) = mask {
        inputs[1] = Some(m.operand());
    }

    x.context().clone().add_stage(StageSpec {
        func,
        opcode: Opcode::FoldVectorToScalar,
        n,
        data_bytes: std::mem::size_of::<T>(),
        dense_descr,
        dense_mask,
        outputs: [None, None],
        inputs,
        matrix: None,
    })?;

    // the pipeline has executed; combine the per-tile partials
    let total = slots.fold(monoid.identity(), |a, b| monoid.apply(a, b));
    *alpha = if left {
        monoid.apply(*alpha, total)
    } else {
        monoid.apply(total, *alpha)
    };
    Ok(())
}

/// `alpha <- alpha (+) reduce(x)`
pub fn foldl_into_scalar<T: Numeric, Mo: Monoid<T>>(
    alpha: &mut T,
    x: &Vector<T>,
    monoid: Mo,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    fold_to_scalar(alpha, x, None::<&Vector<bool>>, monoid, true, descr, phase)
}

/// `alpha <- reduce(x) (+) alpha`
pub fn foldr_into_scalar<T: Numeric, Mo: Monoid<T>>(
    alpha: &mut T,
    x: &Vector<T>,
    monoid: Mo,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    fold_to_scalar(alpha, x, None::<&Vector<bool>>, monoid, false, descr, phase)
}

pub fn foldl_into_scalar_masked<T: Numeric, Mo: Monoid<T>, M: Numeric>(
    alpha: &mut T,
    x: &Vector<T>,
    mask: &Vector<M>,
    monoid: Mo,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    fold_to_scalar(alpha, x, Some(mask), monoid, true, descr, phase)
}

pub fn foldr_into_scalar_masked<T: Numeric, Mo: Monoid<T>, M: Numeric>(
    alpha: &mut T,
    x: &Vector<T>,
    mask: &Vector<M>,
    monoid: Mo,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    fold_to_scalar(alpha, x, Some(mask), monoid, false, descr, phase)
}

// ---- scalar -> vector ----------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn fold_scalar_impl<T, O, M>(
    x: &mut Vector<T>,
    beta: T,
    op: O,
    on_unassigned: OnUnassigned,
    left: bool,
    mask: Option<&Vector<M>>,
    descr: Descriptor,
    phase: Phase,
) -> Result
where
    T: Numeric,
    O: BinaryOperator<T>,
    M: Numeric,
{
    let n = x.size();
    let masked = check_mask(mask, n, x.context())?;
    let mask = if masked { mask } else { None };
    if phase.is_resize() {
        return Ok(());
    }
    if n == 0 {
        return Ok(());
    }

    let x_vals = x.values_mut_ptr();
    let x_coords = x.coords_handle();
    let mask_parts = mask.map(|m| (m.values_ptr(), m.coords_handle()));
    let dense_descr = descr.dense();
    let dense_mask = mask.map(|m| m.coords().is_dense()).unwrap_or(true);

    let func: StageFn = Box::new(move |pipe, lo, hi| {
        let dense_all = dense_descr || pipe.all_already_dense();
        let mut lx = local_view(pipe, dense_all, x_coords.const_ptr(), lo, hi);
        match &mask_parts {
            None => fold_scalar_tile(
                lo,
                hi,
                x_vals,
                &mut lx,
                beta,
                &op,
                left,
                on_unassigned,
                None::<(SharedPtr<M>, &LocalView)>,
                descr,
            ),
            Some((mv, mc)) => {
                let lm = local_view(pipe, dense_all, mc.const_ptr(), lo, hi);
                fold_scalar_tile(
                    lo,
                    hi,
                    x_vals,
                    &mut lx,
                    beta,
                    &op,
                    left,
                    on_unassigned,
                    Some((*mv, &lm)),
                    descr,
                );
            }
        }
        if !dense_all {
            join_local(x_coords.const_ptr(), &lx, lo, hi);
        }
        Ok(())
    });

    let opcode = if mask.is_some() {
        Opcode::FoldMaskedScalarToVector
    } else {
        Opcode::FoldScalarToVector
    };
    let mut inputs = [None; 4];
    if let Some(m) = mask {
        inputs[0] = Some(m.operand());
    }

    x.context().clone().add_stage(StageSpec {
        func,
        opcode,
        n,
        data_bytes: std::mem::size_of::<T>(),
        dense_descr,
        dense_mask,
        outputs: [Some(x.operand()), None],
        inputs,
        matrix: None,
    })
}

/// `x[i] <- x[i] (+) beta`; unassigned positions become `beta`
pub fn foldl_scalar<T: Numeric, Mo: Monoid<T>>(
    x: &mut Vector<T>,
    beta: T,
    monoid: Mo,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    fold_scalar_impl(
        x,
        beta,
        monoid,
        OnUnassigned::Assign,
        true,
        None::<&Vector<bool>>,
        descr,
        phase,
    )
}

/// `x[i] <- x[i] (op) beta` on assigned positions only
pub fn foldl_scalar_op<T: Numeric, O: BinaryOperator<T>>(
    x: &mut Vector<T>,
    beta: T,
    op: O,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    fold_scalar_impl(
        x,
        beta,
        op,
        OnUnassigned::Skip,
        true,
        None::<&Vector<bool>>,
        descr,
        phase,
    )
}

/// `x[i] <- beta (+) x[i]`; unassigned positions become `beta`
pub fn foldr_scalar<T: Numeric, Mo: Monoid<T>>(
    beta: T,
    x: &mut Vector<T>,
    monoid: Mo,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    fold_scalar_impl(
        x,
        beta,
        monoid,
        OnUnassigned::Assign,
        false,
        None::<&Vector<bool>>,
        descr,
        phase,
    )
}

pub fn foldl_scalar_masked<T: Numeric, Mo: Monoid<T>, M: Numeric>(
    x: &mut Vector<T>,
    mask: &Vector<M>,
    beta: T,
    monoid: Mo,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    fold_scalar_impl(
        x,
        beta,
        monoid,
        OnUnassigned::Assign,
        true,
        Some(mask),
        descr,
        phase,
    )
}

pub fn foldr_scalar_masked<T: Numeric, Mo: Monoid<T>, M: Numeric>(
    beta: T,
    x: &mut Vector<T>,
    mask: &Vector<M>,
    monoid: Mo,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    fold_scalar_impl(
        x,
        beta,
        monoid,
        OnUnassigned::Assign,
        false,
        Some(mask),
        descr,
        phase,
    )
}

// ---- vector -> vector ----------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn fold_vectors_impl<T, O, M>(
    y: &mut Vector<T>,
    x: &Vector<T>,
    op: O,
    on_unassigned: OnUnassigned,
    left: bool,
    mask: Option<&Vector<M>>,
    descr: Descriptor,
    phase: Phase,
) -> Result
where
    T: Numeric,
    O: BinaryOperator<T>,
    M: Numeric,
{
    let n = y.size();
    check_vector(x, n, y.context())?;
    let masked = check_mask(mask, n, y.context())?;
    let mask = if masked { mask } else { None };
    if phase.is_resize() {
        return Ok(());
    }
    if n == 0 {
        return Ok(());
    }

    let y_vals = y.values_mut_ptr();
    let y_coords = y.coords_handle();
    let x_vals = x.values_ptr();
    let x_coords = x.coords_handle();
    let mask_parts = mask.map(|m| (m.values_ptr(), m.coords_handle()));
    let dense_descr = descr.dense();
    let dense_mask = mask.map(|m| m.coords().is_dense()).unwrap_or(true);

    let func: StageFn = Box::new(move |pipe, lo, hi| {
        let dense_all = dense_descr || pipe.all_already_dense();
        let mut ly = local_view(pipe, dense_all, y_coords.const_ptr(), lo, hi);
        let lx = local_view(pipe, dense_all, x_coords.const_ptr(), lo, hi);
        match &mask_parts {
            None => fold_vector_into_vector_tile(
                lo,
                hi,
                y_vals,
                &mut ly,
                x_vals,
                &lx,
                &op,
                left,
                on_unassigned,
                None::<(SharedPtr<M>, &LocalView)>,
                descr,
            ),
            Some((mv, mc)) => {
                let lm = local_view(pipe, dense_all, mc.const_ptr(), lo, hi);
                fold_vector_into_vector_tile(
                    lo,
                    hi,
                    y_vals,
                    &mut ly,
                    x_vals,
                    &lx,
                    &op,
                    left,
                    on_unassigned,
                    Some((*mv, &lm)),
                    descr,
                );
            }
        }
        if !dense_all {
            join_local(y_coords.const_ptr(), &ly, lo, hi);
        }
        Ok(())
    });

    let opcode = if mask.is_some() {
        Opcode::FoldMaskedVectorToVector
    } else {
        Opcode::FoldVectorToVector
    };
    let mut inputs = [None; 4];
    inputs[0] = Some(x.operand());
    if let Some(m) = mask {
        inputs[1] = Some(m.operand());
    }

    y.context().clone().add_stage(StageSpec {
        func,
        opcode,
        n,
        data_bytes: std::mem::size_of::<T>(),
        dense_descr,
        dense_mask,
        outputs: [Some(y.operand()), None],
        inputs,
        matrix: None,
    })
}

/// `y[i] <- y[i] (+) x[i]` where `x` is assigned; grows `y`'s pattern
pub fn foldl_vectors<T: Numeric, Mo: Monoid<T>>(
    y: &mut Vector<T>,
    x: &Vector<T>,
    monoid: Mo,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    fold_vectors_impl(
        y,
        x,
        monoid,
        OnUnassigned::Assign,
        true,
        None::<&Vector<bool>>,
        descr,
        phase,
    )
}

/// `y[i] <- y[i] (op) x[i]` where both are assigned
pub fn foldl_vectors_op<T: Numeric, O: BinaryOperator<T>>(
    y: &mut Vector<T>,
    x: &Vector<T>,
    op: O,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    fold_vectors_impl(
        y,
        x,
        op,
        OnUnassigned::Skip,
        true,
        None::<&Vector<bool>>,
        descr,
        phase,
    )
}

/// `y[i] <- x[i] (+) y[i]` where `x` is assigned; grows `y`'s pattern
pub fn foldr_vectors<T: Numeric, Mo: Monoid<T>>(
    x: &Vector<T>,
    y: &mut Vector<T>,
    monoid: Mo,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    fold_vectors_impl(
        y,
        x,
        monoid,
        OnUnassigned::Assign,
        false,
        None::<&Vector<bool>>,
        descr,
        phase,
    )
}

pub fn foldl_vectors_masked<T: Numeric, Mo: Monoid<T>, M: Numeric>(
    y: &mut Vector<T>,
    mask: &Vector<M>,
    x: &Vector<T>,
    monoid: Mo,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    fold_vectors_impl(
        y,
        x,
        monoid,
        OnUnassigned::Assign,
        true,
        Some(mask),
        descr,
        phase,
    )
}

pub fn foldr_vectors_masked<T: Numeric, Mo: Monoid<T>, M: Numeric>(
    x: &Vector<T>,
    y: &mut Vector<T>,
    mask: &Vector<M>,
    monoid: Mo,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    fold_vectors_impl(
        y,
        x,
        monoid,
        OnUnassigned::Assign,
        false,
        Some(mask),
        descr,
        phase,
    )
}
