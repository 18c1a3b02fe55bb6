//! Dot product over a semiring or a (monoid, operator) pair
//!
//! Produces a scalar, so the stage executes its pipeline immediately; any
//! fused producer stages of the inputs run in the same tiles.

use std::sync::Arc;

use crate::descriptor::{Descriptor, Phase};
use crate::error::{Error, Result};
use crate::kernels::dot::dot_tile;
use crate::kernels::{local_view, PartialSlots};
use crate::stage::{Opcode, StageFn, StageSpec};
use crate::vector::Vector;
use weft_algebra::{BinaryOperator, Monoid, Numeric, Semiring};

/// `out <- out (+) <x, y>` under the given additive monoid and
/// multiplicative operator
pub fn dot_with<T, AM, MO>(
    out: &mut T,
    x: &Vector<T>,
    y: &Vector<T>,
    add: AM,
    mul: MO,
    descr: Descriptor,
    phase: Phase,
) -> Result
where
    T: Numeric,
    AM: Monoid<T>,
    MO: BinaryOperator<T>,
{
    let n = x.size();
    if y.size() != n {
        return Err(Error::Mismatch);
    }
    if !y.context().same_scheduler(x.context()) {
        return Err(Error::Illegal);
    }
    if phase.is_resize() {
        return Ok(());
    }
    if n == 0 {
        return Ok(());
    }

    let slots = Arc::new(PartialSlots::new(
        x.context().config().max_tiles(n),
        add.identity(),
    ));
    let tile_slots = Arc::clone(&slots);

    let x_vals = x.values_ptr();
    let x_coords = x.coords_handle();
    let y_vals = y.values_ptr();
    let y_coords = y.coords_handle();
    let dense_descr = descr.dense();

    let func: StageFn = Box::new(move |pipe, lo, hi| {
        let dense_all = dense_descr || pipe.all_already_dense();
        let lx = local_view(pipe, dense_all, x_coords.const_ptr(), lo, hi);
        let ly = local_view(pipe, dense_all, y_coords.const_ptr(), lo, hi);
        let partial = dot_tile(lo, hi, x_vals, &lx, y_vals, &ly, &add, &mul);
        let tile = pipe.model().tile_of(lo);
        unsafe { tile_slots.store(tile, partial) };
        Ok(())
    });

    x.context().clone().add_stage(StageSpec {
        func,
        opcode: Opcode::DotGeneric,
        n,
        data_bytes: std::mem::size_of::<T>(),
        dense_descr,
        dense_mask: true,
        outputs: [None, None],
        inputs: [Some(x.operand()), Some(y.operand()), None, None],
        matrix: None,
    })?;

    let total = slots.fold(add.identity(), |a, b| add.apply(a, b));
    *out = add.apply(*out, total);
    Ok(())
}

/// `out <- out (+) <x, y>` over a semiring
pub fn dot<T: Numeric, R: Semiring<T>>(
    out: &mut T,
    x: &Vector<T>,
    y: &Vector<T>,
    ring: R,
    descr: Descriptor,
    phase: Phase,
) -> Result {
    dot_with(out, x, y, ring.add(), ring.mul(), descr, phase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Context;
    use weft_algebra::PlusTimes;

    #[test]
    fn test_dense_dot() {
        let ctx = Context::new();
        let x = Vector::from_slice(&ctx, &[1.0f64, 2.0, 3.0]);
        let y = Vector::from_slice(&ctx, &[4.0f64, 5.0, 6.0]);
        let mut s = 0.0;
        dot(&mut s, &x, &y, PlusTimes, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
        assert_eq!(s, 32.0);
    }

    #[test]
    fn test_sparse_dot_intersection() {
        let ctx = Context::new();
        let x = Vector::from_entries(&ctx, 10, &[(1, 2i64), (5, 3), (9, 4)]).unwrap();
        let y = Vector::from_entries(&ctx, 10, &[(5, 10i64), (6, 100)]).unwrap();
        let mut s = 0i64;
        dot(&mut s, &x, &y, PlusTimes, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
        assert_eq!(s, 30);
    }

    #[test]
    fn test_dot_mismatch() {
        let ctx = Context::new();
        let x = Vector::from_slice(&ctx, &[1.0f64, 2.0]);
        let y = Vector::from_slice(&ctx, &[1.0f64, 2.0, 3.0]);
        let mut s = 0.0;
        assert_eq!(
            dot(&mut s, &x, &y, PlusTimes, Descriptor::NO_OPERATION, Phase::Execute).unwrap_err(),
            Error::Mismatch
        );
        assert_eq!(s, 0.0);
    }

    #[test]
    fn test_dot_accumulates_into_out() {
        let ctx = Context::new();
        let x = Vector::from_slice(&ctx, &[1i64, 1]);
        let y = Vector::from_slice(&ctx, &[2i64, 2]);
        let mut s = 100i64;
        dot(&mut s, &x, &y, PlusTimes, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
        assert_eq!(s, 104);
    }
}
