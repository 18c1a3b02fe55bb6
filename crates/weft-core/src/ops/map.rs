//! In-place map and user-lambda primitives
//!
//! Both preserve the sparsity pattern: callbacks run at assigned positions
//! of the governing vector and may not create new ones. Lambda stages
//! record every touched vector as written, so they fence correctly against
//! other stages, and may only fuse with stages of the same governing
//! length.

use crate::descriptor::Phase;
use crate::error::{Error, Result};
use crate::kernels::map::{lambda_binary_tile, lambda_tile, map_tile};
use crate::kernels::local_view;
use crate::stage::{LambdaSpec, Opcode, StageFn, StageSpec};
use crate::vector::Vector;
use weft_algebra::Numeric;

/// Apply `f: T -> T` in place at every assigned position of `x`
pub fn e_wise_map<T, F>(f: F, x: &mut Vector<T>, phase: Phase) -> Result
where
    T: Numeric,
    F: Fn(T) -> T + Send + Sync + 'static,
{
    if phase.is_resize() {
        return Ok(());
    }
    let n = x.size();
    if n == 0 {
        return Ok(());
    }

    let x_vals = x.values_mut_ptr();
    let x_coords = x.coords_handle();

    let func: StageFn = Box::new(move |pipe, lo, hi| {
        let dense_all = pipe.all_already_dense();
        let lx = local_view(pipe, dense_all, x_coords.const_ptr(), lo, hi);
        map_tile(lo, hi, x_vals, &lx, &f);
        Ok(())
    });

    x.context().clone().add_stage(StageSpec {
        func,
        opcode: Opcode::EWiseMap,
        n,
        data_bytes: std::mem::size_of::<T>(),
        dense_descr: false,
        dense_mask: true,
        outputs: [Some(x.operand()), None],
        inputs: [None, None, None, None],
        matrix: None,
    })
}

/// Run a per-index callback with mutable element access at every assigned
/// position of `x`
pub fn e_wise_lambda<T, F>(f: F, x: &mut Vector<T>, phase: Phase) -> Result
where
    T: Numeric,
    F: Fn(usize, &mut T) + Send + Sync + 'static,
{
    if phase.is_resize() {
        return Ok(());
    }
    let n = x.size();
    if n == 0 {
        return Ok(());
    }

    let x_vals = x.values_mut_ptr();
    let x_coords = x.coords_handle();

    let func: StageFn = Box::new(move |pipe, lo, hi| {
        let dense_all = pipe.all_already_dense();
        let lx = local_view(pipe, dense_all, x_coords.const_ptr(), lo, hi);
        lambda_tile(lo, hi, x_vals, &lx, &f);
        Ok(())
    });

    x.context().clone().add_lambda_stage(LambdaSpec {
        func,
        opcode: Opcode::EWiseLambda,
        n,
        data_bytes: std::mem::size_of::<T>(),
        dense_descr: false,
        vectors: vec![x.operand()],
        governing: Some(x.operand()),
    })
}

/// Binary lambda: the callback touches `x[i]` and `y[i]` at every position
/// assigned in `x` (the governing vector)
pub fn e_wise_lambda_binary<T, U, F>(
    f: F,
    x: &mut Vector<T>,
    y: &mut Vector<U>,
    phase: Phase,
) -> Result
where
    T: Numeric,
    U: Numeric,
    F: Fn(usize, &mut T, &mut U) + Send + Sync + 'static,
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

    let x_vals = x.values_mut_ptr();
    let x_coords = x.coords_handle();
    let y_vals = y.values_mut_ptr();

    let func: StageFn = Box::new(move |pipe, lo, hi| {
        let dense_all = pipe.all_already_dense();
        let lx = local_view(pipe, dense_all, x_coords.const_ptr(), lo, hi);
        lambda_binary_tile(lo, hi, x_vals, y_vals, &lx, &f);
        Ok(())
    });

    let data_bytes = std::mem::size_of::<T>().max(std::mem::size_of::<U>());
    x.context().clone().add_lambda_stage(LambdaSpec {
        func,
        opcode: Opcode::EWiseLambda,
        n,
        data_bytes,
        dense_descr: false,
        vectors: vec![x.operand(), y.operand()],
        governing: Some(x.operand()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Context;

    #[test]
    fn test_map_in_place() {
        let ctx = Context::new();
        let mut x = Vector::from_entries(&ctx, 6, &[(1, 2.0f64), (4, 3.0)]).unwrap();
        e_wise_map(|v| v * v, &mut x, Phase::Execute).unwrap();
        assert_eq!(x.to_entries().unwrap(), vec![(1, 4.0), (4, 9.0)]);
    }

    #[test]
    fn test_map_preserves_pattern() {
        let ctx = Context::new();
        let mut x = Vector::from_entries(&ctx, 6, &[(2, 1.0f64)]).unwrap();
        e_wise_map(|v| v + 1.0, &mut x, Phase::Execute).unwrap();
        assert_eq!(x.nnz().unwrap(), 1);
        assert_eq!(x.get(3).unwrap(), None);
    }

    #[test]
    fn test_lambda_sees_global_indices() {
        let ctx = Context::new();
        let mut x = Vector::from_slice(&ctx, &[0i64; 5]);
        e_wise_lambda(|i, v| *v = 2 * i as i64, &mut x, Phase::Execute).unwrap();
        assert_eq!(
            x.to_entries().unwrap(),
            vec![(0, 0), (1, 2), (2, 4), (3, 6), (4, 8)]
        );
    }

    #[test]
    fn test_lambda_binary() {
        let ctx = Context::new();
        let mut x = Vector::from_slice(&ctx, &[1.0f64, 2.0, 3.0]);
        let mut y = Vector::from_slice(&ctx, &[0i64; 3]);
        e_wise_lambda_binary(
            |_i, xv, yv| {
                *yv = *xv as i64;
                *xv *= 10.0;
            },
            &mut x,
            &mut y,
            Phase::Execute,
        )
        .unwrap();
        assert_eq!(x.to_entries().unwrap(), vec![(0, 10.0), (1, 20.0), (2, 30.0)]);
        assert_eq!(y.to_entries().unwrap(), vec![(0, 1), (1, 2), (2, 3)]);
    }
}
