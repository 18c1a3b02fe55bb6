//! Pack and split pair vectors
//!
//! `zip` packs two equally sized vectors into a vector of pairs; `unzip`
//! splits a pair vector back out. Inputs must be dense (checked per tile at
//! execution, answered with `Illegal`), and the outputs are guaranteed
//! dense on completion.

use crate::descriptor::Phase;
use crate::error::{Error, Result};
use crate::kernels::{join_local, local_view};
use crate::stage::{Opcode, StageFn, StageSpec};
use crate::vector::Vector;
use weft_algebra::{Numeric, Pair};

use super::check_vector;

/// `z[i] <- (x[i], y[i])`; `z` becomes dense
pub fn zip<A, B>(
    z: &mut Vector<Pair<A, B>>,
    x: &Vector<A>,
    y: &Vector<B>,
    phase: Phase,
) -> Result
where
    A: Numeric,
    B: Numeric,
{
    let n = z.size();
    check_vector(x, n, z.context())?;
    check_vector(y, n, z.context())?;
    if phase.is_resize() {
        return Ok(());
    }
    if n == 0 {
        return Ok(());
    }

    let z_vals = z.values_mut_ptr();
    let z_coords = z.coords_handle();
    let x_vals = x.values_ptr();
    let x_coords = x.coords_handle();
    let y_vals = y.values_ptr();
    let y_coords = y.coords_handle();

    let func: StageFn = Box::new(move |pipe, lo, hi| {
        let dense_all = pipe.all_already_dense();
        let lx = local_view(pipe, dense_all, x_coords.const_ptr(), lo, hi);
        let ly = local_view(pipe, dense_all, y_coords.const_ptr(), lo, hi);
        if !lx.is_dense() || !ly.is_dense() {
            return Err(Error::Illegal);
        }

        let mut lz = local_view(pipe, dense_all, z_coords.const_ptr(), lo, hi);
        lz.assign_all_unassigned();
        for i in lo..hi {
            let pair = Pair::new(unsafe { x_vals.read(i) }, unsafe { y_vals.read(i) });
            unsafe { z_vals.write(i, pair) };
        }
        if !dense_all {
            join_local(z_coords.const_ptr(), &lz, lo, hi);
        }
        Ok(())
    });

    z.context().clone().add_stage(StageSpec {
        func,
        opcode: Opcode::Zip,
        n,
        data_bytes: std::mem::size_of::<Pair<A, B>>(),
        dense_descr: false,
        dense_mask: true,
        outputs: [Some(z.operand()), None],
        inputs: [Some(x.operand()), Some(y.operand()), None, None],
        matrix: None,
    })
}

/// `(x[i], y[i]) <- z[i]`; both outputs become dense
pub fn unzip<A, B>(
    x: &mut Vector<A>,
    y: &mut Vector<B>,
    z: &Vector<Pair<A, B>>,
    phase: Phase,
) -> Result
where
    A: Numeric,
    B: Numeric,
{
    let n = z.size();
    check_vector(x, n, z.context())?;
    check_vector(y, n, z.context())?;
    if phase.is_resize() {
        return Ok(());
    }
    if n == 0 {
        return Ok(());
    }

    let z_vals = z.values_ptr();
    let z_coords = z.coords_handle();
    let x_vals = x.values_mut_ptr();
    let x_coords = x.coords_handle();
    let y_vals = y.values_mut_ptr();
    let y_coords = y.coords_handle();

    let func: StageFn = Box::new(move |pipe, lo, hi| {
        let dense_all = pipe.all_already_dense();
        let lz = local_view(pipe, dense_all, z_coords.const_ptr(), lo, hi);
        if !lz.is_dense() {
            return Err(Error::Illegal);
        }

        let mut lx = local_view(pipe, dense_all, x_coords.const_ptr(), lo, hi);
        let mut ly = local_view(pipe, dense_all, y_coords.const_ptr(), lo, hi);
        lx.assign_all_unassigned();
        ly.assign_all_unassigned();
        for i in lo..hi {
            let pair = unsafe { z_vals.read(i) };
            unsafe { x_vals.write(i, pair.first) };
            unsafe { y_vals.write(i, pair.second) };
        }
        if !dense_all {
            join_local(x_coords.const_ptr(), &lx, lo, hi);
            join_local(y_coords.const_ptr(), &ly, lo, hi);
        }
        Ok(())
    });

    z.context().clone().add_stage(StageSpec {
        func,
        opcode: Opcode::Unzip,
        n,
        data_bytes: std::mem::size_of::<Pair<A, B>>(),
        dense_descr: false,
        dense_mask: true,
        outputs: [Some(x.operand()), Some(y.operand())],
        inputs: [Some(z.operand()), None, None, None],
        matrix: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Context;

    #[test]
    fn test_zip_then_unzip_roundtrip() {
        let ctx = Context::new();
        let x = Vector::from_slice(&ctx, &[1.0f64, 2.0, 3.0]);
        let y = Vector::from_slice(&ctx, &[10i64, 20, 30]);
        let mut z: Vector<Pair<f64, i64>> = Vector::new(&ctx, 3);
        zip(&mut z, &x, &y, Phase::Execute).unwrap();
        assert_eq!(z.nnz().unwrap(), 3);
        assert_eq!(z.get(1).unwrap(), Some(Pair::new(2.0, 20)));

        let mut x2: Vector<f64> = Vector::new(&ctx, 3);
        let mut y2: Vector<i64> = Vector::new(&ctx, 3);
        unzip(&mut x2, &mut y2, &z, Phase::Execute).unwrap();
        assert_eq!(x2.to_entries().unwrap(), x.to_entries().unwrap());
        assert_eq!(y2.to_entries().unwrap(), y.to_entries().unwrap());
    }

    #[test]
    fn test_zip_sparse_input_is_illegal() {
        let ctx = Context::new();
        let x = Vector::from_entries(&ctx, 3, &[(0, 1.0f64)]).unwrap();
        let y = Vector::from_slice(&ctx, &[1i64, 2, 3]);
        let mut z: Vector<Pair<f64, i64>> = Vector::new(&ctx, 3);
        zip(&mut z, &x, &y, Phase::Execute).unwrap();
        // the failure surfaces at execution
        assert_eq!(z.nnz().unwrap_err(), Error::Illegal);
    }

    #[test]
    fn test_zip_size_mismatch() {
        let ctx = Context::new();
        let x = Vector::from_slice(&ctx, &[1.0f64, 2.0]);
        let y = Vector::from_slice(&ctx, &[1i64, 2, 3]);
        let mut z: Vector<Pair<f64, i64>> = Vector::new(&ctx, 3);
        assert_eq!(zip(&mut z, &x, &y, Phase::Execute).unwrap_err(), Error::Mismatch);
    }
}
