//! End-to-end scenarios exercising fusion, lazy triggers, masks, SpMV, and
//! descriptor verification through the public API only.

use weft_algebra::{Plus, PlusTimes};
use weft_core::ops::{self, Operand};
use weft_core::{Config, Context, Descriptor, Error, Matrix, Phase, Vector};

fn small_tile_context(tile: usize) -> Context {
    Context::with_config(Config {
        manual_tile_size: Some(tile),
        max_threads: 4,
        ..Config::default()
    })
}

#[test]
fn fused_ewise_add_and_dot() {
    let ctx = Context::new();
    let x = Vector::from_slice(&ctx, &(1..=10).map(|v| v as f64).collect::<Vec<_>>());
    let y = Vector::from_slice(&ctx, &(1..=10).rev().map(|v| v as f64).collect::<Vec<_>>());
    let mut z: Vector<f64> = Vector::new(&ctx, 10);

    ops::e_wise_add(
        &mut z,
        Operand::Vector(&x),
        Operand::Vector(&y),
        PlusTimes,
        Descriptor::NO_OPERATION,
        Phase::Execute,
    )
    .unwrap();

    // the dot fuses with the pending producer of z and triggers execution
    let mut s = 0.0;
    ops::dot(&mut s, &z, &z, PlusTimes, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
    assert_eq!(s, 10.0 * 121.0);

    // z materialised as a side effect
    assert_eq!(z.nnz().unwrap(), 10);
    assert!(z.to_entries().unwrap().iter().all(|&(_, v)| v == 11.0));
}

#[test]
fn fused_ewise_add_and_dot_many_tiles() {
    let ctx = small_tile_context(3);
    let n = 100;
    let x = Vector::from_slice(&ctx, &vec![2.0f64; n]);
    let y = Vector::from_slice(&ctx, &vec![3.0f64; n]);
    let mut z: Vector<f64> = Vector::new(&ctx, n);

    ops::e_wise_add(
        &mut z,
        Operand::Vector(&x),
        Operand::Vector(&y),
        PlusTimes,
        Descriptor::NO_OPERATION,
        Phase::Execute,
    )
    .unwrap();
    let mut s = 0.0;
    ops::dot(&mut s, &z, &z, PlusTimes, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
    assert_eq!(s, 25.0 * n as f64);
}

#[test]
fn sparse_fold_to_scalar_with_inverted_mask() {
    let ctx = Context::new();
    let x = Vector::from_entries(&ctx, 8, &[(0, 1i64), (2, 1), (4, 1), (6, 1)]).unwrap();
    let mask = Vector::from_entries(&ctx, 8, &[(0, true), (2, true)]).unwrap();

    let mut acc = 0i64;
    ops::foldl_into_scalar_masked(
        &mut acc,
        &x,
        &mask,
        Plus,
        Descriptor::INVERT_MASK,
        Phase::Execute,
    )
    .unwrap();
    // indices 4 and 6 pass the inverted mask
    assert_eq!(acc, 2);
}

#[test]
fn masked_apply_grows_empty_output() {
    let ctx = Context::new();
    let x = Vector::from_entries(&ctx, 8, &[(0, 1i64), (3, 2)]).unwrap();
    let mask =
        Vector::from_entries(&ctx, 8, &[(0, true), (1, true), (2, true), (3, true)]).unwrap();
    let mut z: Vector<i64> = Vector::new(&ctx, 8);

    ops::e_wise_apply_op_masked(
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
    assert_eq!(z.get(0).unwrap(), Some(11));
    assert_eq!(z.get(3).unwrap(), Some(12));
    assert_eq!(z.get(1).unwrap(), None);
    assert_eq!(z.get(5).unwrap(), None);
}

#[test]
fn spmv_with_add_identity_and_transpose() {
    let ctx = Context::new();
    // permutation mapping i -> (i + 1) mod 4
    let a = Matrix::from_entries(
        &ctx,
        4,
        4,
        &[(0, 1, 1i64), (1, 2, 1), (2, 3, 1), (3, 0, 1)],
    )
    .unwrap();
    let v = Vector::from_slice(&ctx, &[10i64, 20, 30, 40]);
    let mut u: Vector<i64> = Vector::new(&ctx, 4);

    ops::mxv(
        &mut u,
        &a,
        &v,
        PlusTimes,
        Descriptor::TRANSPOSE_MATRIX | Descriptor::ADD_IDENTITY,
        Phase::Execute,
    )
    .unwrap();

    // identity contributes v[i], the transposed permutation v[pred(i)]
    assert_eq!(
        u.to_entries().unwrap(),
        vec![(0, 10 + 40), (1, 20 + 10), (2, 30 + 20), (3, 40 + 30)]
    );
}

#[test]
fn dense_descriptor_verification_failure() {
    let ctx = Context::new();
    let n = 1000;
    let mut a: Vector<f64> = Vector::new(&ctx, n);
    for i in 0..n - 1 {
        a.set_element(i, 1.0).unwrap();
    }
    let b = Vector::from_slice(&ctx, &vec![2.0f64; n]);
    let mut c: Vector<f64> = Vector::new(&ctx, n);

    // the stage queues fine; the promise is checked at execution
    ops::e_wise_apply_op(
        &mut c,
        Operand::Vector(&a),
        Operand::Vector(&b),
        Plus,
        Descriptor::DENSE,
        Phase::Execute,
    )
    .unwrap();

    assert_eq!(c.nnz().unwrap_err(), Error::Illegal);
    // the failed pipeline left no assignments behind
    assert_eq!(c.nnz().unwrap(), 0);
}

#[test]
fn destruction_triggers_flush() {
    let ctx = Context::new();
    let mut w: Vector<i64> = Vector::new(&ctx, 16);
    {
        let mut x: Vector<i64> = Vector::new(&ctx, 16);
        ops::foldl_scalar(&mut x, 1, Plus, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
        // fused consumer of x, still pending when x goes out of scope
        ops::set_vector(&mut w, &x, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
        // x's destructor must execute the shared pipeline
    }
    assert_eq!(w.nnz().unwrap(), 16);
    assert!(w.to_entries().unwrap().iter().all(|&(_, v)| v == 1));
}

#[test]
fn conflicting_stage_flushes_pipeline() {
    let ctx = Context::new();
    let mut x: Vector<i64> = Vector::new(&ctx, 32);
    ops::set_scalar(&mut x, 5, Descriptor::NO_OPERATION, Phase::Execute).unwrap();

    // an SpMV reading x forces the producer to execute first
    let a = Matrix::from_entries(&ctx, 32, 32, &[(0, 0, 1i64)]).unwrap();
    let mut u: Vector<i64> = Vector::new(&ctx, 32);
    ops::vxm(&mut u, &x, &a, PlusTimes, Descriptor::NO_OPERATION, Phase::Execute).unwrap();

    assert_eq!(u.to_entries().unwrap(), vec![(0, 5)]);
    assert_eq!(x.nnz().unwrap(), 32);
}

#[test]
fn fusion_and_single_tile_agree() {
    // invariant: executing fused with many tiles equals the single-tile run
    let run = |ctx: &Context| -> Vec<(usize, i64)> {
        let x = Vector::from_entries(ctx, 40, &(0..40).step_by(3).map(|i| (i, i as i64)).collect::<Vec<_>>()).unwrap();
        let mut z: Vector<i64> = Vector::new(ctx, 40);
        ops::e_wise_add(
            &mut z,
            Operand::Vector(&x),
            Operand::Scalar(1),
            PlusTimes,
            Descriptor::NO_OPERATION,
            Phase::Execute,
        )
        .unwrap();
        ops::foldl_scalar(&mut z, 100, Plus, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
        ops::e_wise_map(|v| v * 2, &mut z, Phase::Execute).unwrap();
        z.to_entries().unwrap()
    };

    let tiled = run(&small_tile_context(4));
    let single = run(&small_tile_context(64));
    assert_eq!(tiled, single);
}

#[test]
fn size_zero_vectors_succeed_everywhere() {
    let ctx = Context::new();
    let mut x: Vector<f64> = Vector::new(&ctx, 0);
    let y: Vector<f64> = Vector::new(&ctx, 0);
    ops::set_scalar(&mut x, 1.0, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
    ops::foldl_vectors(&mut x, &y, Plus, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
    let mut s = 0.0;
    ops::dot(&mut s, &x, &y, PlusTimes, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
    assert_eq!(s, 0.0);
    assert_eq!(x.nnz().unwrap(), 0);
}

#[test]
fn long_fused_chain_across_tiles() {
    let ctx = small_tile_context(8);
    let n = 50;
    let mut z: Vector<i64> = Vector::new(&ctx, n);
    ops::set_scalar(&mut z, 1, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
    for _ in 0..5 {
        ops::foldl_scalar(&mut z, 1, Plus, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
    }
    let mut s = 0i64;
    ops::foldl_into_scalar(&mut s, &z, Plus, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
    assert_eq!(s, 6 * n as i64);
}

#[test]
fn map_then_reduce_floats() {
    use approx::assert_relative_eq;

    let ctx = small_tile_context(16);
    let n = 200;
    let values: Vec<f64> = (0..n).map(|i| (i as f64) * 0.25).collect();
    let mut x = Vector::from_slice(&ctx, &values);
    ops::e_wise_map(|v| v.sqrt(), &mut x, Phase::Execute).unwrap();
    let mut s = 0.0;
    ops::foldl_into_scalar(&mut s, &x, Plus, Descriptor::NO_OPERATION, Phase::Execute).unwrap();

    let expected: f64 = values.iter().map(|v| v.sqrt()).sum();
    assert_relative_eq!(s, expected, max_relative = 1e-9);
}

#[test]
fn explicit_flush_executes_everything() {
    let ctx = Context::new();
    let mut x: Vector<i64> = Vector::new(&ctx, 8);
    let mut y: Vector<i64> = Vector::new(&ctx, 12);
    ops::set_scalar(&mut x, 1, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
    ops::set_scalar(&mut y, 2, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
    ctx.execute_all().unwrap();
    assert_eq!(x.nnz().unwrap(), 8);
    assert_eq!(y.nnz().unwrap(), 12);
}
