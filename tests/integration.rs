//! Whole-stack smoke tests through the umbrella crate, checked against
//! naive reference computations on randomised fixtures.

use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use weft::algebra::{MinPlus, Plus, PlusTimes};
use weft::ops::{self, Operand};
use weft::prelude::*;

#[test]
fn random_fused_chain_matches_reference() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let ctx = Context::new();
    let n = 777;

    let xs: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let ys: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();

    let x = Vector::from_slice(&ctx, &xs);
    let y = Vector::from_slice(&ctx, &ys);
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
    ops::dot(&mut s, &z, &x, PlusTimes, Descriptor::NO_OPERATION, Phase::Execute).unwrap();

    let expected: f64 = xs.iter().zip(&ys).map(|(a, b)| (a + b) * a).sum();
    assert_relative_eq!(s, expected, max_relative = 1e-9);
}

#[test]
fn random_sparse_spmv_matches_reference() {
    let mut rng = StdRng::seed_from_u64(42);
    let ctx = Context::new();
    let (m, n) = (64, 48);

    let mut entries = Vec::new();
    for r in 0..m {
        for c in 0..n {
            if rng.gen_bool(0.1) {
                entries.push((r, c, rng.gen_range(1i64..10)));
            }
        }
    }
    let a = Matrix::from_entries(&ctx, m, n, &entries).unwrap();
    let vs: Vec<i64> = (0..m).map(|_| rng.gen_range(-5i64..5)).collect();
    let v = Vector::from_slice(&ctx, &vs);
    let mut u: Vector<i64> = Vector::new(&ctx, n);

    ops::vxm(&mut u, &v, &a, PlusTimes, Descriptor::NO_OPERATION, Phase::Execute).unwrap();

    let mut expected = vec![(false, 0i64); n];
    for &(r, c, w) in &entries {
        expected[c].0 = true;
        expected[c].1 += vs[r] * w;
    }
    for (c, &(present, total)) in expected.iter().enumerate() {
        match u.get(c).unwrap() {
            Some(got) => {
                assert!(present, "unexpected entry at {c}");
                assert_eq!(got, total, "wrong value at {c}");
            }
            None => assert!(!present, "missing entry at {c}"),
        }
    }
}

#[test]
fn tropical_semiring_relaxation() {
    let ctx = Context::new();
    // one relaxation step of shortest paths from vertex 0 on a small graph
    let edges = [(0usize, 1usize, 4i64), (0, 2, 1), (2, 1, 2), (1, 3, 1)];
    let a = Matrix::from_entries(&ctx, 4, 4, &edges).unwrap();

    let big = 1 << 30;
    let mut dist = Vector::from_slice(&ctx, &[0i64, big, big, big]);
    let snapshot = Vector::from_slice(&ctx, &[0i64, big, big, big]);
    ops::vxm(&mut dist, &snapshot, &a, MinPlus, Descriptor::NO_OPERATION, Phase::Execute).unwrap();

    assert_eq!(dist.get(0).unwrap(), Some(0));
    assert_eq!(dist.get(1).unwrap(), Some(4));
    assert_eq!(dist.get(2).unwrap(), Some(1));
}

#[test]
fn lazy_queries_observe_pending_work() {
    let ctx = Context::new();
    let mut x: Vector<i64> = Vector::new(&ctx, 100);
    ops::set_scalar(&mut x, 7, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
    ops::foldl_scalar(&mut x, 3, Plus, Descriptor::NO_OPERATION, Phase::Execute).unwrap();
    // the query is the first execution trigger
    assert_eq!(x.get(99).unwrap(), Some(10));
    assert_eq!(x.nnz().unwrap(), 100);
}
