//! Operator and vector adaptation across host and device executors.

use approx::assert_relative_eq;
use solverbridge::parallel::{BackendRegistry, EmulatedDevice};
use solverbridge::{
    AdaptationKind, BridgeError, Csr, Dense, ExecKind, Executor, IterativeSolver, LinOp, Operator,
    SolverMethod, VectorAdapter, adapt,
};
use std::sync::Arc;

/// Matrix-free tridiagonal (-1, 3, -1) operator.
struct Stencil(usize);

impl Operator for Stencil {
    fn height(&self) -> usize {
        self.0
    }
    fn width(&self) -> usize {
        self.0
    }
    fn mult(&self, x: &[f64], y: &mut [f64]) {
        let n = self.0;
        for i in 0..n {
            let mut v = 3.0 * x[i];
            if i > 0 {
                v -= x[i - 1];
            }
            if i + 1 < n {
                v -= x[i + 1];
            }
            y[i] = v;
        }
    }
}

fn stencil_csr(n: usize) -> Csr {
    let mut trips = Vec::new();
    for i in 0..n {
        trips.push((i, i, 3.0));
        if i > 0 {
            trips.push((i, i - 1, -1.0));
        }
        if i + 1 < n {
            trips.push((i, i + 1, -1.0));
        }
    }
    Csr::from_triplets(n, n, &trips).unwrap()
}

fn device() -> Executor {
    let reg = BackendRegistry::with_defaults().with(Arc::new(EmulatedDevice::new(ExecKind::Cuda, 1)));
    Executor::create_in(&reg, ExecKind::Cuda).unwrap()
}

#[test]
fn scaled_apply_matches_plain_apply() {
    let host = Executor::create(ExecKind::Reference).unwrap();
    let dev = device();
    let a = stencil_csr(6);
    let free = Stencil(6);
    let b: Vec<f64> = (0..6).map(|i| i as f64 + 1.0).collect();

    for exec in [&host, &dev] {
        for op in [&a as &dyn Operator, &free] {
            let h = adapt(op, exec).unwrap();
            let mut plain = vec![0.0; 6];
            h.apply(&b, &mut plain).unwrap();

            // alpha = 1, beta = 0 with host-resident and device-resident scalars
            for scalar_exec in [&host, &dev] {
                let one = Dense::scalar(scalar_exec, 1.0);
                let zero = Dense::scalar(scalar_exec, 0.0);
                let mut scaled = vec![42.0; 6];
                h.apply_scaled(&one, &b, &zero, &mut scaled).unwrap();
                for (p, s) in plain.iter().zip(&scaled) {
                    assert_relative_eq!(*p, *s);
                }
            }

            // alpha = 1, beta = 1 accumulates into x
            let one = Dense::scalar(exec, 1.0);
            let mut acc = plain.clone();
            h.apply_scaled(&one, &b, &one, &mut acc).unwrap();
            for (p, s) in plain.iter().zip(&acc) {
                assert_relative_eq!(2.0 * p, *s);
            }
        }
    }
}

#[test]
fn adaptation_kind_follows_operator_type() {
    let exec = Executor::create(ExecKind::Reference).unwrap();
    let a = stencil_csr(4);
    let free = Stencil(4);
    let zero_copy = adapt(&a, &exec).unwrap();
    let wrapped = adapt(&free, &exec).unwrap();
    assert_eq!(zero_copy.adaptation(), AdaptationKind::ZeroCopy);
    assert_eq!(wrapped.adaptation(), AdaptationKind::Wrapped);
    assert_eq!(
        zero_copy.adaptation().combine(wrapped.adaptation()),
        AdaptationKind::Wrapped
    );
    assert_eq!(zero_copy.fingerprint(), a.view().fingerprint());
}

#[test]
fn views_must_match_the_operator_kind() {
    let exec = Executor::create(ExecKind::Reference).unwrap();
    let free = Stencil(3);
    let h = adapt(&free, &exec).unwrap();
    let b = vec![1.0; 3];
    let mut x = vec![0.0; 3];

    let zero_copy = VectorAdapter::new(&exec, AdaptationKind::ZeroCopy);
    let bv = zero_copy.view(&b, AdaptationKind::ZeroCopy).unwrap();
    let mut xv = zero_copy.view_mut(&mut x, AdaptationKind::ZeroCopy).unwrap();
    assert!(matches!(h.apply_views(&bv, &mut xv), Err(BridgeError::Configuration(_))));
    drop(xv);

    let wrapped = VectorAdapter::new(&exec, h.adaptation());
    assert!(matches!(
        wrapped.view(&b, AdaptationKind::ZeroCopy),
        Err(BridgeError::Configuration(_))
    ));
    let bv = wrapped.view(&b, AdaptationKind::Wrapped).unwrap();
    let mut xv = wrapped.view_mut(&mut x, AdaptationKind::Wrapped).unwrap();
    h.apply_views(&bv, &mut xv).unwrap();
    xv.commit();
    assert_eq!(x, vec![2.0, 1.0, 2.0]);
}

#[test]
fn device_views_round_trip_through_commit() {
    let dev = device();
    let a = stencil_csr(3);
    let h = adapt(&a, &dev).unwrap();
    let adapter = VectorAdapter::new(&dev, h.adaptation());
    let b = vec![1.0; 3];
    let mut x = vec![0.0; 3];
    let bv = adapter.view(&b, AdaptationKind::ZeroCopy).unwrap();
    let mut xv = adapter.view_mut(&mut x, AdaptationKind::ZeroCopy).unwrap();
    h.apply_views(&bv, &mut xv).unwrap();
    xv.commit();
    assert_eq!(x, vec![2.0, 1.0, 2.0]);
}

#[test]
fn non_square_operator_is_rejected() {
    struct Tall;
    impl Operator for Tall {
        fn height(&self) -> usize {
            3
        }
        fn width(&self) -> usize {
            2
        }
        fn mult(&self, _: &[f64], _: &mut [f64]) {}
    }
    let exec = Executor::create(ExecKind::Reference).unwrap();
    assert!(matches!(adapt(&Tall, &exec), Err(BridgeError::Configuration(_))));
}

#[test]
fn matrix_free_and_native_solves_agree() {
    let exec = Executor::create(ExecKind::Reference).unwrap();
    let n = 30;
    let a = stencil_csr(n);
    let free = Stencil(n);
    let b: Vec<f64> = (0..n).map(|i| (i as f64).sin()).collect();

    let mut solutions = Vec::new();
    for op in [&a as &dyn Operator, &free] {
        let mut ksp = IterativeSolver::new(&exec, SolverMethod::Gmres { krylov_dim: 0 });
        ksp.set_rel_tol(1e-12).unwrap();
        ksp.set_max_iter(200).unwrap();
        ksp.set_operator(op).unwrap();
        let mut x = vec![0.0; n];
        assert!(ksp.apply(&b, &mut x).unwrap().converged);
        solutions.push((ksp.uses_vector_wrappers(), x));
    }
    assert!(!solutions[0].0);
    assert!(solutions[1].0);
    for (p, q) in solutions[0].1.iter().zip(&solutions[1].1) {
        assert!((p - q).abs() < 1e-9);
    }
}
