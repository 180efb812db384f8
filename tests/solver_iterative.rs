//! Tests for iterative solvers vs direct solvers on random matrices.
//!
//! Every method is driven through the stateful [`IterativeSolver`] front end and compared
//! elementwise with a faer full-pivoting LU solve of the same system.

use approx::assert_abs_diff_eq;
use faer::Mat;
use faer::linalg::solvers::SolveCore;
use rand::Rng;
use solverbridge::solver::StoragePrecision;
use solverbridge::{
    Csr, ExecKind, Executor, IterativeSolver, ResidualMode, SolverMethod, StoppingCriteria,
};

/// Random SPD matrix `A = Mᵀ M + I` and random right-hand side.
fn random_spd(n: usize) -> (Mat<f64>, Vec<f64>) {
    let mut rng = rand::thread_rng();
    let data: Vec<f64> = (0..n * n).map(|_| rng.r#gen()).collect();
    let m = Mat::from_fn(n, n, |i, j| data[j * n + i]);
    let m_t = m.transpose();
    let a = &m_t * &m + Mat::<f64>::identity(n, n);
    let b: Vec<f64> = (0..n).map(|_| rng.r#gen()).collect();
    (a, b)
}

/// Random non-symmetric matrix shifted by `n·I` so that it is diagonally dominant.
fn random_dominant(n: usize) -> (Mat<f64>, Vec<f64>) {
    let mut rng = rand::thread_rng();
    let a = Mat::from_fn(n, n, |i, j| {
        let v: f64 = rng.r#gen();
        if i == j { v + n as f64 } else { v }
    });
    let b: Vec<f64> = (0..n).map(|_| rng.r#gen()).collect();
    (a, b)
}

fn to_csr(a: &Mat<f64>) -> Csr {
    let n = a.nrows();
    let mut trips = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            trips.push((i, j, a[(i, j)]));
        }
    }
    Csr::from_triplets(n, n, &trips).unwrap()
}

fn direct(a: &Mat<f64>, b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut x = b.to_vec();
    let lu = faer::linalg::solvers::FullPivLu::new(a.as_ref());
    let x_mat = faer::MatMut::from_column_major_slice_mut(&mut x, n, 1);
    lu.solve_in_place_with_conj(faer::Conj::No, x_mat);
    x
}

fn solve(method: SolverMethod, a: &Csr, b: &[f64]) -> (Vec<f64>, bool) {
    let exec = Executor::create(ExecKind::Reference).unwrap();
    let mut ksp = IterativeSolver::new(&exec, method);
    ksp.set_criteria(StoppingCriteria::new(1e-10, 0.0, 1000, ResidualMode::Explicit))
        .unwrap();
    ksp.set_operator(a).unwrap();
    let mut x = vec![0.0; b.len()];
    let report = ksp.apply(b, &mut x).unwrap();
    (x, report.converged)
}

#[test]
fn cg_vs_direct_on_spd() {
    let n = 10;
    let (a, b) = random_spd(n);
    let (x, converged) = solve(SolverMethod::Cg, &to_csr(&a), &b);
    assert!(converged);
    let x_direct = direct(&a, &b);
    for i in 0..n {
        assert_abs_diff_eq!(x[i], x_direct[i], epsilon = 1e-6);
    }
}

#[test]
fn fcg_vs_direct_on_spd() {
    let n = 10;
    let (a, b) = random_spd(n);
    let (x, converged) = solve(SolverMethod::Fcg, &to_csr(&a), &b);
    assert!(converged);
    let x_direct = direct(&a, &b);
    for i in 0..n {
        assert_abs_diff_eq!(x[i], x_direct[i], epsilon = 1e-6);
    }
}

#[test]
fn nonsymmetric_methods_vs_direct() {
    let n = 10;
    let (a, b) = random_dominant(n);
    let csr = to_csr(&a);
    let x_direct = direct(&a, &b);
    for method in [
        SolverMethod::Gmres { krylov_dim: 0 },
        SolverMethod::Gmres { krylov_dim: 4 },
        SolverMethod::CbGmres {
            krylov_dim: 0,
            storage: StoragePrecision::Reduce1,
        },
        SolverMethod::Bicgstab,
        SolverMethod::Cgs,
    ] {
        let (x, converged) = solve(method, &csr, &b);
        assert!(converged, "{:?} did not converge", method);
        for i in 0..n {
            assert_abs_diff_eq!(x[i], x_direct[i], epsilon = 1e-6);
        }
    }
}

#[test]
fn cg_reaches_relative_tolerance_on_known_solution() {
    let n = 40;
    let (a, _) = random_spd(n);
    let x_star: Vec<f64> = (0..n).map(|i| 1.0 + (i as f64) / n as f64).collect();
    let mut b = vec![0.0; n];
    for i in 0..n {
        for j in 0..n {
            b[i] += a[(i, j)] * x_star[j];
        }
    }
    let csr = to_csr(&a);
    let (x, converged) = solve(SolverMethod::Cg, &csr, &b);
    assert!(converged);

    let mut r = vec![0.0; n];
    csr.view().spmv(&x, &mut r);
    let res: f64 = r.iter().zip(&b).map(|(ri, bi)| (bi - ri).powi(2)).sum::<f64>().sqrt();
    let bn: f64 = b.iter().map(|v| v * v).sum::<f64>().sqrt();
    assert!(res / bn <= 1e-9);
    for i in 0..n {
        assert_abs_diff_eq!(x[i], x_star[i], epsilon = 1e-6);
    }
}

#[test]
fn zero_tolerances_halt_at_exactly_k() {
    let n = 30;
    let (a, b) = random_spd(n);
    let csr = to_csr(&a);
    let exec = Executor::create(ExecKind::Reference).unwrap();
    for method in [SolverMethod::Cg, SolverMethod::Gmres { krylov_dim: 0 }] {
        for k in [1, 4, 9] {
            let mut ksp = IterativeSolver::new(&exec, method);
            ksp.set_max_iter(k).unwrap();
            ksp.set_operator(&csr).unwrap();
            let mut x = vec![0.0; n];
            let report = ksp.apply(&b, &mut x).unwrap();
            assert_eq!(report.iterations, k, "{:?}", method);
            assert!(!report.converged);
        }
    }
}

#[test]
fn identical_inputs_give_identical_reports() {
    let n = 20;
    let (a, b) = random_spd(n);
    let csr = to_csr(&a);
    let exec = Executor::create(ExecKind::Reference).unwrap();
    let mut ksp = IterativeSolver::new(&exec, SolverMethod::Bicgstab);
    ksp.set_rel_tol(1e-8).unwrap();
    ksp.set_max_iter(200).unwrap();
    ksp.set_operator(&csr).unwrap();
    let mut x1 = vec![0.0; n];
    let first = ksp.apply(&b, &mut x1).unwrap();
    let mut x2 = vec![0.0; n];
    let second = ksp.apply(&b, &mut x2).unwrap();
    assert_eq!(first.iterations, second.iterations);
    assert_eq!(first.converged, second.converged);
    assert_eq!(x1, x2);
}

#[test]
fn second_operator_is_never_stale() {
    let exec = Executor::create(ExecKind::Reference).unwrap();
    let a = Csr::from_triplets(3, 3, &[(0, 0, 2.0), (1, 1, 2.0), (2, 2, 2.0)]).unwrap();
    let b_op = Csr::from_triplets(3, 3, &[(0, 0, 4.0), (1, 1, 4.0), (2, 2, 4.0)]).unwrap();
    let rhs = [1.0, 1.0, 1.0];
    let mut ksp = IterativeSolver::new(&exec, SolverMethod::Cg);
    ksp.set_rel_tol(1e-12).unwrap();

    ksp.set_operator(&a).unwrap();
    let mut x = vec![0.0; 3];
    ksp.apply(&rhs, &mut x).unwrap();
    assert!(x.iter().all(|&v| (v - 0.5).abs() < 1e-12));

    ksp.set_operator(&b_op).unwrap();
    let mut x = vec![0.0; 3];
    ksp.apply(&rhs, &mut x).unwrap();
    assert!(x.iter().all(|&v| (v - 0.25).abs() < 1e-12));
}

#[test]
fn ir_with_inner_cg_converges() {
    let n = 10;
    let (a, b) = random_spd(n);
    let csr = to_csr(&a);
    let exec = Executor::create(ExecKind::Reference).unwrap();
    let inner = solverbridge::SolverFactory::new(&exec, SolverMethod::Cg)
        .with_criteria(StoppingCriteria::new(1e-3, 0.0, 50, ResidualMode::Implicit));
    let mut ksp = IterativeSolver::new(&exec, SolverMethod::Ir { relaxation_factor: 1.0 });
    ksp.set_inner_solver(inner).unwrap();
    ksp.set_criteria(StoppingCriteria::new(1e-10, 0.0, 100, ResidualMode::Explicit))
        .unwrap();
    ksp.set_operator(&csr).unwrap();
    let mut x = vec![0.0; n];
    let report = ksp.apply(&b, &mut x).unwrap();
    assert!(report.converged);
    let x_direct = direct(&a, &b);
    for i in 0..n {
        assert_abs_diff_eq!(x[i], x_direct[i], epsilon = 1e-6);
    }
}

fn scaled_tridiagonal(n: usize, scale: f64, off: f64) -> Csr {
    let mut trips = Vec::new();
    for i in 0..n {
        trips.push((i, i, 2.0 * scale));
        if i > 0 {
            trips.push((i, i - 1, -off * scale));
        }
        if i + 1 < n {
            trips.push((i, i + 1, -off * scale));
        }
    }
    Csr::from_triplets(n, n, &trips).unwrap()
}

#[test]
fn gmres_is_scale_invariant() {
    let exec = Executor::create(ExecKind::Reference).unwrap();
    let n = 10;
    for off in [0.0, 1.0] {
        for scale in [1e-20, 1.0, 1e20] {
            let a = scaled_tridiagonal(n, scale, off);
            let ones = vec![1.0; n];
            let mut b = vec![0.0; n];
            a.view().spmv(&ones, &mut b);
            for method in [
                SolverMethod::Gmres { krylov_dim: 0 },
                SolverMethod::CbGmres {
                    krylov_dim: 0,
                    storage: StoragePrecision::Reduce1,
                },
            ] {
                let mut ksp = IterativeSolver::new(&exec, method);
                ksp.set_criteria(StoppingCriteria::new(1e-8, 0.0, 50, ResidualMode::Explicit))
                    .unwrap();
                ksp.set_operator(&a).unwrap();
                let mut x = vec![0.0; n];
                let report = ksp.apply(&b, &mut x).unwrap();
                assert!(report.converged, "{:?} scale={} off={}", method, scale, off);
                for xi in &x {
                    assert_abs_diff_eq!(*xi, 1.0, epsilon = 1e-5);
                }
            }
        }
    }
}

#[test]
fn gmres_on_singular_operator_reports_breakdown() {
    let exec = Executor::create(ExecKind::Reference).unwrap();
    let zero = Csr::from_triplets(3, 3, &[(0, 0, 0.0), (1, 1, 0.0), (2, 2, 0.0)]).unwrap();
    let mut ksp = IterativeSolver::new(&exec, SolverMethod::Gmres { krylov_dim: 0 });
    ksp.set_rel_tol(1e-8).unwrap();
    ksp.set_max_iter(20).unwrap();
    ksp.set_operator(&zero).unwrap();
    let mut x = vec![0.0; 3];
    let report = ksp.apply(&[1.0, 1.0, 1.0], &mut x).unwrap();
    assert!(!report.converged);
    assert_eq!(x, vec![0.0; 3]);
}
