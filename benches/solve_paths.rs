use criterion::{black_box, Criterion, criterion_group, criterion_main};
use solverbridge::{
    Csr, ExecKind, Executor, IterativeSolver, Operator, PreconditionerSpec, ResidualMode,
    SolverMethod, StoppingCriteria,
};
use solverbridge::preconditioner::StorageOptimization;

/// Same five-point Laplacian, but only reachable through `mult`.
struct MatrixFree(Csr);

impl Operator for MatrixFree {
    fn height(&self) -> usize {
        self.0.nrows()
    }
    fn width(&self) -> usize {
        self.0.ncols()
    }
    fn mult(&self, x: &[f64], y: &mut [f64]) {
        self.0.view().spmv(x, y);
    }
}

fn laplace_2d(k: usize) -> Csr {
    let mut trips = Vec::new();
    for i in 0..k {
        for j in 0..k {
            let row = i * k + j;
            trips.push((row, row, 4.0));
            if i > 0 {
                trips.push((row, row - k, -1.0));
            }
            if i + 1 < k {
                trips.push((row, row + k, -1.0));
            }
            if j > 0 {
                trips.push((row, row - 1, -1.0));
            }
            if j + 1 < k {
                trips.push((row, row + 1, -1.0));
            }
        }
    }
    Csr::from_triplets(k * k, k * k, &trips).unwrap()
}

fn bench_solve_paths(c: &mut Criterion) {
    let exec = Executor::create(ExecKind::Reference).unwrap();
    let a = laplace_2d(32);
    let n = a.nrows();
    let free = MatrixFree(a.clone());
    let b: Vec<f64> = (0..n).map(|i| (i as f64).sin()).collect();
    let criteria = StoppingCriteria::new(1e-8, 0.0, 1000, ResidualMode::Implicit);

    c.bench_function("cg zero-copy csr", |ben| {
        let mut ksp = IterativeSolver::new(&exec, SolverMethod::Cg);
        ksp.set_criteria(criteria).unwrap();
        ksp.set_operator(&a).unwrap();
        let mut x = vec![0.0; n];
        ben.iter(|| {
            let _report = ksp.apply(black_box(&b), black_box(&mut x)).unwrap();
        })
    });

    c.bench_function("cg wrapped matrix-free", |ben| {
        let mut ksp = IterativeSolver::new(&exec, SolverMethod::Cg);
        ksp.set_criteria(criteria).unwrap();
        ksp.set_operator(&free).unwrap();
        let mut x = vec![0.0; n];
        ben.iter(|| {
            let _report = ksp.apply(black_box(&b), black_box(&mut x)).unwrap();
        })
    });

    c.bench_function("cg jacobi csr", |ben| {
        let spec = PreconditionerSpec::Jacobi {
            max_block_size: 1,
            accuracy: 0.1,
            storage: StorageOptimization::None,
        };
        let mut ksp = IterativeSolver::new(&exec, SolverMethod::Cg);
        ksp.set_criteria(criteria).unwrap();
        ksp.set_preconditioner(spec.binding()).unwrap();
        ksp.set_operator(&a).unwrap();
        let mut x = vec![0.0; n];
        ben.iter(|| {
            let _report = ksp.apply(black_box(&b), black_box(&mut x)).unwrap();
        })
    });
}

criterion_group!(benches, bench_solve_paths);
criterion_main!(benches);
