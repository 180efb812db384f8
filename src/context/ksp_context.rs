//! Stateful front end for iterative solvers.
//!
//! [`IterativeSolver`] is the object an application keeps around between solves. It stores a
//! [`SolverFactory`] and, once an operator has been set, the [`GeneratedSolver`] bound to it.
//!
//! # State machine
//!
//! - **Unbound**: configured, no operator. `apply` is a configuration error.
//! - **Bound**: generated against one operator. [`IterativeSolver::set_operator`] replaces the
//!   binding by generating a completely new solver; nothing of the previous binding survives.
//!
//! Every setter that changes the stored factory regenerates the bound solver from scratch. The
//! new state is built before the old one is dropped, so a failing call leaves the solver as it
//! was.
//!
//! # Usage
//!
//! ```rust,ignore
//! let exec = Executor::create(ExecKind::Reference)?;
//! let mut ksp = IterativeSolver::new(&exec, SolverMethod::Cg);
//! ksp.set_rel_tol(1e-8)?;
//! ksp.set_max_iter(500)?;
//! ksp.set_operator(&a)?;
//! let report = ksp.apply(&b, &mut x)?;
//! ```

use crate::adapter::{AdaptationKind, VectorAdapter, adapt};
use crate::core::traits::{LinOp, Operator};
use crate::error::{BridgeError, Result};
use crate::executor::Executor;
use crate::solver::{GeneratedSolver, PreconditionerBinding, SolverFactory, SolverMethod};
use crate::utils::convergence::{ConvergenceReport, ResidualLogger, ResidualMode, StoppingCriteria};
use std::str::FromStr;
use std::sync::Arc;

/// How much a solve reports through the `log` facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    Silent,
    /// Non-convergence warnings only.
    #[default]
    ErrorsOnly,
    /// Plus one summary line per solve.
    Summary,
    /// Plus the residual norm of every iteration.
    FullTrace,
}

impl FromStr for Verbosity {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "silent" | "0" => Ok(Verbosity::Silent),
            "errors" | "errors-only" | "errors_only" | "1" => Ok(Verbosity::ErrorsOnly),
            "summary" | "2" => Ok(Verbosity::Summary),
            "trace" | "full-trace" | "full_trace" | "3" => Ok(Verbosity::FullTrace),
            other => Err(BridgeError::config(format!("unknown verbosity '{}'", other))),
        }
    }
}

enum SolverState<'a> {
    Unbound,
    Bound(GeneratedSolver<'a>),
}

/// A configurable solver that can be bound to successive operators.
pub struct IterativeSolver<'a> {
    exec: Executor,
    factory: SolverFactory<'a>,
    state: SolverState<'a>,
    iterative_mode: bool,
    verbosity: Verbosity,
    last: Option<ConvergenceReport>,
}

impl<'a> IterativeSolver<'a> {
    /// Unbound solver for `method` with default criteria.
    pub fn new(exec: &Executor, method: SolverMethod) -> Self {
        Self::from_factory(SolverFactory::new(exec, method))
    }

    pub fn from_factory(factory: SolverFactory<'a>) -> Self {
        Self {
            exec: factory.executor().clone(),
            factory,
            state: SolverState::Unbound,
            iterative_mode: false,
            verbosity: Verbosity::default(),
            last: None,
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.exec
    }

    pub fn factory(&self) -> &SolverFactory<'a> {
        &self.factory
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.state, SolverState::Bound(_))
    }

    pub fn generated_solver(&self) -> Option<&GeneratedSolver<'a>> {
        match &self.state {
            SolverState::Bound(s) => Some(s),
            SolverState::Unbound => None,
        }
    }

    /// Whether the bound chain (operator, preconditioner, inner solvers) needs wrapped vectors.
    /// Recomputed on every generation, so it never outlives the binding that required it.
    pub fn uses_vector_wrappers(&self) -> bool {
        self.generated_solver().is_some_and(GeneratedSolver::needs_wrapped_vectors)
    }

    /// Bind to `op`, discarding any previous binding.
    pub fn set_operator(&mut self, op: &'a dyn Operator) -> Result<()> {
        let handle = Arc::new(adapt(op, &self.exec)?);
        let solver = self.factory.generate(handle)?;
        if let SolverState::Bound(previous) = &self.state {
            log::debug!(
                "releasing {} bound to a {}-row operator",
                previous.method().name(),
                previous.system().size()
            );
        }
        self.state = SolverState::Bound(solver);
        self.last = None;
        Ok(())
    }

    /// Apply `change` to a copy of the factory, regenerate against the current operator, and
    /// commit both only when generation succeeds.
    fn reconfigure(&mut self, change: impl FnOnce(&mut SolverFactory<'a>)) -> Result<()> {
        let mut factory = self.factory.clone();
        change(&mut factory);
        if let SolverState::Bound(current) = &self.state {
            let fresh = factory.generate(Arc::clone(current.system()))?;
            log::debug!("regenerated {} after a configuration change", fresh.method().name());
            self.state = SolverState::Bound(fresh);
        }
        self.factory = factory;
        Ok(())
    }

    pub fn set_criteria(&mut self, criteria: StoppingCriteria) -> Result<()> {
        self.reconfigure(|f| f.set_criteria(criteria))
    }

    pub fn set_rel_tol(&mut self, tol: f64) -> Result<()> {
        let criteria = self.factory.criteria().with_rel_tol(tol);
        self.set_criteria(criteria)
    }

    pub fn set_abs_tol(&mut self, tol: f64) -> Result<()> {
        let criteria = self.factory.criteria().with_abs_tol(tol);
        self.set_criteria(criteria)
    }

    pub fn set_max_iter(&mut self, max_iters: usize) -> Result<()> {
        let criteria = self.factory.criteria().with_max_iters(max_iters);
        self.set_criteria(criteria)
    }

    pub fn set_residual_mode(&mut self, mode: ResidualMode) -> Result<()> {
        let criteria = self.factory.criteria().with_mode(mode);
        self.set_criteria(criteria)
    }

    pub fn set_preconditioner(&mut self, binding: PreconditionerBinding<'a>) -> Result<()> {
        self.reconfigure(|f| *f = f.clone().with_preconditioner(binding))
    }

    /// Inner solver of a Richardson iteration.
    pub fn set_inner_solver(&mut self, inner: SolverFactory<'a>) -> Result<()> {
        self.reconfigure(|f| *f = f.clone().with_inner_solver(inner))
    }

    /// Change the Krylov dimension of the stored factory and of the live solver, if any.
    /// Returns `false` for methods without one.
    pub fn set_krylov_dim(&mut self, dim: usize) -> bool {
        if !self.factory.set_krylov_dim(dim) {
            return false;
        }
        if let SolverState::Bound(solver) = &mut self.state {
            solver.set_krylov_dim(dim);
        }
        true
    }

    /// Start from the caller's `x` instead of zero.
    pub fn set_iterative_mode(&mut self, warm_start: bool) {
        self.iterative_mode = warm_start;
    }

    pub fn iterative_mode(&self) -> bool {
        self.iterative_mode
    }

    pub fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Solve A x = b with the bound operator.
    ///
    /// Non-convergence is not an error: the last iterate is left in `x` and the returned report
    /// says `converged: false`.
    pub fn apply(&mut self, b: &[f64], x: &mut [f64]) -> Result<ConvergenceReport> {
        let verbosity = self.verbosity;
        let warm_start = self.iterative_mode;
        let solver = match &mut self.state {
            SolverState::Bound(s) => s,
            SolverState::Unbound => {
                return Err(BridgeError::config("solver applied before an operator was set"));
            }
        };
        let n = solver.system().size();
        if b.len() != n {
            return Err(BridgeError::dim("right-hand side length", n, b.len()));
        }
        if x.len() != n {
            return Err(BridgeError::dim("solution length", n, x.len()));
        }
        if !warm_start {
            x.iter_mut().for_each(|v| *v = 0.0);
        }

        let kind = if solver.needs_wrapped_vectors() {
            AdaptationKind::Wrapped
        } else {
            AdaptationKind::ZeroCopy
        };
        let adapter = VectorAdapter::new(solver.system().executor(), kind);
        let b_view = adapter.view(b, kind)?;
        let mut x_view = adapter.view_mut(x, kind)?;

        solver.clear_loggers();
        if verbosity == Verbosity::FullTrace {
            solver.add_logger(ResidualLogger::new());
        }
        let report = solver.apply(b_view.as_slice(), x_view.as_mut_slice()?)?;
        x_view.commit();

        if let Some(trace) = solver.residual_logger() {
            trace.write();
        }
        let name = solver.method().name();
        if !report.converged && verbosity >= Verbosity::ErrorsOnly {
            log::warn!(
                "{}: no convergence after {} iterations, residual norm {:.6e}",
                name,
                report.iterations,
                report.final_residual_norm
            );
        }
        if verbosity >= Verbosity::Summary {
            log::info!(
                "{}: {} iterations, residual norm {:.6e}, converged: {}",
                name,
                report.iterations,
                report.final_residual_norm,
                report.converged
            );
        }
        self.last = Some(report.clone());
        Ok(report)
    }

    pub fn last_report(&self) -> Option<&ConvergenceReport> {
        self.last.as_ref()
    }

    /// Iterations of the last solve, 0 before the first one.
    pub fn num_iterations(&self) -> usize {
        self.last.as_ref().map_or(0, |r| r.iterations)
    }

    /// Residual norm of the last solve, NaN before the first one.
    pub fn final_norm(&self) -> f64 {
        self.last.as_ref().map_or(f64::NAN, |r| r.final_residual_norm)
    }

    pub fn converged(&self) -> bool {
        self.last.as_ref().is_some_and(|r| r.converged)
    }
}

impl std::fmt::Debug for IterativeSolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterativeSolver")
            .field("factory", &self.factory)
            .field("bound", &self.is_bound())
            .field("iterative_mode", &self.iterative_mode)
            .field("verbosity", &self.verbosity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecKind;
    use crate::matrix::Csr;
    use approx::assert_relative_eq;

    fn diag(values: &[f64]) -> Csr {
        let trips: Vec<_> = values.iter().enumerate().map(|(i, &v)| (i, i, v)).collect();
        Csr::from_triplets(values.len(), values.len(), &trips).unwrap()
    }

    fn exec() -> Executor {
        Executor::create(ExecKind::Reference).unwrap()
    }

    #[test]
    fn unbound_apply_is_a_configuration_error() {
        let exec = exec();
        let mut ksp = IterativeSolver::new(&exec, SolverMethod::Cg);
        let mut x = vec![0.0; 2];
        assert!(matches!(ksp.apply(&[1.0, 1.0], &mut x), Err(BridgeError::Configuration(_))));
        assert!(!ksp.is_bound());
    }

    #[test]
    fn length_mismatch_leaves_x_untouched() {
        let exec = exec();
        let a = diag(&[2.0, 2.0]);
        let mut ksp = IterativeSolver::new(&exec, SolverMethod::Cg);
        ksp.set_operator(&a).unwrap();
        let mut x = vec![7.0; 3];
        let err = ksp.apply(&[1.0, 1.0], &mut x).unwrap_err();
        assert!(matches!(err, BridgeError::Dimension { .. }));
        assert_eq!(x, vec![7.0; 3]);
    }

    #[test]
    fn failed_reconfiguration_keeps_previous_state() {
        let exec = exec();
        let a = diag(&[2.0, 4.0]);
        let mut ksp = IterativeSolver::new(&exec, SolverMethod::Gmres { krylov_dim: 0 });
        ksp.set_operator(&a).unwrap();
        assert!(ksp.set_residual_mode(ResidualMode::Implicit).is_err());
        assert_eq!(ksp.factory().criteria().mode, ResidualMode::Explicit);
        assert!(ksp.is_bound());
    }

    #[test]
    fn zero_start_unless_iterative_mode() {
        let exec = exec();
        let a = diag(&[2.0, 4.0]);
        let mut ksp = IterativeSolver::new(&exec, SolverMethod::Cg);
        ksp.set_operator(&a).unwrap();
        ksp.set_max_iter(0).unwrap();
        let mut x = vec![1.0, 1.0];
        ksp.apply(&[2.0, 4.0], &mut x).unwrap();
        assert_eq!(x, vec![0.0, 0.0]);

        ksp.set_iterative_mode(true);
        let mut x = vec![1.0, 1.0];
        let report = ksp.apply(&[2.0, 4.0], &mut x).unwrap();
        assert_eq!(x, vec![1.0, 1.0]);
        assert_relative_eq!(report.final_residual_norm, 0.0);
    }

    #[test]
    fn full_trace_attaches_a_fresh_logger_per_call() {
        let exec = exec();
        let a = diag(&[1.0, 2.0, 3.0]);
        let mut ksp = IterativeSolver::new(&exec, SolverMethod::Cg);
        ksp.set_operator(&a).unwrap();
        ksp.set_max_iter(3).unwrap();
        ksp.set_verbosity(Verbosity::FullTrace);
        let b = [1.0, 1.0, 1.0];
        let mut x = vec![0.0; 3];
        let first = ksp.apply(&b, &mut x).unwrap();
        let mut x = vec![0.0; 3];
        let second = ksp.apply(&b, &mut x).unwrap();
        assert_eq!(first.trace, second.trace);
        assert_eq!(second.trace.as_ref().map(Vec::len), Some(second.iterations + 1));

        ksp.set_verbosity(Verbosity::Summary);
        let mut x = vec![0.0; 3];
        assert!(ksp.apply(&b, &mut x).unwrap().trace.is_none());
    }

    #[test]
    fn accessors_mirror_last_report() {
        let exec = exec();
        let a = diag(&[1.0, 2.0]);
        let mut ksp = IterativeSolver::new(&exec, SolverMethod::Cg);
        assert_eq!(ksp.num_iterations(), 0);
        assert!(ksp.final_norm().is_nan());
        ksp.set_operator(&a).unwrap();
        ksp.set_rel_tol(1e-12).unwrap();
        let mut x = vec![0.0; 2];
        let report = ksp.apply(&[1.0, 2.0], &mut x).unwrap();
        assert_eq!(ksp.num_iterations(), report.iterations);
        assert_eq!(ksp.converged(), report.converged);
        assert!(ksp.converged());
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(x[1], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn verbosity_parses() {
        assert_eq!("full-trace".parse::<Verbosity>().unwrap(), Verbosity::FullTrace);
        assert_eq!("Summary".parse::<Verbosity>().unwrap(), Verbosity::Summary);
        assert!("loud".parse::<Verbosity>().is_err());
        assert!(Verbosity::Silent < Verbosity::ErrorsOnly);
    }
}
