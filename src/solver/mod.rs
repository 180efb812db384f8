//! Krylov and stationary solvers, and the factory that binds them to an operator.
//!
//! A [`SolverFactory`] stores the method, the stopping criteria, and how the preconditioner
//! is supplied. [`SolverFactory::generate`] binds all of that to one [`LinearOperatorHandle`] and
//! returns a [`GeneratedSolver`]. A generated solver is never retargeted: a new operator means a
//! new generation.

use crate::adapter::{AdaptationKind, LinearOperatorHandle};
use crate::core::traits::LinOp;
use crate::core::wrappers::norm;
use crate::error::{BridgeError, Result};
use crate::executor::Executor;
use crate::preconditioner::{GeneratedPreconditioner, PreconditionerFactory};
use crate::utils::convergence::{
    CombinedCriterion, ConvergenceLogger, ConvergenceReport, IterationStatus, ResidualLogger,
    ResidualMode, StopCheck, StoppingCriteria,
};
use std::fmt;
use std::sync::Arc;

pub mod bicgstab;
pub mod cb_gmres;
pub mod cg;
pub mod cgs;
pub mod fcg;
pub mod gmres;
pub mod ir;

pub use bicgstab::BiCgStabSolver;
pub use cb_gmres::{CbGmresSolver, StoragePrecision};
pub use cg::CgSolver;
pub use cgs::CgsSolver;
pub use fcg::FcgSolver;
pub use gmres::{DEFAULT_KRYLOV_DIM, GmresSolver};
pub use ir::IrSolver;

/// One iterative method.
pub trait LinearSolver: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;
    /// Whether the method can supply the quantity `mode` monitors.
    fn supports(&self, mode: ResidualMode) -> bool;
    /// Iterate on A x = b from the current `x` until `stop` says so.
    ///
    /// `pc` is the preconditioner, or the inner solver for stationary methods.
    fn solve(
        &self,
        a: &dyn LinOp,
        pc: Option<&dyn LinOp>,
        b: &[f64],
        x: &mut [f64],
        stop: &mut StopCheck<'_>,
    ) -> Result<()>;
}

/// A zero or non-finite denominator ends the iteration.
#[inline]
pub(crate) fn breakdown(v: f64) -> bool {
    v == 0.0 || !v.is_finite()
}

/// z = M r, or z = r without a preconditioner.
pub(crate) fn precondition(pc: Option<&dyn LinOp>, r: &[f64], z: &mut [f64]) -> Result<()> {
    match pc {
        Some(m) => m.apply(r, z),
        None => {
            z.copy_from_slice(r);
            Ok(())
        }
    }
}

/// r = b − A x
pub(crate) fn residual(a: &dyn LinOp, b: &[f64], x: &[f64], r: &mut [f64]) -> Result<()> {
    a.apply(x, r)?;
    for (ri, bi) in r.iter_mut().zip(b) {
        *ri = bi - *ri;
    }
    Ok(())
}

/// Status for one check: the recomputed residual norm when the criterion monitors it, and the
/// method's implicit quantity in every case.
pub(crate) fn status(
    stop: &StopCheck<'_>,
    a: &dyn LinOp,
    b: &[f64],
    x: &[f64],
    iteration: usize,
    implicit: f64,
    work: &mut [f64],
) -> Result<IterationStatus> {
    let mut s = IterationStatus::implicit(iteration, implicit);
    if stop.needs_explicit() {
        residual(a, b, x, work)?;
        s.residual_norm = Some(norm(a.executor(), work));
    }
    Ok(s)
}

/// Recognized methods with their construction parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SolverMethod {
    Cg,
    Bicgstab,
    Cgs,
    Fcg,
    /// Krylov dimension 0 selects [`DEFAULT_KRYLOV_DIM`].
    Gmres { krylov_dim: usize },
    CbGmres { krylov_dim: usize, storage: StoragePrecision },
    /// Richardson iteration around an inner solver.
    Ir { relaxation_factor: f64 },
}

impl SolverMethod {
    pub fn name(&self) -> &'static str {
        self.instantiate().name()
    }

    /// Residual mode used unless the caller picks one.
    pub fn default_mode(&self) -> ResidualMode {
        match self {
            SolverMethod::Cg | SolverMethod::Bicgstab | SolverMethod::Cgs | SolverMethod::Fcg => {
                ResidualMode::Implicit
            }
            _ => ResidualMode::Explicit,
        }
    }

    pub fn krylov_dim(&self) -> Option<usize> {
        match *self {
            SolverMethod::Gmres { krylov_dim } | SolverMethod::CbGmres { krylov_dim, .. } => Some(krylov_dim),
            _ => None,
        }
    }

    /// Update the Krylov dimension; `false` for methods that have none.
    pub fn set_krylov_dim(&mut self, dim: usize) -> bool {
        match self {
            SolverMethod::Gmres { krylov_dim } | SolverMethod::CbGmres { krylov_dim, .. } => {
                *krylov_dim = dim;
                true
            }
            _ => false,
        }
    }

    fn instantiate(&self) -> Box<dyn LinearSolver> {
        match *self {
            SolverMethod::Cg => Box::new(CgSolver),
            SolverMethod::Bicgstab => Box::new(BiCgStabSolver),
            SolverMethod::Cgs => Box::new(CgsSolver),
            SolverMethod::Fcg => Box::new(FcgSolver),
            SolverMethod::Gmres { krylov_dim } => Box::new(GmresSolver::new(krylov_dim)),
            SolverMethod::CbGmres { krylov_dim, storage } => Box::new(CbGmresSolver::new(krylov_dim, storage)),
            SolverMethod::Ir { relaxation_factor } => Box::new(IrSolver::new(relaxation_factor)),
        }
    }
}

/// How a solver obtains its preconditioner. Exactly one mode per factory.
#[derive(Clone, Debug, Default)]
pub enum PreconditionerBinding<'a> {
    #[default]
    None,
    /// An instance already generated for the operator the solver will be bound to.
    Generated(GeneratedPreconditioner<'a>),
    /// A description generated against the solver's own operator.
    Factory(Arc<dyn PreconditionerFactory>),
}

/// Ungenerated solver description.
#[derive(Clone, Debug)]
pub struct SolverFactory<'a> {
    exec: Executor,
    method: SolverMethod,
    criteria: StoppingCriteria,
    preconditioner: PreconditionerBinding<'a>,
    inner: Option<Box<SolverFactory<'a>>>,
}

impl<'a> SolverFactory<'a> {
    /// Factory for `method` with default criteria in the method's default residual mode.
    pub fn new(exec: &Executor, method: SolverMethod) -> Self {
        Self {
            exec: exec.clone(),
            method,
            criteria: StoppingCriteria::default().with_mode(method.default_mode()),
            preconditioner: PreconditionerBinding::None,
            inner: None,
        }
    }

    pub fn with_criteria(mut self, criteria: StoppingCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_preconditioner(mut self, binding: PreconditionerBinding<'a>) -> Self {
        self.preconditioner = binding;
        self
    }

    /// Inner solver of a Richardson iteration.
    pub fn with_inner_solver(mut self, inner: SolverFactory<'a>) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    pub fn executor(&self) -> &Executor {
        &self.exec
    }

    pub fn method(&self) -> SolverMethod {
        self.method
    }

    pub fn criteria(&self) -> StoppingCriteria {
        self.criteria
    }

    pub fn preconditioner(&self) -> &PreconditionerBinding<'a> {
        &self.preconditioner
    }

    pub fn inner_solver(&self) -> Option<&SolverFactory<'a>> {
        self.inner.as_deref()
    }

    pub fn set_criteria(&mut self, criteria: StoppingCriteria) {
        self.criteria = criteria;
    }

    pub fn set_krylov_dim(&mut self, dim: usize) -> bool {
        self.method.set_krylov_dim(dim)
    }

    /// Bind to `system`.
    pub fn generate(&self, system: Arc<LinearOperatorHandle<'a>>) -> Result<GeneratedSolver<'a>> {
        let solver = self.method.instantiate();
        if !solver.supports(self.criteria.mode) {
            return Err(BridgeError::config(format!(
                "{} cannot monitor the {:?} residual",
                solver.name(),
                self.criteria.mode
            )));
        }
        let is_stationary = matches!(self.method, SolverMethod::Ir { .. });
        if self.inner.is_some() && !is_stationary {
            return Err(BridgeError::config(format!(
                "{} does not take an inner solver",
                solver.name()
            )));
        }
        if is_stationary && !matches!(self.preconditioner, PreconditionerBinding::None) {
            return Err(BridgeError::config(
                "iterative refinement takes an inner solver, not a preconditioner",
            ));
        }

        let preconditioner = match &self.preconditioner {
            PreconditionerBinding::None => None,
            PreconditionerBinding::Generated(pc) => {
                if !pc.executor().same(system.executor()) {
                    return Err(BridgeError::config(format!(
                        "{} preconditioner was generated on a {} executor other than the solver's",
                        pc.name(),
                        pc.executor().kind()
                    )));
                }
                pc.check_bound_to(&system.fingerprint())?;
                Some(pc.clone())
            }
            PreconditionerBinding::Factory(factory) => {
                let view = system.host_view().ok_or_else(|| {
                    BridgeError::config(format!(
                        "{} preconditioner needs a compressed-row system operator",
                        factory.name()
                    ))
                })?;
                Some(factory.generate(&self.exec, view)?)
            }
        };
        let inner = match &self.inner {
            Some(f) => Some(Box::new(f.generate(Arc::clone(&system))?)),
            None => None,
        };

        let mut adaptation = system.adaptation();
        if let Some(pc) = &preconditioner {
            adaptation = adaptation.combine(pc.adaptation());
        }
        if let Some(inner) = &inner {
            adaptation = adaptation.combine(inner.adaptation());
        }
        log::debug!(
            "generated {} for a {}x{} operator ({:?} vectors)",
            solver.name(),
            system.size(),
            system.size(),
            adaptation
        );

        Ok(GeneratedSolver {
            system,
            method: self.method,
            solver,
            criteria: self.criteria,
            criterion: self.criteria.combined(),
            preconditioner,
            inner,
            adaptation,
            trace: None,
        })
    }
}

/// A solver bound to one operator.
pub struct GeneratedSolver<'a> {
    system: Arc<LinearOperatorHandle<'a>>,
    method: SolverMethod,
    solver: Box<dyn LinearSolver>,
    criteria: StoppingCriteria,
    criterion: CombinedCriterion,
    preconditioner: Option<GeneratedPreconditioner<'a>>,
    inner: Option<Box<GeneratedSolver<'a>>>,
    adaptation: AdaptationKind,
    trace: Option<ResidualLogger>,
}

impl<'a> GeneratedSolver<'a> {
    pub fn system(&self) -> &Arc<LinearOperatorHandle<'a>> {
        &self.system
    }

    pub fn method(&self) -> SolverMethod {
        self.method
    }

    pub fn criteria(&self) -> StoppingCriteria {
        self.criteria
    }

    pub fn preconditioner(&self) -> Option<&GeneratedPreconditioner<'a>> {
        self.preconditioner.as_ref()
    }

    pub fn inner_solver(&self) -> Option<&GeneratedSolver<'a>> {
        self.inner.as_deref()
    }

    /// Vector kind the whole chain (system, preconditioner, inner solver) requires.
    pub fn needs_wrapped_vectors(&self) -> bool {
        self.adaptation.needs_wrapped_vectors()
    }

    /// Change the Krylov dimension of the live method.
    pub fn set_krylov_dim(&mut self, dim: usize) -> bool {
        if self.method.set_krylov_dim(dim) {
            self.solver = self.method.instantiate();
            true
        } else {
            false
        }
    }

    /// Drop any attached residual logger.
    pub fn clear_loggers(&mut self) {
        self.trace = None;
    }

    /// Attach a residual logger, replacing the previous one.
    pub fn add_logger(&mut self, logger: ResidualLogger) {
        self.trace = Some(logger);
    }

    pub fn residual_logger(&self) -> Option<&ResidualLogger> {
        self.trace.as_ref()
    }

    /// Solve A x = b starting from `x`, with a fresh convergence logger for this call.
    pub fn apply(&mut self, b: &[f64], x: &mut [f64]) -> Result<ConvergenceReport> {
        let n = self.system.size();
        if b.len() != n {
            return Err(BridgeError::dim("right-hand side length", n, b.len()));
        }
        if x.len() != n {
            return Err(BridgeError::dim("solution length", n, x.len()));
        }
        let mut logger = ConvergenceLogger::new(self.system.executor());
        let mut trace = self.trace.take();
        let outcome = self.run(b, x, &mut logger, trace.as_mut());
        let norms = trace.as_ref().map(ResidualLogger::norms);
        self.trace = trace;
        outcome?;
        logger.report(self.criteria.mode, norms)
    }

    fn run(
        &self,
        b: &[f64],
        x: &mut [f64],
        logger: &mut ConvergenceLogger,
        trace: Option<&mut ResidualLogger>,
    ) -> Result<()> {
        let pc: Option<&dyn LinOp> = match (&self.inner, &self.preconditioner) {
            (Some(inner), _) => Some(inner.as_ref()),
            (None, Some(pc)) => Some(pc),
            (None, None) => None,
        };
        let mut stop = StopCheck::new(&self.criterion, logger);
        if let Some(trace) = trace {
            stop = stop.with_trace(trace);
        }
        self.solver.solve(self.system.as_ref(), pc, b, x, &mut stop)
    }
}

impl fmt::Debug for GeneratedSolver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedSolver")
            .field("method", &self.method)
            .field("size", &self.system.size())
            .field("criteria", &self.criteria)
            .field("preconditioner", &self.preconditioner)
            .field("inner", &self.inner)
            .field("adaptation", &self.adaptation)
            .finish()
    }
}

/// Used as an inner solver: zero initial guess, own logger per application.
impl LinOp for GeneratedSolver<'_> {
    fn size(&self) -> usize {
        self.system.size()
    }
    fn executor(&self) -> &Executor {
        self.system.executor()
    }
    fn adaptation(&self) -> AdaptationKind {
        self.adaptation
    }
    fn apply(&self, b: &[f64], x: &mut [f64]) -> Result<()> {
        x.iter_mut().for_each(|v| *v = 0.0);
        let mut logger = ConvergenceLogger::new(self.system.executor());
        self.run(b, x, &mut logger, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::adapt;
    use crate::core::traits::Operator;
    use crate::executor::ExecKind;
    use crate::matrix::Csr;
    use crate::preconditioner::JacobiFactory;

    fn laplace(n: usize) -> Csr {
        let mut trips = Vec::new();
        for i in 0..n {
            trips.push((i, i, 2.0));
            if i > 0 {
                trips.push((i, i - 1, -1.0));
            }
            if i + 1 < n {
                trips.push((i, i + 1, -1.0));
            }
        }
        Csr::from_triplets(n, n, &trips).unwrap()
    }

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

    #[test]
    fn gmres_rejects_implicit_mode() {
        let exec = Executor::create(ExecKind::Reference).unwrap();
        let a = laplace(4);
        let handle = Arc::new(adapt(&a, &exec).unwrap());
        let factory = SolverFactory::new(&exec, SolverMethod::Gmres { krylov_dim: 0 })
            .with_criteria(StoppingCriteria::default().with_mode(ResidualMode::Implicit));
        assert!(matches!(factory.generate(handle), Err(BridgeError::Configuration(_))));
    }

    #[test]
    fn exact_iteration_cap() {
        let exec = Executor::create(ExecKind::Reference).unwrap();
        let a = laplace(50);
        let handle = Arc::new(adapt(&a, &exec).unwrap());
        let factory = SolverFactory::new(&exec, SolverMethod::Cg)
            .with_criteria(StoppingCriteria::new(0.0, 0.0, 7, ResidualMode::Explicit));
        let mut solver = factory.generate(handle).unwrap();
        let b = vec![1.0; 50];
        let mut x = vec![0.0; 50];
        let report = GeneratedSolver::apply(&mut solver, &b, &mut x).unwrap();
        assert_eq!(report.iterations, 7);
        assert!(!report.converged);
    }

    #[test]
    fn wrapped_kind_propagates_through_inner_solver() {
        let exec = Executor::create(ExecKind::Reference).unwrap();
        let a = MatrixFree(laplace(10));
        let handle = Arc::new(adapt(&a, &exec).unwrap());
        let inner = SolverFactory::new(&exec, SolverMethod::Cg)
            .with_criteria(StoppingCriteria::new(1e-2, 0.0, 5, ResidualMode::Implicit));
        let ir = SolverFactory::new(&exec, SolverMethod::Ir { relaxation_factor: 1.0 })
            .with_criteria(StoppingCriteria::new(1e-10, 0.0, 100, ResidualMode::Explicit))
            .with_inner_solver(inner);
        let mut solver = ir.generate(handle).unwrap();
        assert!(solver.needs_wrapped_vectors());
        assert!(solver.inner_solver().unwrap().needs_wrapped_vectors());
        let b = vec![1.0; 10];
        let mut x = vec![0.0; 10];
        let report = GeneratedSolver::apply(&mut solver, &b, &mut x).unwrap();
        assert!(report.converged);
    }

    #[test]
    fn mismatched_generated_preconditioner_is_rejected() {
        let exec = Executor::create(ExecKind::Reference).unwrap();
        let a = laplace(6);
        let other = laplace(8);
        let pc = JacobiFactory::default().generate(&exec, other.view()).unwrap();
        let handle = Arc::new(adapt(&a, &exec).unwrap());
        let factory = SolverFactory::new(&exec, SolverMethod::Cg)
            .with_preconditioner(PreconditionerBinding::Generated(pc));
        assert!(matches!(factory.generate(handle), Err(BridgeError::Configuration(_))));
    }

    #[test]
    fn generated_preconditioner_from_other_executor_is_rejected() {
        let exec = Executor::create(ExecKind::Reference).unwrap();
        let elsewhere = Executor::create(ExecKind::Reference).unwrap();
        let a = laplace(6);
        let pc = JacobiFactory::default().generate(&elsewhere, a.view()).unwrap();
        let handle = Arc::new(adapt(&a, &exec).unwrap());
        let factory = SolverFactory::new(&exec, SolverMethod::Cg)
            .with_preconditioner(PreconditionerBinding::Generated(pc));
        assert!(matches!(factory.generate(Arc::clone(&handle)), Err(BridgeError::Configuration(_))));

        let pc = JacobiFactory::default().generate(&exec, a.view()).unwrap();
        let factory = SolverFactory::new(&exec, SolverMethod::Cg)
            .with_preconditioner(PreconditionerBinding::Generated(pc));
        assert!(factory.generate(handle).is_ok());
    }

    #[test]
    fn factory_preconditioner_needs_native_matrix() {
        let exec = Executor::create(ExecKind::Reference).unwrap();
        let a = MatrixFree(laplace(6));
        let handle = Arc::new(adapt(&a, &exec).unwrap());
        let factory = SolverFactory::new(&exec, SolverMethod::Cg)
            .with_preconditioner(PreconditionerBinding::Factory(Arc::new(JacobiFactory::default())));
        assert!(factory.generate(handle).is_err());
    }

    #[test]
    fn krylov_dim_updates_live_solver() {
        let exec = Executor::create(ExecKind::Reference).unwrap();
        let a = laplace(6);
        let handle = Arc::new(adapt(&a, &exec).unwrap());
        let mut factory = SolverFactory::new(&exec, SolverMethod::Gmres { krylov_dim: 0 });
        let mut solver = factory.generate(handle).unwrap();
        assert!(factory.set_krylov_dim(3));
        assert!(solver.set_krylov_dim(3));
        assert_eq!(solver.method().krylov_dim(), Some(3));
        assert_eq!(factory.method().krylov_dim(), Some(3));
        let mut cg = SolverMethod::Cg;
        assert!(!cg.set_krylov_dim(3));
    }
}
