//! Convergence tracking & tolerance checks for iterative solvers.
//!
//! [`StoppingCriteria`] holds the user-facing tolerances and is rebuilt (never mutated) when they
//! change. [`StoppingCriteria::combined`] turns it into a [`CombinedCriterion`], the logical OR of
//! a relative residual test, an absolute residual test and an iteration cap.
//!
//! During a solve the method kernels talk to a [`StopCheck`], which borrows the
//! [`ConvergenceLogger`] created for that one call. A logger therefore cannot outlive or leak into
//! another call.

use crate::error::{BridgeError, Result};
use crate::executor::Executor;
use crate::matrix::Dense;
use std::fmt;
use std::str::FromStr;

/// Which residual quantity the residual criteria look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResidualMode {
    /// True residual norm ‖b − Ax‖, recomputed at every check.
    #[default]
    Explicit,
    /// Recursively updated squared-norm estimate maintained by the method.
    Implicit,
}

impl FromStr for ResidualMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "explicit" | "true" => Ok(ResidualMode::Explicit),
            "implicit" | "recurrence" => Ok(ResidualMode::Implicit),
            other => Err(BridgeError::config(format!("unknown residual mode '{}'", other))),
        }
    }
}

/// Tolerances and iteration cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoppingCriteria {
    pub rel_tol: f64,
    pub abs_tol: f64,
    pub max_iters: usize,
    pub mode: ResidualMode,
}

impl Default for StoppingCriteria {
    fn default() -> Self {
        Self {
            rel_tol: 0.0,
            abs_tol: 0.0,
            max_iters: 10,
            mode: ResidualMode::Explicit,
        }
    }
}

impl StoppingCriteria {
    pub fn new(rel_tol: f64, abs_tol: f64, max_iters: usize, mode: ResidualMode) -> Self {
        Self {
            rel_tol,
            abs_tol,
            max_iters,
            mode,
        }
    }

    pub fn with_rel_tol(self, rel_tol: f64) -> Self {
        Self { rel_tol, ..self }
    }

    pub fn with_abs_tol(self, abs_tol: f64) -> Self {
        Self { abs_tol, ..self }
    }

    pub fn with_max_iters(self, max_iters: usize) -> Self {
        Self { max_iters, ..self }
    }

    pub fn with_mode(self, mode: ResidualMode) -> Self {
        Self { mode, ..self }
    }

    /// Build the OR-combination of the residual criteria for `mode` and the iteration cap.
    pub fn combined(&self) -> CombinedCriterion {
        let residual = |tol, baseline| match self.mode {
            ResidualMode::Explicit => Criterion::ResidualNorm { tol, baseline },
            ResidualMode::Implicit => Criterion::ImplicitResidualNorm { tol, baseline },
        };
        CombinedCriterion {
            mode: self.mode,
            criteria: vec![
                residual(self.rel_tol, Baseline::InitialResnorm),
                residual(self.abs_tol, Baseline::Absolute),
                Criterion::Iteration {
                    max_iters: self.max_iters,
                },
            ],
        }
    }
}

/// Reference value a residual tolerance is scaled by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baseline {
    /// Residual norm at the first check of the solve.
    InitialResnorm,
    /// No scaling.
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Criterion {
    ResidualNorm { tol: f64, baseline: Baseline },
    ImplicitResidualNorm { tol: f64, baseline: Baseline },
    Iteration { max_iters: usize },
}

/// Logical OR of criteria; built from [`StoppingCriteria::combined`].
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedCriterion {
    mode: ResidualMode,
    criteria: Vec<Criterion>,
}

impl CombinedCriterion {
    pub fn mode(&self) -> ResidualMode {
        self.mode
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn max_iters(&self) -> usize {
        self.criteria
            .iter()
            .filter_map(|c| match c {
                Criterion::Iteration { max_iters } => Some(*max_iters),
                _ => None,
            })
            .min()
            .unwrap_or(usize::MAX)
    }
}

/// What a method knows at one check.
#[derive(Debug, Clone, Copy, Default)]
pub struct IterationStatus {
    pub iteration: usize,
    /// True residual norm, when the method computed it.
    pub residual_norm: Option<f64>,
    /// Squared residual estimate, when the method maintains one.
    pub implicit_sq_resnorm: Option<f64>,
}

impl IterationStatus {
    pub fn explicit(iteration: usize, residual_norm: f64) -> Self {
        Self {
            iteration,
            residual_norm: Some(residual_norm),
            implicit_sq_resnorm: None,
        }
    }

    pub fn implicit(iteration: usize, sq_resnorm: f64) -> Self {
        Self {
            iteration,
            residual_norm: None,
            implicit_sq_resnorm: Some(sq_resnorm),
        }
    }
}

/// Per-solve convergence record.
///
/// Result scalars live on the solver's executor, so reading them on a device executor goes
/// through an explicit copy to the master (see [`ConvergenceLogger::report`]).
#[derive(Debug)]
pub struct ConvergenceLogger {
    exec: Executor,
    num_iterations: usize,
    converged: bool,
    stopped: bool,
    residual_norm: Dense,
    implicit_sq_resnorm: Dense,
}

impl ConvergenceLogger {
    pub fn new(exec: &Executor) -> Self {
        Self {
            exec: exec.clone(),
            num_iterations: 0,
            converged: false,
            stopped: false,
            residual_norm: Dense::scalar(exec, f64::NAN),
            implicit_sq_resnorm: Dense::scalar(exec, f64::NAN),
        }
    }

    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    pub fn has_converged(&self) -> bool {
        self.converged
    }

    pub fn has_stopped(&self) -> bool {
        self.stopped
    }

    pub fn residual_norm(&self) -> &Dense {
        &self.residual_norm
    }

    pub fn implicit_sq_resnorm(&self) -> &Dense {
        &self.implicit_sq_resnorm
    }

    fn record(&mut self, status: &IterationStatus) {
        self.num_iterations = status.iteration;
        if let Some(r) = status.residual_norm {
            self.residual_norm.set_raw(0, r);
        }
        if let Some(t) = status.implicit_sq_resnorm {
            self.implicit_sq_resnorm.set_raw(0, t);
        }
    }

    /// Final values on the host. In implicit mode the recorded quantity is a squared norm and is
    /// square-rooted before it is reported.
    pub fn report(&self, mode: ResidualMode, trace: Option<Vec<f64>>) -> Result<ConvergenceReport> {
        let master = self.exec.master();
        let final_residual_norm = match mode {
            ResidualMode::Explicit => self.residual_norm.copy_to(&master).at(0, 0)?,
            ResidualMode::Implicit => self.implicit_sq_resnorm.copy_to(&master).at(0, 0)?.abs().sqrt(),
        };
        Ok(ConvergenceReport {
            iterations: self.num_iterations,
            final_residual_norm,
            converged: self.converged,
            trace,
        })
    }
}

/// Residual-norm trace attached directly to a solver for full-trace verbosity.
#[derive(Debug, Clone, Default)]
pub struct ResidualLogger {
    entries: Vec<(usize, f64)>,
}

impl ResidualLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, iteration: usize, residual_norm: f64) {
        self.entries.push((iteration, residual_norm));
    }

    pub fn entries(&self) -> &[(usize, f64)] {
        &self.entries
    }

    pub fn norms(&self) -> Vec<f64> {
        self.entries.iter().map(|&(_, r)| r).collect()
    }

    /// Emit one line per recorded iteration.
    pub fn write(&self) {
        for (it, r) in &self.entries {
            log::info!("iteration {:>5}: residual norm {:.6e}", it, r);
        }
    }
}

/// Stopping decisions for one solve call.
pub struct StopCheck<'l> {
    criterion: &'l CombinedCriterion,
    logger: &'l mut ConvergenceLogger,
    trace: Option<&'l mut ResidualLogger>,
    baseline: Option<f64>,
}

impl<'l> StopCheck<'l> {
    pub fn new(criterion: &'l CombinedCriterion, logger: &'l mut ConvergenceLogger) -> Self {
        Self {
            criterion,
            logger,
            trace: None,
            baseline: None,
        }
    }

    pub fn with_trace(mut self, trace: &'l mut ResidualLogger) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn mode(&self) -> ResidualMode {
        self.criterion.mode
    }

    /// True when the method must supply the recomputed residual norm.
    pub fn needs_explicit(&self) -> bool {
        self.criterion.mode == ResidualMode::Explicit
    }

    pub fn max_iters(&self) -> usize {
        self.criterion.max_iters()
    }

    fn monitored(&self, status: &IterationStatus) -> f64 {
        let implicit = status.implicit_sq_resnorm.map(|t| t.abs().sqrt());
        match self.criterion.mode {
            ResidualMode::Explicit => status.residual_norm.or(implicit),
            ResidualMode::Implicit => implicit.or(status.residual_norm),
        }
        .unwrap_or(f64::INFINITY)
    }

    /// Record `status` and decide whether the solve stops here.
    pub fn check(&mut self, status: IterationStatus) -> bool {
        let value = self.monitored(&status);
        let baseline = *self.baseline.get_or_insert(value);
        self.logger.record(&status);
        if let Some(trace) = self.trace.as_deref_mut() {
            trace.push(status.iteration, value);
        }

        let mut converged = false;
        let mut stop = false;
        for c in &self.criterion.criteria {
            match *c {
                Criterion::ResidualNorm { tol, baseline: b } | Criterion::ImplicitResidualNorm { tol, baseline: b } => {
                    let reference = match b {
                        Baseline::InitialResnorm => baseline,
                        Baseline::Absolute => 1.0,
                    };
                    if value <= tol * reference {
                        converged = true;
                        stop = true;
                    }
                }
                Criterion::Iteration { max_iters } => {
                    if status.iteration >= max_iters {
                        stop = true;
                    }
                }
            }
        }
        if stop {
            self.logger.converged = converged;
            self.logger.stopped = true;
        }
        stop
    }

    /// The method cannot continue (zero denominator); stop without convergence.
    pub fn breakdown(&mut self, iteration: usize) {
        log::debug!("method breakdown at iteration {}", iteration);
        self.logger.num_iterations = iteration;
        self.logger.converged = false;
        self.logger.stopped = true;
    }
}

impl fmt::Debug for StopCheck<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopCheck")
            .field("criterion", &self.criterion)
            .field("baseline", &self.baseline)
            .finish()
    }
}

/// Outcome of one solve.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvergenceReport {
    pub iterations: usize,
    pub final_residual_norm: f64,
    pub converged: bool,
    pub trace: Option<Vec<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecKind;

    fn exec() -> Executor {
        Executor::create(ExecKind::Reference).unwrap()
    }

    #[test]
    fn defaults_match_documented_values() {
        let c = StoppingCriteria::default();
        assert_eq!((c.rel_tol, c.abs_tol, c.max_iters), (0.0, 0.0, 10));
        assert_eq!(c.mode, ResidualMode::Explicit);
        assert_eq!(c.combined().criteria().len(), 3);
    }

    #[test]
    fn relative_criterion_uses_first_residual() {
        let exec = exec();
        let crit = StoppingCriteria::new(1e-2, 0.0, 100, ResidualMode::Explicit).combined();
        let mut logger = ConvergenceLogger::new(&exec);
        let mut stop = StopCheck::new(&crit, &mut logger);
        assert!(!stop.check(IterationStatus::explicit(0, 10.0)));
        assert!(!stop.check(IterationStatus::explicit(1, 0.5)));
        assert!(stop.check(IterationStatus::explicit(2, 0.05)));
        let report = logger.report(ResidualMode::Explicit, None).unwrap();
        assert!(report.converged);
        assert_eq!(report.iterations, 2);
        assert_eq!(report.final_residual_norm, 0.05);
    }

    #[test]
    fn zero_tolerances_stop_on_iteration_cap() {
        let exec = exec();
        let crit = StoppingCriteria::default().with_max_iters(3).combined();
        let mut logger = ConvergenceLogger::new(&exec);
        let mut stop = StopCheck::new(&crit, &mut logger);
        let stops: Vec<bool> = (0..=3).map(|i| stop.check(IterationStatus::explicit(i, 1.0))).collect();
        assert_eq!(stops, vec![false, false, false, true]);
        assert!(!logger.has_converged());
        assert!(logger.has_stopped());
    }

    #[test]
    fn implicit_report_takes_square_root() {
        let exec = exec();
        let crit = StoppingCriteria::new(0.0, 1.0, 5, ResidualMode::Implicit).combined();
        let mut logger = ConvergenceLogger::new(&exec);
        let mut trace = ResidualLogger::new();
        let mut stop = StopCheck::new(&crit, &mut logger).with_trace(&mut trace);
        assert!(!stop.check(IterationStatus::implicit(0, 16.0)));
        assert!(stop.check(IterationStatus::implicit(1, 0.25)));
        let report = logger.report(ResidualMode::Implicit, Some(trace.norms())).unwrap();
        assert_eq!(report.final_residual_norm, 0.5);
        assert_eq!(report.trace, Some(vec![4.0, 0.5]));
    }

    #[test]
    fn breakdown_is_not_convergence() {
        let exec = exec();
        let crit = StoppingCriteria::default().combined();
        let mut logger = ConvergenceLogger::new(&exec);
        let mut stop = StopCheck::new(&crit, &mut logger);
        stop.check(IterationStatus::explicit(0, 1.0));
        stop.breakdown(1);
        assert!(logger.has_stopped());
        assert!(!logger.has_converged());
        assert_eq!(logger.num_iterations(), 1);
    }
}
