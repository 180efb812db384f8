//! Iterative refinement (relaxed Richardson iteration).
//!
//! x ← x + ω·S(b − A x), where S is the inner solver (applied with a zero initial guess) or the
//! identity when no inner solver is configured. The inner solver arrives through the `pc` slot
//! of [`LinearSolver::solve`].

use super::{LinearSolver, precondition, residual};
use crate::core::traits::LinOp;
use crate::core::wrappers::{axpy, norm};
use crate::error::Result;
use crate::utils::convergence::{IterationStatus, ResidualMode, StopCheck};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IrSolver {
    pub relaxation_factor: f64,
}

impl Default for IrSolver {
    fn default() -> Self {
        Self {
            relaxation_factor: 1.0,
        }
    }
}

impl IrSolver {
    pub fn new(relaxation_factor: f64) -> Self {
        Self { relaxation_factor }
    }
}

impl LinearSolver for IrSolver {
    fn name(&self) -> &'static str {
        "ir"
    }

    fn supports(&self, mode: ResidualMode) -> bool {
        mode == ResidualMode::Explicit
    }

    fn solve(
        &self,
        a: &dyn LinOp,
        inner: Option<&dyn LinOp>,
        b: &[f64],
        x: &mut [f64],
        stop: &mut StopCheck<'_>,
    ) -> Result<()> {
        let exec = a.executor();
        let n = b.len();
        let mut r = vec![0.0; n];
        let mut d = vec![0.0; n];
        residual(a, b, x, &mut r)?;
        if stop.check(IterationStatus::explicit(0, norm(exec, &r))) {
            return Ok(());
        }
        for it in 1.. {
            precondition(inner, &r, &mut d)?;
            axpy(exec, self.relaxation_factor, &d, x);
            residual(a, b, x, &mut r)?;
            if stop.check(IterationStatus::explicit(it, norm(exec, &r))) {
                return Ok(());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::adapt;
    use crate::executor::{ExecKind, Executor};
    use crate::matrix::Csr;
    use crate::utils::convergence::{ConvergenceLogger, StoppingCriteria};

    #[test]
    fn richardson_on_scaled_identity() {
        // A = 2I, ω = 0.5 solves in one step.
        let exec = Executor::create(ExecKind::Reference).unwrap();
        let a = Csr::from_triplets(3, 3, &[(0, 0, 2.0), (1, 1, 2.0), (2, 2, 2.0)]).unwrap();
        let op = adapt(&a, &exec).unwrap();
        let crit = StoppingCriteria::new(1e-12, 0.0, 5, ResidualMode::Explicit).combined();
        let mut logger = ConvergenceLogger::new(&exec);
        let b = vec![2.0, 4.0, 6.0];
        let mut x = vec![0.0; 3];
        IrSolver::new(0.5)
            .solve(&op, None, &b, &mut x, &mut StopCheck::new(&crit, &mut logger))
            .unwrap();
        assert_eq!(x, vec![1.0, 2.0, 3.0]);
        assert_eq!(logger.num_iterations(), 1);
        assert!(logger.has_converged());
    }
}
