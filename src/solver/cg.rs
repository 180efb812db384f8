//! Preconditioned Conjugate Gradient per Saad §9.2.
//!
//! The implicit residual quantity is ρ = rᵀz, i.e. ‖r‖² without a preconditioner.

use super::{LinearSolver, breakdown, precondition, residual, status};
use crate::core::traits::LinOp;
use crate::core::wrappers::{axpy, dot, xpby};
use crate::error::Result;
use crate::utils::convergence::{ResidualMode, StopCheck};

#[derive(Debug, Clone, Copy, Default)]
pub struct CgSolver;

impl LinearSolver for CgSolver {
    fn name(&self) -> &'static str {
        "cg"
    }

    fn supports(&self, _mode: ResidualMode) -> bool {
        true
    }

    fn solve(
        &self,
        a: &dyn LinOp,
        pc: Option<&dyn LinOp>,
        b: &[f64],
        x: &mut [f64],
        stop: &mut StopCheck<'_>,
    ) -> Result<()> {
        let exec = a.executor();
        let n = b.len();
        let mut r = vec![0.0; n];
        let mut z = vec![0.0; n];
        let mut q = vec![0.0; n];
        let mut work = vec![0.0; n];

        residual(a, b, x, &mut r)?;
        precondition(pc, &r, &mut z)?;
        let mut p = z.clone();
        let mut rho = dot(exec, &r, &z);
        if stop.check(status(stop, a, b, x, 0, rho, &mut work)?) {
            return Ok(());
        }

        for it in 1.. {
            a.apply(&p, &mut q)?;
            let pq = dot(exec, &p, &q);
            if breakdown(pq) {
                stop.breakdown(it - 1);
                return Ok(());
            }
            let alpha = rho / pq;
            axpy(exec, alpha, &p, x);
            axpy(exec, -alpha, &q, &mut r);
            precondition(pc, &r, &mut z)?;
            let rho_new = dot(exec, &r, &z);
            if stop.check(status(stop, a, b, x, it, rho_new, &mut work)?) {
                return Ok(());
            }
            if breakdown(rho) {
                stop.breakdown(it);
                return Ok(());
            }
            xpby(exec, &z, rho_new / rho, &mut p);
            rho = rho_new;
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
    fn cg_solves_simple_spd() {
        // SPD system: [[4,1],[1,3]] x = [1,2]
        let exec = Executor::create(ExecKind::Reference).unwrap();
        let a = Csr::from_triplets(2, 2, &[(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)]).unwrap();
        let op = adapt(&a, &exec).unwrap();
        let crit = StoppingCriteria::new(1e-12, 0.0, 20, ResidualMode::Explicit).combined();
        let mut logger = ConvergenceLogger::new(&exec);
        let b = vec![1.0, 2.0];
        let mut x = vec![0.0, 0.0];
        CgSolver
            .solve(&op, None, &b, &mut x, &mut StopCheck::new(&crit, &mut logger))
            .unwrap();
        let expected = [0.09090909090909091, 0.6363636363636364];
        for (xi, ei) in x.iter().zip(expected.iter()) {
            assert!((xi - ei).abs() < 1e-8, "xi = {}, expected = {}", xi, ei);
        }
        assert!(logger.has_converged(), "CG did not converge");
        assert!(logger.num_iterations() <= 2);
    }
}
