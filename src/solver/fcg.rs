//! Flexible Conjugate Gradient (Notay 2000).
//!
//! Identical to CG except that β uses the Polak–Ribière form (r_k − r_{k−1})ᵀz_k / ρ_{k−1}, which
//! tolerates a preconditioner that changes between applications.

use super::{LinearSolver, breakdown, precondition, residual, status};
use crate::core::traits::LinOp;
use crate::core::wrappers::{axpy, dot, xpby};
use crate::error::Result;
use crate::utils::convergence::{ResidualMode, StopCheck};

#[derive(Debug, Clone, Copy, Default)]
pub struct FcgSolver;

impl LinearSolver for FcgSolver {
    fn name(&self) -> &'static str {
        "fcg"
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
        let mut t = vec![0.0; n];
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
            for i in 0..n {
                let r_new = r[i] - alpha * q[i];
                t[i] = r_new - r[i];
                r[i] = r_new;
            }
            precondition(pc, &r, &mut z)?;
            let rho_new = dot(exec, &r, &z);
            let rho_t = dot(exec, &t, &z);
            if stop.check(status(stop, a, b, x, it, rho_new, &mut work)?) {
                return Ok(());
            }
            if breakdown(rho) {
                stop.breakdown(it);
                return Ok(());
            }
            xpby(exec, &z, rho_t / rho, &mut p);
            rho = rho_new;
        }
        Ok(())
    }
}
