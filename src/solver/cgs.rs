//! Conjugate Gradient Squared per Sonneveld (1989), right-preconditioned.

use super::{LinearSolver, breakdown, precondition, residual, status};
use crate::core::traits::LinOp;
use crate::core::wrappers::{axpy, dot};
use crate::error::Result;
use crate::utils::convergence::{ResidualMode, StopCheck};

#[derive(Debug, Clone, Copy, Default)]
pub struct CgsSolver;

impl LinearSolver for CgsSolver {
    fn name(&self) -> &'static str {
        "cgs"
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
        residual(a, b, x, &mut r)?;
        let r_tld = r.clone();
        let mut u = vec![0.0; n];
        let mut p = vec![0.0; n];
        let mut q = vec![0.0; n];
        let mut p_hat = vec![0.0; n];
        let mut v_hat = vec![0.0; n];
        let mut u_hat = vec![0.0; n];
        let mut uq = vec![0.0; n];
        let mut t = vec![0.0; n];
        let mut work = vec![0.0; n];
        let mut rho_prev = 1.0;

        if stop.check(status(stop, a, b, x, 0, dot(exec, &r, &r), &mut work)?) {
            return Ok(());
        }

        for it in 1.. {
            let rho = dot(exec, &r_tld, &r);
            if breakdown(rho) {
                stop.breakdown(it - 1);
                return Ok(());
            }
            if it == 1 {
                u.copy_from_slice(&r);
                p.copy_from_slice(&u);
            } else {
                let beta = rho / rho_prev;
                for i in 0..n {
                    u[i] = r[i] + beta * q[i];
                    p[i] = u[i] + beta * (q[i] + beta * p[i]);
                }
            }
            precondition(pc, &p, &mut p_hat)?;
            a.apply(&p_hat, &mut v_hat)?;
            let sigma = dot(exec, &r_tld, &v_hat);
            if breakdown(sigma) {
                stop.breakdown(it - 1);
                return Ok(());
            }
            let alpha = rho / sigma;
            for i in 0..n {
                q[i] = u[i] - alpha * v_hat[i];
                uq[i] = u[i] + q[i];
            }
            precondition(pc, &uq, &mut u_hat)?;
            axpy(exec, alpha, &u_hat, x);
            a.apply(&u_hat, &mut t)?;
            axpy(exec, -alpha, &t, &mut r);
            if stop.check(status(stop, a, b, x, it, dot(exec, &r, &r), &mut work)?) {
                return Ok(());
            }
            rho_prev = rho;
        }
        Ok(())
    }
}
