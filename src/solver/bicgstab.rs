//! BiCGStab (right-preconditioned) per van der Vorst (1992).

use super::{LinearSolver, breakdown, precondition, residual, status};
use crate::core::traits::LinOp;
use crate::core::wrappers::{axpy, dot};
use crate::error::Result;
use crate::utils::convergence::{ResidualMode, StopCheck};

#[derive(Debug, Clone, Copy, Default)]
pub struct BiCgStabSolver;

impl LinearSolver for BiCgStabSolver {
    fn name(&self) -> &'static str {
        "bicgstab"
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
        let r_hat = r.clone();
        let mut p = vec![0.0; n];
        let mut v = vec![0.0; n];
        let mut p_hat = vec![0.0; n];
        let mut s = vec![0.0; n];
        let mut s_hat = vec![0.0; n];
        let mut t = vec![0.0; n];
        let mut work = vec![0.0; n];
        let (mut rho, mut alpha, mut omega) = (1.0, 1.0, 1.0);

        if stop.check(status(stop, a, b, x, 0, dot(exec, &r, &r), &mut work)?) {
            return Ok(());
        }

        for it in 1.. {
            let rho_new = dot(exec, &r_hat, &r);
            if breakdown(rho_new) || breakdown(omega) {
                stop.breakdown(it - 1);
                return Ok(());
            }
            let beta = (rho_new / rho) * (alpha / omega);
            for i in 0..n {
                p[i] = r[i] + beta * (p[i] - omega * v[i]);
            }
            precondition(pc, &p, &mut p_hat)?;
            a.apply(&p_hat, &mut v)?;
            let rv = dot(exec, &r_hat, &v);
            if breakdown(rv) {
                stop.breakdown(it - 1);
                return Ok(());
            }
            alpha = rho_new / rv;
            for i in 0..n {
                s[i] = r[i] - alpha * v[i];
            }
            precondition(pc, &s, &mut s_hat)?;
            a.apply(&s_hat, &mut t)?;
            let tt = dot(exec, &t, &t);
            omega = if tt > 0.0 { dot(exec, &t, &s) / tt } else { 0.0 };
            axpy(exec, alpha, &p_hat, x);
            axpy(exec, omega, &s_hat, x);
            for i in 0..n {
                r[i] = s[i] - omega * t[i];
            }
            if stop.check(status(stop, a, b, x, it, dot(exec, &r, &r), &mut work)?) {
                return Ok(());
            }
            rho = rho_new;
        }
        Ok(())
    }
}
