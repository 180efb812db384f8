//! Restarted GMRES, right-preconditioned (Saad §9.3.2).
//!
//! # Features
//! - Right preconditioning: the Krylov space is built for A·M and the update is x += M(V y)
//! - Double modified Gram-Schmidt orthogonalization
//! - Givens rotations for the least-squares update; the rotated right-hand side gives the
//!   residual norm at every step without forming x
//! - Happy breakdown detection
//!
//! The Krylov basis lives in a [`KrylovBasis`], so the same cycle serves plain GMRES (f64 basis)
//! and CB-GMRES (reduced-precision basis).
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd Edition. SIAM. §6.5, §9.3

use super::cb_gmres::{KrylovBasis, StoragePrecision};
use super::{LinearSolver, precondition, residual};
use crate::core::traits::LinOp;
use crate::core::wrappers::{axpy, dot, norm};
use crate::error::Result;
use crate::utils::convergence::{IterationStatus, ResidualMode, StopCheck};

/// Krylov dimension used when the configured value is 0.
pub const DEFAULT_KRYLOV_DIM: usize = 100;

pub(crate) fn effective_krylov_dim(krylov_dim: usize) -> usize {
    if krylov_dim == 0 { DEFAULT_KRYLOV_DIM } else { krylov_dim }
}

/// Restarted GMRES.
///
/// In explicit residual mode the check inside a cycle uses the Givens recurrence estimate
/// `|g_j|`; the true residual `b − A·x` is recomputed only at a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GmresSolver {
    /// Arnoldi vectors per restart cycle; 0 selects [`DEFAULT_KRYLOV_DIM`].
    pub krylov_dim: usize,
}

impl GmresSolver {
    pub fn new(krylov_dim: usize) -> Self {
        Self { krylov_dim }
    }
}

impl LinearSolver for GmresSolver {
    fn name(&self) -> &'static str {
        "gmres"
    }

    fn supports(&self, mode: ResidualMode) -> bool {
        mode == ResidualMode::Explicit
    }

    fn solve(
        &self,
        a: &dyn LinOp,
        pc: Option<&dyn LinOp>,
        b: &[f64],
        x: &mut [f64],
        stop: &mut StopCheck<'_>,
    ) -> Result<()> {
        restarted(a, pc, b, x, stop, self.krylov_dim, StoragePrecision::Keep)
    }
}

/// Apply the rotation (c, s) to the pair (a, b).
#[inline]
fn rotate(c: f64, s: f64, a: f64, b: f64) -> (f64, f64) {
    (c * a + s * b, -s * a + c * b)
}

/// Solve the j×j upper-triangular system H y = g by back substitution.
///
/// A pivot that is zero relative to the largest entry of H means the least-squares problem is
/// singular; `None` is returned and the caller reports a breakdown.
fn back_substitute(h: &[Vec<f64>], g: &[f64], j: usize) -> Option<Vec<f64>> {
    let h_max = (0..j)
        .flat_map(|i| h[i][i..j].iter())
        .fold(0.0_f64, |m, v| m.max(v.abs()));
    let mut y = vec![0.0; j];
    for i in (0..j).rev() {
        let mut sum = g[i];
        for k in (i + 1)..j {
            sum -= h[i][k] * y[k];
        }
        let pivot = h[i][i];
        if !pivot.is_finite() || pivot.abs() <= f64::EPSILON * h_max {
            return None;
        }
        y[i] = sum / pivot;
    }
    Some(y)
}

pub(crate) fn restarted(
    a: &dyn LinOp,
    pc: Option<&dyn LinOp>,
    b: &[f64],
    x: &mut [f64],
    stop: &mut StopCheck<'_>,
    krylov_dim: usize,
    storage: StoragePrecision,
) -> Result<()> {
    let exec = a.executor();
    let n = b.len();
    let m = effective_krylov_dim(krylov_dim).min(n.max(1));
    let mut basis = KrylovBasis::new(storage, n, m + 1);
    let mut r = vec![0.0; n];
    let mut w = vec![0.0; n];
    let mut z = vec![0.0; n];
    let mut vi = vec![0.0; n];
    let mut h = vec![vec![0.0; m]; m + 1];
    let mut g = vec![0.0; m + 1];
    let mut cs = vec![0.0; m];
    let mut sn = vec![0.0; m];
    let mut iteration = 0;

    residual(a, b, x, &mut r)?;
    let mut beta = norm(exec, &r);
    if stop.check(IterationStatus::explicit(0, beta)) {
        return Ok(());
    }

    loop {
        for v in r.iter_mut() {
            *v /= beta;
        }
        basis.set(0, &r);
        g.iter_mut().for_each(|gi| *gi = 0.0);
        g[0] = beta;
        for row in h.iter_mut() {
            row.iter_mut().for_each(|v| *v = 0.0);
        }

        let mut j = 0;
        let mut stopped = false;
        while j < m {
            basis.get(j, &mut vi);
            precondition(pc, &vi, &mut z)?;
            a.apply(&z, &mut w)?;
            let w_norm = norm(exec, &w);
            for _pass in 0..2 {
                for i in 0..=j {
                    basis.get(i, &mut vi);
                    let hij = dot(exec, &w, &vi);
                    h[i][j] += hij;
                    axpy(exec, -hij, &vi, &mut w);
                }
            }
            let h_next = norm(exec, &w);

            for i in 0..j {
                let (a0, a1) = rotate(cs[i], sn[i], h[i][j], h[i + 1][j]);
                h[i][j] = a0;
                h[i + 1][j] = a1;
            }
            let denom = (h[j][j] * h[j][j] + h_next * h_next).sqrt();
            if denom == 0.0 {
                cs[j] = 1.0;
                sn[j] = 0.0;
            } else {
                cs[j] = h[j][j] / denom;
                sn[j] = h_next / denom;
            }
            h[j][j] = cs[j] * h[j][j] + sn[j] * h_next;
            let (g0, g1) = rotate(cs[j], sn[j], g[j], 0.0);
            g[j] = g0;
            g[j + 1] = g1;

            iteration += 1;
            j += 1;
            let happy = h_next <= f64::EPSILON * w_norm;
            if stop.check(IterationStatus::explicit(iteration, g[j].abs())) {
                stopped = true;
                break;
            }
            if happy {
                break;
            }
            for v in w.iter_mut() {
                *v /= h_next;
            }
            if j < m {
                basis.set(j, &w);
            }
        }

        let Some(y) = back_substitute(&h, &g, j) else {
            stop.breakdown(iteration);
            return Ok(());
        };
        w.iter_mut().for_each(|v| *v = 0.0);
        for (i, yi) in y.iter().enumerate() {
            basis.get(i, &mut vi);
            axpy(exec, *yi, &vi, &mut w);
        }
        precondition(pc, &w, &mut z)?;
        axpy(exec, 1.0, &z, x);
        if stopped {
            return Ok(());
        }

        residual(a, b, x, &mut r)?;
        beta = norm(exec, &r);
        if beta == 0.0 {
            stop.check(IterationStatus::explicit(iteration, beta));
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::adapt;
    use crate::executor::{ExecKind, Executor};
    use crate::matrix::Csr;
    use crate::utils::convergence::{ConvergenceLogger, StoppingCriteria};

    fn nonsym(n: usize) -> Csr {
        let mut trips = Vec::new();
        for i in 0..n {
            trips.push((i, i, 2.0));
            if i > 0 {
                trips.push((i, i - 1, -1.0));
            }
            if i + 1 < n {
                trips.push((i, i + 1, 0.5));
            }
        }
        Csr::from_triplets(n, n, &trips).unwrap()
    }

    #[test]
    fn gmres_with_restart_converges() {
        let exec = Executor::create(ExecKind::Reference).unwrap();
        let n = 30;
        let a = nonsym(n);
        let x_true: Vec<f64> = (0..n).map(|i| (i as f64 * 0.3).sin()).collect();
        let mut b = vec![0.0; n];
        a.view().spmv(&x_true, &mut b);
        let op = adapt(&a, &exec).unwrap();
        let crit = StoppingCriteria::new(1e-10, 0.0, 500, ResidualMode::Explicit).combined();
        let mut logger = ConvergenceLogger::new(&exec);
        let mut x = vec![0.0; n];
        GmresSolver::new(8)
            .solve(&op, None, &b, &mut x, &mut StopCheck::new(&crit, &mut logger))
            .unwrap();
        assert!(logger.has_converged());
        for (xi, ti) in x.iter().zip(&x_true) {
            assert!((xi - ti).abs() < 1e-7, "{} vs {}", xi, ti);
        }
    }

    #[test]
    fn zero_dimension_means_default() {
        assert_eq!(effective_krylov_dim(0), DEFAULT_KRYLOV_DIM);
        assert_eq!(effective_krylov_dim(7), 7);
        assert!(!GmresSolver::new(0).supports(ResidualMode::Implicit));
    }
}
