//! Preconditioners for linear solvers.
//!
//! A [`PreconditionerFactory`] is an ungenerated description; [`PreconditionerFactory::generate`]
//! binds it to one compressed-row matrix and yields a [`GeneratedPreconditioner`]. The generated
//! handle is reference counted: a solver and the stateful front end that produced it may both
//! hold it, but nobody mutates or regenerates it in place. Rebinding to another matrix always
//! produces a new handle, and every handle carries the pattern fingerprint of the matrix it was
//! built for so a mismatched reuse is caught instead of assumed away.
//!
//! Kinds:
//! - [`jacobi`]: point and block Jacobi with adaptive block storage precision
//! - [`ilu`]: ILU(0)/IC(0), exact or ParILU/ParIC sweeps, exact or ISAI triangular solves
//! - [`isai`]: incomplete sparse approximate inverses of triangular factors
//! - [`amg`]: aggregation AMG with optional mixed-precision coarse levels
//! - [`GeneratedPreconditioner::wrapped`]: any caller operator

use crate::adapter::{AdaptationKind, OperatorWrapper};
use crate::core::traits::{LinOp, Operator, Scalar};
use crate::error::{BridgeError, Result};
use crate::executor::Executor;
use crate::matrix::{CsrView, Dense, PatternFingerprint};
use faer::linalg::solvers::{FullPivLu, SolveCore};
use faer::{Conj, Mat, MatMut};
use std::fmt;
use std::sync::Arc;

pub mod amg;
pub mod ilu;
pub mod isai;
pub mod jacobi;

pub use amg::{AmgFactory, LevelSpec, Multigrid, Precision, SmootherKind};
pub use ilu::{FactorizationKind, IcFactory, IluFactory, TriangularSolve};
pub use jacobi::{BlockJacobi, BlockPrecision, JacobiFactory, StorageOptimization};

/// Ungenerated preconditioner description.
pub trait PreconditionerFactory: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;
    /// Build a preconditioner for `a` on `exec`.
    fn generate<'a>(&self, exec: &Executor, a: CsrView<'a>) -> Result<GeneratedPreconditioner<'a>>;
}

/// Approximate inverse z ≈ A⁻¹ r computed in precision `T`.
pub trait Relaxation<T: Scalar>: Send + Sync + fmt::Debug {
    fn relax(&self, r: &[T], z: &mut [T]) -> Result<()>;
}

/// Exposes an f64 [`Relaxation`] as a backend operator.
#[derive(Debug)]
pub struct RelaxationOp<R> {
    exec: Executor,
    size: usize,
    inner: R,
}

impl<R: Relaxation<f64>> RelaxationOp<R> {
    pub fn new(exec: &Executor, size: usize, inner: R) -> Self {
        Self {
            exec: exec.clone(),
            size,
            inner,
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

impl<R: Relaxation<f64>> LinOp for RelaxationOp<R> {
    fn size(&self) -> usize {
        self.size
    }
    fn executor(&self) -> &Executor {
        &self.exec
    }
    fn apply(&self, b: &[f64], x: &mut [f64]) -> Result<()> {
        self.inner.relax(b, x)
    }
}

/// Shared handle to a preconditioner bound to one operator.
#[derive(Clone)]
pub struct GeneratedPreconditioner<'a> {
    op: Arc<dyn LinOp + 'a>,
    fingerprint: PatternFingerprint,
    name: &'static str,
}

impl<'a> GeneratedPreconditioner<'a> {
    pub fn new(op: Arc<dyn LinOp + 'a>, fingerprint: PatternFingerprint, name: &'static str) -> Self {
        Self {
            op,
            fingerprint,
            name,
        }
    }

    /// Use a caller operator as the preconditioner. The result needs wrapped vectors.
    pub fn wrapped(exec: &Executor, op: &'a dyn Operator) -> Result<Self> {
        let fingerprint = PatternFingerprint::shape_only(op.height(), op.width());
        Ok(Self::new(Arc::new(OperatorWrapper::new(exec, op)?), fingerprint, "wrapped"))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fingerprint(&self) -> PatternFingerprint {
        self.fingerprint
    }

    pub fn operator(&self) -> &(dyn LinOp + 'a) {
        self.op.as_ref()
    }

    /// Number of live references to the generated operator.
    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.op)
    }

    /// Fail unless this preconditioner was built for an operator with pattern `fp`.
    pub fn check_bound_to(&self, fp: &PatternFingerprint) -> Result<()> {
        if self.fingerprint.matches(fp) {
            Ok(())
        } else {
            Err(BridgeError::config(format!(
                "{} preconditioner was generated for a {}x{} operator with {} nonzeros, \
                 not the bound {}x{} operator with {} nonzeros",
                self.name,
                self.fingerprint.nrows,
                self.fingerprint.ncols,
                self.fingerprint.nnz,
                fp.nrows,
                fp.ncols,
                fp.nnz
            )))
        }
    }
}

impl fmt::Debug for GeneratedPreconditioner<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedPreconditioner")
            .field("name", &self.name)
            .field("fingerprint", &self.fingerprint)
            .field("adaptation", &self.op.adaptation())
            .finish()
    }
}

impl LinOp for GeneratedPreconditioner<'_> {
    fn size(&self) -> usize {
        self.op.size()
    }
    fn executor(&self) -> &Executor {
        self.op.executor()
    }
    fn adaptation(&self) -> AdaptationKind {
        self.op.adaptation()
    }
    fn apply(&self, b: &[f64], x: &mut [f64]) -> Result<()> {
        self.op.apply(b, x)
    }
    fn apply_scaled(&self, alpha: &Dense, b: &[f64], beta: &Dense, x: &mut [f64]) -> Result<()> {
        self.op.apply_scaled(alpha, b, beta, x)
    }
}

/// Solve the dense n×n system A x = rhs in place with a full-pivoting LU.
pub(crate) fn dense_solve(n: usize, entry: impl Fn(usize, usize) -> f64, rhs: &mut [f64]) -> Result<()> {
    let a = Mat::<f64>::from_fn(n, n, entry);
    let lu = FullPivLu::new(a.as_ref());
    let x_mat = MatMut::from_column_major_slice_mut(rhs, n, 1);
    lu.solve_in_place_with_conj(Conj::No, x_mat);
    if rhs.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(BridgeError::Factorization(format!("singular {}x{} dense system", n, n)))
    }
}

/// Column-major inverse of the dense n×n matrix given by `entry`.
pub(crate) fn dense_inverse(n: usize, entry: impl Fn(usize, usize) -> f64) -> Result<Vec<f64>> {
    let a = Mat::<f64>::from_fn(n, n, entry);
    let lu = FullPivLu::new(a.as_ref());
    let mut inv = vec![0.0; n * n];
    for j in 0..n {
        inv[j * n + j] = 1.0;
    }
    let x_mat = MatMut::from_column_major_slice_mut(&mut inv, n, n);
    lu.solve_in_place_with_conj(Conj::No, x_mat);
    if inv.iter().all(|v| v.is_finite()) {
        Ok(inv)
    } else {
        Err(BridgeError::Factorization(format!("singular {}x{} block", n, n)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn dense_inverse_of_2x2() {
        // [[4,1],[2,3]]⁻¹ = 1/10 [[3,-1],[-2,4]]
        let a = [[4.0, 1.0], [2.0, 3.0]];
        let inv = dense_inverse(2, |i, j| a[i][j]).unwrap();
        assert_relative_eq!(inv[0], 0.3, epsilon = 1e-12);
        assert_relative_eq!(inv[1], -0.2, epsilon = 1e-12);
        assert_relative_eq!(inv[2], -0.1, epsilon = 1e-12);
        assert_relative_eq!(inv[3], 0.4, epsilon = 1e-12);
    }

    #[test]
    fn singular_block_is_reported() {
        assert!(dense_inverse(2, |_, _| 1.0).is_err());
    }
}
