//! Core linear-algebra traits for solverbridge.

use crate::adapter::AdaptationKind;
use crate::error::Result;
use crate::executor::Executor;
use crate::matrix::{Csr, CsrView, Dense};
use num_traits::{Float, FromPrimitive, ToPrimitive};
use std::fmt::Debug;
use std::iter::Sum;
use std::ops::{AddAssign, SubAssign};

/// Arithmetic types kernels can compute in (`f64`, and `f32` on reduced-precision levels).
pub trait Scalar:
    Float + FromPrimitive + ToPrimitive + Sum + AddAssign + SubAssign + Send + Sync + Debug + Default + 'static
{
}

impl<T> Scalar for T where
    T: Float + FromPrimitive + ToPrimitive + Sum + AddAssign + SubAssign + Send + Sync + Debug + Default + 'static
{
}

/// Caller-side square operator: y ← A x.
///
/// This is what the assembler collaborator hands to the bridge. An operator that stores its
/// entries in compressed-row form advertises that by returning a view from [`Operator::as_csr`];
/// everything else is treated as matrix-free and wrapped.
pub trait Operator: Sync {
    fn height(&self) -> usize;
    fn width(&self) -> usize;
    /// Compute y = A · x.
    fn mult(&self, x: &[f64], y: &mut [f64]);
    /// Native compressed-row view over the operator's own storage, if it has one.
    fn as_csr(&self) -> Option<CsrView<'_>> {
        None
    }
}

impl Operator for CsrView<'_> {
    fn height(&self) -> usize {
        self.nrows()
    }
    fn width(&self) -> usize {
        self.ncols()
    }
    fn mult(&self, x: &[f64], y: &mut [f64]) {
        self.spmv(x, y);
    }
    fn as_csr(&self) -> Option<CsrView<'_>> {
        Some(*self)
    }
}

impl Operator for Csr<f64> {
    fn height(&self) -> usize {
        self.nrows()
    }
    fn width(&self) -> usize {
        self.ncols()
    }
    fn mult(&self, x: &[f64], y: &mut [f64]) {
        self.view().spmv(x, y);
    }
    fn as_csr(&self) -> Option<CsrView<'_>> {
        Some(self.view())
    }
}

/// Backend-side linear operator: everything a solver can apply.
///
/// Slices passed to `apply` are the executor's working buffers, i.e. device-resident on a device
/// executor. Implementations never retain them past the call.
pub trait LinOp: Send + Sync {
    /// Number of rows (= columns).
    fn size(&self) -> usize;
    fn executor(&self) -> &Executor;
    /// How vectors must be presented to this operator and everything composed with it.
    fn adaptation(&self) -> AdaptationKind {
        AdaptationKind::ZeroCopy
    }
    /// x ← Op(b)
    fn apply(&self, b: &[f64], x: &mut [f64]) -> Result<()>;
    /// x ← alpha·Op(b) + beta·x with 1×1 scalars.
    fn apply_scaled(&self, alpha: &Dense, b: &[f64], beta: &Dense, x: &mut [f64]) -> Result<()> {
        let alpha = crate::adapter::operator::read_scalar(self.executor(), "alpha", alpha)?;
        let beta = crate::adapter::operator::read_scalar(self.executor(), "beta", beta)?;
        let mut tmp = vec![0.0; x.len()];
        self.apply(b, &mut tmp)?;
        for (xi, ti) in x.iter_mut().zip(&tmp) {
            *xi = beta * *xi + alpha * ti;
        }
        Ok(())
    }
}
