//! Operator adaptation.
//!
//! [`adapt`] turns a caller [`Operator`] into a [`LinearOperatorHandle`]:
//! - operators with a native compressed-row view become a zero-copy [`CsrOperator`] that reads the
//!   caller's arrays directly (device executors stage one mirror at binding time);
//! - everything else becomes an [`OperatorWrapper`] around the caller's `mult`, which can only be
//!   fed wrapped vectors.
//!
//! The resulting [`AdaptationKind`] is returned to whoever composes the handle and must be
//! combined with the kinds of every other component sharing the same vectors.

use super::vector::VectorView;
use crate::core::traits::{LinOp, Operator};
use crate::core::wrappers;
use crate::error::{BridgeError, Result};
use crate::executor::Executor;
use crate::matrix::{Csr, CsrView, Dense, PatternFingerprint};

/// How vectors are presented to an operator chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AdaptationKind {
    /// Backend-native views over caller buffers.
    #[default]
    ZeroCopy,
    /// Caller vectors wrapped as opaque objects; required by any matrix-free operator in the chain.
    Wrapped,
}

impl AdaptationKind {
    /// Kind required by a chain containing both components.
    pub fn combine(self, other: AdaptationKind) -> AdaptationKind {
        if self == AdaptationKind::Wrapped || other == AdaptationKind::Wrapped {
            AdaptationKind::Wrapped
        } else {
            AdaptationKind::ZeroCopy
        }
    }

    pub fn needs_wrapped_vectors(self) -> bool {
        self == AdaptationKind::Wrapped
    }
}

/// Read a 1×1 scaling operand on the host.
///
/// A scalar whose executor is its own master is read in place. Any other scalar is treated as
/// device-resident and copied to the master of `op_exec` before it is read.
pub(crate) fn read_scalar(op_exec: &Executor, name: &'static str, s: &Dense) -> Result<f64> {
    let (rows, cols) = s.size();
    if rows != 1 || cols != 1 {
        return Err(BridgeError::dim(name, "1x1", format!("{}x{}", rows, cols)));
    }
    let exec = s.executor();
    if exec.same(&exec.master()) {
        s.at(0, 0)
    } else {
        op_exec.synchronize();
        s.copy_to(&op_exec.master()).at(0, 0)
    }
}

/// Zero-copy adapter over a caller-owned compressed-row matrix.
#[derive(Debug)]
pub struct CsrOperator<'a> {
    exec: Executor,
    host: CsrView<'a>,
    mirror: Option<Csr>,
}

impl<'a> CsrOperator<'a> {
    fn new(exec: &Executor, host: CsrView<'a>) -> Self {
        let mirror = exec.is_device().then(|| host.to_owned());
        Self {
            exec: exec.clone(),
            host,
            mirror,
        }
    }

    /// The matrix in the executor's memory space.
    pub fn matrix(&self) -> CsrView<'_> {
        match &self.mirror {
            Some(m) => m.view(),
            None => self.host,
        }
    }

    /// The caller's arrays.
    pub fn host_view(&self) -> CsrView<'a> {
        self.host
    }
}

impl LinOp for CsrOperator<'_> {
    fn size(&self) -> usize {
        self.host.nrows()
    }
    fn executor(&self) -> &Executor {
        &self.exec
    }
    fn apply(&self, b: &[f64], x: &mut [f64]) -> Result<()> {
        wrappers::spmv(&self.exec, self.matrix(), b, x);
        Ok(())
    }
}

/// Generic wrap around a matrix-free caller operator.
pub struct OperatorWrapper<'a> {
    exec: Executor,
    op: &'a dyn Operator,
}

impl<'a> OperatorWrapper<'a> {
    pub fn new(exec: &Executor, op: &'a dyn Operator) -> Result<Self> {
        if op.height() != op.width() {
            return Err(BridgeError::config(format!(
                "operator is not square ({}x{})",
                op.height(),
                op.width()
            )));
        }
        Ok(Self {
            exec: exec.clone(),
            op,
        })
    }
}

impl std::fmt::Debug for OperatorWrapper<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorWrapper")
            .field("exec", &self.exec.kind())
            .field("size", &self.op.height())
            .finish()
    }
}

impl LinOp for OperatorWrapper<'_> {
    fn size(&self) -> usize {
        self.op.height()
    }
    fn executor(&self) -> &Executor {
        &self.exec
    }
    fn adaptation(&self) -> AdaptationKind {
        AdaptationKind::Wrapped
    }
    fn apply(&self, b: &[f64], x: &mut [f64]) -> Result<()> {
        self.op.mult(b, x);
        Ok(())
    }
    fn apply_scaled(&self, alpha: &Dense, b: &[f64], beta: &Dense, x: &mut [f64]) -> Result<()> {
        let alpha = read_scalar(&self.exec, "alpha", alpha)?;
        let beta = read_scalar(&self.exec, "beta", beta)?;
        wrappers::scale(&self.exec, beta, x);
        let mut tmp = vec![0.0; x.len()];
        self.op.mult(b, &mut tmp);
        wrappers::axpy(&self.exec, alpha, &tmp, x);
        Ok(())
    }
}

/// A system operator bound to an executor.
#[derive(Debug)]
pub enum LinearOperatorHandle<'a> {
    Csr(CsrOperator<'a>),
    Wrapped(OperatorWrapper<'a>),
}

impl<'a> LinearOperatorHandle<'a> {
    fn inner(&self) -> &dyn LinOp {
        match self {
            LinearOperatorHandle::Csr(op) => op,
            LinearOperatorHandle::Wrapped(op) => op,
        }
    }

    /// The caller's compressed-row arrays, when the handle is zero-copy.
    pub fn host_view(&self) -> Option<CsrView<'a>> {
        match self {
            LinearOperatorHandle::Csr(op) => Some(op.host_view()),
            LinearOperatorHandle::Wrapped(_) => None,
        }
    }

    pub fn fingerprint(&self) -> PatternFingerprint {
        match self {
            LinearOperatorHandle::Csr(op) => op.host_view().fingerprint(),
            LinearOperatorHandle::Wrapped(op) => PatternFingerprint::shape_only(op.size(), op.size()),
        }
    }

    /// Apply to adapted vectors, which must carry this handle's adaptation kind.
    pub fn apply_views(&self, b: &VectorView<'_>, x: &mut VectorView<'_>) -> Result<()> {
        let kind = self.adaptation();
        if b.kind() != kind || x.kind() != kind {
            return Err(BridgeError::config(format!(
                "operator expects {:?} vectors, got {:?} and {:?}",
                kind,
                b.kind(),
                x.kind()
            )));
        }
        if b.len() != self.size() || x.len() != self.size() {
            return Err(BridgeError::dim("vector length", self.size(), b.len().max(x.len())));
        }
        self.apply(b.as_slice(), x.as_mut_slice()?)
    }
}

impl LinOp for LinearOperatorHandle<'_> {
    fn size(&self) -> usize {
        self.inner().size()
    }
    fn executor(&self) -> &Executor {
        self.inner().executor()
    }
    fn adaptation(&self) -> AdaptationKind {
        self.inner().adaptation()
    }
    fn apply(&self, b: &[f64], x: &mut [f64]) -> Result<()> {
        self.inner().apply(b, x)
    }
    fn apply_scaled(&self, alpha: &Dense, b: &[f64], beta: &Dense, x: &mut [f64]) -> Result<()> {
        self.inner().apply_scaled(alpha, b, beta, x)
    }
}

/// Classify `op` and bind it to `exec`.
pub fn adapt<'a>(op: &'a dyn Operator, exec: &Executor) -> Result<LinearOperatorHandle<'a>> {
    if op.height() != op.width() {
        return Err(BridgeError::config(format!(
            "system operator is not square ({}x{})",
            op.height(),
            op.width()
        )));
    }
    match op.as_csr() {
        Some(view) => Ok(LinearOperatorHandle::Csr(CsrOperator::new(exec, view))),
        None => Ok(LinearOperatorHandle::Wrapped(OperatorWrapper::new(exec, op)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecKind;

    struct Diag(Vec<f64>);

    impl Operator for Diag {
        fn height(&self) -> usize {
            self.0.len()
        }
        fn width(&self) -> usize {
            self.0.len()
        }
        fn mult(&self, x: &[f64], y: &mut [f64]) {
            for ((yi, xi), d) in y.iter_mut().zip(x).zip(&self.0) {
                *yi = d * xi;
            }
        }
    }

    struct Rect;

    impl Operator for Rect {
        fn height(&self) -> usize {
            2
        }
        fn width(&self) -> usize {
            3
        }
        fn mult(&self, _: &[f64], _: &mut [f64]) {}
    }

    #[test]
    fn classifies_native_and_generic() {
        let exec = Executor::create(ExecKind::Reference).unwrap();
        let a = Csr::from_triplets(2, 2, &[(0, 0, 1.0), (1, 1, 2.0)]).unwrap();
        let h = adapt(&a, &exec).unwrap();
        assert_eq!(h.adaptation(), AdaptationKind::ZeroCopy);
        assert!(h.host_view().is_some());
        let d = Diag(vec![1.0, 2.0]);
        let h = adapt(&d, &exec).unwrap();
        assert_eq!(h.adaptation(), AdaptationKind::Wrapped);
        assert!(h.host_view().is_none());
    }

    #[test]
    fn rejects_non_square() {
        let exec = Executor::create(ExecKind::Reference).unwrap();
        assert!(matches!(adapt(&Rect, &exec), Err(BridgeError::Configuration(_))));
    }

    #[test]
    fn combine_is_sticky() {
        use AdaptationKind::*;
        assert_eq!(ZeroCopy.combine(ZeroCopy), ZeroCopy);
        assert_eq!(ZeroCopy.combine(Wrapped), Wrapped);
        assert_eq!(Wrapped.combine(ZeroCopy), Wrapped);
    }

    #[test]
    fn scaled_apply_rejects_non_scalar() {
        let exec = Executor::create(ExecKind::Reference).unwrap();
        let d = Diag(vec![1.0, 2.0]);
        let w = OperatorWrapper::new(&exec, &d).unwrap();
        let alpha = Dense::new(&exec, 2, 1, &[1.0, 1.0]).unwrap();
        let beta = Dense::scalar(&exec, 0.0);
        let mut x = vec![0.0; 2];
        let err = w.apply_scaled(&alpha, &[1.0, 1.0], &beta, &mut x).unwrap_err();
        assert!(matches!(err, BridgeError::Dimension { what: "alpha", .. }));
    }
}
