//! Compressed-basis GMRES.
//!
//! Arithmetic stays in f64; only the stored Krylov vectors are rounded to the chosen storage
//! precision, which cuts the memory traffic of the orthogonalization loop.

use super::LinearSolver;
use super::gmres::restarted;
use crate::core::traits::LinOp;
use crate::error::{BridgeError, Result};
use crate::utils::convergence::{ResidualMode, StopCheck};
use half::f16;
use std::str::FromStr;

/// Storage format of the Krylov basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoragePrecision {
    /// f64
    #[default]
    Keep,
    /// f32
    Reduce1,
    /// f16
    Reduce2,
}

impl FromStr for StoragePrecision {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "keep" | "f64" => Ok(StoragePrecision::Keep),
            "reduce1" | "f32" => Ok(StoragePrecision::Reduce1),
            "reduce2" | "f16" => Ok(StoragePrecision::Reduce2),
            other => Err(BridgeError::config(format!("unknown storage precision '{}'", other))),
        }
    }
}

pub(crate) enum KrylovBasis {
    Keep(Vec<Vec<f64>>),
    Reduce1(Vec<Vec<f32>>),
    Reduce2(Vec<Vec<f16>>),
}

impl KrylovBasis {
    pub(crate) fn new(storage: StoragePrecision, n: usize, count: usize) -> Self {
        match storage {
            StoragePrecision::Keep => KrylovBasis::Keep(vec![vec![0.0; n]; count]),
            StoragePrecision::Reduce1 => KrylovBasis::Reduce1(vec![vec![0.0; n]; count]),
            StoragePrecision::Reduce2 => KrylovBasis::Reduce2(vec![vec![f16::ZERO; n]; count]),
        }
    }

    pub(crate) fn set(&mut self, j: usize, v: &[f64]) {
        match self {
            KrylovBasis::Keep(b) => b[j].copy_from_slice(v),
            KrylovBasis::Reduce1(b) => b[j].iter_mut().zip(v).for_each(|(s, &x)| *s = x as f32),
            KrylovBasis::Reduce2(b) => b[j].iter_mut().zip(v).for_each(|(s, &x)| *s = f16::from_f64(x)),
        }
    }

    pub(crate) fn get(&self, j: usize, out: &mut [f64]) {
        match self {
            KrylovBasis::Keep(b) => out.copy_from_slice(&b[j]),
            KrylovBasis::Reduce1(b) => out.iter_mut().zip(&b[j]).for_each(|(o, &s)| *o = s as f64),
            KrylovBasis::Reduce2(b) => out.iter_mut().zip(&b[j]).for_each(|(o, &s)| *o = s.to_f64()),
        }
    }
}

/// GMRES with a reduced-precision Krylov basis. Shares the cycle of
/// [`GmresSolver`](super::GmresSolver), including its recurrence-based residual check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CbGmresSolver {
    pub krylov_dim: usize,
    pub storage: StoragePrecision,
}

impl CbGmresSolver {
    pub fn new(krylov_dim: usize, storage: StoragePrecision) -> Self {
        Self { krylov_dim, storage }
    }
}

impl LinearSolver for CbGmresSolver {
    fn name(&self) -> &'static str {
        "cb-gmres"
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
        restarted(a, pc, b, x, stop, self.krylov_dim, self.storage)
    }
}
