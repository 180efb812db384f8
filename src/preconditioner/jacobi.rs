//! Block-Jacobi preconditioner: M⁻¹ = blockdiag(A)⁻¹.
//!
//! Blocks are supervariables, i.e. runs of consecutive rows with identical column patterns, cut
//! at `max_block_size`. With `max_block_size = 1` this is point Jacobi. Each block is inverted
//! explicitly with a dense LU. When storage optimization is `Auto` each inverse is kept in the
//! lowest precision whose rounding, amplified by the block's condition number, stays below the
//! requested accuracy. Blocks built from an f32 matrix (reduced multigrid levels) are stored in
//! at most f32, and application always computes in the matrix's own precision.

use super::{GeneratedPreconditioner, PreconditionerFactory, Relaxation, RelaxationOp, dense_inverse};
use crate::core::traits::Scalar;
use crate::error::{BridgeError, Result};
use crate::executor::Executor;
use crate::matrix::CsrView;
use half::f16;
use std::str::FromStr;
use std::sync::Arc;

/// Unit roundoff of f32 and f16.
const SINGLE_ROUNDOFF: f64 = 5.96e-8;
const HALF_ROUNDOFF: f64 = 4.88e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageOptimization {
    /// Every block inverse in f64.
    #[default]
    None,
    /// Per-block precision from the condition estimate.
    Auto,
}

impl FromStr for StorageOptimization {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "full" => Ok(StorageOptimization::None),
            "auto" => Ok(StorageOptimization::Auto),
            other => Err(BridgeError::config(format!("unknown storage optimization '{}'", other))),
        }
    }
}

/// Precision a block inverse is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPrecision {
    Double,
    Single,
    Half,
}

#[derive(Debug, Clone)]
enum BlockStore {
    Double(Vec<f64>),
    Single(Vec<f32>),
    Half(Vec<f16>),
}

impl BlockStore {
    fn precision(&self) -> BlockPrecision {
        match self {
            BlockStore::Double(_) => BlockPrecision::Double,
            BlockStore::Single(_) => BlockPrecision::Single,
            BlockStore::Half(_) => BlockPrecision::Half,
        }
    }

    #[inline]
    fn get(&self, k: usize) -> f64 {
        match self {
            BlockStore::Double(v) => v[k],
            BlockStore::Single(v) => v[k] as f64,
            BlockStore::Half(v) => v[k].to_f64(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JacobiFactory {
    pub max_block_size: usize,
    pub accuracy: f64,
    pub storage: StorageOptimization,
}

impl Default for JacobiFactory {
    fn default() -> Self {
        Self {
            max_block_size: 32,
            accuracy: 0.1,
            storage: StorageOptimization::None,
        }
    }
}

impl JacobiFactory {
    pub fn new(max_block_size: usize, accuracy: f64, storage: StorageOptimization) -> Self {
        Self {
            max_block_size,
            accuracy,
            storage,
        }
    }

    /// Point Jacobi.
    pub fn point() -> Self {
        Self {
            max_block_size: 1,
            ..Self::default()
        }
    }

    pub fn build<T: Scalar>(&self, a: CsrView<'_, T>) -> Result<BlockJacobi> {
        BlockJacobi::new(a, self.max_block_size, self.accuracy, self.storage)
    }
}

impl PreconditionerFactory for JacobiFactory {
    fn name(&self) -> &'static str {
        if self.max_block_size == 1 { "jacobi" } else { "block-jacobi" }
    }

    fn generate<'a>(&self, exec: &Executor, a: CsrView<'a>) -> Result<GeneratedPreconditioner<'a>> {
        let bj = self.build(a)?;
        log::debug!(
            "{}: {} blocks for {} rows",
            self.name(),
            bj.num_blocks(),
            a.nrows()
        );
        Ok(GeneratedPreconditioner::new(
            Arc::new(RelaxationOp::new(exec, a.nrows(), bj)),
            a.fingerprint(),
            self.name(),
        ))
    }
}

/// Explicit inverses of the diagonal blocks.
#[derive(Debug, Clone)]
pub struct BlockJacobi {
    /// Block k covers rows starts[k]..starts[k+1].
    starts: Vec<usize>,
    inverses: Vec<BlockStore>,
}

/// Split rows into supervariables of at most `max_block` rows.
fn supervariables<T: Scalar>(a: CsrView<'_, T>, max_block: usize) -> Vec<usize> {
    let n = a.nrows();
    let max_block = max_block.max(1);
    let mut starts = vec![0];
    for i in 1..n {
        let start = starts[starts.len() - 1];
        if i - start >= max_block || a.row(i).0 != a.row(i - 1).0 {
            starts.push(i);
        }
    }
    if n > 0 {
        starts.push(n);
    }
    starts
}

fn norm1(n: usize, col_major: impl Fn(usize, usize) -> f64) -> f64 {
    (0..n)
        .map(|j| (0..n).map(|i| col_major(i, j).abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

impl BlockJacobi {
    pub fn new<T: Scalar>(
        a: CsrView<'_, T>,
        max_block_size: usize,
        accuracy: f64,
        storage: StorageOptimization,
    ) -> Result<Self> {
        let starts = supervariables(a, max_block_size);
        // blocks are never kept in more precision than the matrix they came from
        let single_scalar = T::epsilon().to_f64().is_some_and(|e| e > f64::EPSILON);
        let mut inverses = Vec::with_capacity(starts.len().saturating_sub(1));
        for w in starts.windows(2) {
            let (s, e) = (w[0], w[1]);
            let bs = e - s;
            let entry = |i: usize, j: usize| a.get(s + i, s + j).to_f64().unwrap_or(f64::NAN);
            let inv = dense_inverse(bs, entry).map_err(|_| {
                BridgeError::Factorization(format!("singular diagonal block at rows {}..{}", s, e))
            })?;
            let largest = inv.iter().fold(0.0, |m: f64, v| m.max(v.abs()));
            let fits_single = largest <= f32::MAX as f64;
            let cond = match storage {
                StorageOptimization::None => f64::INFINITY,
                StorageOptimization::Auto => norm1(bs, entry) * norm1(bs, |i, j| inv[j * bs + i]),
            };
            let store = if cond * HALF_ROUNDOFF <= accuracy && largest <= f16::MAX.to_f64() {
                BlockStore::Half(inv.iter().map(|&v| f16::from_f64(v)).collect())
            } else if (single_scalar || cond * SINGLE_ROUNDOFF <= accuracy) && fits_single {
                BlockStore::Single(inv.iter().map(|&v| v as f32).collect())
            } else {
                BlockStore::Double(inv)
            };
            inverses.push(store);
        }
        Ok(Self { starts, inverses })
    }

    pub fn num_blocks(&self) -> usize {
        self.inverses.len()
    }

    /// Row range of every block.
    pub fn block_bounds(&self) -> Vec<(usize, usize)> {
        self.starts.windows(2).map(|w| (w[0], w[1])).collect()
    }

    pub fn block_precisions(&self) -> Vec<BlockPrecision> {
        self.inverses.iter().map(BlockStore::precision).collect()
    }
}

impl<T: Scalar> Relaxation<T> for BlockJacobi {
    fn relax(&self, r: &[T], z: &mut [T]) -> Result<()> {
        for (w, inv) in self.starts.windows(2).zip(&self.inverses) {
            let (s, e) = (w[0], w[1]);
            let bs = e - s;
            for i in 0..bs {
                let mut acc = T::zero();
                for j in 0..bs {
                    acc += T::from_f64(inv.get(j * bs + i)).unwrap_or_else(T::nan) * r[s + j];
                }
                z[s + i] = acc;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Csr;
    use approx::assert_relative_eq;

    fn block_diag() -> Csr {
        // rows 0,1 share pattern {0,1}; row 2 is alone
        Csr::from_triplets(
            3,
            3,
            &[(0, 0, 4.0), (0, 1, 1.0), (1, 0, 2.0), (1, 1, 3.0), (2, 2, 5.0)],
        )
        .unwrap()
    }

    #[test]
    fn supervariables_follow_patterns() {
        let a = block_diag();
        let bj = JacobiFactory::default().build(a.view()).unwrap();
        assert_eq!(bj.block_bounds(), vec![(0, 2), (2, 3)]);
        let point = JacobiFactory::point().build(a.view()).unwrap();
        assert_eq!(point.num_blocks(), 3);
    }

    #[test]
    fn block_inverse_solves_block_system() {
        let a = block_diag();
        let bj = JacobiFactory::default().build(a.view()).unwrap();
        let r = vec![5.0, 5.0, 10.0];
        let mut z = vec![0.0; 3];
        bj.relax(&r, &mut z).unwrap();
        assert_relative_eq!(z[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(z[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(z[2], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn auto_storage_reduces_well_conditioned_blocks() {
        let a = Csr::from_triplets(2, 2, &[(0, 0, 2.0), (1, 1, 4.0)]).unwrap();
        let bj = JacobiFactory::new(1, 0.1, StorageOptimization::Auto).build(a.view()).unwrap();
        assert_eq!(bj.block_precisions(), vec![BlockPrecision::Half, BlockPrecision::Half]);
        let mut z = vec![0.0; 2];
        bj.relax(&[1.0, 1.0], &mut z).unwrap();
        assert_relative_eq!(z[1], 0.25, epsilon = 1e-3);

        // 1/1e-9 does not fit in f16
        let tiny = Csr::from_triplets(1, 1, &[(0, 0, 1e-9)]).unwrap();
        let bj = JacobiFactory::new(1, 0.1, StorageOptimization::Auto).build(tiny.view()).unwrap();
        assert_eq!(bj.block_precisions(), vec![BlockPrecision::Single]);

        let ill = Csr::from_triplets(2, 2, &[(0, 0, 1.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 1.0 + 1e-6)]).unwrap();
        let bj = JacobiFactory::new(2, 0.1, StorageOptimization::Auto).build(ill.view()).unwrap();
        assert_eq!(bj.block_precisions(), vec![BlockPrecision::Double]);
    }

    #[test]
    fn single_precision_matrix_keeps_single_blocks() {
        let a = block_diag().cast::<f32>();
        let bj = JacobiFactory::default().build(a.view()).unwrap();
        assert_eq!(bj.block_precisions(), vec![BlockPrecision::Single, BlockPrecision::Single]);
        let mut z = vec![0.0f32; 3];
        bj.relax(&[5.0f32, 5.0, 5.0], &mut z).unwrap();
        // [[4,1],[2,3]] x = [5,5] gives x = [1,1]
        assert_relative_eq!(z[0], 1.0f32, epsilon = 1e-6);
        assert_relative_eq!(z[1], 1.0f32, epsilon = 1e-6);
        assert_relative_eq!(z[2], 1.0f32, epsilon = 1e-6);

        let full = JacobiFactory::default().build(block_diag().view()).unwrap();
        assert_eq!(full.block_precisions(), vec![BlockPrecision::Double, BlockPrecision::Double]);
    }

    #[test]
    fn zero_diagonal_is_a_factorization_error() {
        let a = Csr::from_triplets(2, 2, &[(0, 0, 1.0), (1, 0, 1.0), (1, 1, 0.0)]).unwrap();
        assert!(matches!(
            JacobiFactory::point().build(a.view()),
            Err(BridgeError::Factorization(_))
        ));
    }
}
