//! Aggregation-based algebraic multigrid.
//!
//! Coarsening is deterministic pairwise aggregation: rows are visited in order and each
//! unaggregated row is paired with its strongest unaggregated neighbour under the symmetric weight
//! (|a_ij| + |a_ji|) / (2 max(|a_ii|, |a_jj|)), ties going to the lower column. A row without an
//! unaggregated neighbour joins the aggregate of its strongest neighbour, or stays alone when it
//! has none. The same matrix therefore always yields the same coarse graph. Coarse operators are
//! the Galerkin products PᵀAP for the piecewise-constant prolongation P.
//!
//! Every level carries a smoother from [`SmootherKind`]. Point Jacobi, block Jacobi and the IC
//! variants run as relaxed Richardson sweeps z ← z + ω S(r − A z); the CG smoother runs
//! `pre_sweeps` CG iterations on the residual instead. Post-smoothing reuses the pre-smoother.
//! The coarsest level is solved by the same family with `coarse_iterations`.
//!
//! With mixed precision, level 0 keeps f64 and every coarser level (the coarsest solve included)
//! stores its matrix and smoother in f32. Vectors cross precisions at level boundaries.
//!
//! The multigrid operator is one V-cycle from a zero initial guess, whatever the caller's vector
//! holds.

use super::ilu::{FactorizationKind, IcFactory, TriangularSolve};
use super::jacobi::{BlockJacobi, StorageOptimization};
use super::{GeneratedPreconditioner, PreconditionerFactory, Relaxation};
use crate::core::traits::{LinOp, Scalar};
use crate::core::wrappers::{axpy, residual};
use crate::error::{BridgeError, Result};
use crate::executor::Executor;
use crate::matrix::{Csr, CsrView};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

const UNAGGREGATED: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmootherKind {
    Jacobi,
    BlockJacobi,
    Ic,
    ParIc,
    Cg,
}

impl FromStr for SmootherKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "jacobi" => Ok(SmootherKind::Jacobi),
            "block_jacobi" | "block-jacobi" | "bj" => Ok(SmootherKind::BlockJacobi),
            "ic" => Ok(SmootherKind::Ic),
            "paric" => Ok(SmootherKind::ParIc),
            "cg" => Ok(SmootherKind::Cg),
            other => Err(BridgeError::config(format!("unknown AMG smoother '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// f64
    Full,
    /// f32
    Reduced,
}

/// What was built for one level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSpec {
    pub level: usize,
    pub rows: usize,
    pub nnz: usize,
    pub precision: Precision,
    pub smoother: SmootherKind,
    /// Whether coarsening of this level ran the sort step.
    pub sort_step: bool,
    /// The terminal solve rather than a smoothing level.
    pub coarsest: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmgFactory {
    pub smoother: SmootherKind,
    pub pre_sweeps: usize,
    pub coarse_solver: SmootherKind,
    pub coarse_iterations: usize,
    pub min_coarse_rows: usize,
    pub max_levels: usize,
    pub mixed_precision: bool,
    pub skip_sort: bool,
    pub relaxation: f64,
    /// Block size of block-Jacobi smoothers.
    pub max_block_size: usize,
    /// Sweeps of ParIC smoothers.
    pub factor_sweeps: usize,
}

impl Default for AmgFactory {
    fn default() -> Self {
        Self {
            smoother: SmootherKind::Jacobi,
            pre_sweeps: 1,
            coarse_solver: SmootherKind::Jacobi,
            coarse_iterations: 4,
            min_coarse_rows: 64,
            max_levels: 10,
            mixed_precision: false,
            skip_sort: false,
            relaxation: 0.9,
            max_block_size: 32,
            factor_sweeps: 5,
        }
    }
}

enum LevelMatrix<'a, T> {
    Borrowed(CsrView<'a, T>),
    Owned(Csr<T>),
}

impl<T: Scalar> LevelMatrix<'_, T> {
    fn view(&self) -> CsrView<'_, T> {
        match self {
            LevelMatrix::Borrowed(v) => *v,
            LevelMatrix::Owned(m) => m.view(),
        }
    }
}

/// z ← z + ω S(r − A z), `sweeps` times.
struct Stage<T> {
    inner: Box<dyn Relaxation<T>>,
    sweeps: usize,
    omega: T,
}

struct Level<'a, T> {
    a: LevelMatrix<'a, T>,
    stage: Stage<T>,
    /// Fine row → aggregate, and the aggregate count; `None` on the coarsest level.
    coarse: Option<(Vec<usize>, usize)>,
}

enum AnyLevel<'a> {
    Full(Level<'a, f64>),
    Reduced(Level<'static, f32>),
}

/// CG with a zero guess and a fixed number of iterations.
#[derive(Debug)]
struct CgRelaxation<T> {
    a: Csr<T>,
    iterations: usize,
}

impl<T: Scalar> Relaxation<T> for CgRelaxation<T> {
    fn relax(&self, r: &[T], z: &mut [T]) -> Result<()> {
        let a = self.a.view();
        let dot = |x: &[T], y: &[T]| x.iter().zip(y).map(|(&p, &q)| p * q).sum::<T>();
        z.iter_mut().for_each(|v| *v = T::zero());
        let mut res = r.to_vec();
        let mut p = res.clone();
        let mut ap = vec![T::zero(); r.len()];
        let mut rr = dot(&res, &res);
        for _ in 0..self.iterations {
            if rr == T::zero() {
                break;
            }
            a.spmv(&p, &mut ap);
            let pap = dot(&p, &ap);
            if pap == T::zero() || !pap.is_finite() {
                break;
            }
            let alpha = rr / pap;
            for i in 0..z.len() {
                z[i] += alpha * p[i];
                res[i] -= alpha * ap[i];
            }
            let rr_new = dot(&res, &res);
            let beta = rr_new / rr;
            for (pi, &ri) in p.iter_mut().zip(&res) {
                *pi = ri + beta * *pi;
            }
            rr = rr_new;
        }
        Ok(())
    }
}

fn weight<T: Scalar>(a: CsrView<'_, T>, diag: &[f64], i: usize, j: usize, aij: T) -> f64 {
    let denom = 2.0 * diag[i].max(diag[j]);
    if denom == 0.0 {
        return 0.0;
    }
    let aji = a.get(j, i).to_f64().unwrap_or(0.0);
    (aij.to_f64().unwrap_or(0.0).abs() + aji.abs()) / denom
}

/// Deterministic pairwise aggregation. Returns (fine row → aggregate, aggregate count).
pub fn aggregate<T: Scalar>(a: CsrView<'_, T>) -> (Vec<usize>, usize) {
    let n = a.nrows();
    let diag: Vec<f64> = a.diagonal().iter().map(|d| d.to_f64().unwrap_or(0.0).abs()).collect();
    let mut agg = vec![UNAGGREGATED; n];
    let mut count = 0;
    for i in 0..n {
        if agg[i] != UNAGGREGATED {
            continue;
        }
        let (cols, vals) = a.row(i);
        let mut free: Option<(usize, f64)> = None;
        let mut taken: Option<(usize, f64)> = None;
        for (&j, &v) in cols.iter().zip(vals) {
            if j == i {
                continue;
            }
            let w = weight(a, &diag, i, j, v);
            if w <= 0.0 {
                continue;
            }
            let slot = if agg[j] == UNAGGREGATED { &mut free } else { &mut taken };
            match *slot {
                Some((k, best)) if w < best || (w == best && k < j) => {}
                _ => *slot = Some((j, w)),
            }
        }
        match (free, taken) {
            (Some((j, _)), _) => {
                agg[i] = count;
                agg[j] = count;
                count += 1;
            }
            (None, Some((j, _))) => agg[i] = agg[j],
            (None, None) => {
                agg[i] = count;
                count += 1;
            }
        }
    }
    (agg, count)
}

/// Multigrid hierarchy bound to one matrix.
pub struct Multigrid<'a> {
    exec: Executor,
    size: usize,
    levels: Vec<AnyLevel<'a>>,
    specs: Vec<LevelSpec>,
}

impl AmgFactory {
    /// Precision of smoothing level `level`.
    pub fn level_selector(&self, level: usize) -> Precision {
        if self.mixed_precision && level > 0 {
            Precision::Reduced
        } else {
            Precision::Full
        }
    }

    fn coarsest_precision(&self) -> Precision {
        if self.mixed_precision { Precision::Reduced } else { Precision::Full }
    }

    fn stage<T: Scalar>(&self, kind: SmootherKind, a: CsrView<'_, T>, iterations: usize) -> Result<Stage<T>> {
        let omega = T::from_f64(self.relaxation).unwrap_or_else(T::one);
        let inner: Box<dyn Relaxation<T>> = match kind {
            SmootherKind::Jacobi => Box::new(BlockJacobi::new(a, 1, 0.1, StorageOptimization::None)?),
            SmootherKind::BlockJacobi => {
                Box::new(BlockJacobi::new(a, self.max_block_size, 0.1, StorageOptimization::None)?)
            }
            SmootherKind::Ic | SmootherKind::ParIc => {
                let factory = IcFactory {
                    kind: if kind == SmootherKind::Ic {
                        FactorizationKind::Exact
                    } else {
                        FactorizationKind::Parallel
                    },
                    sweeps: self.factor_sweeps,
                    skip_sort: true,
                    trisolve: TriangularSolve::Exact,
                };
                Box::new(factory.build(a)?)
            }
            SmootherKind::Cg => {
                return Ok(Stage {
                    inner: Box::new(CgRelaxation {
                        a: a.to_owned(),
                        iterations,
                    }),
                    sweeps: 1,
                    omega: T::one(),
                });
            }
        };
        Ok(Stage {
            inner,
            sweeps: iterations,
            omega,
        })
    }

    fn level<'a>(
        &self,
        index: usize,
        a: LevelMatrix<'a, f64>,
        coarse: Option<(Vec<usize>, usize)>,
        sort_step: bool,
    ) -> Result<(AnyLevel<'a>, LevelSpec)> {
        let coarsest = coarse.is_none();
        let (kind, iterations, precision) = if coarsest {
            (self.coarse_solver, self.coarse_iterations, self.coarsest_precision())
        } else {
            (self.smoother, self.pre_sweeps, self.level_selector(index))
        };
        let view = a.view();
        let spec = LevelSpec {
            level: index,
            rows: view.nrows(),
            nnz: view.nnz(),
            precision,
            smoother: kind,
            sort_step,
            coarsest,
        };
        let level = match precision {
            Precision::Full => AnyLevel::Full(Level {
                stage: self.stage(kind, view, iterations)?,
                a,
                coarse,
            }),
            Precision::Reduced => {
                let reduced: Csr<f32> = match &a {
                    LevelMatrix::Borrowed(v) => v.to_owned().cast(),
                    LevelMatrix::Owned(m) => m.cast(),
                };
                AnyLevel::Reduced(Level {
                    stage: self.stage(kind, reduced.view(), iterations)?,
                    a: LevelMatrix::Owned(reduced),
                    coarse,
                })
            }
        };
        Ok((level, spec))
    }

    /// Build the hierarchy for `a`.
    pub fn build<'a>(&self, exec: &Executor, a: CsrView<'a>) -> Result<Multigrid<'a>> {
        let mut fine = if self.skip_sort || a.is_sorted() {
            LevelMatrix::Borrowed(a)
        } else {
            let mut m = a.to_owned();
            m.sort_rows();
            LevelMatrix::Owned(m)
        };
        let mut levels = Vec::new();
        let mut specs = Vec::new();
        let mut index = 0;
        loop {
            let view = fine.view();
            let n = view.nrows();
            if n <= self.min_coarse_rows || index + 1 >= self.max_levels {
                break;
            }
            let (agg, n_coarse) = aggregate(view);
            if n_coarse == 0 || n_coarse >= n {
                break;
            }
            let coarse = view.galerkin(&agg, n_coarse);
            let (level, spec) = self.level(index, fine, Some((agg, n_coarse)), index == 0 && !self.skip_sort)?;
            levels.push(level);
            specs.push(spec);
            fine = LevelMatrix::Owned(coarse);
            index += 1;
        }
        let (level, spec) = self.level(index, fine, None, index == 0 && !self.skip_sort)?;
        levels.push(level);
        specs.push(spec);
        log::debug!(
            "amg: {} levels, rows {:?}",
            specs.len(),
            specs.iter().map(|s| s.rows).collect::<Vec<_>>()
        );
        Ok(Multigrid {
            exec: exec.clone(),
            size: a.nrows(),
            levels,
            specs,
        })
    }
}

impl PreconditionerFactory for AmgFactory {
    fn name(&self) -> &'static str {
        "amg"
    }

    fn generate<'a>(&self, exec: &Executor, a: CsrView<'a>) -> Result<GeneratedPreconditioner<'a>> {
        let mg = self.build(exec, a)?;
        Ok(GeneratedPreconditioner::new(Arc::new(mg), a.fingerprint(), self.name()))
    }
}

impl<'a> Multigrid<'a> {
    /// Per-level record, finest first; the last entry is the coarsest solve.
    pub fn level_specs(&self) -> &[LevelSpec] {
        &self.specs
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    fn smooth<T: Scalar>(&self, a: CsrView<'_, T>, stage: &Stage<T>, r: &[T], z: &mut [T]) -> Result<()> {
        let n = r.len();
        let mut res = vec![T::zero(); n];
        let mut d = vec![T::zero(); n];
        for _ in 0..stage.sweeps {
            residual(&self.exec, a, r, z, &mut res);
            stage.inner.relax(&res, &mut d)?;
            axpy(&self.exec, stage.omega, &d, z);
        }
        Ok(())
    }

    fn visit<T: Scalar>(&self, index: usize, level: &Level<'_, T>, r_in: &[f64], z_out: &mut [f64]) -> Result<()> {
        let a = level.a.view();
        let n = a.nrows();
        let r: Vec<T> = r_in.iter().map(|&v| T::from_f64(v).unwrap_or_else(T::nan)).collect();
        let mut z = vec![T::zero(); n];
        self.smooth(a, &level.stage, &r, &mut z)?;
        if let Some((agg, n_coarse)) = &level.coarse {
            let mut res = vec![T::zero(); n];
            residual(&self.exec, a, &r, &z, &mut res);
            let mut rc = vec![0.0; *n_coarse];
            for (i, v) in res.iter().enumerate() {
                rc[agg[i]] += v.to_f64().unwrap_or(f64::NAN);
            }
            let mut zc = vec![0.0; *n_coarse];
            self.cycle(index + 1, &rc, &mut zc)?;
            for (i, zi) in z.iter_mut().enumerate() {
                *zi += T::from_f64(zc[agg[i]]).unwrap_or_else(T::nan);
            }
            self.smooth(a, &level.stage, &r, &mut z)?;
        }
        for (o, v) in z_out.iter_mut().zip(&z) {
            *o = v.to_f64().unwrap_or(f64::NAN);
        }
        Ok(())
    }

    fn cycle(&self, index: usize, r: &[f64], z: &mut [f64]) -> Result<()> {
        match &self.levels[index] {
            AnyLevel::Full(level) => self.visit(index, level, r, z),
            AnyLevel::Reduced(level) => self.visit(index, level, r, z),
        }
    }
}

impl fmt::Debug for Multigrid<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multigrid")
            .field("size", &self.size)
            .field("levels", &self.specs)
            .finish()
    }
}

impl LinOp for Multigrid<'_> {
    fn size(&self) -> usize {
        self.size
    }
    fn executor(&self) -> &Executor {
        &self.exec
    }
    fn apply(&self, b: &[f64], x: &mut [f64]) -> Result<()> {
        x.iter_mut().for_each(|v| *v = 0.0);
        self.cycle(0, b, x)
    }
}
