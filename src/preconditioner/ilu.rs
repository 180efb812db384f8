//! Incomplete LU and Cholesky factorizations with zero fill (Saad §10.3).
//!
//! The factors keep the pattern of A (ILU) or of its lower triangle (IC). They come either from
//! the exact one-shot IKJ elimination or from ParILU/ParIC fixed-point sweeps (Chow & Patel 2015),
//! in which every entry is updated from the previous sweep's values only. The triangular solves
//! are exact substitutions or multiplications with ISAI approximate inverses.
//!
//! Factorizations assume sorted rows. Unless `skip_sort` is set, the working copy is sorted first;
//! with `skip_sort` the caller guarantees sorted input.

use super::isai::{lower_isai, upper_isai};
use super::{GeneratedPreconditioner, PreconditionerFactory, Relaxation, RelaxationOp};
use crate::core::traits::Scalar;
use crate::error::{BridgeError, Result};
use crate::executor::Executor;
use crate::matrix::{Csr, CsrView};
use std::str::FromStr;
use std::sync::Arc;

const ABSENT: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FactorizationKind {
    #[default]
    Exact,
    /// ParILU / ParIC sweeps.
    Parallel,
}

impl FromStr for FactorizationKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "exact" => Ok(FactorizationKind::Exact),
            "parilu" | "paric" | "parallel" | "iterative" => Ok(FactorizationKind::Parallel),
            other => Err(BridgeError::config(format!("unknown factorization '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriangularSolve {
    #[default]
    Exact,
    Isai { sparsity_power: usize },
}

/// Triangular solve with one factor.
#[derive(Debug, Clone)]
pub enum TriangularSolver<T> {
    Lower(Csr<T>),
    Upper(Csr<T>),
    /// Multiplication with an approximate inverse.
    Approximate(Csr<T>),
}

impl<T: Scalar> TriangularSolver<T> {
    fn new(factor: Csr<T>, lower: bool, how: TriangularSolve) -> Result<Self> {
        Ok(match (how, lower) {
            (TriangularSolve::Exact, true) => TriangularSolver::Lower(factor),
            (TriangularSolve::Exact, false) => TriangularSolver::Upper(factor),
            (TriangularSolve::Isai { sparsity_power }, true) => {
                TriangularSolver::Approximate(lower_isai(factor.view(), sparsity_power)?)
            }
            (TriangularSolve::Isai { sparsity_power }, false) => {
                TriangularSolver::Approximate(upper_isai(factor.view(), sparsity_power)?)
            }
        })
    }

    pub fn solve(&self, r: &[T], z: &mut [T]) -> Result<()> {
        match self {
            TriangularSolver::Lower(l) => {
                let v = l.view();
                for i in 0..v.nrows() {
                    let (cols, vals) = v.row(i);
                    let mut s = r[i];
                    let mut d = T::zero();
                    for (&j, &a) in cols.iter().zip(vals) {
                        if j < i {
                            s -= a * z[j];
                        } else if j == i {
                            d = a;
                        }
                    }
                    if d == T::zero() {
                        return Err(BridgeError::ZeroPivot(i));
                    }
                    z[i] = s / d;
                }
            }
            TriangularSolver::Upper(u) => {
                let v = u.view();
                for i in (0..v.nrows()).rev() {
                    let (cols, vals) = v.row(i);
                    let mut s = r[i];
                    let mut d = T::zero();
                    for (&j, &a) in cols.iter().zip(vals) {
                        if j > i {
                            s -= a * z[j];
                        } else if j == i {
                            d = a;
                        }
                    }
                    if d == T::zero() {
                        return Err(BridgeError::ZeroPivot(i));
                    }
                    z[i] = s / d;
                }
            }
            TriangularSolver::Approximate(m) => m.view().spmv(r, z),
        }
        Ok(())
    }

    pub fn factor(&self) -> &Csr<T> {
        match self {
            TriangularSolver::Lower(m) | TriangularSolver::Upper(m) | TriangularSolver::Approximate(m) => m,
        }
    }
}

/// z = U⁻¹ L⁻¹ r with the two triangular solvers.
#[derive(Debug, Clone)]
pub struct Ilu<T> {
    lower: TriangularSolver<T>,
    upper: TriangularSolver<T>,
}

impl<T: Scalar> Ilu<T> {
    pub fn lower(&self) -> &TriangularSolver<T> {
        &self.lower
    }
    pub fn upper(&self) -> &TriangularSolver<T> {
        &self.upper
    }
}

impl<T: Scalar> Relaxation<T> for Ilu<T> {
    fn relax(&self, r: &[T], z: &mut [T]) -> Result<()> {
        let mut y = vec![T::zero(); r.len()];
        self.lower.solve(r, &mut y)?;
        self.upper.solve(&y, z)
    }
}

/// Owned copy of `a` with sorted rows unless `skip_sort`.
fn working_copy<T: Scalar>(a: CsrView<'_, T>, skip_sort: bool) -> Csr<T> {
    let mut m = a.to_owned();
    if !skip_sort && !a.is_sorted() {
        m.sort_rows();
    }
    m
}

fn diagonal_positions(row_ptr: &[usize], col_idx: &[usize]) -> Vec<usize> {
    let n = row_ptr.len() - 1;
    let mut diag = vec![ABSENT; n];
    for (i, d) in diag.iter_mut().enumerate() {
        if let Some(k) = (row_ptr[i]..row_ptr[i + 1]).find(|&k| col_idx[k] == i) {
            *d = k;
        }
    }
    diag
}

fn position(row_ptr: &[usize], col_idx: &[usize], i: usize, j: usize) -> Option<usize> {
    let (s, e) = (row_ptr[i], row_ptr[i + 1]);
    col_idx[s..e].binary_search(&j).ok().map(|k| s + k)
}

/// Split combined LU values into unit-lower L and upper U.
fn split_lu<T: Scalar>(m: &Csr<T>) -> Result<(Csr<T>, Csr<T>)> {
    let v = m.view();
    let mut lower = Vec::new();
    let mut upper = Vec::new();
    for i in 0..v.nrows() {
        lower.push((i, i, T::one()));
        let (cols, vals) = v.row(i);
        for (&j, &a) in cols.iter().zip(vals) {
            if j < i {
                lower.push((i, j, a));
            } else {
                upper.push((i, j, a));
            }
        }
        if v.get(i, i) == T::zero() {
            return Err(BridgeError::ZeroPivot(i));
        }
    }
    Ok((
        Csr::from_triplets(v.nrows(), v.ncols(), &lower)?,
        Csr::from_triplets(v.nrows(), v.ncols(), &upper)?,
    ))
}

/// Exact ILU(0), IKJ variant. Returns (L, U).
pub fn ilu0<T: Scalar>(a: CsrView<'_, T>, skip_sort: bool) -> Result<(Csr<T>, Csr<T>)> {
    let mut m = working_copy(a, skip_sort);
    let n = m.nrows();
    let row_ptr = m.view().row_ptr().to_vec();
    let col_idx = m.view().col_idx().to_vec();
    let diag = diagonal_positions(&row_ptr, &col_idx);
    let vals = m.values_mut();
    let mut pos = vec![ABSENT; n];
    for i in 0..n {
        for k in row_ptr[i]..row_ptr[i + 1] {
            pos[col_idx[k]] = k;
        }
        for kk in row_ptr[i]..row_ptr[i + 1] {
            let k = col_idx[kk];
            if k >= i {
                break;
            }
            let dk = diag[k];
            if dk == ABSENT || vals[dk] == T::zero() {
                return Err(BridgeError::ZeroPivot(k));
            }
            let lik = vals[kk] / vals[dk];
            vals[kk] = lik;
            for jj in row_ptr[k]..row_ptr[k + 1] {
                let j = col_idx[jj];
                if j > k && pos[j] != ABSENT {
                    let ukj = vals[jj];
                    vals[pos[j]] -= lik * ukj;
                }
            }
        }
        for k in row_ptr[i]..row_ptr[i + 1] {
            pos[col_idx[k]] = ABSENT;
        }
    }
    split_lu(&m)
}

/// ParILU: `sweeps` Jacobi-style fixed-point sweeps from L = tril(A, −1) + I, U = triu(A).
pub fn par_ilu<T: Scalar>(a: CsrView<'_, T>, sweeps: usize, skip_sort: bool) -> Result<(Csr<T>, Csr<T>)> {
    let mut m = working_copy(a, skip_sort);
    let n = m.nrows();
    let row_ptr = m.view().row_ptr().to_vec();
    let col_idx = m.view().col_idx().to_vec();
    let orig = m.view().values().to_vec();
    let diag = diagonal_positions(&row_ptr, &col_idx);
    if let Some(i) = diag.iter().position(|&d| d == ABSENT) {
        return Err(BridgeError::ZeroPivot(i));
    }
    for _ in 0..sweeps {
        let old = m.view().values().to_vec();
        let vals = m.values_mut();
        for i in 0..n {
            for kk in row_ptr[i]..row_ptr[i + 1] {
                let j = col_idx[kk];
                let mut s = orig[kk];
                for pk in row_ptr[i]..row_ptr[i + 1] {
                    let k = col_idx[pk];
                    if k >= i.min(j) {
                        break;
                    }
                    if let Some(q) = position(&row_ptr, &col_idx, k, j) {
                        s -= old[pk] * old[q];
                    }
                }
                if i > j {
                    let ujj = old[diag[j]];
                    if ujj == T::zero() {
                        return Err(BridgeError::ZeroPivot(j));
                    }
                    vals[kk] = s / ujj;
                } else {
                    vals[kk] = s;
                }
            }
        }
    }
    split_lu(&m)
}

/// Exact IC(0). Returns the lower factor L with A ≈ L Lᵀ.
pub fn ic0<T: Scalar>(a: CsrView<'_, T>, skip_sort: bool) -> Result<Csr<T>> {
    let mut l = working_copy(a, skip_sort).filter(|i, j| j <= i);
    let n = l.nrows();
    let row_ptr = l.view().row_ptr().to_vec();
    let col_idx = l.view().col_idx().to_vec();
    let diag = diagonal_positions(&row_ptr, &col_idx);
    if let Some(i) = diag.iter().position(|&d| d == ABSENT) {
        return Err(BridgeError::ZeroPivot(i));
    }
    let vals = l.values_mut();
    for i in 0..n {
        for kk in row_ptr[i]..row_ptr[i + 1] {
            let j = col_idx[kk];
            let mut s = vals[kk];
            // Σ_{k<j} L_ik L_jk over the common pattern
            let (mut p, mut q) = (row_ptr[i], row_ptr[j]);
            while p < kk && q < diag[j] {
                match col_idx[p].cmp(&col_idx[q]) {
                    std::cmp::Ordering::Less => p += 1,
                    std::cmp::Ordering::Greater => q += 1,
                    std::cmp::Ordering::Equal => {
                        s -= vals[p] * vals[q];
                        p += 1;
                        q += 1;
                    }
                }
            }
            if j < i {
                vals[kk] = s / vals[diag[j]];
            } else if s > T::zero() {
                vals[kk] = s.sqrt();
            } else {
                return Err(BridgeError::Factorization(format!("non-positive IC pivot in row {}", i)));
            }
        }
    }
    Ok(l)
}

/// ParIC: `sweeps` fixed-point sweeps from l_ij = a_ij / √a_jj.
pub fn par_ic<T: Scalar>(a: CsrView<'_, T>, sweeps: usize, skip_sort: bool) -> Result<Csr<T>> {
    let mut l = working_copy(a, skip_sort).filter(|i, j| j <= i);
    let n = l.nrows();
    let row_ptr = l.view().row_ptr().to_vec();
    let col_idx = l.view().col_idx().to_vec();
    let orig = l.view().values().to_vec();
    let diag = diagonal_positions(&row_ptr, &col_idx);
    for i in 0..n {
        if diag[i] == ABSENT || orig[diag[i]] <= T::zero() {
            return Err(BridgeError::Factorization(format!("non-positive IC pivot in row {}", i)));
        }
    }
    {
        let vals = l.values_mut();
        for i in 0..n {
            for kk in row_ptr[i]..row_ptr[i + 1] {
                vals[kk] = orig[kk] / orig[diag[col_idx[kk]]].sqrt();
            }
        }
    }
    for _ in 0..sweeps {
        let old = l.view().values().to_vec();
        let vals = l.values_mut();
        for i in 0..n {
            for kk in row_ptr[i]..row_ptr[i + 1] {
                let j = col_idx[kk];
                let mut s = orig[kk];
                for pk in row_ptr[i]..row_ptr[i + 1] {
                    let k = col_idx[pk];
                    if k >= j {
                        break;
                    }
                    if let Some(q) = position(&row_ptr, &col_idx, j, k) {
                        s -= old[pk] * old[q];
                    }
                }
                if j < i {
                    vals[kk] = s / old[diag[j]];
                } else if s > T::zero() {
                    vals[kk] = s.sqrt();
                } else {
                    return Err(BridgeError::Factorization(format!("non-positive IC pivot in row {}", i)));
                }
            }
        }
    }
    Ok(l)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IluFactory {
    pub kind: FactorizationKind,
    pub sweeps: usize,
    pub skip_sort: bool,
    pub trisolve: TriangularSolve,
}

impl Default for IluFactory {
    fn default() -> Self {
        Self {
            kind: FactorizationKind::Exact,
            sweeps: 5,
            skip_sort: false,
            trisolve: TriangularSolve::Exact,
        }
    }
}

impl IluFactory {
    pub fn build<T: Scalar>(&self, a: CsrView<'_, T>) -> Result<Ilu<T>> {
        let (l, u) = match self.kind {
            FactorizationKind::Exact => ilu0(a, self.skip_sort)?,
            FactorizationKind::Parallel => par_ilu(a, self.sweeps, self.skip_sort)?,
        };
        Ok(Ilu {
            lower: TriangularSolver::new(l, true, self.trisolve)?,
            upper: TriangularSolver::new(u, false, self.trisolve)?,
        })
    }
}

impl PreconditionerFactory for IluFactory {
    fn name(&self) -> &'static str {
        match self.trisolve {
            TriangularSolve::Exact => "ilu",
            TriangularSolve::Isai { .. } => "ilu-isai",
        }
    }

    fn generate<'a>(&self, exec: &Executor, a: CsrView<'a>) -> Result<GeneratedPreconditioner<'a>> {
        let ilu = self.build(a)?;
        log::debug!("{}: {:?} factorization of {} rows", self.name(), self.kind, a.nrows());
        Ok(GeneratedPreconditioner::new(
            Arc::new(RelaxationOp::new(exec, a.nrows(), ilu)),
            a.fingerprint(),
            self.name(),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcFactory {
    pub kind: FactorizationKind,
    pub sweeps: usize,
    pub skip_sort: bool,
    pub trisolve: TriangularSolve,
}

impl Default for IcFactory {
    fn default() -> Self {
        Self {
            kind: FactorizationKind::Exact,
            sweeps: 5,
            skip_sort: false,
            trisolve: TriangularSolve::Exact,
        }
    }
}

impl IcFactory {
    pub fn build<T: Scalar>(&self, a: CsrView<'_, T>) -> Result<Ilu<T>> {
        let l = match self.kind {
            FactorizationKind::Exact => ic0(a, self.skip_sort)?,
            FactorizationKind::Parallel => par_ic(a, self.sweeps, self.skip_sort)?,
        };
        let (lower, upper) = match self.trisolve {
            TriangularSolve::Exact => {
                let lt = l.transpose();
                (TriangularSolver::Lower(l), TriangularSolver::Upper(lt))
            }
            // only the lower ISAI is built; its transpose approximates L⁻ᵀ
            TriangularSolve::Isai { sparsity_power } => {
                let m = lower_isai(l.view(), sparsity_power)?;
                let mt = m.transpose();
                (TriangularSolver::Approximate(m), TriangularSolver::Approximate(mt))
            }
        };
        Ok(Ilu { lower, upper })
    }
}

impl PreconditionerFactory for IcFactory {
    fn name(&self) -> &'static str {
        match self.trisolve {
            TriangularSolve::Exact => "ic",
            TriangularSolve::Isai { .. } => "ic-isai",
        }
    }

    fn generate<'a>(&self, exec: &Executor, a: CsrView<'a>) -> Result<GeneratedPreconditioner<'a>> {
        let ic = self.build(a)?;
        log::debug!("{}: {:?} factorization of {} rows", self.name(), self.kind, a.nrows());
        Ok(GeneratedPreconditioner::new(
            Arc::new(RelaxationOp::new(exec, a.nrows(), ic)),
            a.fingerprint(),
            self.name(),
        ))
    }
}
