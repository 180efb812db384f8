//! Compressed-row storage.
//!
//! [`CsrView`] is the non-owning view over caller memory that the bridge adapts without copying.
//! [`Csr`] owns its arrays; it backs device mirrors, coarse multigrid levels, factors and
//! approximate inverses.

use crate::core::traits::Scalar;
use crate::error::{BridgeError, Result};
use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Identity of a sparsity pattern: shape, nonzero count and a hash of both index arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatternFingerprint {
    pub nrows: usize,
    pub ncols: usize,
    pub nnz: usize,
    hash: u64,
}

impl PatternFingerprint {
    /// Fingerprint of a matrix-free operator, which only has a shape.
    pub fn shape_only(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            nnz: 0,
            hash: 0,
        }
    }

    pub fn is_shape_only(&self) -> bool {
        self.nnz == 0 && self.hash == 0
    }

    /// Whether something built for `self` may be applied to an operator with pattern `other`.
    /// Shape-only fingerprints compare shapes; everything else must match exactly.
    pub fn matches(&self, other: &PatternFingerprint) -> bool {
        if self.is_shape_only() || other.is_shape_only() {
            self.nrows == other.nrows && self.ncols == other.ncols
        } else {
            self == other
        }
    }
}

/// Read-only compressed-row view over caller-owned arrays.
#[derive(Debug, Clone, Copy)]
pub struct CsrView<'a, T = f64> {
    nrows: usize,
    ncols: usize,
    row_ptr: &'a [usize],
    col_idx: &'a [usize],
    values: &'a [T],
}

impl<'a, T: Scalar> CsrView<'a, T> {
    /// Build a view, validating array lengths, row-pointer monotonicity and column bounds.
    pub fn new(
        nrows: usize,
        ncols: usize,
        row_ptr: &'a [usize],
        col_idx: &'a [usize],
        values: &'a [T],
    ) -> Result<Self> {
        if row_ptr.len() != nrows + 1 {
            return Err(BridgeError::dim("row_ptr", nrows + 1, row_ptr.len()));
        }
        if row_ptr[0] != 0 || row_ptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(BridgeError::config("row_ptr must start at 0 and be non-decreasing"));
        }
        let nnz = row_ptr[nrows];
        if col_idx.len() != nnz {
            return Err(BridgeError::dim("col_idx", nnz, col_idx.len()));
        }
        if values.len() != nnz {
            return Err(BridgeError::dim("values", nnz, values.len()));
        }
        if let Some(&c) = col_idx.iter().find(|&&c| c >= ncols) {
            return Err(BridgeError::config(format!(
                "column index {} out of range for {} columns",
                c, ncols
            )));
        }
        Ok(Self {
            nrows,
            ncols,
            row_ptr,
            col_idx,
            values,
        })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }
    pub fn ncols(&self) -> usize {
        self.ncols
    }
    pub fn nnz(&self) -> usize {
        self.row_ptr[self.nrows]
    }
    pub fn row_ptr(&self) -> &'a [usize] {
        self.row_ptr
    }
    pub fn col_idx(&self) -> &'a [usize] {
        self.col_idx
    }
    pub fn values(&self) -> &'a [T] {
        self.values
    }

    /// Column indices and values of row `i`.
    pub fn row(&self, i: usize) -> (&'a [usize], &'a [T]) {
        let (s, e) = (self.row_ptr[i], self.row_ptr[i + 1]);
        (&self.col_idx[s..e], &self.values[s..e])
    }

    /// Entry (i, j), zero when structurally absent.
    pub fn get(&self, i: usize, j: usize) -> T {
        let (cols, vals) = self.row(i);
        cols.iter()
            .position(|&c| c == j)
            .map_or(T::zero(), |k| vals[k])
    }

    /// True when every row has strictly increasing column indices.
    pub fn is_sorted(&self) -> bool {
        (0..self.nrows).all(|i| self.row(i).0.windows(2).all(|w| w[0] < w[1]))
    }

    pub fn fingerprint(&self) -> PatternFingerprint {
        let mut h = DefaultHasher::new();
        self.row_ptr.hash(&mut h);
        self.col_idx.hash(&mut h);
        PatternFingerprint {
            nrows: self.nrows,
            ncols: self.ncols,
            nnz: self.nnz(),
            hash: h.finish(),
        }
    }

    /// Diagonal entries; structurally missing ones are zero.
    pub fn diagonal(&self) -> Vec<T> {
        (0..self.nrows.min(self.ncols)).map(|i| self.get(i, i)).collect()
    }

    /// Sequential y = A x.
    pub fn spmv(&self, x: &[T], y: &mut [T]) {
        debug_assert_eq!(x.len(), self.ncols);
        debug_assert_eq!(y.len(), self.nrows);
        for (i, yi) in y.iter_mut().enumerate() {
            let (cols, vals) = self.row(i);
            *yi = cols.iter().zip(vals).map(|(&j, &v)| v * x[j]).sum();
        }
    }

    pub fn to_owned(&self) -> Csr<T> {
        Csr {
            nrows: self.nrows,
            ncols: self.ncols,
            row_ptr: self.row_ptr.to_vec(),
            col_idx: self.col_idx.to_vec(),
            values: self.values.to_vec(),
        }
    }

    /// Galerkin product PᵀAP for the piecewise-constant prolongation given by `aggregates`
    /// (fine row → coarse row).
    pub fn galerkin(&self, aggregates: &[usize], n_coarse: usize) -> Csr<T> {
        let v = *self;
        let mut rows: Vec<BTreeMap<usize, T>> = vec![BTreeMap::new(); n_coarse];
        for i in 0..self.nrows {
            let (cols, vals) = v.row(i);
            let ci = aggregates[i];
            for (&j, &a) in cols.iter().zip(vals) {
                *rows[ci].entry(aggregates[j]).or_insert_with(T::zero) += a;
            }
        }
        Csr::from_rows(n_coarse, n_coarse, rows)
    }
}

#[cfg(feature = "rayon")]
impl<T: Scalar> CsrView<'_, T> {
    /// Row-parallel y = A x.
    pub fn spmv_parallel(&self, x: &[T], y: &mut [T]) {
        use rayon::prelude::*;
        y.par_iter_mut().enumerate().for_each(|(i, yi)| {
            let (cols, vals) = self.row(i);
            *yi = cols.iter().zip(vals).map(|(&j, &v)| v * x[j]).sum();
        });
    }
}

/// Owned compressed-row matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Csr<T = f64> {
    nrows: usize,
    ncols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<T>,
}

impl<T: Scalar> Csr<T> {
    /// Take ownership of raw arrays after validating them.
    pub fn from_raw(
        nrows: usize,
        ncols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<T>,
    ) -> Result<Self> {
        CsrView::new(nrows, ncols, &row_ptr, &col_idx, &values)?;
        Ok(Self {
            nrows,
            ncols,
            row_ptr,
            col_idx,
            values,
        })
    }

    /// Assemble from (row, col, value) triplets; duplicates are summed, rows come out sorted.
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, T)]) -> Result<Self> {
        let mut rows: Vec<BTreeMap<usize, T>> = vec![BTreeMap::new(); nrows];
        for &(i, j, v) in triplets {
            if i >= nrows || j >= ncols {
                return Err(BridgeError::config(format!(
                    "triplet ({}, {}) outside {}x{}",
                    i, j, nrows, ncols
                )));
            }
            *rows[i].entry(j).or_insert_with(T::zero) += v;
        }
        Ok(Self::from_rows(nrows, ncols, rows))
    }

    fn from_rows(nrows: usize, ncols: usize, rows: Vec<BTreeMap<usize, T>>) -> Self {
        let mut row_ptr = Vec::with_capacity(nrows + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);
        for row in rows {
            for (j, v) in row {
                col_idx.push(j);
                values.push(v);
            }
            row_ptr.push(col_idx.len());
        }
        Self {
            nrows,
            ncols,
            row_ptr,
            col_idx,
            values,
        }
    }

    pub fn view(&self) -> CsrView<'_, T> {
        CsrView {
            nrows: self.nrows,
            ncols: self.ncols,
            row_ptr: &self.row_ptr,
            col_idx: &self.col_idx,
            values: &self.values,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }
    pub fn ncols(&self) -> usize {
        self.ncols
    }
    pub fn nnz(&self) -> usize {
        self.values.len()
    }
    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// Sort the column indices (and values) of every row.
    pub fn sort_rows(&mut self) {
        for i in 0..self.nrows {
            let (s, e) = (self.row_ptr[i], self.row_ptr[i + 1]);
            let mut entries: Vec<(usize, T)> = self.col_idx[s..e]
                .iter()
                .copied()
                .zip(self.values[s..e].iter().copied())
                .collect();
            entries.sort_by_key(|&(c, _)| c);
            for (k, (c, v)) in entries.into_iter().enumerate() {
                self.col_idx[s + k] = c;
                self.values[s + k] = v;
            }
        }
    }

    pub fn transpose(&self) -> Csr<T> {
        let mut rows: Vec<BTreeMap<usize, T>> = vec![BTreeMap::new(); self.ncols];
        let v = self.view();
        for i in 0..self.nrows {
            let (cols, vals) = v.row(i);
            for (&j, &a) in cols.iter().zip(vals) {
                rows[j].insert(i, a);
            }
        }
        Self::from_rows(self.ncols, self.nrows, rows)
    }

    /// Convert the values to another precision; the pattern is unchanged.
    pub fn cast<U: Scalar>(&self) -> Csr<U> {
        Csr {
            nrows: self.nrows,
            ncols: self.ncols,
            row_ptr: self.row_ptr.clone(),
            col_idx: self.col_idx.clone(),
            values: self
                .values
                .iter()
                .map(|v| <U as num_traits::NumCast>::from(*v).unwrap_or_else(U::zero))
                .collect(),
        }
    }

    /// Entries with `keep(i, j)`; used to split a matrix into triangular parts.
    pub fn filter(&self, keep: impl Fn(usize, usize) -> bool) -> Csr<T> {
        let v = self.view();
        let mut rows: Vec<BTreeMap<usize, T>> = vec![BTreeMap::new(); self.nrows];
        for (i, row) in rows.iter_mut().enumerate() {
            let (cols, vals) = v.row(i);
            for (&j, &a) in cols.iter().zip(vals) {
                if keep(i, j) {
                    row.insert(j, a);
                }
            }
        }
        Self::from_rows(self.nrows, self.ncols, rows)
    }
}
