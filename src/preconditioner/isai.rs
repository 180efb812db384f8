//! Incomplete sparse approximate inverses (ISAI) of triangular factors.
//!
//! For a triangular factor T the approximate inverse M has the sparsity pattern of T^p
//! (p = sparsity power). Row i of M is fixed by requiring (M T)[i, P] = e_i restricted to the
//! row pattern P, which is a |P|×|P| dense system solved with a full-pivoting LU. Applying M is a
//! single sparse product instead of a sequential substitution.

use super::dense_solve;
use crate::core::traits::Scalar;
use crate::error::{BridgeError, Result};
use crate::matrix::{Csr, CsrView};
use std::collections::BTreeSet;

/// Sorted row patterns of pattern(T)^power.
pub fn power_pattern<T: Scalar>(t: CsrView<'_, T>, power: usize) -> Vec<Vec<usize>> {
    let n = t.nrows();
    let base: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            let mut cols = t.row(i).0.to_vec();
            cols.sort_unstable();
            cols
        })
        .collect();
    let mut current = base.clone();
    for _ in 1..power.max(1) {
        current = current
            .iter()
            .map(|row| {
                let mut next = BTreeSet::new();
                for &k in row {
                    next.extend(base[k].iter().copied());
                }
                next.into_iter().collect()
            })
            .collect();
    }
    current
}

/// ISAI of a lower-triangular factor.
pub fn lower_isai<T: Scalar>(l: CsrView<'_, T>, sparsity_power: usize) -> Result<Csr<T>> {
    isai(l, sparsity_power)
}

/// ISAI of an upper-triangular factor.
pub fn upper_isai<T: Scalar>(u: CsrView<'_, T>, sparsity_power: usize) -> Result<Csr<T>> {
    isai(u, sparsity_power)
}

fn isai<T: Scalar>(t: CsrView<'_, T>, power: usize) -> Result<Csr<T>> {
    let n = t.nrows();
    let patterns = power_pattern(t, power);
    let mut row_ptr = Vec::with_capacity(n + 1);
    let mut col_idx = Vec::new();
    let mut values = Vec::new();
    row_ptr.push(0);
    for (i, pattern) in patterns.iter().enumerate() {
        let m = pattern.len();
        let mut rhs: Vec<f64> = pattern.iter().map(|&j| if j == i { 1.0 } else { 0.0 }).collect();
        if !rhs.contains(&1.0) {
            return Err(BridgeError::Factorization(format!(
                "triangular factor has no diagonal entry in row {}",
                i
            )));
        }
        // (M T)[i, pattern[r]] = Σ_c m_c T[pattern[c], pattern[r]]
        dense_solve(
            m,
            |r, c| t.get(pattern[c], pattern[r]).to_f64().unwrap_or(f64::NAN),
            &mut rhs,
        )
        .map_err(|_| BridgeError::Factorization(format!("singular ISAI system in row {}", i)))?;
        for (&j, &v) in pattern.iter().zip(&rhs) {
            col_idx.push(j);
            values.push(T::from_f64(v).unwrap_or_else(T::nan));
        }
        row_ptr.push(col_idx.len());
    }
    Csr::from_raw(n, n, row_ptr, col_idx, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bidiagonal(n: usize) -> Csr {
        let mut trips = Vec::new();
        for i in 0..n {
            trips.push((i, i, 2.0));
            if i > 0 {
                trips.push((i, i - 1, -1.0));
            }
        }
        Csr::from_triplets(n, n, &trips).unwrap()
    }

    #[test]
    fn powers_grow_the_pattern() {
        let l = bidiagonal(4);
        assert_eq!(power_pattern(l.view(), 1)[3], vec![2, 3]);
        assert_eq!(power_pattern(l.view(), 3)[3], vec![0, 1, 2, 3]);
    }

    #[test]
    fn full_power_gives_the_exact_inverse() {
        let n = 4;
        let l = bidiagonal(n);
        let m = lower_isai(l.view(), n).unwrap();
        // L⁻¹ of 2I − S has entries 2^{-(i-j+1)}
        for i in 0..n {
            for j in 0..=i {
                assert_relative_eq!(m.view().get(i, j), 0.5f64.powi((i - j + 1) as i32), epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn upper_isai_of_diagonal_is_reciprocal() {
        let u = Csr::from_triplets(2, 2, &[(0, 0, 4.0), (1, 1, 0.5)]).unwrap();
        let m = upper_isai(u.view(), 1).unwrap();
        assert_relative_eq!(m.view().get(0, 0), 0.25);
        assert_relative_eq!(m.view().get(1, 1), 2.0);
    }
}
