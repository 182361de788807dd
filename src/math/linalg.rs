//! Dense linear-algebra helpers on top of nalgebra.
//!
//! The fit produces symmetric normal matrices that are accumulated in one
//! triangle only, then solved by Cholesky. The night aggregation repeatedly
//! drops one exposure from a vector, a covariance matrix and a design matrix.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

/// Which triangle of a symmetric matrix holds the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Triangle {
    Upper,
    Lower,
}

/// Copy the populated triangle onto the other one.
pub fn symmetrize(m: &mut DMatrix<f64>, source: Triangle) {
    let n = m.nrows().min(m.ncols());
    for i in 0..n {
        for j in 0..i {
            match source {
                Triangle::Lower => m[(j, i)] = m[(i, j)],
                Triangle::Upper => m[(i, j)] = m[(j, i)],
            }
        }
    }
}

/// Cholesky factorization that also rejects tiny pivots.
///
/// `None` when the matrix is not positive definite or when a pivot `Lᵢᵢ²`
/// falls below `rel_pivot × max(diag)`.
pub fn checked_cholesky(m: &DMatrix<f64>, rel_pivot: f64) -> Option<Cholesky<f64, Dyn>> {
    if m.nrows() == 0 || m.nrows() != m.ncols() {
        return None;
    }
    let max_diag = m.diagonal().iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if !(max_diag.is_finite() && max_diag > 0.0) {
        return None;
    }
    let chol = m.clone().cholesky()?;
    let floor = rel_pivot * max_diag;
    let l = chol.l_dirty();
    for i in 0..l.nrows() {
        let pivot = l[(i, i)] * l[(i, i)];
        if !(pivot.is_finite() && pivot >= floor) {
            return None;
        }
    }
    Some(chol)
}

/// Inverse of a symmetric positive-definite matrix.
pub fn cholesky_invert(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let chol = m.clone().cholesky()?;
    let inv = chol.inverse();
    if inv.iter().all(|v| v.is_finite()) {
        Some(inv)
    } else {
        None
    }
}

/// Minimum-norm least squares, dropping singular values below `rel_tol × σ_max`.
pub fn solve_truncated(x: &DMatrix<f64>, y: &DVector<f64>, rel_tol: f64) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);
    let smax = svd.singular_values.max();
    if !(smax.is_finite() && smax > 0.0) {
        return None;
    }
    let beta = svd.solve(y, rel_tol * smax).ok()?;
    beta.iter().all(|v| v.is_finite()).then_some(beta)
}

/// Remove row and column `index` of a square matrix.
pub fn without_index(m: &DMatrix<f64>, index: usize) -> DMatrix<f64> {
    m.clone().remove_row(index).remove_column(index)
}

pub fn without_row(m: &DMatrix<f64>, index: usize) -> DMatrix<f64> {
    m.clone().remove_row(index)
}

pub fn without_entry(v: &DVector<f64>, index: usize) -> DVector<f64> {
    v.clone().remove_row(index)
}

/// Leading `n × n` block.
pub fn leading_block(m: &DMatrix<f64>, n: usize) -> DMatrix<f64> {
    m.view((0, 0), (n, n)).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn truncated_solve_returns_the_minimum_norm_solution() {
        // Two identical columns: only their sum is determined.
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        let y = DVector::from_row_slice(&[2.0, 4.0, 6.0]);
        let beta = solve_truncated(&x, &y, 1e-9).unwrap();
        assert_relative_eq!(beta[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(beta[1], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn symmetrize_copies_the_requested_triangle() {
        let mut m = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 5.0, 2.0]);
        symmetrize(&mut m, Triangle::Lower);
        assert_eq!(m[(0, 1)], 5.0);

        let mut m = DMatrix::from_row_slice(2, 2, &[1.0, 7.0, 0.0, 2.0]);
        symmetrize(&mut m, Triangle::Upper);
        assert_eq!(m[(1, 0)], 7.0);
    }

    #[test]
    fn checked_cholesky_rejects_near_singular_pivots() {
        let ok = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        assert!(checked_cholesky(&ok, 1e-14).is_some());

        let bad = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0 + 1e-16]);
        assert!(checked_cholesky(&bad, 1e-14).is_none());
    }

    #[test]
    fn cholesky_inverse_matches_identity() {
        let m = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.5, 1.0, 3.0, 0.2, 0.5, 0.2, 2.0]);
        let inv = cholesky_invert(&m).unwrap();
        let id = &m * &inv;
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(id[(i, j)], if i == j { 1.0 } else { 0.0 }, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn removing_an_index_shrinks_consistently() {
        let m = DMatrix::from_fn(4, 4, |i, j| (10 * i + j) as f64);
        let r = without_index(&m, 1);
        assert_eq!(r.shape(), (3, 3));
        assert_eq!(r[(1, 1)], 22.0);
        let v = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(without_entry(&v, 0).as_slice(), &[2.0, 3.0]);
        assert_eq!(leading_block(&m, 2)[(1, 0)], 10.0);
    }
}
