//! Normal-equation accumulation for the per-object linear system.
//!
//! Every fitted pixel contributes one design row `a` (sparse), a weight `w`
//! and a measurement `y`:
//!
//! ```text
//! N += w·a·aᵀ      (lower triangle only)
//! b += w·a·y
//! S += w·y²
//! ```
//!
//! Solving gives `x = N⁻¹b`, `cov = N⁻¹` and `χ² = S − xᵀb`.

use nalgebra::{DMatrix, DVector};

use crate::error::FitError;
use crate::math::{Triangle, checked_cholesky, symmetrize};

/// Pivots below this fraction of the largest diagonal count as singular.
pub const PIVOT_TOLERANCE: f64 = 1e-14;

/// Placement of the unknowns in the parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamLayout {
    pub n_flux: usize,
    pub n_galaxy: usize,
    pub position: bool,
}

impl ParamLayout {
    pub fn galaxy_offset(&self) -> usize {
        self.n_flux
    }

    /// Index of `dx`; `dy` follows.
    pub fn position_offset(&self) -> Option<usize> {
        self.position.then_some(self.n_flux + self.n_galaxy)
    }

    pub fn len(&self) -> usize {
        self.n_flux + self.n_galaxy + if self.position { 2 } else { 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct NormalAccumulator {
    layout: ParamLayout,
    matrix: DMatrix<f64>,
    rhs: DVector<f64>,
    sum_wyy: f64,
    n_pixels: usize,
}

/// Solution of the normal equations.
#[derive(Debug, Clone)]
pub struct NormalSolution {
    pub params: DVector<f64>,
    pub covariance: DMatrix<f64>,
    pub chi2: f64,
    pub ndf: usize,
    pub n_pixels: usize,
}

impl NormalAccumulator {
    pub fn new(layout: ParamLayout) -> Self {
        let n = layout.len();
        Self {
            layout,
            matrix: DMatrix::zeros(n, n),
            rhs: DVector::zeros(n),
            sum_wyy: 0.0,
            n_pixels: 0,
        }
    }

    pub fn layout(&self) -> ParamLayout {
        self.layout
    }

    pub fn n_pixels(&self) -> usize {
        self.n_pixels
    }

    /// Add one pixel. `row` holds `(parameter index, coefficient)` pairs with
    /// distinct indices.
    pub fn add_row(&mut self, row: &[(usize, f64)], y: f64, w: f64) {
        for (a, &(ia, va)) in row.iter().enumerate() {
            let wa = w * va;
            self.rhs[ia] += wa * y;
            for &(ib, vb) in &row[..=a] {
                let (r, c) = if ia >= ib { (ia, ib) } else { (ib, ia) };
                self.matrix[(r, c)] += wa * vb;
            }
        }
        self.sum_wyy += w * y * y;
        self.n_pixels += 1;
    }

    /// Mirror the lower triangle and solve by Cholesky.
    pub fn solve(&self) -> Result<NormalSolution, FitError> {
        let n_params = self.layout.len();
        let singular = FitError::Singular {
            n_params,
            n_pixels: self.n_pixels,
        };
        if n_params == 0 {
            return Err(singular);
        }
        let mut normal = self.matrix.clone();
        symmetrize(&mut normal, Triangle::Lower);
        let chol = checked_cholesky(&normal, PIVOT_TOLERANCE).ok_or(singular.clone())?;
        let params = chol.solve(&self.rhs);
        let covariance = chol.inverse();
        if !params.iter().chain(covariance.iter()).all(|v| v.is_finite()) {
            return Err(singular);
        }
        let chi2 = self.sum_wyy - params.dot(&self.rhs);
        Ok(NormalSolution {
            params,
            covariance,
            chi2,
            ndf: self.n_pixels.saturating_sub(n_params),
            n_pixels: self.n_pixels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn straight_line_fit_matches_closed_form() {
        // y = 1 + 2x with unit weights, exact data.
        let layout = ParamLayout {
            n_flux: 2,
            n_galaxy: 0,
            position: false,
        };
        let mut acc = NormalAccumulator::new(layout);
        for x in [0.0, 1.0, 2.0, 3.0] {
            acc.add_row(&[(0, 1.0), (1, x)], 1.0 + 2.0 * x, 1.0);
        }
        let sol = acc.solve().unwrap();
        assert_relative_eq!(sol.params[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(sol.params[1], 2.0, epsilon = 1e-10);
        assert!(sol.chi2.abs() < 1e-9);
        assert_eq!(sol.ndf, 2);
        // var(intercept) = Σx² / (nΣx² − (Σx)²) = 14 / 20
        assert_relative_eq!(sol.covariance[(0, 0)], 0.7, epsilon = 1e-10);
    }

    #[test]
    fn unconstrained_parameter_is_singular() {
        let layout = ParamLayout {
            n_flux: 2,
            n_galaxy: 0,
            position: false,
        };
        let mut acc = NormalAccumulator::new(layout);
        acc.add_row(&[(0, 1.0)], 3.0, 1.0);
        acc.add_row(&[(0, 1.0)], 3.0, 1.0);
        assert!(matches!(acc.solve(), Err(FitError::Singular { n_params: 2, .. })));
    }

    #[test]
    fn layout_offsets() {
        let layout = ParamLayout {
            n_flux: 3,
            n_galaxy: 25,
            position: true,
        };
        assert_eq!(layout.galaxy_offset(), 3);
        assert_eq!(layout.position_offset(), Some(28));
        assert_eq!(layout.len(), 30);
    }
}
