//! Affine geometric transforms between pixel frames.
//!
//! ```text
//! x' = c0 + c1·x + c2·y
//! y' = c3 + c4·x + c5·y
//! ```
//!
//! Each exposure carries one transform from its pixels to a common
//! astrometric frame; pairwise transforms are obtained by composition.

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

use crate::domain::{Frame, Point};

/// Threshold for considering the linear part singular.
const DETERMINANT_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub coeffs: [f64; 6],
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineTransform {
    pub fn new(coeffs: [f64; 6]) -> Self {
        Self { coeffs }
    }

    pub fn identity() -> Self {
        Self::new([0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
    }

    pub fn translation(dx: f64, dy: f64) -> Self {
        Self::new([dx, 1.0, 0.0, dy, 0.0, 1.0])
    }

    fn from_parts(linear: Matrix2<f64>, offset: Vector2<f64>) -> Self {
        Self::new([
            offset[0],
            linear[(0, 0)],
            linear[(0, 1)],
            offset[1],
            linear[(1, 0)],
            linear[(1, 1)],
        ])
    }

    pub fn apply(&self, p: Point) -> Point {
        let c = &self.coeffs;
        Point::new(c[0] + c[1] * p.x + c[2] * p.y, c[3] + c[4] * p.x + c[5] * p.y)
    }

    /// Jacobian of the transform.
    pub fn linear(&self) -> Matrix2<f64> {
        let c = &self.coeffs;
        Matrix2::new(c[1], c[2], c[4], c[5])
    }

    fn offset(&self) -> Vector2<f64> {
        Vector2::new(self.coeffs[0], self.coeffs[3])
    }

    /// Area of a transformed unit pixel.
    pub fn area_ratio(&self) -> f64 {
        self.linear().determinant().abs()
    }

    /// `None` when the linear part is singular.
    pub fn inverse(&self) -> Option<AffineTransform> {
        let linear = self.linear();
        if linear.determinant().abs() < DETERMINANT_EPSILON {
            return None;
        }
        let inv = linear.try_inverse()?;
        Some(Self::from_parts(inv, -(inv * self.offset())))
    }

    /// `self ∘ first`: apply `first`, then `self`.
    pub fn compose(&self, first: &AffineTransform) -> AffineTransform {
        let linear = self.linear() * first.linear();
        let offset = self.linear() * first.offset() + self.offset();
        Self::from_parts(linear, offset)
    }

    /// Bounding box of the transformed frame corners.
    pub fn map_frame(&self, frame: &Frame) -> Frame {
        let corners = frame.corners().map(|c| self.apply(c));
        // Four corners always present.
        Frame::bounding(&corners).unwrap_or(*frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn inverse_undoes_transform() {
        let t = AffineTransform::new([3.0, 1.1, 0.2, -4.0, -0.1, 0.9]);
        let inv = t.inverse().unwrap();
        let p = Point::new(12.5, -7.25);
        let back = inv.apply(t.apply(p));
        assert_abs_diff_eq!(back.x, p.x, epsilon = 1e-10);
        assert_abs_diff_eq!(back.y, p.y, epsilon = 1e-10);
    }

    #[test]
    fn compose_applies_first_then_self() {
        let a = AffineTransform::translation(5.0, 0.0);
        let b = AffineTransform::new([0.0, 2.0, 0.0, 0.0, 0.0, 2.0]);
        let p = Point::new(1.0, 1.0);
        let ab = b.compose(&a).apply(p);
        assert_abs_diff_eq!(ab.x, 12.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ab.y, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(b.area_ratio(), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn singular_transform_has_no_inverse() {
        let t = AffineTransform::new([0.0, 1.0, 2.0, 0.0, 2.0, 4.0]);
        assert!(t.inverse().is_none());
    }
}
