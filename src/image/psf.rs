//! Analytic PSF models and their rasterization.
//!
//! Both profiles are normalized to unit integral, so a rasterized stamp times a
//! flux is the expected point-source signal (up to sampling at pixel centers).

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::domain::Point;
use crate::image::PixelBlock;

/// Gaussian FWHM / sigma.
const GAUSSIAN_FWHM_FACTOR: f64 = 2.354_820_045_030_949_3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "profile", rename_all = "snake_case")]
pub enum PsfModel {
    Gaussian { sigma_x: f64, sigma_y: f64 },
    Moffat { alpha: f64, beta: f64 },
}

impl PsfModel {
    pub fn gaussian(sigma: f64) -> Self {
        PsfModel::Gaussian {
            sigma_x: sigma,
            sigma_y: sigma,
        }
    }

    pub fn is_valid(&self) -> bool {
        match *self {
            PsfModel::Gaussian { sigma_x, sigma_y } => {
                sigma_x.is_finite() && sigma_y.is_finite() && sigma_x > 0.0 && sigma_y > 0.0
            }
            PsfModel::Moffat { alpha, beta } => alpha.is_finite() && alpha > 0.0 && beta > 1.0,
        }
    }

    /// Profile value at offset `(dx, dy)` from the center.
    pub fn value(&self, dx: f64, dy: f64) -> f64 {
        match *self {
            PsfModel::Gaussian { sigma_x, sigma_y } => {
                let u = dx / sigma_x;
                let v = dy / sigma_y;
                (-0.5 * (u * u + v * v)).exp() / (2.0 * PI * sigma_x * sigma_y)
            }
            PsfModel::Moffat { alpha, beta } => {
                let a2 = alpha * alpha;
                let base = 1.0 + (dx * dx + dy * dy) / a2;
                (beta - 1.0) / (PI * a2) * base.powf(-beta)
            }
        }
    }

    /// Value and gradient with respect to the offset.
    pub fn value_and_gradient(&self, dx: f64, dy: f64) -> (f64, f64, f64) {
        let value = self.value(dx, dy);
        match *self {
            PsfModel::Gaussian { sigma_x, sigma_y } => (
                value,
                -value * dx / (sigma_x * sigma_x),
                -value * dy / (sigma_y * sigma_y),
            ),
            PsfModel::Moffat { alpha, beta } => {
                let a2 = alpha * alpha;
                let base = 1.0 + (dx * dx + dy * dy) / a2;
                let factor = -2.0 * beta * value / (a2 * base);
                (value, factor * dx, factor * dy)
            }
        }
    }

    pub fn fwhm(&self) -> f64 {
        match *self {
            PsfModel::Gaussian { sigma_x, sigma_y } => {
                GAUSSIAN_FWHM_FACTOR * (sigma_x * sigma_y).sqrt()
            }
            PsfModel::Moffat { alpha, beta } => 2.0 * alpha * (2f64.powf(1.0 / beta) - 1.0).sqrt(),
        }
    }
}

/// Rasterize `psf` centered on `pos` into `block` (pixel centers).
///
/// With `derivatives`, also fills `∂P/∂x₀` and `∂P/∂y₀`: derivatives with
/// respect to the center, i.e. minus the profile gradient.
pub fn compute_psf_pixels(
    psf: &PsfModel,
    pos: Point,
    block: &mut PixelBlock,
    derivatives: Option<(&mut PixelBlock, &mut PixelBlock)>,
) {
    match derivatives {
        None => {
            let (xmin, ymin, nx) = (block.xmin(), block.ymin(), block.nx());
            for (k, v) in block.data_mut().iter_mut().enumerate() {
                let i = xmin + (k % nx) as i64;
                let j = ymin + (k / nx) as i64;
                *v = psf.value(i as f64 - pos.x, j as f64 - pos.y);
            }
        }
        Some((dpx, dpy)) => {
            let (xmin, ymin, nx) = (block.xmin(), block.ymin(), block.nx());
            let data = block.data_mut();
            for k in 0..data.len() {
                let i = xmin + (k % nx) as i64;
                let j = ymin + (k / nx) as i64;
                let (v, gx, gy) = psf.value_and_gradient(i as f64 - pos.x, j as f64 - pos.y);
                data[k] = v;
                dpx[(i, j)] = -gx;
                dpy[(i, j)] = -gy;
            }
        }
    }
}
