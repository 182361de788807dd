//! One measurement of one object in one exposure.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::image::Exposure;

/// Photometric measurement of a point source.
///
/// Position and variances are in the pixels of the exposure the measurement
/// belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PhotStar {
    pub x: f64,
    pub y: f64,
    pub flux: f64,
    pub eflux: f64,
    pub sky: f64,
    pub varsky: f64,
    pub vx: f64,
    pub vy: f64,
}

#[derive(Debug, Clone)]
pub struct Fiducial {
    exposure: Arc<Exposure>,
    pub star: PhotStar,
    /// Flux ratio current / reference, `10^(0.4 (zp_cur − zp_ref))`.
    pub photom_ratio: f64,
    pub has_saturated_pixels: bool,
    pub n_saturated_pixels: usize,
    /// A flux unknown was solved for this exposure.
    pub fitted: bool,
}

impl Fiducial {
    pub fn new(exposure: Arc<Exposure>, star: PhotStar) -> Self {
        Self {
            exposure,
            star,
            photom_ratio: 1.0,
            has_saturated_pixels: false,
            n_saturated_pixels: 0,
            fitted: false,
        }
    }

    pub fn exposure(&self) -> &Arc<Exposure> {
        &self.exposure
    }

    pub fn name(&self) -> &str {
        &self.exposure.name
    }

    pub fn mjd(&self) -> f64 {
        self.exposure.mjd
    }

    pub fn seeing(&self) -> f64 {
        self.exposure.seeing
    }

    pub fn exposure_time(&self) -> f64 {
        self.exposure.exposure_time
    }

    /// Forget a previous fit: flux exactly 0, not fitted.
    pub fn reset(&mut self) {
        self.star.flux = 0.0;
        self.star.eflux = 0.0;
        self.star.vx = 0.0;
        self.star.vy = 0.0;
        self.fitted = false;
    }
}
