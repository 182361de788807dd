//! Synthetic exposures for unit tests.

use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::domain::{IntPoint, Point};
use crate::image::{AffineTransform, Exposure, PixelBlock, PsfModel, compute_psf_pixels};

pub const SIZE: usize = 64;
pub const SKY: f64 = 100.0;
pub const NOISE_SIGMA: f64 = 5.0;
pub const ZERO_POINT: f64 = 30.0;

/// Flat sky, Gaussian PSF (σ = 1.5), identity transform.
pub fn blank_exposure(name: &str, mjd: f64) -> Exposure {
    let mut pixels = PixelBlock::new(0, 0, SIZE, SIZE);
    pixels.fill(SKY);
    let mut weights = PixelBlock::new(0, 0, SIZE, SIZE);
    weights.fill(1.0 / (NOISE_SIGMA * NOISE_SIGMA));
    Exposure {
        name: name.to_string(),
        instrument: "TESTCAM".to_string(),
        band: "r".to_string(),
        mjd,
        seeing: 1.5,
        exposure_time: 300.0,
        zero_point: ZERO_POINT,
        sky: SKY,
        sky_variance: NOISE_SIGMA * NOISE_SIGMA,
        saturation: 1.0e9,
        psf: PsfModel::gaussian(1.5),
        to_common: AffineTransform::identity(),
        pixels,
        weights,
    }
}

/// Blank exposure with a given PSF and pixel → common transform.
pub fn exposure_with(name: &str, mjd: f64, psf: PsfModel, to_common: AffineTransform) -> Exposure {
    let mut exposure = blank_exposure(name, mjd);
    exposure.psf = psf;
    exposure.to_common = to_common;
    exposure
}

/// Add a point source of `flux` (ADU) at `pos` (exposure pixels).
pub fn add_star(exposure: &mut Exposure, pos: Point, flux: f64) {
    let mut stamp = PixelBlock::like(&exposure.pixels);
    compute_psf_pixels(&exposure.psf, pos, &mut stamp, None);
    for (v, s) in exposure.pixels.data_mut().iter_mut().zip(stamp.data()) {
        *v += flux * s;
    }
}

/// Add a star given in common-frame coordinates.
pub fn add_common_star(exposure: &mut Exposure, common: Point, flux: f64) {
    let Some(inverse) = exposure.to_common.inverse() else {
        return;
    };
    let pos = inverse.apply(common);
    add_star(exposure, pos, flux);
}

/// Paint a reference-frame pixel template (nearest-neighbor resampling).
///
/// `to_ref` maps exposure pixels to reference pixels; the template is
/// indexed by offsets from `ref_pix`.
pub fn add_template(
    exposure: &mut Exposure,
    to_ref: &AffineTransform,
    ref_pix: IntPoint,
    template: &PixelBlock,
) {
    let area = to_ref.area_ratio();
    let (xmin, ymin, nx) = (exposure.pixels.xmin(), exposure.pixels.ymin(), exposure.pixels.nx());
    for (k, v) in exposure.pixels.data_mut().iter_mut().enumerate() {
        let p = Point::new((xmin + (k % nx) as i64) as f64, (ymin + (k / nx) as i64) as f64);
        let q = to_ref.apply(p).round();
        *v += area * template.value_or_zero(q.x - ref_pix.x, q.y - ref_pix.y);
    }
}

pub fn add_noise(exposure: &mut Exposure, rng: &mut StdRng) {
    let normal = Normal::new(0.0, NOISE_SIGMA).unwrap();
    for v in exposure.pixels.data_mut() {
        *v += normal.sample(rng);
    }
}

/// Compact galaxy-like blob centered on offset (0, 0).
pub fn blob_template(half: i64, center: Point, amplitude: f64, sigma: f64) -> PixelBlock {
    let mut block = PixelBlock::centered(IntPoint::new(0, 0), half);
    let (xmin, ymin, nx) = (block.xmin(), block.ymin(), block.nx());
    for (k, v) in block.data_mut().iter_mut().enumerate() {
        let dx = (xmin + (k % nx) as i64) as f64 - center.x;
        let dy = (ymin + (k / nx) as i64) as f64 - center.y;
        *v = amplitude * (-0.5 * (dx * dx + dy * dy) / (sigma * sigma)).exp();
    }
    block
}
