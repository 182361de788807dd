//! Galaxy + point-source model of one object, seen through each exposure.
//!
//! In the pixels `p` of a current exposure the model reads
//!
//! ```text
//! M(p) = r·f·P(p − x_c) + r·|J|·Σ_k K(k)·G(round(T(p − k)) − ref_pix)
//! ```
//!
//! with `r` the photometric ratio to the reference, `f` the flux in reference
//! units, `P` the current PSF at the object position `x_c`, `T` the
//! current → reference transform (Jacobian determinant `|J|`), `K` the kernel
//! matching the reference PSF to the current one and `G` the galaxy template,
//! stored around the integer reference pixel `ref_pix`.

use std::fmt;
use std::sync::Arc;

use crate::domain::{IntPoint, Point, RefObject, SimPhotConfig};
use crate::error::FitError;
use crate::fit::NormalAccumulator;
use crate::image::{AffineTransform, Exposure, PixelBlock, PsfModel, compute_psf_pixels};
use crate::model::fit_kernel;

/// Geometric and photometric relation between the reference and one exposure.
#[derive(Debug, Clone, Copy)]
pub struct Transfos {
    /// Current pixels → reference pixels.
    pub to_ref: AffineTransform,
    pub from_ref: AffineTransform,
    /// Object position in the current exposure when matched.
    pub object_pos: Point,
    pub photom_ratio: f64,
}

/// Everything precomputed for one exposure before the fit passes.
#[derive(Debug, Clone)]
pub struct ExposureMatch {
    pub transfos: Transfos,
    /// Present when the galaxy is fitted.
    pub kernel: Option<PixelBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchFailure {
    NoOverlap,
    Kernel,
}

impl fmt::Display for MatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchFailure::NoOverlap => write!(
                f,
                "object outside the exposure or no overlap with the reference"
            ),
            MatchFailure::Kernel => write!(f, "no acceptable PSF-matching kernel"),
        }
    }
}

/// Pixel bookkeeping of one exposure's contribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExposureTerms {
    pub n_pixels: usize,
    pub n_skipped: usize,
    pub n_saturated: usize,
}

#[derive(Debug, Clone)]
pub struct Model {
    ref_image: Arc<Exposure>,
    /// Nominal position in the reference image.
    nominal_pos: Point,
    /// Current estimate, nominal plus refined offset.
    object_pos: Point,
    ref_pix: IntPoint,
    ref_psf: PsfModel,
    galaxy_pixels: PixelBlock,
    has_galaxy: bool,
    vignette_half_size: i64,
    kernel_half_size: i64,
}

impl Model {
    pub fn new(
        ref_image: Arc<Exposure>,
        object: &RefObject,
        fit_galaxy: bool,
        config: &SimPhotConfig,
    ) -> Self {
        let galaxy_pixels = if fit_galaxy {
            PixelBlock::centered(IntPoint::new(0, 0), config.galaxy_half_size)
        } else {
            PixelBlock::new(0, 0, 0, 0)
        };
        Self {
            ref_psf: ref_image.psf,
            ref_image,
            nominal_pos: object.position,
            object_pos: object.position,
            ref_pix: object.position.round(),
            galaxy_pixels,
            has_galaxy: fit_galaxy,
            vignette_half_size: config.vignette_half_size,
            kernel_half_size: config.kernel_half_size,
        }
    }

    pub fn ref_image(&self) -> &Arc<Exposure> {
        &self.ref_image
    }

    pub fn has_galaxy(&self) -> bool {
        self.has_galaxy
    }

    pub fn n_galaxy(&self) -> usize {
        if self.has_galaxy { self.galaxy_pixels.len() } else { 0 }
    }

    pub fn ref_pix(&self) -> IntPoint {
        self.ref_pix
    }

    /// Object position in the reference image.
    pub fn object_pos(&self) -> Point {
        self.object_pos
    }

    /// Offset of the current estimate from the nominal position.
    pub fn offset(&self) -> Point {
        self.object_pos - self.nominal_pos
    }

    pub fn shift(&mut self, delta: Point) {
        self.object_pos = self.object_pos + delta;
    }

    pub fn reset_position(&mut self) {
        self.object_pos = self.nominal_pos;
    }

    /// Galaxy template in reference pixels, absolute coordinates.
    pub fn galaxy(&self) -> Option<PixelBlock> {
        if !self.has_galaxy {
            return None;
        }
        let g = &self.galaxy_pixels;
        PixelBlock::from_data(
            g.xmin() + self.ref_pix.x,
            g.ymin() + self.ref_pix.y,
            g.nx(),
            g.ny(),
            g.data().to_vec(),
        )
        .ok()
    }

    pub fn set_galaxy(&mut self, values: &[f64]) {
        if self.has_galaxy && values.len() == self.galaxy_pixels.len() {
            self.galaxy_pixels.data_mut().copy_from_slice(values);
        }
    }

    /// Transforms between `current` and the reference, or `None` when the
    /// object falls outside `current` or the frames do not overlap.
    pub fn find_transfos(&self, current: &Exposure) -> Option<Transfos> {
        let ref_inverse = self.ref_image.to_common.inverse()?;
        let to_ref = ref_inverse.compose(&current.to_common);
        let from_ref = to_ref.inverse()?;

        let object_pos = from_ref.apply(self.object_pos);
        if !current.frame().contains(object_pos) {
            return None;
        }
        if !self.ref_image.frame().intersects(&to_ref.map_frame(&current.frame())) {
            return None;
        }
        let photom_ratio = 10f64.powf(0.4 * (current.zero_point - self.ref_image.zero_point));
        Some(Transfos {
            to_ref,
            from_ref,
            object_pos,
            photom_ratio,
        })
    }

    pub fn current_position(&self, transfos: &Transfos) -> Point {
        transfos.from_ref.apply(self.object_pos)
    }

    /// Reference PSF at the current object position, reference coordinates.
    pub fn ref_psf_pixels(&self, block: &mut PixelBlock) {
        compute_psf_pixels(&self.ref_psf, self.object_pos, block, None);
    }

    /// Kernel matching the reference PSF (resampled into `current`) to the
    /// current PSF over the vignette, or `None` if the match is poor.
    pub fn find_kernel(
        &self,
        current: &Exposure,
        transfos: &Transfos,
        max_residual: f64,
    ) -> Option<PixelBlock> {
        let pos = transfos.object_pos;
        let center = pos.round();
        let half = self.kernel_half_size;

        let mut target = PixelBlock::centered(center, self.vignette_half_size);
        compute_psf_pixels(&current.psf, pos, &mut target, None);

        let mut source = PixelBlock::centered(center, self.vignette_half_size + half);
        let area = transfos.to_ref.area_ratio();
        let (xmin, ymin, nx) = (source.xmin(), source.ymin(), source.nx());
        for (k, v) in source.data_mut().iter_mut().enumerate() {
            let q = Point::new((xmin + (k % nx) as i64) as f64, (ymin + (k / nx) as i64) as f64);
            let d = transfos.to_ref.apply(q) - self.object_pos;
            *v = area * self.ref_psf.value(d.x, d.y);
        }

        let fit = fit_kernel(&source, &target, half)?;
        if fit.residual > max_residual {
            log::debug!(
                "{}: kernel residual {:.3e} above {:.1e}",
                current.name,
                fit.residual,
                max_residual
            );
            return None;
        }
        Some(fit.kernel)
    }

    pub fn match_exposure(
        &self,
        current: &Exposure,
        max_residual: f64,
    ) -> Result<ExposureMatch, MatchFailure> {
        let transfos = self.find_transfos(current).ok_or(MatchFailure::NoOverlap)?;
        let kernel = if self.has_galaxy {
            Some(
                self.find_kernel(current, &transfos, max_residual)
                    .ok_or(MatchFailure::Kernel)?,
            )
        } else {
            None
        };
        Ok(ExposureMatch { transfos, kernel })
    }

    /// Add the pixels of `current` around the object to `acc`.
    ///
    /// `flux_slot` is the parameter index of this exposure's flux (none when
    /// the exposure is outside the object's validity window). Position
    /// columns are added when the accumulator layout has them, linearized
    /// around `flux_estimate`.
    pub fn solve(
        &self,
        current: &Exposure,
        matched: &ExposureMatch,
        acc: &mut NormalAccumulator,
        flux_slot: Option<usize>,
        flux_estimate: f64,
    ) -> Result<ExposureTerms, FitError> {
        let layout = acc.layout();
        let transfos = &matched.transfos;
        let ratio = transfos.photom_ratio;
        let area = transfos.to_ref.area_ratio();
        let pos = self.current_position(transfos);
        if !pos.is_finite() {
            return Err(FitError::ExposureModel {
                exposure: current.name.clone(),
                reason: "object position is not finite".to_string(),
            });
        }

        let vignette = PixelBlock::centered(pos.round(), self.vignette_half_size);
        let position_offset = layout.position_offset().filter(|_| flux_slot.is_some());

        let mut psf = PixelBlock::like(&vignette);
        let mut dpx = PixelBlock::like(&vignette);
        let mut dpy = PixelBlock::like(&vignette);
        if flux_slot.is_some() {
            if position_offset.is_some() {
                compute_psf_pixels(&current.psf, pos, &mut psf, Some((&mut dpx, &mut dpy)));
            } else {
                compute_psf_pixels(&current.psf, pos, &mut psf, None);
            }
        }

        let kernel = match (&matched.kernel, self.has_galaxy) {
            (Some(k), true) => Some(k),
            (None, true) => {
                return Err(FitError::ExposureModel {
                    exposure: current.name.clone(),
                    reason: "galaxy fit without a matching kernel".to_string(),
                });
            }
            _ => None,
        };
        let jac = transfos.from_ref.linear();
        let galaxy_offset = layout.galaxy_offset();

        let mut terms = ExposureTerms::default();
        let mut row: Vec<(usize, f64)> = Vec::new();
        let mut scratch = vec![0.0; self.n_galaxy()];
        let mut touched: Vec<usize> = Vec::new();

        for (i, j, _) in vignette.iter() {
            let Some(data) = current.pixels.get(i, j) else {
                terms.n_skipped += 1;
                continue;
            };
            let weight = current.weights.get(i, j).unwrap_or(0.0);
            if !(weight > 0.0) || !data.is_finite() {
                terms.n_skipped += 1;
                continue;
            }
            if current.is_saturated(data) {
                terms.n_saturated += 1;
                terms.n_skipped += 1;
                continue;
            }

            row.clear();
            if let Some(slot) = flux_slot {
                row.push((slot, ratio * psf[(i, j)]));
            }

            if let Some(kernel) = kernel {
                for (ki, kj, kv) in kernel.iter() {
                    if kv == 0.0 {
                        continue;
                    }
                    let q = transfos
                        .to_ref
                        .apply(Point::new((i - ki) as f64, (j - kj) as f64))
                        .round();
                    if let Some(g) = self
                        .galaxy_pixels
                        .index_of(q.x - self.ref_pix.x, q.y - self.ref_pix.y)
                    {
                        if scratch[g] == 0.0 {
                            touched.push(g);
                        }
                        scratch[g] += ratio * area * kv;
                    }
                }
                for &g in &touched {
                    if scratch[g] != 0.0 {
                        row.push((galaxy_offset + g, scratch[g]));
                    }
                    scratch[g] = 0.0;
                }
                touched.clear();
            }

            if let Some(offset) = position_offset {
                // Chain rule through current = from_ref(reference).
                let (gx, gy) = (dpx[(i, j)], dpy[(i, j)]);
                let cx = gx * jac[(0, 0)] + gy * jac[(1, 0)];
                let cy = gx * jac[(0, 1)] + gy * jac[(1, 1)];
                let scale = ratio * flux_estimate;
                row.push((offset, scale * cx));
                row.push((offset + 1, scale * cy));
            }

            if row.is_empty() {
                terms.n_skipped += 1;
                continue;
            }
            acc.add_row(&row, data - current.sky, weight);
            terms.n_pixels += 1;
        }
        Ok(terms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ObjectKind;
    use crate::fit::ParamLayout;
    use crate::testutil::{ZERO_POINT, blank_exposure};
    use approx::assert_relative_eq;

    fn transient_at(x: f64, y: f64) -> RefObject {
        RefObject::new("sn", Point::new(x, y), ObjectKind::Transient)
    }

    #[test]
    fn transfos_compose_through_the_common_frame() {
        let reference = Arc::new(blank_exposure("ref", 55000.0));
        let mut current = blank_exposure("cur", 55001.0);
        current.to_common = AffineTransform::translation(3.0, -2.0);
        current.zero_point = ZERO_POINT + 0.5;

        let model = Model::new(
            reference,
            &transient_at(30.0, 30.0),
            true,
            &SimPhotConfig::default(),
        );
        let t = model.find_transfos(&current).unwrap();
        assert_relative_eq!(t.object_pos.x, 27.0, epsilon = 1e-12);
        assert_relative_eq!(t.object_pos.y, 32.0, epsilon = 1e-12);
        assert_relative_eq!(t.photom_ratio, 10f64.powf(0.2), epsilon = 1e-12);
    }

    #[test]
    fn reference_psf_is_centered_on_the_object() {
        let reference = Arc::new(blank_exposure("ref", 55000.0));
        let model = Model::new(
            reference,
            &transient_at(30.0, 30.0),
            false,
            &SimPhotConfig::default(),
        );
        let mut block = PixelBlock::centered(IntPoint::new(30, 30), 12);
        model.ref_psf_pixels(&mut block);
        assert_relative_eq!(block.sum(), 1.0, epsilon = 1e-3);
        assert!(block[(30, 30)] > block[(31, 30)]);
        assert_relative_eq!(block[(29, 30)], block[(31, 30)], epsilon = 1e-12);
    }

    #[test]
    fn non_overlapping_exposure_has_no_transfos_and_no_contribution() {
        let reference = Arc::new(blank_exposure("ref", 55000.0));
        let mut far = blank_exposure("far", 55001.0);
        far.to_common = AffineTransform::translation(500.0, 500.0);

        let model = Model::new(
            reference,
            &transient_at(30.0, 30.0),
            false,
            &SimPhotConfig::default(),
        );
        assert!(model.find_transfos(&far).is_none());
        assert_eq!(model.match_exposure(&far, 1e-2).unwrap_err(), MatchFailure::NoOverlap);
    }

    #[test]
    fn solve_skips_saturated_and_dead_pixels() {
        let reference = Arc::new(blank_exposure("ref", 55000.0));
        let mut current = blank_exposure("cur", 55001.0);
        current.saturation = 1000.0;
        current.pixels[(30, 30)] = 5000.0;
        current.weights[(31, 30)] = 0.0;

        let config = SimPhotConfig::default();
        let model = Model::new(Arc::clone(&reference), &transient_at(30.0, 30.0), false, &config);
        let matched = model.match_exposure(&current, config.max_kernel_residual).unwrap();
        let mut acc = NormalAccumulator::new(ParamLayout {
            n_flux: 1,
            n_galaxy: 0,
            position: false,
        });
        let terms = model.solve(&current, &matched, &mut acc, Some(0), 0.0).unwrap();
        let side = (2 * config.vignette_half_size + 1) as usize;
        assert_eq!(terms.n_saturated, 1);
        assert_eq!(terms.n_skipped, 2);
        assert_eq!(terms.n_pixels, side * side - 2);
        assert_eq!(acc.n_pixels(), terms.n_pixels);
    }

    #[test]
    fn galaxy_template_is_reported_in_reference_pixels() {
        let reference = Arc::new(blank_exposure("ref", 55000.0));
        let config = SimPhotConfig::default();
        let mut model = Model::new(reference, &transient_at(30.4, 29.6), true, &config);
        let n = model.n_galaxy();
        model.set_galaxy(&vec![1.0; n]);
        let galaxy = model.galaxy().unwrap();
        assert_eq!(galaxy.xmin(), 30 - config.galaxy_half_size);
        assert_eq!(galaxy.ymin(), 30 - config.galaxy_half_size);
        assert_relative_eq!(galaxy.sum(), n as f64);
    }
}
