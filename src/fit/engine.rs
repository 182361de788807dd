//! Simultaneous multi-epoch fit of one object.
//!
//! Unknowns:
//!
//! - one flux per exposure inside the object's validity window
//! - the galaxy template pixels (transients only)
//! - a common position offset `(dx, dy)` in reference pixels (when refined)
//!
//! Fluxes and galaxy enter linearly. The position is refined by Gauss–Newton:
//! a first pass without position unknowns provides starting fluxes, then each
//! pass linearizes the PSF around the current position until the step is
//! below `position_tolerance`.

use std::sync::Arc;

use log::{debug, info, warn};
use nalgebra::{DMatrix, Matrix2};
use rayon::prelude::*;

use crate::domain::{Point, SimPhotConfig};
use crate::error::FitError;
use crate::fit::{NormalAccumulator, NormalSolution, ParamLayout};
use crate::image::Exposure;
use crate::lc::{Fiducial, FitSummary, LightCurve, LightCurveList};
use crate::math::leading_block;
use crate::model::{ExposureMatch, ExposureTerms, Model};

/// One exposure that takes part in the fit.
#[derive(Debug, Clone)]
struct Participant {
    /// Index of the Fiducial in the light curve.
    index: usize,
    matched: ExposureMatch,
    flux_slot: Option<usize>,
}

/// Summary of a successful object fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitReport {
    pub n_fitted: usize,
    pub n_galaxy_only: usize,
    pub n_skipped: usize,
    pub chi2ndf: f64,
    pub iterations: usize,
    pub offset: Point,
}

/// Outcome of one object in a batch.
#[derive(Debug, Clone)]
pub struct ObjectOutcome {
    pub name: String,
    pub result: Result<FitReport, FitError>,
}

pub struct SimultaneousFit<'a> {
    reference: &'a Arc<Exposure>,
    config: &'a SimPhotConfig,
}

impl<'a> SimultaneousFit<'a> {
    pub fn new(reference: &'a Arc<Exposure>, config: &'a SimPhotConfig) -> Self {
        Self { reference, config }
    }

    /// Fit one light curve and store the result in it.
    ///
    /// On error the curve is left with every flux at 0 (unfit).
    pub fn fit(&self, lc: &mut LightCurve) -> Result<FitReport, FitError> {
        if lc.is_empty() {
            return Err(FitError::EmptyLightCurve);
        }
        let object = Arc::clone(lc.object());
        let plan = object.kind.fit_plan();
        let refine = plan.refine_position && self.config.refine_position;
        debug!(
            "{}: {}, galaxy {}, position {}",
            object.name,
            object.kind.display_name(),
            if plan.fit_galaxy { "fitted" } else { "fixed" },
            if refine { "refined" } else { "fixed" }
        );
        let mut model = Model::new(
            Arc::clone(self.reference),
            &object,
            plan.fit_galaxy,
            self.config,
        );

        lc.fit = None;
        lc.fiducials_mut().iter_mut().for_each(Fiducial::reset);

        let mut participants = Vec::new();
        let mut n_flux = 0;
        let mut n_skipped = 0;
        for (index, fiducial) in lc.fiducials().iter().enumerate() {
            let exposure = fiducial.exposure();
            let matched = match model.match_exposure(exposure, self.config.max_kernel_residual) {
                Ok(m) => m,
                Err(reason) => {
                    warn!("{}: skipping exposure {}: {reason}", object.name, exposure.name);
                    n_skipped += 1;
                    continue;
                }
            };
            let flux_slot = if object.in_window(exposure.mjd) {
                n_flux += 1;
                Some(n_flux - 1)
            } else if plan.fit_galaxy {
                None
            } else {
                debug!("{}: exposure {} outside validity window", object.name, exposure.name);
                continue;
            };
            participants.push(Participant {
                index,
                matched,
                flux_slot,
            });
        }
        if n_flux == 0 {
            return Err(FitError::NoValidExposures);
        }

        let base_layout = ParamLayout {
            n_flux,
            n_galaxy: model.n_galaxy(),
            position: false,
        };
        let (mut solution, mut terms) = run_pass(
            &model,
            lc.fiducials(),
            &participants,
            base_layout,
            &[],
        )?;
        let mut layout = base_layout;
        let mut position_covariance = None;
        let mut iterations = 0;

        if refine {
            let base = (solution.clone(), terms.clone());
            let mut converged = false;
            for _ in 0..self.config.max_iterations {
                iterations += 1;
                let pass_layout = ParamLayout {
                    position: true,
                    ..base_layout
                };
                let estimates: Vec<f64> = solution.params.iter().take(n_flux).copied().collect();
                let (pass, pass_terms) = match run_pass(
                    &model,
                    lc.fiducials(),
                    &participants,
                    pass_layout,
                    &estimates,
                ) {
                    Ok(p) => p,
                    Err(err) => {
                        warn!(
                            "{}: position refinement failed ({err}), keeping nominal position",
                            object.name
                        );
                        break;
                    }
                };
                let Some(offset) = pass_layout.position_offset() else {
                    break;
                };
                let step = Point::new(pass.params[offset], pass.params[offset + 1]);
                if !step.is_finite() {
                    warn!("{}: non-finite position step, keeping nominal position", object.name);
                    break;
                }
                model.shift(step);
                if model.offset().norm() > self.config.vignette_half_size as f64 {
                    warn!(
                        "{}: position drifted by {:.2} pixels, keeping nominal position",
                        object.name,
                        model.offset().norm()
                    );
                    break;
                }
                position_covariance = Some(Matrix2::new(
                    pass.covariance[(offset, offset)],
                    pass.covariance[(offset, offset + 1)],
                    pass.covariance[(offset + 1, offset)],
                    pass.covariance[(offset + 1, offset + 1)],
                ));
                solution = pass;
                terms = pass_terms;
                layout = pass_layout;
                debug!(
                    "{}: iteration {iterations}, step ({:.4}, {:.4}), chi2/ndf {:.3}",
                    object.name,
                    step.x,
                    step.y,
                    solution.chi2 / solution.ndf.max(1) as f64
                );
                if step.norm() < self.config.position_tolerance {
                    converged = true;
                    break;
                }
            }
            if !converged {
                if iterations == self.config.max_iterations && position_covariance.is_some() {
                    warn!("{}: position not converged after {iterations} iterations", object.name);
                } else {
                    model.reset_position();
                    (solution, terms) = base;
                    layout = base_layout;
                    position_covariance = None;
                }
            }
        }

        let galaxy_range = layout.galaxy_offset()..layout.galaxy_offset() + layout.n_galaxy;
        let galaxy_values: Vec<f64> = solution.params.as_slice()[galaxy_range].to_vec();
        model.set_galaxy(&galaxy_values);

        let report = store_solution(
            lc,
            &model,
            &participants,
            &terms,
            &solution,
            layout,
            position_covariance,
            iterations,
        );
        Ok(FitReport { n_skipped, ..report })
    }
}

fn run_pass(
    model: &Model,
    fiducials: &[Fiducial],
    participants: &[Participant],
    layout: ParamLayout,
    estimates: &[f64],
) -> Result<(NormalSolution, Vec<ExposureTerms>), FitError> {
    let mut acc = NormalAccumulator::new(layout);
    let mut terms = Vec::with_capacity(participants.len());
    for p in participants {
        let estimate = p.flux_slot.and_then(|s| estimates.get(s).copied()).unwrap_or(0.0);
        terms.push(model.solve(
            fiducials[p.index].exposure(),
            &p.matched,
            &mut acc,
            p.flux_slot,
            estimate,
        )?);
    }
    Ok((acc.solve()?, terms))
}

#[allow(clippy::too_many_arguments)]
fn store_solution(
    lc: &mut LightCurve,
    model: &Model,
    participants: &[Participant],
    terms: &[ExposureTerms],
    solution: &NormalSolution,
    layout: ParamLayout,
    position_covariance: Option<Matrix2<f64>>,
    iterations: usize,
) -> FitReport {
    let n = lc.len();
    let n_params = layout.len();
    let expanded = n + n_params - layout.n_flux;

    // Parameter index → row in the per-Fiducial layout.
    let mut map: Vec<usize> = (0..n_params).map(|k| k + n - layout.n_flux).collect();
    for p in participants {
        if let Some(slot) = p.flux_slot {
            map[slot] = p.index;
        }
    }
    let mut parameter_covariance = DMatrix::zeros(expanded, expanded);
    for a in 0..n_params {
        for b in 0..n_params {
            parameter_covariance[(map[a], map[b])] = solution.covariance[(a, b)];
        }
    }
    let flux_covariance = leading_block(&parameter_covariance, n);

    let mut n_fitted = 0;
    let mut n_galaxy_only = 0;
    for (p, t) in participants.iter().zip(terms) {
        let transfos = &p.matched.transfos;
        let pos = model.current_position(transfos);
        let fiducial = &mut lc.fiducials_mut()[p.index];
        fiducial.photom_ratio = transfos.photom_ratio;
        fiducial.has_saturated_pixels = t.n_saturated > 0;
        fiducial.n_saturated_pixels = t.n_saturated;
        fiducial.star.x = pos.x;
        fiducial.star.y = pos.y;
        fiducial.star.sky = fiducial.exposure().sky;
        fiducial.star.varsky = fiducial.exposure().sky_variance;
        if let Some(cov) = position_covariance {
            let jac = transfos.from_ref.linear();
            let var = jac * cov * jac.transpose();
            fiducial.star.vx = var[(0, 0)];
            fiducial.star.vy = var[(1, 1)];
        }
        match p.flux_slot {
            Some(slot) => {
                fiducial.star.flux = solution.params[slot];
                fiducial.star.eflux = solution.covariance[(slot, slot)].max(0.0).sqrt();
                fiducial.fitted = true;
                n_fitted += 1;
            }
            None => n_galaxy_only += 1,
        }
    }

    let summary = FitSummary {
        chi2: solution.chi2,
        ndf: solution.ndf,
        position: model.object_pos(),
        position_covariance,
        flux_covariance,
        parameter_covariance,
        galaxy: model.galaxy(),
        iterations,
        n_pixels: solution.n_pixels,
    };
    let chi2ndf = summary.chi2ndf();
    lc.fit = Some(summary);

    FitReport {
        n_fitted,
        n_galaxy_only,
        n_skipped: 0,
        chi2ndf,
        iterations,
        offset: model.offset(),
    }
}

/// Fit every light curve of `list` in parallel, one worker per object.
///
/// Per-object failures are logged and reported, never fatal.
pub fn fit_all(list: &mut LightCurveList, config: &SimPhotConfig) -> Vec<ObjectOutcome> {
    let reference = Arc::clone(&list.ref_image);
    let engine = SimultaneousFit::new(&reference, config);
    list.curves
        .par_iter_mut()
        .map(|lc| {
            let name = lc.object().name.clone();
            let result = engine.fit(lc);
            match &result {
                Ok(report) => info!(
                    "{name}: {} fluxes, chi2/ndf {:.3}, offset ({:.3}, {:.3})",
                    report.n_fitted, report.chi2ndf, report.offset.x, report.offset.y
                ),
                Err(err) => warn!("{name}: fit failed: {err}"),
            }
            ObjectOutcome { name, result }
        })
        .collect()
}
