//! Robust per-night aggregation of exposure fluxes.
//!
//! Given per-exposure fluxes `F`, their covariance `C` and a design matrix
//! `A` (exposures × nights, 1 when the exposure belongs to the night), solve
//! the generalized least squares problem
//!
//! ```text
//! W  = C⁻¹
//! nf = (AᵀWA)⁻¹ AᵀW F
//! χ² = (F − A nf)ᵀ W (F − A nf)
//! ```
//!
//! and iteratively discard the most discrepant exposure until the fit is
//! acceptable, no significant outlier remains or the outlier cap is reached.

use log::{debug, info};
use nalgebra::{DMatrix, DVector};

use crate::error::{AppError, EXIT_FIT, NightFitError};
use crate::math::{cholesky_invert, without_entry, without_index, without_row};

/// Entries with `|F|` below this are unfit exposures.
pub const UNFIT_FLUX: f64 = 1e-30;

/// Outlier-rejection thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NightFitOptions {
    /// Stop once χ²/ndf is below this.
    pub chi2ndf_threshold: f64,
    /// Never remove more exposures than this.
    pub max_outliers: usize,
    /// Only remove exposures whose `√χ²ᵢ` reaches this.
    pub outlier_nsigma: f64,
}

impl Default for NightFitOptions {
    fn default() -> Self {
        Self {
            chi2ndf_threshold: 1.5,
            max_outliers: 6,
            outlier_nsigma: 3.0,
        }
    }
}

/// Aggregation input: fluxes, covariance and design, kept consistent.
#[derive(Debug, Clone, PartialEq)]
pub struct NightInput {
    pub fluxes: DVector<f64>,
    pub covariance: DMatrix<f64>,
    /// Exposures × nights.
    pub design: DMatrix<f64>,
    /// Position of every remaining row in the original input.
    pub indices: Vec<usize>,
}

impl NightInput {
    pub fn new(
        fluxes: DVector<f64>,
        covariance: DMatrix<f64>,
        design: DMatrix<f64>,
    ) -> Result<Self, NightFitError> {
        let n = fluxes.len();
        if covariance.shape() != (n, n) {
            return Err(NightFitError::Dimension(format!(
                "{n} fluxes but a {}x{} covariance matrix",
                covariance.nrows(),
                covariance.ncols()
            )));
        }
        if design.nrows() != n {
            return Err(NightFitError::Dimension(format!(
                "{n} fluxes but a night matrix with {} exposure rows",
                design.nrows()
            )));
        }
        Ok(Self {
            fluxes,
            covariance,
            design,
            indices: (0..n).collect(),
        })
    }

    /// One column of ones: a single constant flux for every exposure.
    pub fn single_flux_design(n: usize) -> DMatrix<f64> {
        DMatrix::from_element(n, 1, 1.0)
    }

    pub fn len(&self) -> usize {
        self.fluxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fluxes.is_empty()
    }

    pub fn n_nights(&self) -> usize {
        self.design.ncols()
    }

    /// Drop row/column `i` from fluxes, covariance and design together.
    pub fn remove(&mut self, i: usize) {
        self.fluxes = without_entry(&self.fluxes, i);
        self.covariance = without_index(&self.covariance, i);
        self.design = without_row(&self.design, i);
        self.indices.remove(i);
    }

    /// Copy without the unfit exposures (`|F| < 1e-30`).
    pub fn without_unfit(&self) -> NightInput {
        let mut cleaned = self.clone();
        let mut i = 0;
        while i < cleaned.len() {
            if cleaned.fluxes[i].abs() < UNFIT_FLUX {
                debug!("removing unfit exposure {}", cleaned.indices[i]);
                cleaned.remove(i);
            } else {
                i += 1;
            }
        }
        cleaned
    }

    /// Whether exposure `i` can go without emptying one of its nights.
    fn removable(&self, i: usize) -> bool {
        (0..self.design.ncols()).all(|n| {
            let members = self.design.column(n).iter().filter(|v| **v > 0.5).count();
            self.design[(i, n)] <= 0.5 || members > 1
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    NoDegreesOfFreedom,
    GoodFit,
    OutlierCap,
    NoSignificantOutlier,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemovedExposure {
    /// Position in the cleaned input (before any removal).
    pub index: usize,
    pub flux: f64,
    pub nsigma: f64,
}

#[derive(Debug, Clone)]
pub struct NightFit {
    pub night_fluxes: DVector<f64>,
    /// `(AᵀWA)⁻¹`, inflated by χ²/ndf when above 1.
    pub night_covariance: DMatrix<f64>,
    /// `AᵀWA`, deflated by χ²/ndf when above 1.
    pub night_weight: DMatrix<f64>,
    pub exposure_covariance: DMatrix<f64>,
    pub exposure_weight: DMatrix<f64>,
    pub chi2: f64,
    pub ndf: usize,
    pub chi2ndf: f64,
    pub outliers: Vec<RemovedExposure>,
    pub stop: StopReason,
    /// Exposures left after outlier removal (indices into the cleaned input).
    pub kept: Vec<usize>,
}

impl NightFit {
    pub fn night_error(&self, night: usize) -> f64 {
        self.night_covariance[(night, night)].max(0.0).sqrt()
    }
}

struct Iteration {
    weight: DMatrix<f64>,
    normal: DMatrix<f64>,
    night_cov: DMatrix<f64>,
    night_fluxes: DVector<f64>,
    residual: DVector<f64>,
    chi2: f64,
}

fn iterate(input: &NightInput) -> Result<Iteration, NightFitError> {
    let weight = cholesky_invert(&input.covariance).ok_or(NightFitError::SingularCovariance)?;
    let at_w = input.design.transpose() * &weight;
    let normal = &at_w * &input.design;
    let night_cov = cholesky_invert(&normal).ok_or(NightFitError::SingularNightMatrix)?;
    let night_fluxes = &night_cov * (&at_w * &input.fluxes);
    let residual = &input.fluxes - &input.design * &night_fluxes;
    let chi2 = residual.dot(&(&weight * &residual));
    Ok(Iteration {
        weight,
        normal,
        night_cov,
        night_fluxes,
        residual,
        chi2,
    })
}

/// Robust GLS collapse of `input` (already cleaned of unfit exposures).
pub fn fit_nights(
    input: &NightInput,
    options: &NightFitOptions,
) -> Result<NightFit, NightFitError> {
    if input.is_empty() || input.n_nights() == 0 {
        return Err(NightFitError::Empty);
    }
    if input.len() < input.n_nights() {
        return Err(NightFitError::Dimension(format!(
            "{} exposures for {} nights",
            input.len(),
            input.n_nights()
        )));
    }

    let mut work = input.clone();
    let mut outliers = Vec::new();
    let (it, stop) = loop {
        let it = iterate(&work)?;
        let ndf = work.len() - work.n_nights();
        if ndf == 0 {
            info!("degrees of freedom is zero");
            break (it, StopReason::NoDegreesOfFreedom);
        }
        if it.chi2 / (ndf as f64) < options.chi2ndf_threshold {
            break (it, StopReason::GoodFit);
        }
        if outliers.len() >= options.max_outliers {
            break (it, StopReason::OutlierCap);
        }

        let mut outlier = 0;
        let mut chi2_max = f64::NEG_INFINITY;
        for i in 0..work.len() {
            let chi2_i = it.residual[i] * it.residual[i] * it.weight[(i, i)];
            if chi2_i > chi2_max {
                outlier = i;
                chi2_max = chi2_i;
            }
        }
        // The last exposure of a night is never removed.
        if !work.removable(outlier) {
            debug!("worst exposure {} is alone in its night", work.indices[outlier]);
            break (it, StopReason::NoSignificantOutlier);
        }
        let nsigma = chi2_max.sqrt();
        if nsigma < options.outlier_nsigma {
            break (it, StopReason::NoSignificantOutlier);
        }
        debug!("removing exposure {} at {nsigma:.2} sigma", work.indices[outlier]);
        outliers.push(RemovedExposure {
            index: work.indices[outlier],
            flux: work.fluxes[outlier],
            nsigma,
        });
        work.remove(outlier);
    };

    let ndf = work.len() - work.n_nights();
    let chi2ndf = if ndf > 0 { it.chi2 / (ndf as f64) } else { 0.0 };
    let mut night_covariance = it.night_cov;
    let mut night_weight = it.normal;
    if chi2ndf > 1.0 {
        night_covariance *= chi2ndf;
        night_weight /= chi2ndf;
    }
    info!(
        "{} exposures, {} nights, {} outliers, chi2/ndf {:.3}",
        work.len(),
        work.n_nights(),
        outliers.len(),
        chi2ndf
    );

    Ok(NightFit {
        night_fluxes: it.night_fluxes,
        night_covariance,
        night_weight,
        exposure_covariance: work.covariance,
        exposure_weight: it.weight,
        chi2: it.chi2,
        ndf,
        chi2ndf,
        outliers,
        stop,
        kept: work.indices,
    })
}

/// Mean date of the exposures of each night.
///
/// `design` is the cleaned, pre-outlier night matrix; its rows must match
/// `dates` one to one.
pub fn night_dates(design: &DMatrix<f64>, dates: &[f64]) -> Result<Vec<f64>, AppError> {
    if design.nrows() != dates.len() {
        return Err(AppError::new(
            EXIT_FIT,
            format!(
                "Not the same number of exposures: night matrix has {}, light curve has {}.",
                design.nrows(),
                dates.len()
            ),
        ));
    }
    (0..design.ncols())
        .map(|night| {
            let members: Vec<f64> = dates
                .iter()
                .enumerate()
                .filter(|(e, _)| design[(*e, night)] > 0.5)
                .map(|(_, d)| *d)
                .collect();
            if members.is_empty() {
                return Err(AppError::new(EXIT_FIT, format!("Night {night} has no exposure.")));
            }
            Ok(members.iter().sum::<f64>() / members.len() as f64)
        })
        .collect()
}
