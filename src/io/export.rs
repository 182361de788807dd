//! Per-object fit outputs.
//!
//! For every fitted object the `fit` command writes, in the object directory:
//!
//! - `lightcurve.dat`: one row per exposure, fitted or not
//! - `lc2fit.dat`: fitted points only, the input of light-curve fitters
//! - `lc.json`: the same information in structured form
//! - `vec_sn.json`, `flux_pmat_sn.json`, `pmat_sn.json`, `nightmat_sn.json`:
//!   the inputs of the per-night aggregation
//! - `galaxy.json` when a galaxy template was fitted

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::domain::{Point, RefObject, SimPhotConfig};
use crate::error::AppError;
use crate::fit::build_night_design;
use crate::image::{Exposure, PixelBlock};
use crate::io::{DictTable, write_matrix_json, write_vector_json};
use crate::lc::{Fiducial, LightCurve, PhotStar};

pub const LIGHTCURVE_COLUMNS: [&str; 16] = [
    "x", "y", "flux", "error", "sky", "skyerror", "xerror", "yerror", "name", "mjd", "seeing",
    "exptime", "phratio", "satur", "nsatur", "chi2pdf",
];

pub const LC2FIT_COLUMNS: [&str; 5] = ["Date", "Flux", "Fluxerr", "ZP", "Image"];

pub const VEC_FILE: &str = "vec_sn.json";
pub const FLUX_COVARIANCE_FILE: &str = "flux_pmat_sn.json";
pub const PARAMETER_COVARIANCE_FILE: &str = "pmat_sn.json";
pub const NIGHT_DESIGN_FILE: &str = "nightmat_sn.json";
pub const LC2FIT_FILE: &str = "lc2fit.dat";
pub const LIGHTCURVE_FILE: &str = "lightcurve.dat";
pub const LC_JSON_FILE: &str = "lc.json";
pub const GALAXY_FILE: &str = "galaxy.json";

/// `true` for Fiducials whose flux enters the per-night aggregation.
pub fn carries_flux(f: &Fiducial) -> bool {
    f.fitted && f.star.flux != 0.0
}

/// Shared per-exposure columns of the light-curve and calibration tables.
pub(crate) fn measurement_fields(f: &Fiducial) -> Vec<String> {
    let s = &f.star;
    vec![
        s.x.to_string(),
        s.y.to_string(),
        s.flux.to_string(),
        s.eflux.to_string(),
        s.sky.to_string(),
        s.varsky.max(0.0).sqrt().to_string(),
        s.vx.max(0.0).sqrt().to_string(),
        s.vy.max(0.0).sqrt().to_string(),
        f.name().to_string(),
        f.mjd().to_string(),
        f.seeing().to_string(),
        f.exposure_time().to_string(),
        f.photom_ratio.to_string(),
    ]
}

pub fn lightcurve_table(lc: &LightCurve) -> Result<DictTable, AppError> {
    let mut table = DictTable::new(&LIGHTCURVE_COLUMNS);
    table.set_global("OBJECT", &lc.object().name);
    table.set_global("TYPE", lc.object().kind.type_code());
    let chi2ndf = lc.chi2ndf().to_string();
    for f in lc.fiducials() {
        let mut row = measurement_fields(f);
        row.push(u8::from(f.has_saturated_pixels).to_string());
        row.push(f.n_saturated_pixels.to_string());
        row.push(chi2ndf.clone());
        table.push_row(row)?;
    }
    Ok(table)
}

/// Fitted points in the format read back by `fitnight`.
pub fn lc2fit_table(
    lc: &LightCurve,
    reference: &Exposure,
    mag_system: &str,
) -> Result<DictTable, AppError> {
    let mut table = DictTable::new(&LC2FIT_COLUMNS);
    let band = if lc.object().band.is_empty() {
        reference.band.as_str()
    } else {
        lc.object().band.as_str()
    };
    table.set_global("INSTRUMENT", &reference.instrument);
    table.set_global("BAND", band);
    table.set_global("MAGSYS", mag_system);
    table.describe("Date", "modified julian date");
    table.describe("ZP", "reference zero point");

    let zp = reference.zero_point.to_string();
    for f in lc.fiducials().iter().filter(|f| carries_flux(f)) {
        table.push_row([
            f.mjd().to_string(),
            f.star.flux.to_string(),
            f.star.eflux.to_string(),
            zp.clone(),
            f.name().to_string(),
        ])?;
    }
    Ok(table)
}

/// Structured form of a fitted light curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightCurveRecord {
    pub object: RefObject,
    pub reference: String,
    pub zero_point: f64,
    pub chi2: f64,
    pub ndf: usize,
    /// Refined position in the reference image.
    pub position: Point,
    pub points: Vec<PointRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub image: String,
    pub mjd: f64,
    pub seeing: f64,
    pub exposure_time: f64,
    pub photom_ratio: f64,
    pub fitted: bool,
    pub n_saturated_pixels: usize,
    #[serde(flatten)]
    pub star: PhotStar,
}

impl LightCurveRecord {
    pub fn from_curve(lc: &LightCurve, reference: &Exposure) -> Self {
        let (chi2, ndf, position) = match &lc.fit {
            Some(fit) => (fit.chi2, fit.ndf, fit.position),
            None => (0.0, 0, lc.object().position),
        };
        Self {
            object: lc.object().as_ref().clone(),
            reference: reference.name.clone(),
            zero_point: reference.zero_point,
            chi2,
            ndf,
            position,
            points: lc
                .fiducials()
                .iter()
                .map(|f| PointRecord {
                    image: f.name().to_string(),
                    mjd: f.mjd(),
                    seeing: f.seeing(),
                    exposure_time: f.exposure_time(),
                    photom_ratio: f.photom_ratio,
                    fitted: f.fitted,
                    n_saturated_pixels: f.n_saturated_pixels,
                    star: f.star,
                })
                .collect(),
        }
    }
}

pub fn write_lc_json(path: &Path, record: &LightCurveRecord) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(BufWriter::new(file), record)
        .map_err(|e| AppError::input(format!("Failed to write '{}': {e}", path.display())))
}

pub fn read_lc_json(path: &Path) -> Result<LightCurveRecord, AppError> {
    let file =
        File::open(path).map_err(|e| {
            AppError::input(format!("Failed to open '{}': {e}", path.display()))
        })?;
    serde_json::from_reader(file).map_err(|e| {
        AppError::input(format!("Invalid light curve JSON: {e}"))
    })
}

fn write_galaxy(path: &Path, galaxy: &PixelBlock) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create '{}': {e}", path.display())))?;
    serde_json::to_writer(BufWriter::new(file), galaxy)
        .map_err(|e| AppError::input(format!("Failed to write '{}': {e}", path.display())))
}

/// Write every output of one fitted object into `dir` (created if needed).
pub fn write_object_outputs(
    dir: &Path,
    lc: &LightCurve,
    reference: &Exposure,
    config: &SimPhotConfig,
) -> Result<(), AppError> {
    fs::create_dir_all(dir).map_err(|e| {
        AppError::input(format!("Failed to create directory '{}': {e}", dir.display()))
    })?;

    lightcurve_table(lc)?.write(&dir.join(LIGHTCURVE_FILE))?;
    lc2fit_table(lc, reference, &config.mag_system)?.write(&dir.join(LC2FIT_FILE))?;
    write_lc_json(&dir.join(LC_JSON_FILE), &LightCurveRecord::from_curve(lc, reference))?;

    let (dates, fluxes, flux_covariance) = lc.compute_mat_vec();
    write_vector_json(&dir.join(VEC_FILE), &DVector::from_vec(fluxes))?;
    write_matrix_json(&dir.join(FLUX_COVARIANCE_FILE), &flux_covariance)?;

    let flags: Vec<bool> = lc.fiducials().iter().map(carries_flux).collect();
    let (design, _) = build_night_design(&dates, &flags, config.night_boundary_hours)?;
    write_matrix_json(&dir.join(NIGHT_DESIGN_FILE), &design)?;

    if let Some(fit) = &lc.fit {
        write_matrix_json(&dir.join(PARAMETER_COVARIANCE_FILE), &fit.parameter_covariance)?;
        if let Some(galaxy) = &fit.galaxy {
            write_galaxy(&dir.join(GALAXY_FILE), galaxy)?;
        }
    }
    Ok(())
}
