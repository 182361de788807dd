//! Shared pipeline logic behind the CLI commands.
//!
//! Each function takes plain config structs and an `ExposureStore`, so the
//! workflows can be driven from tests without files or argument parsing:
//!
//! - light file -> light curves -> simultaneous fits -> per-object outputs
//! - light-curve directory -> robust per-night fluxes
//! - catalog -> calibration stars -> simultaneous fits -> calibration table

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use crate::calib::{CalibConfig, calibration_table, select_calibration_objects};
use crate::domain::SimPhotConfig;
use crate::error::{AppError, EXIT_FIT, EXIT_NO_DATA};
use crate::fit::{
    NightFit, NightFitOptions, NightInput, ObjectOutcome, fit_all, fit_nights, night_dates,
};
use crate::image::ExposureStore;
use crate::io::{
    DictTable, Lc2Fit, LightFile, NIGHT_DESIGN_FILE, PER_NIGHT_FILE, VEC_FILE, per_night_table,
    read_flux_covariance, read_lc2fit, read_matrix_json, read_vector_json, write_night_matrices,
    write_object_outputs,
};
use crate::lc::LightCurveList;

/// All computed outputs of a `fit` or `calibrate` run.
#[derive(Debug, Clone)]
pub struct FitRun {
    pub list: LightCurveList,
    pub outcomes: Vec<ObjectOutcome>,
}

impl FitRun {
    pub fn n_fitted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    /// Error when objects were requested but none could be fitted.
    pub fn ensure_some_fitted(&self) -> Result<(), AppError> {
        if !self.outcomes.is_empty() && self.n_fitted() == 0 {
            return Err(AppError::new(EXIT_FIT, "No object could be fitted."));
        }
        Ok(())
    }
}

/// Build the light curves of a light file and fit every object.
pub fn run_light_file_fit(
    light: &LightFile,
    store: &dyn ExposureStore,
    config: &SimPhotConfig,
) -> Result<FitRun, AppError> {
    config.validate()?;
    let mut list = LightCurveList::from_light_file(light, store)?;
    if list.curves.is_empty() {
        return Err(AppError::new(EXIT_NO_DATA, "The light file lists no object to fit."));
    }
    info!(
        "fitting {} objects on {} exposures (reference {})",
        list.curves.len(),
        list.images.len(),
        list.ref_image.name
    );
    let outcomes = fit_all(&mut list, config);
    Ok(FitRun { list, outcomes })
}

/// Where the outputs of `object` go.
pub fn object_dir(out: &Path, object: &str, per_object: bool) -> PathBuf {
    if per_object { out.join(object) } else { out.to_path_buf() }
}

/// Write the outputs of every successfully fitted object; returns their number.
///
/// Objects share `out` unless `per_object` is set, or several objects were fitted.
pub fn write_fit_outputs(
    run: &FitRun,
    out: &Path,
    per_object: bool,
    config: &SimPhotConfig,
) -> Result<usize, AppError> {
    let per_object = per_object || run.list.curves.len() > 1;
    let mut written = 0;
    for (lc, outcome) in run.list.curves.iter().zip(&run.outcomes) {
        if outcome.result.is_err() {
            warn!("{}: no output for this object", outcome.name);
            continue;
        }
        let dir = object_dir(out, &lc.object().name, per_object);
        write_object_outputs(&dir, lc, &run.list.ref_image, config)?;
        info!("{}: written to {}", outcome.name, dir.display());
        written += 1;
    }
    Ok(written)
}

/// Outputs of `fitnight`.
#[derive(Debug, Clone)]
pub struct NightRun {
    pub lc2fit: Lc2Fit,
    pub fit: NightFit,
    /// Mean date of each night.
    pub dates: Vec<f64>,
}

/// Aggregate the light curve stored in `dir` per night (or into one flux).
pub fn run_night_fit(
    dir: &Path,
    single_flux: bool,
    options: &NightFitOptions,
) -> Result<NightRun, AppError> {
    let fluxes = read_vector_json(&dir.join(VEC_FILE))?;
    let n = fluxes.len();
    let covariance = read_flux_covariance(dir, n)?;
    let design = if single_flux {
        NightInput::single_flux_design(n)
    } else {
        read_matrix_json(&dir.join(NIGHT_DESIGN_FILE))?
    };

    let input = NightInput::new(fluxes, covariance, design)?.without_unfit();
    info!("{} of {n} exposures carry a flux", input.len());
    if input.is_empty() {
        return Err(AppError::new(EXIT_NO_DATA, format!("No fitted flux in {}.", dir.display())));
    }

    let lc2fit = read_lc2fit(dir)?;
    let dates = night_dates(&input.design, &lc2fit.dates)?;
    let fit = fit_nights(&input, options)?;
    Ok(NightRun { lc2fit, fit, dates })
}

/// Write `lc2fit_per_night.dat` and the covariance/weight matrices into `dir`.
pub fn write_night_outputs(dir: &Path, run: &NightRun) -> Result<(), AppError> {
    per_night_table(&run.lc2fit, &run.fit, &run.dates)?.write(&dir.join(PER_NIGHT_FILE))?;
    write_night_matrices(dir, &run.fit)
}

/// Fit the catalog stars found in `reference` on `images`.
pub fn run_calibration(
    reference: &str,
    images: &[String],
    catalog: &DictTable,
    store: &dyn ExposureStore,
    calib: &CalibConfig,
    config: &SimPhotConfig,
) -> Result<FitRun, AppError> {
    config.validate()?;
    let reference = store.load(reference)?;
    let mut list = LightCurveList::new(Arc::clone(&reference));
    let limit = calib.max_images.unwrap_or(usize::MAX);
    if images.len() > limit {
        info!("{} exposures, limited to {limit}", images.len());
    }
    for name in images.iter().take(limit) {
        if list.has_image(name) {
            warn!("exposure {name} listed twice, kept once");
            continue;
        }
        list.push_image(store.load(name)?)?;
    }

    for object in select_calibration_objects(catalog, &reference, calib)? {
        list.add_object(object);
    }
    if list.curves.is_empty() {
        return Err(AppError::new(EXIT_NO_DATA, "No catalog star to fit in the reference image."));
    }
    let outcomes = fit_all(&mut list, config);
    Ok(FitRun { list, outcomes })
}

/// `calibration.list` for the successfully fitted stars of a calibration run.
pub fn calibration_output(run: &FitRun, catalog_name: &str) -> Result<DictTable, AppError> {
    let fitted = run
        .list
        .curves
        .iter()
        .zip(&run.outcomes)
        .filter(|(_, o)| o.result.is_ok())
        .map(|(lc, _)| lc);
    calibration_table(catalog_name, &run.list.ref_image.band, run.list.images.len(), fitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Point;
    use crate::image::MemoryExposureStore;
    use crate::io::{LC2FIT_FILE, LIGHTCURVE_FILE};
    use crate::testutil::*;
    use approx::assert_relative_eq;

    const STAR: Point = Point { x: 31.3, y: 32.6 };

    /// A constant star seen over three nights, two exposures each.
    fn store() -> MemoryExposureStore {
        let mut store = MemoryExposureStore::new();
        let mut reference = blank_exposure("ref", 54990.3);
        add_star(&mut reference, STAR, 5000.0);
        store.insert(reference);
        let mjds = [55000.1, 55000.2, 55001.1, 55001.2, 55002.1, 55002.2];
        for (k, mjd) in mjds.into_iter().enumerate() {
            let mut e = blank_exposure(&format!("e{k}"), mjd);
            add_star(&mut e, STAR, 5000.0);
            store.insert(e);
        }
        store
    }

    fn light_file() -> LightFile {
        let text = format!(
            "OBJECTS\n{} {} NAME=star TYPE=3 DATE_MIN=55000 DATE_MAX=55010\n\
             IMAGES\ne0\ne1\ne2\ne3\ne4\ne5\nPHOREF\nref\n",
            STAR.x, STAR.y
        );
        LightFile::parse(&text, "test").unwrap()
    }

    #[test]
    fn fit_then_fitnight_recovers_a_constant_star() {
        let store = store();
        let config = SimPhotConfig::default();
        let run = run_light_file_fit(&light_file(), &store, &config).unwrap();
        run.ensure_some_fitted().unwrap();

        let out = tempfile::tempdir().unwrap();
        assert_eq!(write_fit_outputs(&run, out.path(), false, &config).unwrap(), 1);
        assert!(out.path().join(LIGHTCURVE_FILE).exists());
        let lc2fit = Lc2Fit::read(&out.path().join(LC2FIT_FILE)).unwrap();
        // The reference lies outside the validity window.
        assert_eq!(lc2fit.dates.len(), 6);

        let night = run_night_fit(out.path(), false, &NightFitOptions::default()).unwrap();
        assert_eq!(night.fit.night_fluxes.len(), 3);
        for (n, expected) in [55000.15, 55001.15, 55002.15].into_iter().enumerate() {
            assert_relative_eq!(night.fit.night_fluxes[n], 5000.0, max_relative = 1e-6);
            assert_relative_eq!(night.dates[n], expected, epsilon = 1e-9);
        }
        write_night_outputs(out.path(), &night).unwrap();
        let table = DictTable::read(&out.path().join(PER_NIGHT_FILE)).unwrap();
        assert_eq!(table.len(), 3);

        let single = run_night_fit(out.path(), true, &NightFitOptions::default()).unwrap();
        assert_eq!(single.fit.night_fluxes.len(), 1);
        assert_relative_eq!(single.dates[0], 55001.15, epsilon = 1e-9);
    }

    #[test]
    fn light_file_without_objects_is_no_data() {
        let light = LightFile::parse("IMAGES\ne0\nPHOREF\nref\n", "test").unwrap();
        let err = run_light_file_fit(&light, &store(), &SimPhotConfig::default()).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_NO_DATA);
    }

    #[test]
    fn calibration_fits_catalog_stars() {
        let store = store();
        let mut catalog = DictTable::new(&["x", "y", "mr", "emr"]);
        catalog.push_row([STAR.x.to_string(), STAR.y.to_string(), "18.0".into(), "0.01".into()])
            .unwrap();
        let images: Vec<String> = (0..6).map(|k| format!("e{k}")).collect();
        let calib = CalibConfig {
            max_images: Some(4),
            ..CalibConfig::default()
        };

        let run = run_calibration(
            "ref",
            &images,
            &catalog,
            &store,
            &calib,
            &SimPhotConfig::default(),
        )
        .unwrap();
        assert_eq!(run.list.images.len(), 4);
        assert_eq!(run.n_fitted(), 1);

        let table = calibration_output(&run, "cat.list").unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.global("NIMAGES"), Some("4"));
        for row in 0..4 {
            assert_relative_eq!(table.number(row, "flux").unwrap(), 5000.0, max_relative = 1e-6);
        }
    }
}
