//! Inputs and outputs of the per-night aggregation.

use std::path::Path;

use log::info;
use nalgebra::DMatrix;

use crate::error::{AppError, EXIT_NO_DATA};
use crate::fit::NightFit;
use crate::io::{
    DictTable, FLUX_COVARIANCE_FILE, LC2FIT_FILE, PARAMETER_COVARIANCE_FILE, read_matrix_json,
    write_matrix_dat, write_matrix_json,
};
use crate::math::{Triangle, leading_block, symmetrize};

pub const PER_NIGHT_FILE: &str = "lc2fit_per_night.dat";
pub const PER_NIGHT_COLUMNS: [&str; 5] = ["Date", "Flux", "Fluxerr", "ZP", "chi2ndf"];

/// Fitted points of one object as written by the `fit` command.
#[derive(Debug, Clone, PartialEq)]
pub struct Lc2Fit {
    pub instrument: String,
    pub band: String,
    pub mag_system: String,
    pub dates: Vec<f64>,
    pub fluxes: Vec<f64>,
    /// Zero point of the first row.
    pub zero_point: f64,
}

impl Lc2Fit {
    pub fn read(path: &Path) -> Result<Self, AppError> {
        Self::from_table(&DictTable::read(path)?).map_err(|e| {
            AppError::new(e.exit_code(), format!("{}: {}", path.display(), e.message()))
        })
    }

    pub fn from_table(table: &DictTable) -> Result<Self, AppError> {
        if table.is_empty() {
            return Err(AppError::new(EXIT_NO_DATA, "no fitted point"));
        }
        let global = |key: &str| table.global(key).unwrap_or_default().to_string();
        Ok(Self {
            instrument: global("INSTRUMENT"),
            band: global("BAND"),
            mag_system: global("MAGSYS"),
            dates: table.numbers("Date")?,
            fluxes: table.numbers("Flux")?,
            zero_point: table.number(0, "ZP")?,
        })
    }
}

/// Flux covariance of the `n` exposures of a light-curve directory,
/// symmetrized from its lower triangle.
///
/// Prefers the flux block written on its own, falls back to the leading
/// block of the full parameter covariance.
pub fn read_flux_covariance(dir: &Path, n: usize) -> Result<DMatrix<f64>, AppError> {
    let flux_path = dir.join(FLUX_COVARIANCE_FILE);
    if flux_path.exists() {
        info!("flux covariance from {}", flux_path.display());
        let mut m = read_matrix_json(&flux_path)?;
        symmetrize(&mut m, Triangle::Lower);
        return Ok(m);
    }
    let full_path = dir.join(PARAMETER_COVARIANCE_FILE);
    if !full_path.exists() {
        return Err(AppError::new(
            EXIT_NO_DATA,
            format!(
                "Missing {FLUX_COVARIANCE_FILE} and {PARAMETER_COVARIANCE_FILE} in {}.",
                dir.display()
            ),
        ));
    }
    info!("flux covariance extracted from {}", full_path.display());
    let full = read_matrix_json(&full_path)?;
    if full.nrows() < n || full.ncols() < n {
        return Err(AppError::input(format!(
            "{} is {}x{}, smaller than the {n} exposures.",
            full_path.display(),
            full.nrows(),
            full.ncols()
        )));
    }
    let mut m = leading_block(&full, n);
    symmetrize(&mut m, Triangle::Lower);
    Ok(m)
}

pub fn read_lc2fit(dir: &Path) -> Result<Lc2Fit, AppError> {
    Lc2Fit::read(&dir.join(LC2FIT_FILE))
}

/// One row per night: mean date, flux, error, zero point and the fit χ²/ndf.
pub fn per_night_table(lc: &Lc2Fit, fit: &NightFit, dates: &[f64]) -> Result<DictTable, AppError> {
    let mut table = DictTable::new(&PER_NIGHT_COLUMNS);
    table.describe("Date", "(modified julian date)");
    table.describe("ZP", "reference zero point");
    table.set_global("INSTRUMENT", &lc.instrument);
    table.set_global("BAND", &lc.band);
    table.set_global("MAGSYS", &lc.mag_system);

    let chi2ndf = format!("{:.6}", fit.chi2ndf);
    for (night, date) in dates.iter().enumerate() {
        table.push_row([
            format!("{date:.6}"),
            format!("{:.6}", fit.night_fluxes[night]),
            format!("{:.6}", fit.night_error(night)),
            format!("{:.6}", lc.zero_point),
            chi2ndf.clone(),
        ])?;
    }
    Ok(table)
}

/// Covariance and weight matrices, per exposure and per night, as JSON and text.
pub fn write_night_matrices(dir: &Path, fit: &NightFit) -> Result<(), AppError> {
    let outputs = [
        ("flux_per_expo_covmat", &fit.exposure_covariance),
        ("flux_per_night_covmat", &fit.night_covariance),
        ("flux_per_expo_weightmat", &fit.exposure_weight),
        ("flux_per_night_weightmat", &fit.night_weight),
    ];
    for (stem, m) in outputs {
        write_matrix_json(&dir.join(format!("{stem}.json")), m)?;
        write_matrix_dat(&dir.join(format!("{stem}.dat")), m)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::{NightFitOptions, NightInput, fit_nights};
    use nalgebra::DVector;

    #[test]
    fn empty_lc2fit_means_no_data() {
        let table = DictTable::new(&["Date", "Flux", "Fluxerr", "ZP", "Image"]);
        let err = Lc2Fit::from_table(&table).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_NO_DATA);
    }

    #[test]
    fn covariance_falls_back_to_parameter_block() {
        let dir = tempfile::tempdir().unwrap();
        let full = DMatrix::from_fn(4, 4, |i, j| if i == j { (i + 1) as f64 } else { 0.0 });
        write_matrix_json(&dir.path().join(PARAMETER_COVARIANCE_FILE), &full).unwrap();
        let c = read_flux_covariance(dir.path(), 2).unwrap();
        assert_eq!(c, DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 2.0])));
        assert!(read_flux_covariance(dir.path(), 5).is_err());
    }

    #[test]
    fn per_night_table_and_matrices() {
        let input = NightInput::new(
            DVector::from_vec(vec![10.0, 12.0, 20.0]),
            DMatrix::identity(3, 3),
            DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 0.0, 0.0, 1.0]),
        )
        .unwrap();
        let fit = fit_nights(&input, &NightFitOptions::default()).unwrap();
        let lc = Lc2Fit {
            instrument: "TESTCAM".into(),
            band: "r".into(),
            mag_system: "AB".into(),
            dates: vec![1.0, 2.0, 5.0],
            fluxes: vec![10.0, 12.0, 20.0],
            zero_point: 30.0,
        };
        let table = per_night_table(&lc, &fit, &[1.5, 5.0]).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.number(0, "Flux").unwrap(), 11.0);
        assert_eq!(table.number(1, "Date").unwrap(), 5.0);
        assert_eq!(table.global("MAGSYS"), Some("AB"));

        let dir = tempfile::tempdir().unwrap();
        write_night_matrices(dir.path(), &fit).unwrap();
        let back = read_matrix_json(&dir.path().join("flux_per_night_covmat.json")).unwrap();
        assert_eq!(back.shape(), (2, 2));
        assert!(dir.path().join("flux_per_expo_weightmat.dat").exists());
    }
}
