//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - loads light files, catalogs and exposures
//! - runs the simultaneous fits or the per-night aggregation
//! - prints summaries and writes the output files

use clap::Parser;
use log::info;

use crate::calib::CalibConfig;
use crate::cli::{CalibrateArgs, Command, FitArgs, FitNightArgs, ModelArgs};
use crate::domain::SimPhotConfig;
use crate::error::AppError;
use crate::fit::NightFitOptions;
use crate::image::JsonExposureStore;
use crate::io::{DictTable, LightFile};

pub mod pipeline;

/// Entry point for the `simphot` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Fitnight(args) => handle_fitnight(args),
        Command::Calibrate(args) => handle_calibrate(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args.model, args.night_boundary, &args.mag_system);
    let light = LightFile::read(&args.light_file)?;
    let store = JsonExposureStore::from_env(args.model.exposures.as_deref())?;

    let run = pipeline::run_light_file_fit(&light, &store, &config)?;
    println!("{}", crate::report::format_fit_summary(&run.outcomes));

    let written = pipeline::write_fit_outputs(&run, &args.out, args.subdirs, &config)?;
    info!("{written} light curves written under {}", args.out.display());
    run.ensure_some_fitted()
}

fn handle_fitnight(args: FitNightArgs) -> Result<(), AppError> {
    let options = NightFitOptions {
        chi2ndf_threshold: args.chi2ndf_threshold,
        max_outliers: args.max_outliers,
        outlier_nsigma: args.outlier_nsigma,
    };
    let run = pipeline::run_night_fit(&args.dir, args.single_flux, &options)?;
    pipeline::write_night_outputs(&args.dir, &run)?;

    println!(
        "{}",
        crate::report::format_night_summary(&run.lc2fit, &run.fit, &run.dates)
    );
    Ok(())
}

fn handle_calibrate(args: CalibrateArgs) -> Result<(), AppError> {
    let defaults = SimPhotConfig::default();
    let config = fit_config_from_args(
        &args.model,
        defaults.night_boundary_hours,
        &defaults.mag_system,
    );
    let catalog = DictTable::read(&args.catalog)?;
    let calib = calib_config_from_args(&args);
    let store = JsonExposureStore::from_env(args.model.exposures.as_deref())?;

    let run = pipeline::run_calibration(
        &args.reference,
        &args.images,
        &catalog,
        &store,
        &calib,
        &config,
    )?;
    println!("{}", crate::report::format_fit_summary(&run.outcomes));

    let catalog_name = calib.catalog.display().to_string();
    pipeline::calibration_output(&run, &catalog_name)?.write(&args.out)?;
    info!("calibration table written to {}", args.out.display());
    run.ensure_some_fitted()
}

pub fn fit_config_from_args(
    model: &ModelArgs,
    night_boundary_hours: f64,
    mag_system: &str,
) -> SimPhotConfig {
    SimPhotConfig {
        vignette_half_size: model.vignette_half_size,
        kernel_half_size: model.kernel_half_size,
        galaxy_half_size: model.galaxy_half_size,
        max_kernel_residual: model.max_kernel_residual,
        max_iterations: model.max_iterations,
        refine_position: !model.no_position,
        night_boundary_hours,
        mag_system: mag_system.to_string(),
        ..SimPhotConfig::default()
    }
}

pub fn calib_config_from_args(args: &CalibrateArgs) -> CalibConfig {
    CalibConfig {
        catalog: args.catalog.clone(),
        first_star: args.first,
        last_star: args.last,
        max_images: args.max_images,
        mag_limit: args.mag_limit,
        fixed_positions: args.fixed_positions,
        ..CalibConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;

    #[test]
    fn model_options_reach_the_config() {
        let cli = Cli::parse_from([
            "simphot",
            "fit",
            "sn.light",
            "--vignette",
            "15",
            "--no-position",
            "--mag-system",
            "VEGA",
        ]);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        let config = fit_config_from_args(&args.model, args.night_boundary, &args.mag_system);
        assert_eq!(config.vignette_half_size, 15);
        assert!(!config.refine_position);
        assert_eq!(config.mag_system, "VEGA");
        assert_eq!(config.night_boundary_hours, 12.0);
    }

    #[test]
    fn calibrate_options_reach_the_calib_config() {
        let cli = Cli::parse_from([
            "simphot",
            "calibrate",
            "-r",
            "ref",
            "-c",
            "cat.list",
            "-n",
            "5",
            "--fixed-positions",
            "e1",
        ]);
        let Command::Calibrate(args) = cli.command else {
            panic!("expected calibrate");
        };
        let calib = calib_config_from_args(&args);
        assert_eq!(calib.max_images, Some(5));
        assert!(calib.fixed_positions);
        assert_eq!(calib.catalog, std::path::PathBuf::from("cat.list"));
        assert_eq!(calib.calibration_seeing, CalibConfig::default().calibration_seeing);
    }
}
