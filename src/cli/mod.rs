//! Command-line parsing for simphot.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the photometry code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "simphot", version, about = "Simultaneous multi-epoch PSF photometry")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every object of a light file on all its exposures and write the light curves.
    Fit(FitArgs),
    /// Collapse a fitted light curve into one flux per night.
    Fitnight(FitNightArgs),
    /// Fit catalog stars on a set of exposures and write a calibration table.
    Calibrate(CalibrateArgs),
}

/// Options shared by the commands that run the simultaneous fit.
#[derive(Debug, Parser, Clone)]
pub struct ModelArgs {
    /// Directory holding the `<name>.json` exposures (default: $SIMPHOT_EXPOSURES).
    #[arg(long, value_name = "DIR")]
    pub exposures: Option<PathBuf>,

    /// Half size (pixels) of the stamp fitted around the object.
    #[arg(long = "vignette", default_value_t = 12)]
    pub vignette_half_size: i64,

    /// Half size (pixels) of the PSF matching kernel.
    #[arg(long = "kernel", default_value_t = 4)]
    pub kernel_half_size: i64,

    /// Half size (pixels) of the galaxy template.
    #[arg(long = "galaxy", default_value_t = 6)]
    pub galaxy_half_size: i64,

    /// Largest relative residual accepted for a matching kernel.
    #[arg(long, default_value_t = 1e-2)]
    pub max_kernel_residual: f64,

    /// Maximum number of position iterations.
    #[arg(long, default_value_t = 10)]
    pub max_iterations: usize,

    /// Keep every object at its input position.
    #[arg(long)]
    pub no_position: bool,
}

/// Options of `simphot fit`.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Light file listing objects, exposures and the reference.
    #[arg(value_name = "LIGHTFILE")]
    pub light_file: PathBuf,

    /// Output directory.
    #[arg(short = 'o', long, default_value = ".")]
    pub out: PathBuf,

    /// Write each object into its own sub-directory.
    #[arg(short = 'd', long = "subdirs")]
    pub subdirs: bool,

    /// Hours subtracted from dates before grouping exposures into nights.
    #[arg(long, default_value_t = 12.0)]
    pub night_boundary: f64,

    /// Magnitude system written in the light-curve headers.
    #[arg(long, default_value = "AB")]
    pub mag_system: String,

    #[command(flatten)]
    pub model: ModelArgs,
}

/// Options of `simphot fitnight`.
#[derive(Debug, Parser, Clone)]
pub struct FitNightArgs {
    /// Light-curve directory written by `simphot fit`.
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Fit one single constant flux for all points.
    #[arg(short = '1', long)]
    pub single_flux: bool,

    /// Stop removing outliers below this chi2/ndf.
    #[arg(long, default_value_t = 1.5)]
    pub chi2ndf_threshold: f64,

    /// Maximum number of removed exposures.
    #[arg(long, default_value_t = 6)]
    pub max_outliers: usize,

    /// Only remove exposures at least this many sigmas away.
    #[arg(long, default_value_t = 3.0)]
    pub outlier_nsigma: f64,
}

/// Options of `simphot calibrate`.
#[derive(Debug, Parser, Clone)]
pub struct CalibrateArgs {
    /// Reference exposure.
    #[arg(short = 'r', long = "ref", value_name = "NAME")]
    pub reference: String,

    /// External catalog (dictionary table with x, y and m<band> columns).
    #[arg(short = 'c', long, value_name = "FILE")]
    pub catalog: PathBuf,

    /// Output table.
    #[arg(short = 'o', long, default_value = "calibration.list")]
    pub out: PathBuf,

    /// Maximum number of exposures (default: all).
    #[arg(short = 'n', long)]
    pub max_images: Option<usize>,

    /// First star to fit (starts at 1).
    #[arg(short = 'f', long, default_value_t = 1)]
    pub first: usize,

    /// Last star to fit (included).
    #[arg(short = 'l', long, default_value_t = 1000)]
    pub last: usize,

    /// Fit at the catalog positions without refining them.
    #[arg(long)]
    pub fixed_positions: bool,

    /// Faintest magnitude fitted (default: 21 in g, r, i, z, no limit otherwise).
    #[arg(long)]
    pub mag_limit: Option<f64>,

    /// Exposures to fit.
    #[arg(value_name = "IMAGES", required = true)]
    pub images: Vec<String>,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fitnight_single_flux_flag() {
        let cli = Cli::parse_from(["simphot", "fitnight", "lcdir", "-1"]);
        match cli.command {
            Command::Fitnight(args) => {
                assert!(args.single_flux);
                assert_eq!(args.dir, PathBuf::from("lcdir"));
                assert_eq!(args.max_outliers, 6);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_calibrate_options() {
        let cli = Cli::parse_from([
            "simphot",
            "calibrate",
            "-r",
            "ref",
            "-c",
            "cat.list",
            "-f",
            "3",
            "-l",
            "9",
            "--no-position",
            "e1",
            "e2",
        ]);
        match cli.command {
            Command::Calibrate(args) => {
                assert_eq!(args.reference, "ref");
                assert_eq!((args.first, args.last), (3, 9));
                assert_eq!(args.images, vec!["e1", "e2"]);
                assert!(args.model.no_position);
                assert_eq!(args.out, PathBuf::from("calibration.list"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn fit_defaults() {
        let cli = Cli::parse_from(["simphot", "fit", "sn.light", "-d"]);
        match cli.command {
            Command::Fit(args) => {
                assert!(args.subdirs);
                assert_eq!(args.model.vignette_half_size, 12);
                assert_eq!(args.mag_system, "AB");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
