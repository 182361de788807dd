//! `simphot` library crate.
//!
//! Simultaneous multi-epoch PSF photometry: every exposure of a point source
//! (and of the galaxy it may sit on) is fitted at once, sharing one position
//! and one galaxy template, with a flux per exposure.
//!
//! The binary (`simphot`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the fit can be driven on in-memory exposures
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod calib;
pub mod cli;
pub mod domain;
pub mod error;
pub mod fit;
pub mod image;
pub mod io;
pub mod lc;
pub mod math;
pub mod model;
pub mod report;

#[cfg(test)]
pub(crate) mod testutil;
