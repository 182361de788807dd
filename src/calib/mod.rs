//! Photometric calibration against an external catalog.
//!
//! - catalog star selection (`catalog`)
//! - neighbor contamination estimates (`contamination`)
//! - the `calibration.list` output table (`list`)

pub mod catalog;
pub mod contamination;
pub mod list;

pub use catalog::*;
pub use contamination::*;
pub use list::*;
