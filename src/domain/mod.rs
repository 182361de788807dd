//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - geometry primitives (`Point`, `IntPoint`, `Frame`)
//! - monitored objects and their kinds (`RefObject`, `ObjectKind`, `FitPlan`)
//! - catalog metadata for calibration stars (`CatalogInfo`, `NeighborInfo`)
//! - the fit configuration (`SimPhotConfig`)

pub mod types;

pub use types::*;
