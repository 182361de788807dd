//! Per-object photometric model: reference PSF, galaxy template and the
//! kernel matching each exposure to the reference.

pub mod kernel;
#[allow(clippy::module_inception)]
pub mod model;

pub use kernel::*;
pub use model::*;
