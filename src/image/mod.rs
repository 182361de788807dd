//! Image-side inputs of the fit: pixel buffers, PSF models, geometric
//! transforms and calibrated exposures.

pub mod exposure;
pub mod pixelblock;
pub mod psf;
pub mod transform;

pub use exposure::*;
pub use pixelblock::*;
pub use psf::*;
pub use transform::*;
