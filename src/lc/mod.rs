//! Light-curve containers.
//!
//! A `LightCurveList` holds the shared exposures and objects of a run and
//! one `LightCurve` per object; each `LightCurve` holds one `Fiducial` per
//! exposure. Exposures and objects are shared through `Arc`, never copied.

pub mod fiducial;
pub mod lightcurve;

pub use fiducial::*;
pub use lightcurve::*;
