//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON next to the text tables
//! - shared by reference (`Arc`) between light curves without copying

use std::collections::BTreeMap;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A sub-pixel position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Nearest integer pixel.
    pub fn round(self) -> IntPoint {
        IntPoint::new(self.x.round() as i64, self.y.round() as i64)
    }

    pub fn norm(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// An integer pixel position (or offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IntPoint {
    pub x: i64,
    pub y: i64,
}

impl IntPoint {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in pixel coordinates (bounds inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Frame {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin: xmin.min(xmax),
            ymin: ymin.min(ymax),
            xmax: xmin.max(xmax),
            ymax: ymin.max(ymax),
        }
    }

    /// Smallest frame containing all points. `None` for an empty slice.
    pub fn bounding(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let mut frame = Frame::new(first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            frame.xmin = frame.xmin.min(p.x);
            frame.ymin = frame.ymin.min(p.y);
            frame.xmax = frame.xmax.max(p.x);
            frame.ymax = frame.ymax.max(p.y);
        }
        Some(frame)
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.xmin && p.x <= self.xmax && p.y >= self.ymin && p.y <= self.ymax
    }

    pub fn intersects(&self, other: &Frame) -> bool {
        self.xmin <= other.xmax
            && other.xmin <= self.xmax
            && self.ymin <= other.ymax
            && other.ymin <= self.ymax
    }

    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.xmin, self.ymin),
            Point::new(self.xmax, self.ymin),
            Point::new(self.xmin, self.ymax),
            Point::new(self.xmax, self.ymax),
        ]
    }
}

/// Catalog magnitude and its uncertainty in one band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandMagnitude {
    pub mag: f64,
    pub error: f64,
}

/// Magnitude reported for bands absent from the catalog.
pub const MISSING_MAGNITUDE: f64 = 99.0;

/// Nearest-neighbor contamination of a catalog star.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NeighborInfo {
    pub distance: f64,
    pub flux: f64,
    pub contamination: f64,
    pub nsigma: f64,
}

impl Default for NeighborInfo {
    fn default() -> Self {
        Self {
            distance: 0.0,
            flux: 0.0,
            contamination: 0.0,
            nsigma: 1.0e6,
        }
    }
}

/// External-catalog metadata attached to calibration objects.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CatalogInfo {
    /// Row number in the external catalog (1-based).
    pub id: usize,
    pub ra: f64,
    pub dec: f64,
    /// Initial position in the reference image.
    pub x: f64,
    pub y: f64,
    pub magnitudes: BTreeMap<String, BandMagnitude>,
    pub neighbor: NeighborInfo,
}

impl CatalogInfo {
    /// Magnitude in `band`, or `MISSING_MAGNITUDE` for both fields.
    pub fn magnitude(&self, band: &str) -> BandMagnitude {
        self.magnitudes.get(band).copied().unwrap_or(BandMagnitude {
            mag: MISSING_MAGNITUDE,
            error: MISSING_MAGNITUDE,
        })
    }
}

/// What a monitored object is, which decides how it is fitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectKind {
    /// A catalog star used for photometric calibration: no host galaxy, free position.
    CalibrationStar(CatalogInfo),
    /// A transient on top of a static host galaxy.
    Transient,
    /// A point source whose position is trusted and never refitted.
    FixedPosition { catalog: Option<CatalogInfo> },
}

/// Unknowns of the simultaneous fit implied by an object kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitPlan {
    pub fit_galaxy: bool,
    pub refine_position: bool,
}

impl ObjectKind {
    /// Decode the light-file `TYPE=` code.
    pub fn from_type_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ObjectKind::Transient),
            1 => Some(ObjectKind::CalibrationStar(CatalogInfo::default())),
            3 => Some(ObjectKind::FixedPosition { catalog: None }),
            _ => None,
        }
    }

    pub fn type_code(&self) -> i64 {
        match self {
            ObjectKind::Transient => 0,
            ObjectKind::CalibrationStar(_) => 1,
            ObjectKind::FixedPosition { .. } => 3,
        }
    }

    pub fn fit_plan(&self) -> FitPlan {
        match self {
            ObjectKind::CalibrationStar(_) => FitPlan {
                fit_galaxy: false,
                refine_position: true,
            },
            ObjectKind::Transient => FitPlan {
                fit_galaxy: true,
                refine_position: true,
            },
            ObjectKind::FixedPosition { .. } => FitPlan {
                fit_galaxy: false,
                refine_position: false,
            },
        }
    }

    pub fn catalog(&self) -> Option<&CatalogInfo> {
        match self {
            ObjectKind::CalibrationStar(info) => Some(info),
            ObjectKind::FixedPosition { catalog } => catalog.as_ref(),
            ObjectKind::Transient => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ObjectKind::CalibrationStar(_) => "calibration star",
            ObjectKind::Transient => "transient",
            ObjectKind::FixedPosition { .. } => "fixed position",
        }
    }
}

/// A monitored object as listed in the light file or built from a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefObject {
    pub name: String,
    /// Position in the geometric reference image (pixels).
    pub position: Point,
    pub ra: Option<f64>,
    pub dec: Option<f64>,
    pub band: String,
    /// Validity window (MJD): a flux is fitted only for exposures inside it.
    pub mjd_min: f64,
    pub mjd_max: f64,
    pub kind: ObjectKind,
}

impl RefObject {
    /// An always-valid object of the given kind.
    pub fn new(name: impl Into<String>, position: Point, kind: ObjectKind) -> Self {
        Self {
            name: name.into(),
            position,
            ra: None,
            dec: None,
            band: String::new(),
            mjd_min: -1.0e30,
            mjd_max: 1.0e30,
            kind,
        }
    }

    pub fn in_window(&self, mjd: f64) -> bool {
        mjd >= self.mjd_min && mjd <= self.mjd_max
    }
}

/// Geometry and iteration settings of the simultaneous fit.
///
/// Derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct SimPhotConfig {
    /// Half size of the fitted pixel stamp around the object, in each exposure.
    pub vignette_half_size: i64,
    /// Half size of the PSF-matching convolution kernel.
    pub kernel_half_size: i64,
    /// Half size of the galaxy template, in reference pixels.
    pub galaxy_half_size: i64,
    /// Maximum accepted Σ(T−R⊛K)²/ΣT² of the kernel match.
    pub max_kernel_residual: f64,
    /// Gauss-Newton passes once position unknowns are enabled.
    pub max_iterations: usize,
    /// Stop refining once the position step is below this (pixels).
    pub position_tolerance: f64,
    /// Global switch; the object kind must also allow refinement.
    pub refine_position: bool,
    /// UT hour at which one observing night ends and the next begins.
    pub night_boundary_hours: f64,
    pub mag_system: String,
}

impl Default for SimPhotConfig {
    fn default() -> Self {
        Self {
            vignette_half_size: 12,
            kernel_half_size: 4,
            galaxy_half_size: 6,
            max_kernel_residual: 1.0e-2,
            max_iterations: 10,
            position_tolerance: 1.0e-3,
            refine_position: true,
            night_boundary_hours: 12.0,
            mag_system: "AB".to_string(),
        }
    }
}

impl SimPhotConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.vignette_half_size < 1 {
            return Err(AppError::input("Vignette half size must be >= 1."));
        }
        if self.kernel_half_size < 0 {
            return Err(AppError::input("Kernel half size must be >= 0."));
        }
        if self.galaxy_half_size < 0 || self.galaxy_half_size >= self.vignette_half_size {
            return Err(AppError::input(format!(
                "Galaxy half size must be in [0, {}) \
                 so every galaxy pixel is covered by the vignette.",
                self.vignette_half_size
            )));
        }
        if !(self.max_kernel_residual.is_finite() && self.max_kernel_residual > 0.0) {
            return Err(AppError::input("Kernel residual threshold must be finite and > 0."));
        }
        if !(self.position_tolerance.is_finite() && self.position_tolerance > 0.0) {
            return Err(AppError::input("Position tolerance must be finite and > 0."));
        }
        if !(0.0..24.0).contains(&self.night_boundary_hours) {
            return Err(AppError::input("Night boundary must be an hour in [0, 24)."));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_round_trip_and_dispatch_fit_plans() {
        for code in [0, 1, 3] {
            let kind = ObjectKind::from_type_code(code).unwrap();
            assert_eq!(kind.type_code(), code);
        }
        assert!(ObjectKind::from_type_code(2).is_none());

        assert!(ObjectKind::Transient.fit_plan().fit_galaxy);
        let star = ObjectKind::CalibrationStar(CatalogInfo::default()).fit_plan();
        assert!(!star.fit_galaxy && star.refine_position);
        let fixed = ObjectKind::FixedPosition { catalog: None }.fit_plan();
        assert!(!fixed.fit_galaxy && !fixed.refine_position);
    }

    #[test]
    fn missing_band_reports_placeholder_magnitude() {
        let info = CatalogInfo::default();
        let m = info.magnitude("r");
        assert_eq!(m.mag, MISSING_MAGNITUDE);
        assert_eq!(m.error, MISSING_MAGNITUDE);
    }

    #[test]
    fn frames_intersect_and_contain() {
        let a = Frame::new(0.0, 0.0, 99.0, 99.0);
        let b = Frame::new(90.0, 90.0, 200.0, 200.0);
        let c = Frame::new(150.0, 150.0, 200.0, 200.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(a.contains(Point::new(50.0, 0.0)));
        assert!(!a.contains(Point::new(-0.5, 10.0)));
    }

    #[test]
    fn galaxy_larger_than_vignette_is_rejected() {
        let config = SimPhotConfig {
            galaxy_half_size: 12,
            ..SimPhotConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(SimPhotConfig::default().validate().is_ok());
    }
}
