//! Calibrated exposures and where to find them.
//!
//! An `Exposure` is everything the fit needs from one reduced image: pixel
//! and inverse-variance buffers, the sky level, the photometric zero point,
//! an analytic PSF and the affine map from its pixels to the common frame.
//!
//! Exposures are located by name through an `ExposureStore`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::Frame;
use crate::error::AppError;
use crate::image::{AffineTransform, PixelBlock, PsfModel};

/// Environment variable naming the exposure directory.
pub const EXPOSURES_ENV: &str = "SIMPHOT_EXPOSURES";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exposure {
    pub name: String,
    #[serde(default)]
    pub instrument: String,
    #[serde(default)]
    pub band: String,
    pub mjd: f64,
    /// Seeing (PSF sigma, pixels).
    #[serde(default)]
    pub seeing: f64,
    #[serde(default)]
    pub exposure_time: f64,
    pub zero_point: f64,
    pub sky: f64,
    #[serde(default)]
    pub sky_variance: f64,
    /// Pixels at or above this level are considered saturated.
    pub saturation: f64,
    pub psf: PsfModel,
    /// Pixel → common astrometric frame.
    #[serde(default)]
    pub to_common: AffineTransform,
    pub pixels: PixelBlock,
    /// Inverse variance per pixel (0 for dead pixels).
    pub weights: PixelBlock,
}

impl Exposure {
    pub fn frame(&self) -> Frame {
        self.pixels.frame()
    }

    pub fn is_saturated(&self, value: f64) -> bool {
        value >= self.saturation
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !self.pixels.is_consistent() || !self.weights.is_consistent() {
            return Err(AppError::input(format!(
                "Exposure '{}': pixel buffer does not match its declared size.",
                self.name
            )));
        }
        if !self.pixels.same_extent(&self.weights) {
            return Err(AppError::input(format!(
                "Exposure '{}': pixel and weight maps differ in extent.",
                self.name
            )));
        }
        if !self.psf.is_valid() {
            return Err(AppError::input(format!("Exposure '{}': invalid PSF model.", self.name)));
        }
        if self.to_common.inverse().is_none() {
            return Err(AppError::input(format!(
                "Exposure '{}': singular pixel-to-common transform.",
                self.name
            )));
        }
        Ok(())
    }
}

/// Resolves exposure names to calibrated exposures.
pub trait ExposureStore: Sync {
    fn load(&self, name: &str) -> Result<Arc<Exposure>, AppError>;
}

/// Reads `<root>/<name>.json`.
#[derive(Debug, Clone)]
pub struct JsonExposureStore {
    root: PathBuf,
}

impl JsonExposureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Use `dir` when given, otherwise `SIMPHOT_EXPOSURES` (a `.env` file is honored).
    pub fn from_env(dir: Option<&Path>) -> Result<Self, AppError> {
        if let Some(dir) = dir {
            return Ok(Self::new(dir));
        }
        dotenvy::dotenv().ok();
        let root = std::env::var(EXPOSURES_ENV).map_err(|_| {
            AppError::input(format!(
                "No exposure directory: pass --exposures or set {EXPOSURES_ENV} (.env)."
            ))
        })?;
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    /// Write an exposure where `load` will find it.
    pub fn save(&self, exposure: &Exposure) -> Result<(), AppError> {
        let path = self.path_for(&exposure.name);
        let json = serde_json::to_string(exposure).map_err(|e| {
            AppError::input(format!("Failed to serialize exposure '{}': {e}", exposure.name))
        })?;
        fs::write(&path, json)
            .map_err(|e| AppError::input(format!("Failed to write '{}': {e}", path.display())))
    }
}

impl ExposureStore for JsonExposureStore {
    fn load(&self, name: &str) -> Result<Arc<Exposure>, AppError> {
        let path = self.path_for(name);
        let text = fs::read_to_string(&path).map_err(|e| {
            AppError::input(format!("Failed to read exposure '{}': {e}", path.display()))
        })?;
        let exposure: Exposure = serde_json::from_str(&text).map_err(|e| {
            AppError::input(format!("Invalid exposure file '{}': {e}", path.display()))
        })?;
        if exposure.name != name {
            return Err(AppError::input(format!(
                "Exposure file '{}' declares name '{}'.",
                path.display(),
                exposure.name
            )));
        }
        exposure.validate()?;
        Ok(Arc::new(exposure))
    }
}

/// In-memory store, mostly for tests and library callers that build exposures themselves.
#[derive(Debug, Clone, Default)]
pub struct MemoryExposureStore {
    exposures: HashMap<String, Arc<Exposure>>,
}

impl MemoryExposureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, exposure: Exposure) {
        self.exposures.insert(exposure.name.clone(), Arc::new(exposure));
    }
}

impl ExposureStore for MemoryExposureStore {
    fn load(&self, name: &str) -> Result<Arc<Exposure>, AppError> {
        self.exposures
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::input(format!("Unknown exposure '{name}'.")))
    }
}
