//! Error types.
//!
//! - `AppError` aborts the whole run and carries the process exit code
//! - `FitError` is a per-object failure: the batch driver reports it and moves on
//! - `NightFitError` covers numeric failures of the per-night aggregation

use thiserror::Error;

/// Malformed input: light-file syntax, missing reference, duplicate exposure, unreadable files.
pub const EXIT_INPUT: u8 = 2;
/// Nothing left to process.
pub const EXIT_NO_DATA: u8 = 3;
/// Numeric or consistency failure.
pub const EXIT_FIT: u8 = 4;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(EXIT_INPUT, message)
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

/// Why the simultaneous fit of one object failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("light curve has no measurements")]
    EmptyLightCurve,
    #[error("no exposure carries a flux unknown after matching to the reference")]
    NoValidExposures,
    #[error("singular normal matrix ({n_params} parameters, {n_pixels} pixels)")]
    Singular { n_params: usize, n_pixels: usize },
    #[error("exposure {exposure}: {reason}")]
    ExposureModel { exposure: String, reason: String },
}

/// Numeric failures of the per-night GLS aggregation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NightFitError {
    #[error("no fitted flux left to aggregate")]
    Empty,
    #[error("inconsistent dimensions: {0}")]
    Dimension(String),
    #[error("flux covariance matrix is not positive definite")]
    SingularCovariance,
    #[error("night normal matrix is singular")]
    SingularNightMatrix,
}

impl From<NightFitError> for AppError {
    fn from(err: NightFitError) -> Self {
        AppError::new(EXIT_FIT, format!("Night fit failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn night_errors_map_to_fit_exit_code() {
        let err: AppError = NightFitError::SingularCovariance.into();
        assert_eq!(err.exit_code(), EXIT_FIT);
        assert!(err.to_string().contains("positive definite"));
    }

    #[test]
    fn fit_error_messages_name_the_exposure() {
        let err = FitError::ExposureModel {
            exposure: "r_0042".to_string(),
            reason: "vignette outside image".to_string(),
        };
        assert_eq!(err.to_string(), "exposure r_0042: vignette outside image");
    }
}
