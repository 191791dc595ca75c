//! Error type for the calibration engine.

use thiserror::Error;

use crate::camera::CameraModelError;

pub type CalibrationResult<T> = Result<T, CalibrationError>;

#[derive(Debug, Error)]
pub enum CalibrationError {
    /// An id or argument that does not refer to existing data
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not allowed in the current engine state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Camera model error: {0}")]
    Camera(#[from] CameraModelError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

impl From<std::io::Error> for CalibrationError {
    fn from(err: std::io::Error) -> Self {
        CalibrationError::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for CalibrationError {
    fn from(err: serde_yaml::Error) -> Self {
        CalibrationError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CalibrationError {
    fn from(err: serde_json::Error) -> Self {
        CalibrationError::Io(format!("JSON serialization failed: {err}"))
    }
}

impl From<rayon::ThreadPoolBuildError> for CalibrationError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        CalibrationError::ThreadPool(err.to_string())
    }
}
