//! Error types for the iris-mlops pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, MlopsError>;

/// Main error type shared by the trainer, tracker and server
#[derive(Error, Debug)]
pub enum MlopsError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Inference error: {0}")]
    InferenceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Model not found at path: {}. Train it first.", .0.display())]
    ModelNotFound(PathBuf),

    #[error("Checksum mismatch for model file {}", .0.display())]
    ChecksumMismatch(PathBuf),

    #[error("Tracking error: {0}")]
    TrackingError(String),

    #[error("Plot error: {0}")]
    PlotError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<polars::error::PolarsError> for MlopsError {
    fn from(err: polars::error::PolarsError) -> Self {
        MlopsError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for MlopsError {
    fn from(err: serde_json::Error) -> Self {
        MlopsError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for MlopsError {
    fn from(err: serde_yaml::Error) -> Self {
        MlopsError::ConfigError(err.to_string())
    }
}

impl From<bincode::Error> for MlopsError {
    fn from(err: bincode::Error) -> Self {
        MlopsError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for MlopsError {
    fn from(err: ndarray::ShapeError) -> Self {
        MlopsError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for MlopsError {
    fn from(err: reqwest::Error) -> Self {
        MlopsError::TrackingError(err.to_string())
    }
}

impl From<image::ImageError> for MlopsError {
    fn from(err: image::ImageError) -> Self {
        MlopsError::PlotError(err.to_string())
    }
}
