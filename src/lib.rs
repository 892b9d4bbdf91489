//! Iris MLOps - train, track and serve an iris classifier
//!
//! This crate provides:
//! - A random forest classifier with deterministic, parallel tree fitting
//! - A training loop that evaluates candidate ensemble sizes, records every
//!   run with an experiment tracker and keeps the best model
//! - An HTTP service answering health and prediction requests
//!
//! # Modules
//!
//! - [`data`] - Bundled iris dataset and stratified splitting
//! - [`training`] - Trees, forests, metrics and the candidate loop
//! - [`tracking`] - MLflow and local-directory experiment tracking
//! - [`export`] - Model files, signatures and input examples
//! - [`visualization`] - Prediction scatter plots
//! - [`server`] - HTTP prediction service
//! - [`cli`] - Command-line interface

// Core error handling and configuration
pub mod error;
pub mod config;

// ML
pub mod data;
pub mod training;
pub mod export;
pub mod visualization;

// Tracking
pub mod tracking;

// Services
pub mod server;
pub mod cli;

pub use error::{MlopsError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{MlopsError, Result};
    pub use crate::config::{ArtifactLayout, ParamsFile, TrainParams, TrackingParams};
    pub use crate::data::{load_iris, train_test_split, Dataset, TrainTestSplit};
    pub use crate::training::{run_training, BestModelRecord, ClassificationReport, RandomForest};
    pub use crate::export::{load_model, save_model, LoadedModel, ModelMetadata};
    pub use crate::tracking::{LocalStore, MlflowClient, TrackingBackend, TrackingTarget};
    pub use crate::server::{create_router, AppState, ReloadPolicy, ServerConfig};
}
