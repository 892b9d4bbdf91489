//! Experiment Tracking Module
//!
//! Records training runs (parameters, metrics, artifacts) and registers
//! models, either on an MLflow tracking server or in a local directory.

mod mlflow;
mod storage;
mod tracker;

pub use mlflow::MlflowClient;
pub use storage::{ExperimentRecord, LocalStore, RunRecord};
pub use tracker::{
    ActiveRun, LoggedModel, RegisteredVersion, RunStatus, TrackingBackend, INPUT_EXAMPLE_FILE,
    MLMODEL_FILE,
};

use std::path::PathBuf;

/// Where a tracking URI points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingTarget {
    /// An MLflow tracking server
    Remote(String),
    /// A local directory
    Local(PathBuf),
}

impl TrackingTarget {
    /// `http(s)://` URIs select a server; `file:` URIs and bare paths a
    /// local store
    pub fn parse(uri: &str) -> Self {
        let uri = uri.trim();
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return TrackingTarget::Remote(uri.to_string());
        }
        let path = uri
            .strip_prefix("file://")
            .or_else(|| uri.strip_prefix("file:"))
            .unwrap_or(uri);
        TrackingTarget::Local(PathBuf::from(path))
    }
}
