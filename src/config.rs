//! Training configuration
//!
//! Candidate hyperparameters come from the `train` section of a YAML
//! parameters file; the tracking backend is chosen through the
//! environment, following MLflow conventions.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MlopsError, Result};
use crate::training::{Criterion, MaxFeatures};

/// Environment variable holding the tracking backend URI
pub const TRACKING_URI_ENV: &str = "MLFLOW_TRACKING_URI";
/// Tracking URI used when the environment does not provide one
pub const DEFAULT_TRACKING_URI: &str = "http://127.0.0.1:5000";
/// File name of the canonical best model inside the models directory
pub const BEST_MODEL_FILE: &str = "model.bin";

/// Contents of the parameters file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamsFile {
    pub train: TrainParams,
    #[serde(default)]
    pub tracking: TrackingParams,
}

/// Candidate ensemble sizes plus the shared seed and split fraction.
///
/// The remaining keys tune every candidate forest alike and are optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainParams {
    /// Ensemble sizes to evaluate, in order
    pub n_estimators: Vec<usize>,
    /// Seed for the split and every forest
    pub random_state: u64,
    /// Fraction of rows held out for evaluation
    pub test_size: f64,
    /// Depth limit per tree, unlimited when absent
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: usize,
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,
    /// `sqrt`, `log2` or `all`
    #[serde(default)]
    pub max_features: MaxFeatures,
    /// `gini` or `entropy`
    #[serde(default)]
    pub criterion: Criterion,
    #[serde(default = "default_bootstrap")]
    pub bootstrap: bool,
}

fn default_min_samples_split() -> usize {
    2
}

fn default_min_samples_leaf() -> usize {
    1
}

fn default_bootstrap() -> bool {
    true
}

/// Names used on the tracking backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingParams {
    #[serde(default = "default_experiment_name")]
    pub experiment_name: String,
    #[serde(default = "default_registered_model_name")]
    pub registered_model_name: String,
}

fn default_experiment_name() -> String {
    "iris-classification".to_string()
}

fn default_registered_model_name() -> String {
    "iris_random_forest".to_string()
}

impl Default for TrackingParams {
    fn default() -> Self {
        Self {
            experiment_name: default_experiment_name(),
            registered_model_name: default_registered_model_name(),
        }
    }
}

impl ParamsFile {
    /// Load and parse a parameters file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            MlopsError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    /// Parse parameters from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}

/// Resolve the tracking URI from the environment
pub fn tracking_uri() -> String {
    std::env::var(TRACKING_URI_ENV).unwrap_or_else(|_| DEFAULT_TRACKING_URI.to_string())
}

/// Where the trainer writes models and plots
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    pub models_dir: PathBuf,
    pub plots_dir: PathBuf,
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self::new("models", "plots")
    }
}

impl ArtifactLayout {
    pub fn new(models_dir: impl Into<PathBuf>, plots_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            plots_dir: plots_dir.into(),
        }
    }

    /// Create both directories if they are missing
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.models_dir)?;
        fs::create_dir_all(&self.plots_dir)?;
        Ok(())
    }

    /// The well-known path served by the prediction endpoint
    pub fn best_model_path(&self) -> PathBuf {
        self.models_dir.join(BEST_MODEL_FILE)
    }

    pub fn candidate_model_path(&self, n_estimators: usize) -> PathBuf {
        self.models_dir.join(format!("model_{}.bin", n_estimators))
    }

    pub fn plot_path(&self, n_estimators: usize) -> PathBuf {
        self.plots_dir.join(format!("plot_{}.png", n_estimators))
    }
}
