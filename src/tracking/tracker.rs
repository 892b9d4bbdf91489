//! Experiment tracking interface
//!
//! Track runs, parameters, metrics and artifacts, and register models.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::{MlopsError, Result};
use crate::export::{InputExample, ModelSignature};

/// File name of the model descriptor written by [`TrackingBackend::log_model`]
pub const MLMODEL_FILE: &str = "MLmodel";
/// File name of the input example written by [`TrackingBackend::log_model`]
pub const INPUT_EXAMPLE_FILE: &str = "input_example.json";

/// Handle on a run that has been started
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveRun {
    pub run_id: String,
    pub run_name: String,
    pub experiment_id: String,
    /// Root URI under which the backend stores this run's artifacts
    pub artifact_uri: String,
}

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run is currently running
    Running,
    /// Run completed successfully
    Finished,
    /// Run failed
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
        }
    }
}

/// A version of a registered model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredVersion {
    pub name: String,
    pub version: String,
    pub source: String,
    pub run_id: String,
}

/// A model file plus the descriptive material logged with it
#[derive(Debug, Clone)]
pub struct LoggedModel<'a> {
    /// Artifact directory the model is logged under
    pub artifact_path: &'a str,
    /// Serialized model on local disk
    pub model_file: &'a Path,
    pub signature: Option<&'a ModelSignature>,
    pub input_example: Option<&'a InputExample>,
}

#[derive(Serialize)]
struct MlModelDescriptor<'a> {
    artifact_path: &'a str,
    flavors: serde_json::Value,
    model_uuid: String,
    run_id: &'a str,
    utc_time_created: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<SignatureFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    saved_input_example_info: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct SignatureFields {
    inputs: String,
    outputs: String,
}

/// A backend that records experiments.
///
/// Every call is a single request to the backend; failures are returned
/// to the caller without retries.
#[allow(async_fn_in_trait)]
pub trait TrackingBackend {
    /// Select the experiment new runs are created in, creating it if needed.
    /// Returns the experiment id.
    async fn set_experiment(&mut self, name: &str) -> Result<String>;

    async fn start_run(&mut self, run_name: &str) -> Result<ActiveRun>;

    async fn set_tag(&mut self, run: &ActiveRun, key: &str, value: &str) -> Result<()>;

    async fn log_param(&mut self, run: &ActiveRun, key: &str, value: &str) -> Result<()>;

    async fn log_metric(&mut self, run: &ActiveRun, key: &str, value: f64) -> Result<()>;

    /// Store a local file as `<artifact_path>/<file name>` (or at the
    /// artifact root when `artifact_path` is `None`)
    async fn log_artifact(&mut self, run: &ActiveRun, local_path: &Path, artifact_path: Option<&str>) -> Result<()>;

    async fn end_run(&mut self, run: &ActiveRun, status: RunStatus) -> Result<()>;

    /// Register the model logged at `artifact_path` of `run` under `name`
    async fn register_model(&mut self, name: &str, run: &ActiveRun, artifact_path: &str) -> Result<RegisteredVersion>;

    /// Log a model directory: the model file, an `MLmodel` descriptor and,
    /// when given, an input example
    async fn log_model(&mut self, run: &ActiveRun, model: &LoggedModel<'_>) -> Result<()> {
        let file_name = model
            .model_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                MlopsError::TrackingError(format!("invalid model path {}", model.model_file.display()))
            })?
            .to_string();

        let staging = tempfile::tempdir()?;
        let mut files = vec![staging.path().join(&file_name)];
        fs::copy(model.model_file, &files[0])?;

        let signature = match model.signature {
            Some(sig) => Some(SignatureFields {
                inputs: sig.inputs_json()?,
                outputs: sig.outputs_json()?,
            }),
            None => None,
        };

        let saved_input_example_info = match model.input_example {
            Some(example) => {
                let path = staging.path().join(INPUT_EXAMPLE_FILE);
                fs::write(&path, example.to_json()?)?;
                files.push(path);
                Some(json!({
                    "artifact_path": INPUT_EXAMPLE_FILE,
                    "type": "dataframe",
                    "pandas_orient": "split",
                }))
            }
            None => None,
        };

        let flavors = json!({
            "iris_mlops": {
                "model_file": file_name,
                "format": "bincode",
                "code_version": env!("CARGO_PKG_VERSION"),
            }
        });

        let descriptor = MlModelDescriptor {
            artifact_path: model.artifact_path,
            flavors: flavors.clone(),
            model_uuid: uuid::Uuid::new_v4().simple().to_string(),
            run_id: &run.run_id,
            utc_time_created: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            signature,
            saved_input_example_info,
        };
        let mlmodel_path = staging.path().join(MLMODEL_FILE);
        fs::write(&mlmodel_path, serde_yaml::to_string(&descriptor)?)?;
        files.push(mlmodel_path);

        for file in &files {
            self.log_artifact(run, file, Some(model.artifact_path)).await?;
        }

        let history = json!([{
            "run_id": run.run_id,
            "artifact_path": model.artifact_path,
            "utc_time_created": descriptor.utc_time_created,
            "flavors": flavors,
            "model_uuid": descriptor.model_uuid,
        }]);
        self.set_tag(run, "mlflow.log-model.history", &history.to_string()).await?;

        debug!(run_id = %run.run_id, artifact_path = model.artifact_path, files = files.len(), "Logged model");
        Ok(())
    }
}
