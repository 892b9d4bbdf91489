//! File-system tracking backend
//!
//! Layout under the store root:
//!
//! ```text
//! experiments.json
//! <experiment_id>/<run_id>/run.json
//! <experiment_id>/<run_id>/artifacts/...
//! registry/<model name>/version-<n>.json
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::tracker::{ActiveRun, RegisteredVersion, RunStatus, TrackingBackend};
use crate::error::{MlopsError, Result};

/// An experiment known to the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentRecord {
    pub experiment_id: String,
    pub name: String,
    /// Creation time, milliseconds since the epoch
    pub created_at: i64,
}

/// Everything recorded about one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub run_name: String,
    pub experiment_id: String,
    pub status: RunStatus,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub tags: BTreeMap<String, String>,
    /// Artifact paths relative to the run's artifact root
    pub artifacts: Vec<String>,
}

/// Local file system tracking store
#[derive(Debug, Clone)]
pub struct LocalStore {
    base_dir: PathBuf,
    experiment_id: Option<String>,
}

impl LocalStore {
    /// Open (creating if needed) a store rooted at `base_dir`
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            experiment_id: None,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn experiments_file(&self) -> PathBuf {
        self.base_dir.join("experiments.json")
    }

    fn run_dir(&self, experiment_id: &str, run_id: &str) -> PathBuf {
        self.base_dir.join(experiment_id).join(run_id)
    }

    fn registry_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join("registry").join(name)
    }

    pub fn load_experiments(&self) -> Result<Vec<ExperimentRecord>> {
        let path = self.experiments_file();
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    fn save_experiments(&self, experiments: &[ExperimentRecord]) -> Result<()> {
        fs::write(self.experiments_file(), serde_json::to_string_pretty(experiments)?)?;
        Ok(())
    }

    pub fn load_run(&self, experiment_id: &str, run_id: &str) -> Result<RunRecord> {
        let path = self.run_dir(experiment_id, run_id).join("run.json");
        if !path.exists() {
            return Err(MlopsError::TrackingError(format!("run {} not found", run_id)));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    fn save_run(&self, record: &RunRecord) -> Result<()> {
        let dir = self.run_dir(&record.experiment_id, &record.run_id);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("run.json"), serde_json::to_string_pretty(record)?)?;
        Ok(())
    }

    fn update_run(&self, run: &ActiveRun, update: impl FnOnce(&mut RunRecord)) -> Result<()> {
        let mut record = self.load_run(&run.experiment_id, &run.run_id)?;
        update(&mut record);
        self.save_run(&record)
    }

    /// All runs of an experiment, oldest first
    pub fn list_runs(&self, experiment_id: &str) -> Result<Vec<RunRecord>> {
        let dir = self.base_dir.join(experiment_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.path().join("run.json").exists() {
                let run_id = entry.file_name().to_string_lossy().into_owned();
                runs.push(self.load_run(experiment_id, &run_id)?);
            }
        }
        runs.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.run_id.cmp(&b.run_id)));
        Ok(runs)
    }

    /// Registered versions of a model, in version order
    pub fn model_versions(&self, name: &str) -> Result<Vec<RegisteredVersion>> {
        let dir = self.registry_dir(name);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut versions: Vec<RegisteredVersion> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                versions.push(serde_json::from_str(&fs::read_to_string(path)?)?);
            }
        }
        versions.sort_by_key(|v| v.version.parse::<u64>().unwrap_or(u64::MAX));
        Ok(versions)
    }

    fn current_experiment(&self) -> Result<&str> {
        self.experiment_id
            .as_deref()
            .ok_or_else(|| MlopsError::TrackingError("no experiment selected".to_string()))
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl TrackingBackend for LocalStore {
    async fn set_experiment(&mut self, name: &str) -> Result<String> {
        let mut experiments = self.load_experiments()?;

        let existing = experiments
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.experiment_id.clone());

        let experiment_id = match existing {
            Some(id) => id,
            None => {
                let next_id = experiments
                    .iter()
                    .filter_map(|e| e.experiment_id.parse::<u64>().ok())
                    .max()
                    .map_or(0, |id| id + 1)
                    .to_string();
                experiments.push(ExperimentRecord {
                    experiment_id: next_id.clone(),
                    name: name.to_string(),
                    created_at: now_millis(),
                });
                self.save_experiments(&experiments)?;
                debug!(experiment = name, experiment_id = %next_id, "Created experiment");
                next_id
            }
        };

        self.experiment_id = Some(experiment_id.clone());
        Ok(experiment_id)
    }

    async fn start_run(&mut self, run_name: &str) -> Result<ActiveRun> {
        let experiment_id = self.current_experiment()?.to_string();
        let run_id = uuid::Uuid::new_v4().simple().to_string();

        let artifacts_dir = self.run_dir(&experiment_id, &run_id).join("artifacts");
        fs::create_dir_all(&artifacts_dir)?;

        let mut tags = BTreeMap::new();
        tags.insert("mlflow.runName".to_string(), run_name.to_string());
        self.save_run(&RunRecord {
            run_id: run_id.clone(),
            run_name: run_name.to_string(),
            experiment_id: experiment_id.clone(),
            status: RunStatus::Running,
            start_time: now_millis(),
            end_time: None,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            tags,
            artifacts: Vec::new(),
        })?;

        Ok(ActiveRun {
            run_id,
            run_name: run_name.to_string(),
            experiment_id,
            artifact_uri: artifacts_dir.display().to_string(),
        })
    }

    async fn set_tag(&mut self, run: &ActiveRun, key: &str, value: &str) -> Result<()> {
        self.update_run(run, |r| {
            r.tags.insert(key.to_string(), value.to_string());
        })
    }

    async fn log_param(&mut self, run: &ActiveRun, key: &str, value: &str) -> Result<()> {
        self.update_run(run, |r| {
            r.params.insert(key.to_string(), value.to_string());
        })
    }

    async fn log_metric(&mut self, run: &ActiveRun, key: &str, value: f64) -> Result<()> {
        self.update_run(run, |r| {
            r.metrics.insert(key.to_string(), value);
        })
    }

    async fn log_artifact(&mut self, run: &ActiveRun, local_path: &Path, artifact_path: Option<&str>) -> Result<()> {
        let file_name = local_path
            .file_name()
            .ok_or_else(|| MlopsError::TrackingError(format!("invalid artifact path {}", local_path.display())))?
            .to_string_lossy()
            .into_owned();

        let mut target_dir = self.run_dir(&run.experiment_id, &run.run_id).join("artifacts");
        let relative = match artifact_path {
            Some(dir) => {
                target_dir = target_dir.join(dir);
                format!("{}/{}", dir.trim_end_matches('/'), file_name)
            }
            None => file_name.clone(),
        };
        fs::create_dir_all(&target_dir)?;
        fs::copy(local_path, target_dir.join(&file_name))?;

        self.update_run(run, |r| {
            if !r.artifacts.contains(&relative) {
                r.artifacts.push(relative);
            }
        })
    }

    async fn end_run(&mut self, run: &ActiveRun, status: RunStatus) -> Result<()> {
        self.update_run(run, |r| {
            r.status = status;
            r.end_time = Some(now_millis());
        })
    }

    async fn register_model(&mut self, name: &str, run: &ActiveRun, artifact_path: &str) -> Result<RegisteredVersion> {
        let dir = self.registry_dir(name);
        fs::create_dir_all(&dir)?;

        let next = self
            .model_versions(name)?
            .iter()
            .filter_map(|v| v.version.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;

        let version = RegisteredVersion {
            name: name.to_string(),
            version: next.to_string(),
            source: format!("{}/{}", run.artifact_uri, artifact_path),
            run_id: run.run_id.clone(),
        };
        fs::write(
            dir.join(format!("version-{}.json", next)),
            serde_json::to_string_pretty(&version)?,
        )?;

        debug!(model = name, version = next, "Registered model version");
        Ok(version)
    }
}
