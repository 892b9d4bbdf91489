//! MLflow tracking server client
//!
//! Talks to the REST API (`/api/2.0/mlflow/...`). Artifacts are uploaded
//! through the server's artifact proxy, so runs must use an
//! `mlflow-artifacts:` artifact root.

use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::tracker::{ActiveRun, RegisteredVersion, RunStatus, TrackingBackend};
use crate::error::{MlopsError, Result};

const REQUEST_TIMEOUT_SECS: u64 = 30;
const PROXIED_ARTIFACT_SCHEME: &str = "mlflow-artifacts:";

/// Error body returned by the tracking server
#[derive(Debug, Clone)]
struct ApiError {
    status: StatusCode,
    error_code: String,
    message: String,
}

impl ApiError {
    fn into_error(self, endpoint: &str) -> MlopsError {
        MlopsError::TrackingError(format!(
            "{} failed with {} ({}): {}",
            endpoint, self.status, self.error_code, self.message
        ))
    }
}

/// Client for an MLflow tracking server
#[derive(Debug, Clone)]
pub struct MlflowClient {
    base_url: String,
    client: reqwest::Client,
    experiment_id: Option<String>,
}

impl MlflowClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            experiment_id: None,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow/{}", self.base_url, path)
    }

    /// Send a request; transport failures are `Err`, API failures `Ok(Err)`
    async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<std::result::Result<Value, ApiError>> {
        let mut request = self.client.request(method, self.endpoint(path)).query(query);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Ok(json!({})));
            }
            return Ok(Ok(serde_json::from_str(&text)?));
        }

        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        Ok(Err(ApiError {
            status,
            error_code: parsed["error_code"].as_str().unwrap_or("UNKNOWN").to_string(),
            message: parsed["message"].as_str().map(str::to_string).unwrap_or(text),
        }))
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.call(Method::POST, path, &[], Some(&body))
            .await?
            .map_err(|e| e.into_error(path))
    }

    fn current_experiment(&self) -> Result<&str> {
        self.experiment_id
            .as_deref()
            .ok_or_else(|| MlopsError::TrackingError("no experiment selected".to_string()))
    }

    /// URL the artifact proxy accepts uploads on for `artifact_uri`
    fn artifact_upload_url(&self, artifact_uri: &str, relative: &str) -> Result<String> {
        let root = proxied_artifact_root(artifact_uri).ok_or_else(|| {
            MlopsError::TrackingError(format!(
                "artifact root {} is not served by the tracking server",
                artifact_uri
            ))
        })?;
        Ok(format!(
            "{}/api/2.0/mlflow-artifacts/artifacts/{}/{}",
            self.base_url, root, relative
        ))
    }
}

/// Path below the artifact proxy for a `mlflow-artifacts:` URI, with or
/// without an authority component
fn proxied_artifact_root(artifact_uri: &str) -> Option<String> {
    let rest = artifact_uri.strip_prefix(PROXIED_ARTIFACT_SCHEME)?;
    let rest = match rest.strip_prefix("//") {
        Some(with_authority) => with_authority.split_once('/').map_or("", |(_, path)| path),
        None => rest,
    };
    Some(rest.trim_matches('/').to_string())
}

fn string_at(value: &Value, pointer: &str) -> Result<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| MlopsError::TrackingError(format!("response is missing {}", pointer)))
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl TrackingBackend for MlflowClient {
    async fn set_experiment(&mut self, name: &str) -> Result<String> {
        let lookup = self
            .call(
                Method::GET,
                "experiments/get-by-name",
                &[("experiment_name", name)],
                None,
            )
            .await?;

        let experiment_id = match lookup {
            Ok(body) => string_at(&body, "/experiment/experiment_id")?,
            Err(e) if e.error_code == "RESOURCE_DOES_NOT_EXIST" => {
                let created = self.post("experiments/create", json!({ "name": name })).await?;
                let id = string_at(&created, "/experiment_id")?;
                debug!(experiment = name, experiment_id = %id, "Created experiment");
                id
            }
            Err(e) => return Err(e.into_error("experiments/get-by-name")),
        };

        self.experiment_id = Some(experiment_id.clone());
        Ok(experiment_id)
    }

    async fn start_run(&mut self, run_name: &str) -> Result<ActiveRun> {
        let experiment_id = self.current_experiment()?.to_string();
        let body = json!({
            "experiment_id": experiment_id,
            "run_name": run_name,
            "start_time": now_millis(),
            "tags": [{ "key": "mlflow.runName", "value": run_name }],
        });
        let created = self.post("runs/create", body).await?;

        Ok(ActiveRun {
            run_id: string_at(&created, "/run/info/run_id")?,
            run_name: run_name.to_string(),
            experiment_id,
            artifact_uri: string_at(&created, "/run/info/artifact_uri")?,
        })
    }

    async fn set_tag(&mut self, run: &ActiveRun, key: &str, value: &str) -> Result<()> {
        self.post(
            "runs/set-tag",
            json!({ "run_id": run.run_id, "key": key, "value": value }),
        )
        .await?;
        Ok(())
    }

    async fn log_param(&mut self, run: &ActiveRun, key: &str, value: &str) -> Result<()> {
        self.post(
            "runs/log-parameter",
            json!({ "run_id": run.run_id, "key": key, "value": value }),
        )
        .await?;
        Ok(())
    }

    async fn log_metric(&mut self, run: &ActiveRun, key: &str, value: f64) -> Result<()> {
        self.post(
            "runs/log-metric",
            json!({
                "run_id": run.run_id,
                "key": key,
                "value": value,
                "timestamp": now_millis(),
                "step": 0,
            }),
        )
        .await?;
        Ok(())
    }

    async fn log_artifact(&mut self, run: &ActiveRun, local_path: &Path, artifact_path: Option<&str>) -> Result<()> {
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MlopsError::TrackingError(format!("invalid artifact path {}", local_path.display())))?;
        let relative = match artifact_path {
            Some(dir) => format!("{}/{}", dir.trim_matches('/'), file_name),
            None => file_name.to_string(),
        };

        let url = self.artifact_upload_url(&run.artifact_uri, &relative)?;
        let bytes = tokio::fs::read(local_path).await?;
        let response = self.client.put(&url).body(bytes).send().await?;
        if !response.status().is_success() {
            return Err(MlopsError::TrackingError(format!(
                "artifact upload of {} failed with {}",
                relative,
                response.status()
            )));
        }

        debug!(run_id = %run.run_id, artifact = %relative, "Uploaded artifact");
        Ok(())
    }

    async fn end_run(&mut self, run: &ActiveRun, status: RunStatus) -> Result<()> {
        self.post(
            "runs/update",
            json!({
                "run_id": run.run_id,
                "status": status.as_str(),
                "end_time": now_millis(),
            }),
        )
        .await?;
        Ok(())
    }

    async fn register_model(&mut self, name: &str, run: &ActiveRun, artifact_path: &str) -> Result<RegisteredVersion> {
        match self
            .call(Method::POST, "registered-models/create", &[], Some(&json!({ "name": name })))
            .await?
        {
            Ok(_) => debug!(model = name, "Created registered model"),
            Err(e) if e.error_code == "RESOURCE_ALREADY_EXISTS" => {}
            Err(e) => return Err(e.into_error("registered-models/create")),
        }

        let source = format!("{}/{}", run.artifact_uri.trim_end_matches('/'), artifact_path);
        let created = self
            .post(
                "model-versions/create",
                json!({ "name": name, "source": source, "run_id": run.run_id }),
            )
            .await?;

        Ok(RegisteredVersion {
            name: name.to_string(),
            version: string_at(&created, "/model_version/version")?,
            source,
            run_id: run.run_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxied_artifact_root() {
        assert_eq!(
            proxied_artifact_root("mlflow-artifacts:/1/abc/artifacts").as_deref(),
            Some("1/abc/artifacts")
        );
        assert_eq!(
            proxied_artifact_root("mlflow-artifacts://tracking:5000/1/abc/artifacts/").as_deref(),
            Some("1/abc/artifacts")
        );
        assert_eq!(proxied_artifact_root("s3://bucket/1/abc/artifacts"), None);
        assert_eq!(proxied_artifact_root("/mlruns/1/abc/artifacts"), None);
    }

    #[test]
    fn test_upload_url() {
        let client = MlflowClient::new("http://localhost:5000/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:5000");

        let url = client
            .artifact_upload_url("mlflow-artifacts:/0/run1/artifacts", "model/model.bin")
            .unwrap();
        assert_eq!(
            url,
            "http://localhost:5000/api/2.0/mlflow-artifacts/artifacts/0/run1/artifacts/model/model.bin"
        );
        assert!(client.artifact_upload_url("file:///tmp/x", "a.png").is_err());
    }

    #[test]
    fn test_string_at() {
        let body = json!({ "run": { "info": { "run_id": "abc" } } });
        assert_eq!(string_at(&body, "/run/info/run_id").unwrap(), "abc");
        assert!(string_at(&body, "/run/info/artifact_uri").is_err());
    }

    #[tokio::test]
    async fn test_start_run_requires_experiment() {
        let mut client = MlflowClient::new("http://127.0.0.1:9").unwrap();
        assert!(client.start_run("run").await.is_err());
    }
}
