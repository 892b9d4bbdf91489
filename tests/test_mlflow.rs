//! Integration test: Training pipeline against an in-process MLflow REST server

use axum::body::Bytes;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use iris_mlops::config::{ArtifactLayout, ParamsFile};
use iris_mlops::tracking::MlflowClient;
use iris_mlops::training::{candidate_run_name, run_training};
use iris_mlops::MlopsError;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct MockRun {
    run_id: String,
    name: String,
    status: String,
    tags: HashMap<String, String>,
    params: HashMap<String, String>,
    metrics: HashMap<String, f64>,
}

/// Recorded server-side state; experiments named `s3-*` hand out
/// artifact roots the proxy cannot serve
#[derive(Debug, Default)]
struct MockServer {
    experiments: BTreeMap<String, String>,
    experiment_creates: usize,
    runs: Vec<MockRun>,
    artifacts: BTreeMap<String, usize>,
    registered_models: Vec<String>,
    /// (name, version, source)
    versions: Vec<(String, String, String)>,
}

type Shared = Arc<Mutex<MockServer>>;
type Reply = (StatusCode, Json<Value>);

fn ok(body: Value) -> Reply {
    (StatusCode::OK, Json(body))
}

fn api_error(status: StatusCode, code: &str, message: &str) -> Reply {
    (status, Json(json!({ "error_code": code, "message": message })))
}

fn text(body: &Value, key: &str) -> String {
    body[key].as_str().unwrap_or_default().to_string()
}

async fn get_experiment(State(state): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Reply {
    let name = query.get("experiment_name").cloned().unwrap_or_default();
    if name == "forbidden" {
        return api_error(StatusCode::FORBIDDEN, "PERMISSION_DENIED", "no access to experiment");
    }
    let server = state.lock().unwrap();
    match server.experiments.get(&name) {
        Some(id) => ok(json!({ "experiment": { "experiment_id": id, "name": name } })),
        None => api_error(StatusCode::NOT_FOUND, "RESOURCE_DOES_NOT_EXIST", "no such experiment"),
    }
}

async fn create_experiment(State(state): State<Shared>, Json(body): Json<Value>) -> Reply {
    let mut server = state.lock().unwrap();
    let id = (server.experiments.len() + 1).to_string();
    server.experiments.insert(text(&body, "name"), id.clone());
    server.experiment_creates += 1;
    ok(json!({ "experiment_id": id }))
}

async fn create_run(State(state): State<Shared>, Json(body): Json<Value>) -> Reply {
    let mut server = state.lock().unwrap();
    let experiment_id = text(&body, "experiment_id");
    let run_id = format!("run{}", server.runs.len() + 1);
    let s3_backed = server
        .experiments
        .iter()
        .any(|(name, id)| *id == experiment_id && name.starts_with("s3-"));
    let artifact_uri = if s3_backed {
        format!("s3://bucket/{}/{}/artifacts", experiment_id, run_id)
    } else {
        format!("mlflow-artifacts:/{}/{}/artifacts", experiment_id, run_id)
    };

    let tags: HashMap<String, String> = body["tags"]
        .as_array()
        .map(|tags| tags.iter().map(|t| (text(t, "key"), text(t, "value"))).collect())
        .unwrap_or_default();
    server.runs.push(MockRun {
        run_id: run_id.clone(),
        name: text(&body, "run_name"),
        status: "RUNNING".to_string(),
        tags,
        ..Default::default()
    });

    ok(json!({
        "run": { "info": {
            "run_id": run_id,
            "experiment_id": experiment_id,
            "artifact_uri": artifact_uri,
            "status": "RUNNING",
        } }
    }))
}

fn with_run(state: &Shared, body: &Value, update: impl FnOnce(&mut MockRun)) -> Reply {
    let mut server = state.lock().unwrap();
    let run_id = text(body, "run_id");
    match server.runs.iter_mut().find(|r| r.run_id == run_id) {
        Some(run) => {
            update(run);
            ok(json!({}))
        }
        None => api_error(StatusCode::NOT_FOUND, "RESOURCE_DOES_NOT_EXIST", "no such run"),
    }
}

async fn set_tag(State(state): State<Shared>, Json(body): Json<Value>) -> Reply {
    with_run(&state, &body, |run| {
        run.tags.insert(text(&body, "key"), text(&body, "value"));
    })
}

async fn log_param(State(state): State<Shared>, Json(body): Json<Value>) -> Reply {
    with_run(&state, &body, |run| {
        run.params.insert(text(&body, "key"), text(&body, "value"));
    })
}

async fn log_metric(State(state): State<Shared>, Json(body): Json<Value>) -> Reply {
    with_run(&state, &body, |run| {
        run.metrics.insert(text(&body, "key"), body["value"].as_f64().unwrap_or(f64::NAN));
    })
}

async fn update_run(State(state): State<Shared>, Json(body): Json<Value>) -> Reply {
    with_run(&state, &body, |run| run.status = text(&body, "status"))
}

async fn create_registered_model(State(state): State<Shared>, Json(body): Json<Value>) -> Reply {
    let mut server = state.lock().unwrap();
    let name = text(&body, "name");
    if server.registered_models.contains(&name) {
        return api_error(StatusCode::BAD_REQUEST, "RESOURCE_ALREADY_EXISTS", "model already exists");
    }
    server.registered_models.push(name.clone());
    ok(json!({ "registered_model": { "name": name } }))
}

async fn create_model_version(State(state): State<Shared>, Json(body): Json<Value>) -> Reply {
    let mut server = state.lock().unwrap();
    let name = text(&body, "name");
    let version = (server.versions.iter().filter(|v| v.0 == name).count() + 1).to_string();
    server.versions.push((name.clone(), version.clone(), text(&body, "source")));
    ok(json!({ "model_version": { "name": name, "version": version } }))
}

async fn upload_artifact(State(state): State<Shared>, UrlPath(path): UrlPath<String>, body: Bytes) -> StatusCode {
    state.lock().unwrap().artifacts.insert(path, body.len());
    StatusCode::OK
}

async fn spawn_mock_server() -> (String, Shared) {
    let state = Shared::default();
    let app = Router::new()
        .route("/api/2.0/mlflow/experiments/get-by-name", get(get_experiment))
        .route("/api/2.0/mlflow/experiments/create", post(create_experiment))
        .route("/api/2.0/mlflow/runs/create", post(create_run))
        .route("/api/2.0/mlflow/runs/set-tag", post(set_tag))
        .route("/api/2.0/mlflow/runs/log-parameter", post(log_param))
        .route("/api/2.0/mlflow/runs/log-metric", post(log_metric))
        .route("/api/2.0/mlflow/runs/update", post(update_run))
        .route("/api/2.0/mlflow/registered-models/create", post(create_registered_model))
        .route("/api/2.0/mlflow/model-versions/create", post(create_model_version))
        .route("/api/2.0/mlflow-artifacts/artifacts/*path", put(upload_artifact))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

fn params(experiment: &str, n_estimators: &[usize]) -> ParamsFile {
    let yaml = format!(
        "train:\n  n_estimators: {:?}\n  random_state: 42\n  test_size: 0.2\n\
         tracking:\n  experiment_name: {}\n",
        n_estimators, experiment
    );
    ParamsFile::from_yaml(&yaml).unwrap()
}

fn layout(root: &Path) -> ArtifactLayout {
    ArtifactLayout::new(root.join("models"), root.join("plots"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_training_tracks_runs_on_mlflow_server() {
    let (url, state) = spawn_mock_server().await;
    let dir = tempfile::tempdir().unwrap();
    let mut client = MlflowClient::new(&url).unwrap();

    let record = run_training(&params("iris-classification", &[5, 10]), &layout(dir.path()), &mut client)
        .await
        .unwrap();

    {
        let server = state.lock().unwrap();
        assert_eq!(server.experiments.get("iris-classification").map(String::as_str), Some("1"));
        assert_eq!(server.runs.len(), 3);

        for (run, n) in server.runs.iter().zip([5usize, 10]) {
            assert_eq!(run.name, candidate_run_name(n));
            assert_eq!(run.tags["mlflow.runName"], run.name);
            assert_eq!(run.status, "FINISHED");
            assert_eq!(run.params["model"], "RandomForestClassifier");
            assert_eq!(run.params["n_estimators"], n.to_string());
            assert_eq!(run.params["criterion"], "gini");
            for metric in ["accuracy", "f1_weighted", "precision_weighted", "recall_weighted"] {
                assert!(run.metrics.contains_key(metric), "missing {}", metric);
            }

            let root = format!("1/{}/artifacts", run.run_id);
            assert!(server.artifacts[&format!("{}/artifacts/plot_{}.png", root, n)] > 0);
            assert!(server.artifacts[&format!("{}/forest_model/model_{}.bin", root, n)] > 0);
            assert!(server.artifacts.contains_key(&format!("{}/forest_model/MLmodel", root)));
        }

        let best = &server.runs[2];
        assert_eq!(best.run_id, record.run_id);
        assert_eq!(best.name, "best model");
        assert_eq!(best.status, "FINISHED");
        assert_eq!(best.tags["best_model"], "true");
        assert!((best.metrics["best_f1_weighted"] - record.f1_weighted).abs() < 1e-12);
        for file in ["model.bin", "MLmodel", "input_example.json"] {
            let key = format!("1/{}/artifacts/model/{}", best.run_id, file);
            assert!(server.artifacts.contains_key(&key), "missing {}", key);
        }

        assert_eq!(server.registered_models, vec!["iris_random_forest".to_string()]);
    }

    assert_eq!(record.registered.version, "1");
    assert_eq!(
        record.registered.source,
        format!("mlflow-artifacts:/1/{}/artifacts/model", record.run_id)
    );
    assert!(dir.path().join("models/model.bin").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retraining_reuses_experiment_and_registered_model() {
    let (url, state) = spawn_mock_server().await;
    let dir = tempfile::tempdir().unwrap();

    let mut client = MlflowClient::new(&url).unwrap();
    run_training(&params("iris-classification", &[5]), &layout(dir.path()), &mut client)
        .await
        .unwrap();

    let mut client = MlflowClient::new(&url).unwrap();
    let record = run_training(&params("iris-classification", &[5]), &layout(dir.path()), &mut client)
        .await
        .unwrap();

    assert_eq!(record.registered.version, "2");
    let server = state.lock().unwrap();
    assert_eq!(server.experiment_creates, 1);
    assert_eq!(server.registered_models.len(), 1);
    assert_eq!(server.versions.len(), 2);
    assert_eq!(server.runs.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unserved_artifact_root_fails_run() {
    let (url, state) = spawn_mock_server().await;
    let dir = tempfile::tempdir().unwrap();
    let mut client = MlflowClient::new(&url).unwrap();

    let err = run_training(&params("s3-backed", &[5, 10]), &layout(dir.path()), &mut client)
        .await
        .unwrap_err();

    assert!(matches!(err, MlopsError::TrackingError(_)));
    assert!(!dir.path().join("models/model.bin").exists());

    let server = state.lock().unwrap();
    assert_eq!(server.runs.len(), 1);
    assert_eq!(server.runs[0].status, "FAILED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_experiment_lookup_error_is_reported() {
    let (url, state) = spawn_mock_server().await;
    let dir = tempfile::tempdir().unwrap();
    let mut client = MlflowClient::new(&url).unwrap();

    let err = run_training(&params("forbidden", &[5]), &layout(dir.path()), &mut client)
        .await
        .unwrap_err();

    match err {
        MlopsError::TrackingError(msg) => assert!(msg.contains("PERMISSION_DENIED"), "{}", msg),
        other => panic!("expected tracking error, got {:?}", other),
    }
    let server = state.lock().unwrap();
    assert_eq!(server.experiment_creates, 0);
    assert!(server.runs.is_empty());
}

#[tokio::test]
async fn test_unreachable_server_aborts_training() {
    let dir = tempfile::tempdir().unwrap();
    let mut client = MlflowClient::new("http://127.0.0.1:9").unwrap();

    let err = run_training(&params("iris-classification", &[5]), &layout(dir.path()), &mut client)
        .await
        .unwrap_err();

    assert!(matches!(err, MlopsError::TrackingError(_)));
    assert!(!dir.path().join("models/model.bin").exists());
}
