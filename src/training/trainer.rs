//! Candidate training loop
//!
//! Fits one forest per configured ensemble size on a shared stratified
//! split, tracks every candidate, and persists and registers the one with
//! the highest weighted F1.

use ndarray::Axis;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::{ArtifactLayout, ParamsFile, TrainParams};
use crate::data::{load_iris, train_test_split, Dataset, TrainTestSplit};
use crate::error::{MlopsError, Result};
use crate::export::{save_model, InputExample, ModelMetadata, ModelSignature};
use crate::tracking::{ActiveRun, LoggedModel, RegisteredVersion, RunStatus, TrackingBackend};
use crate::visualization::ScatterPlot;

use super::metrics::ClassificationReport;
use super::random_forest::RandomForest;

/// Value of the `model` parameter on every tracked run
pub const MODEL_KIND: &str = "RandomForestClassifier";
/// Name of the run that carries the selected model
pub const BEST_RUN_NAME: &str = "best model";
/// Artifact directory of the plot on candidate runs
pub const PLOT_ARTIFACT_PATH: &str = "artifacts";
/// Artifact directory of the model on candidate runs
pub const CANDIDATE_MODEL_ARTIFACT_PATH: &str = "forest_model";
/// Artifact directory of the model on the best-model run
pub const BEST_MODEL_ARTIFACT_PATH: &str = "model";

/// Prediction plot title and axis captions
pub const PLOT_TITLE: &str = "Результаты классификации ирисов";
pub const PLOT_X_LABEL: &str = "Параметр 1";
pub const PLOT_Y_LABEL: &str = "Параметр 2";

/// Run name for the candidate with `n_estimators` trees
pub fn candidate_run_name(n_estimators: usize) -> String {
    format!("{} n_estimators={}", MODEL_KIND, n_estimators)
}

/// A forest with `n_estimators` trees configured from the `train` section
pub fn build_forest(train: &TrainParams, n_estimators: usize) -> RandomForest {
    let mut model = RandomForest::new(n_estimators)
        .with_random_state(train.random_state)
        .with_min_samples_split(train.min_samples_split)
        .with_min_samples_leaf(train.min_samples_leaf)
        .with_max_features(train.max_features)
        .with_criterion(train.criterion)
        .with_bootstrap(train.bootstrap);
    if let Some(depth) = train.max_depth {
        model = model.with_max_depth(depth);
    }
    model
}

/// Shared forest hyperparameters as tracked run parameters
fn forest_params(train: &TrainParams) -> Vec<(&'static str, String)> {
    vec![
        ("criterion", train.criterion.to_string()),
        ("max_depth", train.max_depth.map_or_else(|| "None".to_string(), |d| d.to_string())),
        ("max_features", train.max_features.to_string()),
        ("min_samples_split", train.min_samples_split.to_string()),
        ("min_samples_leaf", train.min_samples_leaf.to_string()),
        ("bootstrap", train.bootstrap.to_string()),
    ]
}

/// Outcome of one candidate
#[derive(Debug, Clone)]
pub struct CandidateResult {
    pub n_estimators: usize,
    pub report: ClassificationReport,
    pub model_path: PathBuf,
    pub plot_path: PathBuf,
    pub run_id: String,
}

/// The selected model and where it ended up
#[derive(Debug, Clone)]
pub struct BestModelRecord {
    pub n_estimators: usize,
    pub f1_weighted: f64,
    /// Canonical model file served by the prediction endpoint
    pub model_path: PathBuf,
    pub run_id: String,
    pub registered: RegisteredVersion,
    /// Every candidate, in evaluation order
    pub candidates: Vec<CandidateResult>,
    /// Position of the selected candidate in `candidates`
    pub best_index: usize,
}

/// Train every candidate, then persist and register the best one.
///
/// Ties on weighted F1 keep the earlier candidate. Any error aborts the
/// whole run; the tracked run in progress, if any, is marked failed.
pub async fn run_training<B: TrackingBackend>(
    params: &ParamsFile,
    layout: &ArtifactLayout,
    tracker: &mut B,
) -> Result<BestModelRecord> {
    let train = &params.train;
    if train.n_estimators.is_empty() {
        return Err(MlopsError::ConfigError(
            "train.n_estimators must list at least one candidate".to_string(),
        ));
    }

    let dataset = load_iris()?;
    info!(
        rows = dataset.n_samples(),
        features = dataset.n_features(),
        classes = dataset.classes().len(),
        "Loaded dataset"
    );
    let split = train_test_split(&dataset.features, &dataset.labels, train.test_size, train.random_state)?;
    info!(
        train_rows = split.y_train.len(),
        test_rows = split.y_test.len(),
        test_size = train.test_size,
        "Split dataset"
    );

    layout.ensure_dirs()?;
    let experiment_id = tracker.set_experiment(&params.tracking.experiment_name).await?;
    info!(experiment = %params.tracking.experiment_name, experiment_id = %experiment_id, "Tracking experiment");

    let mut candidates: Vec<CandidateResult> = Vec::with_capacity(train.n_estimators.len());
    let mut best: Option<(usize, RandomForest, ModelMetadata)> = None;

    for &n_estimators in &train.n_estimators {
        let (result, model, metadata) =
            train_candidate(n_estimators, train, &dataset, &split, layout, tracker).await?;

        let improves = match &best {
            Some((idx, _, _)) => result.report.f1_weighted > candidates[*idx].report.f1_weighted,
            None => true,
        };
        candidates.push(result);
        if improves {
            best = Some((candidates.len() - 1, model, metadata));
        }
    }

    let (best_idx, best_model, best_metadata) = best
        .ok_or_else(|| MlopsError::TrainingError("no candidate was trained".to_string()))?;
    let best_n = candidates[best_idx].n_estimators;
    let best_f1 = candidates[best_idx].report.f1_weighted;

    let model_path = layout.best_model_path();
    save_model(&best_model, &best_metadata, &model_path)?;
    info!(n_estimators = best_n, f1_weighted = best_f1, path = %model_path.display(), "Saved best model");

    let predictions = best_model.predict(&split.x_train)?;
    let signature = ModelSignature::infer(&dataset.feature_names, &split.x_train, &predictions)?;
    let input_example = InputExample::head(&dataset.feature_names, &split.x_train, 1);

    let run = tracker.start_run(BEST_RUN_NAME).await?;
    let logged = async {
        tracker.set_tag(&run, "best_model", "true").await?;
        tracker.log_param(&run, "model", MODEL_KIND).await?;
        tracker.log_param(&run, "n_estimators", &best_n.to_string()).await?;
        for (key, value) in forest_params(train) {
            tracker.log_param(&run, key, &value).await?;
        }
        tracker.log_metric(&run, "best_f1_weighted", best_f1).await?;
        tracker
            .log_model(
                &run,
                &LoggedModel {
                    artifact_path: BEST_MODEL_ARTIFACT_PATH,
                    model_file: &model_path,
                    signature: Some(&signature),
                    input_example: Some(&input_example),
                },
            )
            .await?;
        tracker
            .register_model(&params.tracking.registered_model_name, &run, BEST_MODEL_ARTIFACT_PATH)
            .await
    }
    .await;
    let registered = finish_run(tracker, &run, logged).await?;

    info!(
        model = %registered.name,
        version = %registered.version,
        run_id = %run.run_id,
        "Registered best model"
    );

    Ok(BestModelRecord {
        n_estimators: best_n,
        f1_weighted: best_f1,
        model_path,
        run_id: run.run_id,
        registered,
        candidates,
        best_index: best_idx,
    })
}

async fn train_candidate<B: TrackingBackend>(
    n_estimators: usize,
    train: &TrainParams,
    dataset: &Dataset,
    split: &TrainTestSplit,
    layout: &ArtifactLayout,
    tracker: &mut B,
) -> Result<(CandidateResult, RandomForest, ModelMetadata)> {
    let mut model = build_forest(train, n_estimators);
    model.fit(&split.x_train, &split.y_train)?;

    let y_pred = model.predict(&split.x_test)?;
    let report = ClassificationReport::compute(&split.y_test, &y_pred)?;

    let plot_path = layout.plot_path(n_estimators);
    ScatterPlot::from_columns(
        split.x_test.index_axis(Axis(1), 0),
        split.x_test.index_axis(Axis(1), 1),
        &y_pred,
    )?
    .with_title(PLOT_TITLE)
    .with_axis_labels(PLOT_X_LABEL, PLOT_Y_LABEL)
    .save(&plot_path)?;

    let metadata = ModelMetadata::for_forest(&model, &dataset.feature_names)
        .with_metric("accuracy", report.accuracy)
        .with_metric("f1_weighted", report.f1_weighted)
        .with_metric("precision_weighted", report.precision_weighted)
        .with_metric("recall_weighted", report.recall_weighted);
    let model_path = layout.candidate_model_path(n_estimators);
    save_model(&model, &metadata, &model_path)?;

    info!(
        n_estimators,
        accuracy = report.accuracy,
        f1_weighted = report.f1_weighted,
        precision_weighted = report.precision_weighted,
        recall_weighted = report.recall_weighted,
        model_path = %model_path.display(),
        plot_path = %plot_path.display(),
        "Evaluated candidate"
    );

    let run = tracker.start_run(&candidate_run_name(n_estimators)).await?;
    let logged = async {
        tracker.log_param(&run, "model", MODEL_KIND).await?;
        tracker.log_param(&run, "n_estimators", &n_estimators.to_string()).await?;
        for (key, value) in forest_params(train) {
            tracker.log_param(&run, key, &value).await?;
        }
        tracker.log_metric(&run, "accuracy", report.accuracy).await?;
        tracker.log_metric(&run, "f1_weighted", report.f1_weighted).await?;
        tracker.log_metric(&run, "precision_weighted", report.precision_weighted).await?;
        tracker.log_metric(&run, "recall_weighted", report.recall_weighted).await?;
        tracker.log_artifact(&run, &plot_path, Some(PLOT_ARTIFACT_PATH)).await?;
        tracker
            .log_model(
                &run,
                &LoggedModel {
                    artifact_path: CANDIDATE_MODEL_ARTIFACT_PATH,
                    model_file: &model_path,
                    signature: None,
                    input_example: None,
                },
            )
            .await
    }
    .await;
    finish_run(tracker, &run, logged).await?;

    let result = CandidateResult {
        n_estimators,
        report,
        model_path,
        plot_path,
        run_id: run.run_id,
    };
    Ok((result, model, metadata))
}

/// Close a run as finished, or as failed (best effort) and pass the error on
async fn finish_run<B: TrackingBackend, T>(tracker: &mut B, run: &ActiveRun, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            tracker.end_run(run, RunStatus::Finished).await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(end_err) = tracker.end_run(run, RunStatus::Failed).await {
                warn!(run_id = %run.run_id, error = %end_err, "Could not mark run as failed");
            }
            Err(e)
        }
    }
}
