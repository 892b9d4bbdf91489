//! HTTP request handlers

use std::sync::Arc;
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::error::{Result, ServerError};
use super::state::AppState;

/// Body of `POST /predict`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictRequest {
    pub sepal_length: f64,
    pub sepal_width: f64,
    pub petal_length: f64,
    pub petal_width: f64,
}

impl PredictRequest {
    /// Features in model column order
    pub fn to_row(&self) -> Array2<f64> {
        Array2::from_shape_fn((1, 4), |(_, j)| match j {
            0 => self.sepal_length,
            1 => self.sepal_width,
            2 => self.petal_length,
            _ => self.petal_width,
        })
    }
}

/// Body returned by `POST /predict`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictResponse {
    #[serde(rename = "Inference")]
    pub inference: usize,
    #[serde(rename = "Probabilities")]
    pub probabilities: Vec<f64>,
    #[serde(rename = "Version")]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        version: state.config.version.clone(),
    })
}

/// Classify one flower with the model currently on disk
pub async fn predict(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>> {
    let Json(request) = payload?;
    let loaded = state.models.get().await?;

    let row = request.to_row();
    let labels = loaded.model.predict(&row)?;
    let proba = loaded.model.predict_proba(&row)?;

    let inference = *labels
        .first()
        .ok_or_else(|| ServerError::InferenceFailure("model returned no prediction".to_string()))?;

    Ok(Json(PredictResponse {
        inference,
        probabilities: proba.row(0).to_vec(),
        version: state.config.version.clone(),
    }))
}
