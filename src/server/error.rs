//! Error types for the server

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::error::MlopsError;

#[derive(Error, Debug)]
pub enum ServerError {
    /// No model file at the configured path
    #[error("{0}")]
    ModelNotFound(String),

    /// The model could not be loaded or failed to predict
    #[error("{0}")]
    InferenceFailure(String),

    /// The request body did not match the expected schema
    #[error("{msg}")]
    ValidationFailure { kind: &'static str, msg: String },
}

impl From<MlopsError> for ServerError {
    fn from(err: MlopsError) -> Self {
        match err {
            MlopsError::ModelNotFound(_) => ServerError::ModelNotFound(err.to_string()),
            other => ServerError::InferenceFailure(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        let kind = match &rejection {
            JsonRejection::JsonDataError(_) => "value_error",
            JsonRejection::JsonSyntaxError(_) => "json_invalid",
            JsonRejection::MissingJsonContentType(_) => "content_type",
            JsonRejection::BytesRejection(_) => "body_read",
            _ => "invalid_request",
        };
        ServerError::ValidationFailure {
            kind,
            msg: rejection.body_text(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match self {
            ServerError::ValidationFailure { kind, msg } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "detail": [{ "type": kind, "msg": msg }] })),
            )
                .into_response(),
            ServerError::ModelNotFound(msg) | ServerError::InferenceFailure(msg) => {
                tracing::error!(detail = %msg, "Prediction failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": msg })),
                )
                    .into_response()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
