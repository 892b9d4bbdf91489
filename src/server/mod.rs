//! Prediction Server Module
//!
//! Serves the best trained model over HTTP: a liveness endpoint and a
//! single-flower prediction endpoint.

mod api;
mod error;
mod handlers;
mod state;

pub use api::create_router;
pub use error::ServerError;
pub use handlers::{HealthResponse, PredictRequest, PredictResponse};
pub use state::{AppState, ModelStore, ReloadPolicy};

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{MlopsError, Result};

/// Version reported when `MODEL_VERSION` is not set
pub const DEFAULT_VERSION: &str = "v1.0.0";
/// Model path used when `MODEL_PATH` is not set
pub const DEFAULT_MODEL_PATH: &str = "models/model.bin";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub model_path: PathBuf,
    /// Version string reported by both endpoints
    pub version: String,
    pub reload: ReloadPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            version: DEFAULT_VERSION.to_string(),
            reload: ReloadPolicy::PerRequest,
        }
    }
}

impl ServerConfig {
    /// Read `API_HOST`, `API_PORT`, `MODEL_PATH`, `MODEL_VERSION` and
    /// `MODEL_RELOAD`, falling back to the defaults for unset variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let port = match std::env::var("API_PORT") {
            Ok(p) => p
                .parse()
                .map_err(|_| MlopsError::ConfigError(format!("API_PORT must be a port number, got '{}'", p)))?,
            Err(_) => defaults.port,
        };
        let reload = match std::env::var("MODEL_RELOAD") {
            Ok(policy) => policy.parse()?,
            Err(_) => defaults.reload,
        };

        Ok(Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port,
            model_path: std::env::var("MODEL_PATH").map(PathBuf::from).unwrap_or(defaults.model_path),
            version: std::env::var("MODEL_VERSION").unwrap_or(defaults.version),
            reload,
        })
    }
}

/// Start the server with the given configuration
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let start_time = chrono::Utc::now();

    if !config.model_path.exists() {
        warn!(
            model_path = %config.model_path.display(),
            "Model file not found, /predict will fail until a model is trained"
        );
    }

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(
        address = %addr,
        model_path = %config.model_path.display(),
        version = %config.version,
        reload = ?config.reload,
        started_at = %start_time.to_rfc3339(),
        "Prediction server starting"
    );

    let state = Arc::new(AppState::new(config));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, pid = std::process::id(), "Server listening and ready to accept connections");

    // Graceful shutdown on ctrl+c
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install ctrl+c handler");
            std::future::pending::<()>().await;
        }
        let stop_time = chrono::Utc::now();
        let uptime = stop_time.signed_duration_since(start_time);
        info!(
            stopped_at = %stop_time.to_rfc3339(),
            uptime_secs = uptime.num_seconds(),
            "Shutdown signal received, stopping server gracefully"
        );
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shut down cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.model_path, PathBuf::from("models/model.bin"));
        assert_eq!(config.version, "v1.0.0");
        assert_eq!(config.reload, ReloadPolicy::PerRequest);
    }
}
