//! Iris MLOps - Main Entry Point
//!
//! Trains and tracks iris classifiers, or serves the best one over HTTP.

use clap::Parser;
use iris_mlops::cli::{cmd_serve, cmd_train, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iris_mlops=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train { params, models_dir, plots_dir, tracking_uri } => {
            cmd_train(&params, &models_dir, &plots_dir, tracking_uri.as_deref()).await?;
        }
        Commands::Serve { port, host, model, reload } => {
            cmd_serve(host, port, model, reload).await?;
        }
    }

    Ok(())
}
