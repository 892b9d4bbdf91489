//! Iris MLOps CLI Module
//!
//! Command-line interface for training candidates and serving the best model.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{tracking_uri, ArtifactLayout, ParamsFile};
use crate::server::{run_server, ReloadPolicy, ServerConfig};
use crate::tracking::{LocalStore, MlflowClient, TrackingTarget};
use crate::training::{run_training, BestModelRecord};

// ─── Styling helpers ───────────────────────────────────────────────────────────

const W: usize = 58; // box inner width

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn line_box_top()    { println!("  {}", dim("┌─────────────────────────────────────────────────────────┐")); }
fn line_box_bottom() { println!("  {}", dim("└─────────────────────────────────────────────────────────┘")); }
fn line_box_sep()    { println!("  {}", dim("├─────────────────────────────────────────────────────────┤")); }

fn line_box(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let pad = W.saturating_sub(visible_len);
    println!("  {}  {}{} {}", dim("│"), content, " ".repeat(pad), dim("│"));
}

fn line_box_center(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let total_pad = W.saturating_sub(visible_len);
    let left = total_pad / 2;
    let right = total_pad - left;
    println!("  {}  {}{}{} {}", dim("│"), " ".repeat(left), content, " ".repeat(right), dim("│"));
}

fn line_box_empty() { line_box(""); }

fn strip_ansi(s: &str) -> String {
    let mut out = String::new();
    let mut in_escape = false;
    for c in s.chars() {
        if c == '\x1b' { in_escape = true; continue; }
        if in_escape { if c == 'm' { in_escape = false; } continue; }
        out.push(c);
    }
    out
}

fn kv(key: &str, val: &str) -> String {
    format!("{} {}", muted(key), val.white())
}

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "iris-mlops")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Train, track and serve an iris random forest classifier")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train every candidate, then persist and register the best model
    Train {
        /// Parameters file
        #[arg(short, long, default_value = "params.yaml")]
        params: PathBuf,

        /// Directory for serialized models
        #[arg(long, default_value = "models")]
        models_dir: PathBuf,

        /// Directory for prediction plots
        #[arg(long, default_value = "plots")]
        plots_dir: PathBuf,

        /// Tracking backend URI (http(s):// server, file: URI or directory)
        #[arg(long, env = "MLFLOW_TRACKING_URI")]
        tracking_uri: Option<String>,
    },

    /// Serve predictions from the best model
    Serve {
        /// Port to listen on [env: API_PORT, default: 8000]
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to [env: API_HOST, default: 0.0.0.0]
        #[arg(long)]
        host: Option<String>,

        /// Model file [env: MODEL_PATH, default: models/model.bin]
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// When to reload the model: per-request or on-change [env: MODEL_RELOAD]
        #[arg(long)]
        reload: Option<ReloadPolicy>,
    },
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_train(
    params_path: &Path,
    models_dir: &Path,
    plots_dir: &Path,
    tracking: Option<&str>,
) -> anyhow::Result<()> {
    section("Train");

    let params = ParamsFile::load(params_path)?;
    step_ok(&format!(
        "Loaded {} ({} candidates)",
        params_path.display(),
        params.train.n_estimators.len()
    ));

    let layout = ArtifactLayout::new(models_dir, plots_dir);
    let uri = tracking.map(str::to_string).unwrap_or_else(tracking_uri);
    let target = TrackingTarget::parse(&uri);
    step_ok(&format!("Tracking to {}", accent(&uri)));

    let start = Instant::now();
    let record = match target {
        TrackingTarget::Remote(url) => {
            let mut client = MlflowClient::new(&url)?;
            run_training(&params, &layout, &mut client).await?
        }
        TrackingTarget::Local(dir) => {
            let mut store = LocalStore::open(dir)?;
            run_training(&params, &layout, &mut store).await?
        }
    };

    print_summary(&record);
    println!("  {:<16} {}", muted("Time"), format!("{:.3}s", start.elapsed().as_secs_f64()).white());
    println!();

    Ok(())
}

fn print_summary(record: &BestModelRecord) {
    section("Candidates");
    println!(
        "  {:<14} {:>10} {:>12} {:>12} {:>10}",
        muted("n_estimators"),
        muted("accuracy"),
        muted("f1_weighted"),
        muted("precision"),
        muted("recall"),
    );
    for (idx, candidate) in record.candidates.iter().enumerate() {
        let marker = if idx == record.best_index { ok("★") } else { dim(" ") };
        println!(
            "  {} {:<12} {:>10.4} {:>12.4} {:>12.4} {:>10.4}",
            marker,
            candidate.n_estimators,
            candidate.report.accuracy,
            candidate.report.f1_weighted,
            candidate.report.precision_weighted,
            candidate.report.recall_weighted,
        );
    }

    section("Best model");
    println!("  {:<16} {}", muted("n_estimators"), record.n_estimators.to_string().white().bold());
    println!("  {:<16} {}", muted("f1_weighted"), format!("{:.4}", record.f1_weighted).white().bold());
    println!("  {:<16} {}", muted("Saved to"), record.model_path.display().to_string().white());
    println!(
        "  {:<16} {}",
        muted("Registered"),
        format!("{} v{}", record.registered.name, record.registered.version).white()
    );
}

pub async fn cmd_serve(
    host: Option<String>,
    port: Option<u16>,
    model: Option<PathBuf>,
    reload: Option<ReloadPolicy>,
) -> anyhow::Result<()> {
    let mut config = ServerConfig::from_env()?;
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(model) = model {
        config.model_path = model;
    }
    if let Some(reload) = reload {
        config.reload = reload;
    }

    let base = format!("http://{}:{}", config.host, config.port);
    println!();
    line_box_top();
    line_box_empty();
    line_box_center(&format!("{}", "Iris Prediction Service".white().bold()));
    line_box_center(&format!("{}", dim(&config.version)));
    line_box_empty();
    line_box_sep();
    line_box_empty();
    line_box(&kv("Health ", &format!("{}/health", base)));
    line_box(&kv("Predict", &format!("{}/predict", base)));
    line_box(&kv("Model  ", &config.model_path.display().to_string()));
    line_box_empty();
    line_box_sep();
    line_box_empty();
    line_box_center(&format!("{}", dim("ctrl+c to stop")));
    line_box_empty();
    line_box_bottom();
    println!();

    run_server(config).await
}
