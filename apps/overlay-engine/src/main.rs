//! Overlay Engine Binary
//!
//! Runs one calculation for a use case and prints the result tree.
//! Transport adapters (HTTP) live outside this crate; the binary is the
//! operational entry point for schedulers and ad-hoc runs.
//!
//! # Usage
//!
//! ```bash
//! OVERLAY_USE_CASE=uc-strategy cargo run --bin overlay-engine
//! ```
//!
//! # Environment Variables
//!
//! - `OVERLAY_USE_CASE`: use case id to calculate (required)
//! - `OVERLAY_CONFIG`: config file path (default: overlay.yaml, optional)
//! - `OVERLAY_PNL_DATE`: business date (default: today, UTC)
//! - `RUST_LOG`: log filter (overrides the configured level)

use std::process::ExitCode;

use anyhow::{Context, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use overlay_engine::application::use_cases::NodeView;
use overlay_engine::config::{Config, load_config};
use overlay_engine::observability::init_logging;
use overlay_engine::{
    CalculateCommand, Container, GetResultsUseCase, RunCalculationUseCase,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match load_configuration() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err:#}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.observability.logging);

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "calculation failed");
            ExitCode::FAILURE
        }
    }
}

fn load_configuration() -> anyhow::Result<Config> {
    match std::env::var("OVERLAY_CONFIG") {
        Ok(path) => load_config(Some(&path)).with_context(|| format!("loading config {path}")),
        // No explicit config: fall back to defaults when the default file
        // is absent.
        Err(_) => match load_config(None) {
            Ok(config) => Ok(config),
            Err(overlay_engine::config::ConfigError::ReadError { .. }) => Ok(Config::default()),
            Err(other) => Err(other.into()),
        },
    }
}

async fn run(config: &Config) -> anyhow::Result<()> {
    let use_case_id =
        std::env::var("OVERLAY_USE_CASE").context("OVERLAY_USE_CASE is required")?;
    let pnl_date = std::env::var("OVERLAY_PNL_DATE")
        .unwrap_or_else(|_| chrono::Utc::now().format("%Y-%m-%d").to_string());

    let container = Container::from_config(config)
        .await
        .context("opening overlay database")?;

    let calculate =
        RunCalculationUseCase::new(container.stores.clone(), config.engine.pipeline_config());
    let outcome = calculate
        .execute(CalculateCommand {
            use_case_id: use_case_id.clone(),
            pnl_date,
            version_tag: None,
            triggered_by: "cli".to_string(),
            cancel: CancellationToken::new(),
        })
        .await
        .map_err(|e| anyhow!("{}: {e}", e.reason()))?;

    info!(
        run_id = %outcome.run.run_id,
        duration_ms = outcome.run.duration_ms.unwrap_or(0),
        "run completed"
    );
    if let Some(anomaly) = &outcome.run.anomaly {
        info!(%anomaly, "reconciliation anomaly");
    }

    let tree = GetResultsUseCase::new(container.stores.clone())
        .execute(&use_case_id, Some(&outcome.run.run_id))
        .await
        .map_err(|e| anyhow!("{}: {e}", e.reason()))?;
    print_node(&tree.root);
    if let Some(orphan) = &tree.orphan {
        println!("      ORPHAN  plug={orphan}");
    }
    Ok(())
}

fn print_node(node: &NodeView) {
    let indent = "  ".repeat(node.depth as usize);
    let marker = if node.is_override { "*" } else { " " };
    println!(
        "{indent}{marker}{}  natural={}  adjusted={}  plug={}",
        node.node_id, node.natural, node.adjusted, node.plug
    );
    for child in &node.children {
        print_node(child);
    }
}
