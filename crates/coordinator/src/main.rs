//! Pinpool Coordinator - Main Entry Point
//!
//! Replays the configured client ids through the worker pool once, then
//! drains and exits. Ctrl+C stops dispatching early.

use pinpool_common::{PinpoolConfig, PinpoolError, Result, METRICS};
use pinpool_coordinator::{replay_client_ids, Orchestrator};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "pinpool_coordinator={level},pinpool_worker={level},pinpool_common={level}",
                    level = config.observability.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .init();

    info!(
        "Starting Pinpool: workers={}, handler={}, messages={}, shutdown_timeout={:?}",
        config.pool.size,
        config.handler.kind,
        config.source.client_ids.len(),
        config.shutdown_timeout()
    );

    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);
    orchestrator.start(replay_client_ids(&config.source.client_ids))?;

    // Ctrl+C stops dispatching; workers still drain what is queued
    let signal_task = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                orchestrator.request_shutdown();
            }
        })
    };

    let timeout = config.shutdown_timeout();
    let waiter = Arc::clone(&orchestrator);
    let report = tokio::task::spawn_blocking(move || waiter.await_termination(timeout))
        .await
        .map_err(|e| PinpoolError::internal(format!("shutdown task failed: {}", e)))??;
    signal_task.abort();

    info!("Termination report: {}", serde_json::to_string(&report)?);

    if config.observability.enable_metrics {
        info!("Final metrics:\n{}", METRICS.gather());
    }

    if report.forced {
        error!(
            "Shutdown timed out: {} messages abandoned",
            report.abandoned()
        );
    } else if !report.is_complete() {
        warn!(
            "{} messages were dropped before reaching a worker",
            report.dispatch.dropped
        );
    }

    info!("Pinpool Coordinator shutdown complete");
    Ok(())
}

fn load_config() -> Result<PinpoolConfig> {
    let config_path =
        std::env::var("PINPOOL_CONFIG").unwrap_or_else(|_| "configs/pinpool.yaml".to_string());

    if Path::new(&config_path).exists() {
        PinpoolConfig::from_file(config_path)
    } else {
        PinpoolConfig::from_env()
    }
}
