//! perf-monitor - performance monitoring daemon
//!
//! Collects host metrics on an interval, runs the processing and analysis
//! pipeline and serves the query API plus Prometheus metrics over HTTP.

use anyhow::{Context, Result};
use monitor_lib::{JsonLinesStore, MemoryStore, MonitoringOrchestrator, SnapshotStore};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod sources;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting perf-monitor");

    let config = config::DaemonConfig::load()?;
    info!(instance = %config.instance, api_port = config.api_port, "Monitor configured");

    let store: Arc<dyn SnapshotStore> = match &config.data_dir {
        Some(dir) => Arc::new(
            JsonLinesStore::open_with_retention(dir, &config.monitor.retention)
                .await
                .with_context(|| format!("Failed to open store at {}", dir.display()))?,
        ),
        None => Arc::new(MemoryStore::default()),
    };

    let monitor = Arc::new(MonitoringOrchestrator::new(config.monitor.clone(), store));
    if config.enable_proc_source {
        monitor.register_source(
            "system",
            Arc::new(sources::ProcSource::with_proc_path(&config.proc_path)),
        );
    }
    monitor.start().await?;

    let app_state = Arc::new(api::AppState::new(monitor.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = api_handle => {
            match result {
                Ok(Ok(())) => warn!("API server exited"),
                Ok(Err(e)) => warn!(error = %e, "API server failed"),
                Err(e) => warn!(error = %e, "API server task panicked"),
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("SIGINT received");
        }
    }

    monitor.stop().await?;
    info!("Shutting down");

    Ok(())
}
