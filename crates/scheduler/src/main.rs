//! Tarema scheduler service
//!
//! Hosts one placement engine for a workflow execution. The workflow
//! engine reports task terminations and asks for placements over HTTP.

use anyhow::{Context, Result};
use scheduler_lib::{
    export::CsvExporter,
    health::{components, HealthRegistry},
    StructuredLogger, Tarema,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const SCHEDULER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting tarema-scheduler");

    let config = config::SchedulerConfig::load()?;
    info!(
        execution = %config.execution,
        expected_nodes = config.engine.expected_nodes,
        "Scheduler configured"
    );

    let health_registry = HealthRegistry::new();
    for name in components::ALL {
        health_registry.register(name).await;
    }

    let mut engine = Tarema::new(config.execution.clone(), config.engine.clone())
        .context("Failed to build placement engine")?;
    if let Some(dir) = &config.export_dir {
        engine = engine.with_exporter(CsvExporter::new(dir)?);
        info!(dir = %dir.display(), "Exporting labelling history");
    }

    let status = engine.status();
    let logger = StructuredLogger::new(config.execution.clone());
    logger.log_startup(
        SCHEDULER_VERSION,
        status.estimator.as_deref().unwrap_or("none"),
        status.labelling_mode.as_str(),
    );

    let app_state = Arc::new(api::AppState::new(Arc::new(engine), health_registry.clone()));
    app_state.refresh_health().await;

    // Mark scheduler as ready after initialization
    health_registry.set_ready(true).await;

    api::serve(config.api_port, app_state, async {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::warn!("Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    })
    .await?;

    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    Ok(())
}
