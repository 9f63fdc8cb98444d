//! # creditsync Main Entry Point
//!
//! Loads configuration, prepares the database, and runs the HTTP server next
//! to the maintenance worker until Ctrl-C.

use std::sync::Arc;

use creditsync::{
    config::ConfigLoader,
    db,
    maintenance::MaintenanceWorker,
    server::{AppState, run_server},
    telemetry,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from layered env files and variables
    let config_loader = ConfigLoader::new();
    let config = Arc::new(config_loader.load()?);

    telemetry::init_tracing(&config)?;
    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let connection = db::init_pool(&config).await?;
    db::run_migrations(&connection).await?;

    let state = AppState::new(Arc::clone(&config), connection);
    let shutdown = CancellationToken::new();

    let worker = MaintenanceWorker::new(
        Arc::clone(&config),
        Arc::clone(&state.db),
        Arc::clone(&state.hub),
        Arc::clone(&state.limiter),
    );
    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

    let signal_token = shutdown.clone();
    let hub = Arc::clone(&state.hub);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
        }
        signal_token.cancel();
        // Open SSE streams would otherwise hold graceful shutdown open
        hub.disconnect_all();
    });

    let served = run_server(state, shutdown.clone()).await;
    shutdown.cancel();
    if let Err(err) = worker_handle.await {
        tracing::error!(error = ?err, "Maintenance worker panicked");
    }

    served
}
