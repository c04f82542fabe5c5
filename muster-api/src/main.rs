//! MUSTER API Server Entry Point
//!
//! Bootstraps configuration, wires the engine over an in-memory store,
//! spawns the background sweeper, and starts the Axum HTTP server.

use std::sync::Arc;

use muster_api::jobs::{sweeper_task, SweeperConfig};
use muster_api::{create_api_router, ApiConfig, ApiError, ApiResult, AppState};
use muster_core::MusterConfig;
use muster_storage::MemoryStorage;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ApiResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let core_config = MusterConfig::from_env();
    let api_config = ApiConfig::from_env();
    let sweeper_config = SweeperConfig::from_env();

    let storage = Arc::new(MemoryStorage::new());
    let state = AppState::new(storage, &core_config, api_config.rate_limit.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(sweeper_task(
        state.engine.clone(),
        sweeper_config,
        shutdown_rx,
    ));

    let app = create_api_router(state);

    let addr = api_config.bind_addr()?;
    tracing::info!(%addr, "Starting MUSTER API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Ok(metrics) = sweeper.await {
        let snapshot = metrics.snapshot();
        tracing::info!(cycles = snapshot.cycles, "Sweeper drained");
    }

    Ok(())
}
