//! # Newsroom Data Layer - Main Entry Point
//!
//! Brings the data layer up from configuration, checks the backends and
//! keeps the pools alive until the process is asked to stop.
//!
//! Configuration comes from the YAML file named by `NEWSROOM_CONFIG`, or
//! from defaults plus environment variables when it is unset.

use newsroom_data::observability::init_logging;
use newsroom_data::{DataLayer, DataLayerConfig, DataResult};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> DataResult<()> {
    let config = match std::env::var("NEWSROOM_CONFIG") {
        Ok(path) => DataLayerConfig::load_from_file(&path).await?,
        Err(_) => DataLayerConfig::from_env()?,
    };

    init_logging(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting newsroom data layer");

    let layer = match DataLayer::connect(config).await {
        Ok(layer) => layer,
        Err(e) => {
            error!(error = %e, "Failed to start data layer");
            return Err(e);
        }
    };

    let health = layer.health_check().await;
    if health.is_healthy() {
        info!(?health, "Data layer ready");
    } else {
        // Cache failures are tolerated at runtime; keep serving
        warn!(?health, "Data layer started with unhealthy backends");
    }

    wait_for_shutdown().await?;

    layer.shutdown().await;
    info!("Newsroom data layer shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT
async fn wait_for_shutdown() -> DataResult<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}
