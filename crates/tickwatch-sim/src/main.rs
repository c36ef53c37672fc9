//! Tickwatch host binary.
//!
//! Runs a small factory simulation on a dedicated tick loop thread and
//! exposes its state through the monitoring gateway. It loads
//! configuration, initializes all subsystems, and serves until Ctrl-C.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `tickwatch.yaml` (or `TICKWATCH_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Create the owner-thread bridge and the snapshot cell
//! 4. Start the tick loop thread, which owns the world
//! 5. Register the endpoint catalog
//! 6. Start the gateway (HTTP, `WebSocket`, periodic publisher)
//! 7. Wait for Ctrl-C
//! 8. Stop the gateway, then the tick loop, and log the result

mod catalog;
mod config;
mod error;
mod logging;
mod runner;
mod world;

use std::sync::Arc;

use tickwatch_dispatch::{EndpointRegistry, OwnerThreadBridge};
use tickwatch_gateway::{AppState, spawn_gateway};
use tracing::info;

use crate::config::HostConfig;
use crate::error::HostError;
use crate::runner::World;

/// Application entry point for the host.
///
/// # Errors
///
/// Returns an error if any initialization step fails or the tick loop
/// does not shut down cleanly.
#[tokio::main]
async fn main() -> Result<(), HostError> {
    // 1. Load configuration. Logging is not up yet, so the path is
    //    reported once the subscriber exists.
    let config_path = config::config_path();
    let mut host_config = HostConfig::load_or_default(&config_path)?;

    // 2. Initialize structured logging.
    logging::init(&host_config.logging);
    info!(
        config = %config_path.display(),
        port = host_config.gateway.port,
        tick_interval_ms = host_config.simulation.tick_interval_ms,
        "tickwatch-sim starting"
    );

    // 3. Bridge and snapshot cell.
    let (bridge, receiver) =
        OwnerThreadBridge::<World>::channel(host_config.gateway.bridge_timeout());
    let snapshot = runner::shared_snapshot();

    // 4. Tick loop thread.
    let tick_loop = runner::spawn_tick_loop(
        &host_config.simulation,
        receiver,
        Arc::clone(&snapshot),
    )?;

    // 5. Endpoint catalog.
    let registry = Arc::new(EndpointRegistry::new());
    catalog::register_endpoints(&registry, &snapshot);
    catalog::merge_default_groups(&mut host_config.gateway.groups);
    info!(
        endpoints = registry.len(),
        groups = host_config.gateway.groups.len(),
        all_alias = %host_config.gateway.all_alias,
        "Endpoint catalog ready"
    );

    // 6. Gateway.
    let state = AppState::shared(registry, bridge, &host_config.gateway);
    let gateway = spawn_gateway(&host_config.gateway, state).await?;
    info!(addr = %gateway.local_addr(), "Gateway listening");

    // 7. Wait for Ctrl-C.
    tokio::signal::ctrl_c()
        .await
        .map_err(|source| HostError::Signal { source })?;
    info!("Shutdown signal received");

    // 8. Stop everything.
    gateway.shutdown().await;
    let summary = tokio::task::spawn_blocking(move || tick_loop.stop())
        .await
        .map_err(|e| HostError::TickLoop {
            message: format!("failed to join tick loop: {e}"),
        })??;

    info!(
        total_ticks = summary.total_ticks,
        jobs_run = summary.jobs_run,
        "tickwatch-sim shutdown complete"
    );
    Ok(())
}
