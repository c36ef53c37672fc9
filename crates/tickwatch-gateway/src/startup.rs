//! Gateway startup helper for embedding in a host process.
//!
//! [`spawn_gateway`] binds the listener eagerly, then runs the HTTP server
//! and the subscription publisher on background Tokio tasks. The host keeps
//! the returned [`GatewayHandle`] and calls
//! [`shutdown`](GatewayHandle::shutdown) when it stops.
//!
//! # Usage
//!
//! ```rust,ignore
//! let state = AppState::shared(registry, bridge, &config.gateway);
//! let gateway = spawn_gateway(&config.gateway, state).await?;
//! tokio::signal::ctrl_c().await?;
//! gateway.shutdown().await;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::GatewayConfig;
use crate::publisher::spawn_publisher;
use crate::server::{self, ServerError};
use crate::state::AppState;

/// Errors that can occur when spawning the gateway.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind or start.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// Running gateway tasks.
#[derive(Debug)]
pub struct GatewayHandle {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<()>,
    publisher: JoinHandle<()>,
}

impl GatewayHandle {
    /// The address the server actually bound, useful when the configured
    /// port was `0`.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the publisher, let in-flight requests finish, and wait for the
    /// server task to exit.
    pub async fn shutdown(self) {
        self.publisher.abort();
        if self.shutdown.send(()).is_err() {
            warn!("gateway server already stopped");
        }
        if let Err(e) = self.server.await {
            error!(error = %e, "gateway server task failed");
        }
        info!("gateway stopped");
    }
}

/// Bind the gateway and start it on background tasks.
///
/// # Errors
///
/// Returns [`StartupError::Server`] if the address is invalid or the port
/// cannot be bound. Binding happens before anything is spawned.
pub async fn spawn_gateway<S: Clone + 'static>(
    config: &GatewayConfig,
    state: Arc<AppState<S>>,
) -> Result<GatewayHandle, StartupError> {
    let listener = server::bind(config).await?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| ServerError::Bind(format!("listener has no address: {e}")))?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let publisher = spawn_publisher(Arc::clone(&state), config.publish_interval());
    let server = tokio::spawn(async move {
        let shutdown = async {
            // A dropped sender also means stop.
            shutdown_rx.await.ok();
        };
        if let Err(e) = server::serve(listener, state, shutdown).await {
            error!(error = %e, "Gateway server exited with error");
        }
    });

    info!(%local_addr, "Gateway spawned on background task");

    Ok(GatewayHandle {
        local_addr,
        shutdown: shutdown_tx,
        server,
        publisher,
    })
}
