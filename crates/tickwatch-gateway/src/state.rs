//! Shared application state for the gateway.
//!
//! [`AppState`] bundles the request router, the `WebSocket` session table, and
//! the handful of config values handlers need. It is wrapped in [`Arc`] and
//! injected through Axum's `State` extractor.
//!
//! `S` is the owner-thread state type. It never crosses threads itself;
//! only closures that receive `&S` on the owner thread do.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tickwatch_dispatch::{EndpointRegistry, OwnerThreadBridge, RequestRouter, SessionManager};

use crate::config::GatewayConfig;

/// Shared state for the Axum application.
pub struct AppState<S> {
    /// Resolves and invokes endpoints.
    pub router: RequestRouter<S>,
    /// Live `WebSocket` sessions and their subscriptions.
    pub sessions: SessionManager,
    /// Directory served for non-endpoint paths.
    pub web_root: PathBuf,
    /// Pretty-print JSON responses.
    pub json_debug: bool,
    /// When the gateway state was built.
    pub started_at: DateTime<Utc>,
}

impl<S: Clone + 'static> AppState<S> {
    /// Build the state from a registry, a bridge, and the gateway config.
    pub fn new(
        registry: Arc<EndpointRegistry<S>>,
        bridge: OwnerThreadBridge<S>,
        config: &GatewayConfig,
    ) -> Self {
        let router = RequestRouter::new(registry, bridge)
            .with_timeout(config.bridge_timeout())
            .with_all_alias(config.all_alias.clone())
            .with_groups(config.groups.clone());
        Self {
            router,
            sessions: SessionManager::new(config.session_queue_capacity),
            web_root: config.web_root.clone(),
            json_debug: config.json_debug,
            started_at: Utc::now(),
        }
    }

    /// Convenience for `Arc::new(AppState::new(..))`.
    pub fn shared(
        registry: Arc<EndpointRegistry<S>>,
        bridge: OwnerThreadBridge<S>,
        config: &GatewayConfig,
    ) -> Arc<Self> {
        Arc::new(Self::new(registry, bridge, config))
    }
}
