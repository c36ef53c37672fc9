//! Typed configuration for the gateway.
//!
//! [`GatewayConfig`] mirrors the `gateway:` section of `tickwatch.yaml`.
//! Every field has a default, so an empty section (or a missing file) yields
//! a working server on `0.0.0.0:8080`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Smallest owner-thread wait the gateway will use, in milliseconds.
pub const MIN_BRIDGE_TIMEOUT_MS: u64 = 50;

/// Gateway settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayConfig {
    /// Address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to listen on. `0` picks a free port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory served for non-endpoint paths.
    #[serde(default = "default_web_root")]
    pub web_root: PathBuf,

    /// Pretty-print JSON responses.
    #[serde(default)]
    pub json_debug: bool,

    /// How long a request waits for the owner thread, in milliseconds.
    #[serde(default = "default_bridge_timeout_ms")]
    pub bridge_timeout_ms: u64,

    /// Period of the subscription publisher, in milliseconds.
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,

    /// Frames buffered per `WebSocket` connection before updates are dropped.
    #[serde(default = "default_session_queue_capacity")]
    pub session_queue_capacity: usize,

    /// Request name that returns every aggregable endpoint.
    #[serde(default = "default_all_alias")]
    pub all_alias: String,

    /// Named endpoint groups, each served as one aggregate.
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
}

impl GatewayConfig {
    /// Apply `TICKWATCH_PORT` and `TICKWATCH_WEB_ROOT` on top of the file
    /// values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TICKWATCH_PORT") {
            match val.parse() {
                Ok(port) => self.port = port,
                Err(e) => warn!(value = %val, error = %e, "ignoring invalid TICKWATCH_PORT"),
            }
        }
        if let Ok(val) = std::env::var("TICKWATCH_WEB_ROOT") {
            self.web_root = PathBuf::from(val);
        }
    }

    /// The owner-thread wait bound. Never below
    /// [`MIN_BRIDGE_TIMEOUT_MS`].
    pub const fn bridge_timeout(&self) -> Duration {
        if self.bridge_timeout_ms < MIN_BRIDGE_TIMEOUT_MS {
            Duration::from_millis(MIN_BRIDGE_TIMEOUT_MS)
        } else {
            Duration::from_millis(self.bridge_timeout_ms)
        }
    }

    /// The publisher period. Never zero.
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms.max(1))
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            web_root: default_web_root(),
            json_debug: false,
            bridge_timeout_ms: default_bridge_timeout_ms(),
            publish_interval_ms: default_publish_interval_ms(),
            session_queue_capacity: default_session_queue_capacity(),
            all_alias: default_all_alias(),
            groups: BTreeMap::new(),
        }
    }
}

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    8080
}

fn default_web_root() -> PathBuf {
    PathBuf::from("./www")
}

const fn default_bridge_timeout_ms() -> u64 {
    3000
}

const fn default_publish_interval_ms() -> u64 {
    1000
}

const fn default_session_queue_capacity() -> usize {
    tickwatch_dispatch::session::DEFAULT_QUEUE_CAPACITY
}

fn default_all_alias() -> String {
    String::from(tickwatch_dispatch::router::DEFAULT_ALL_ALIAS)
}
