//! Error types for the dispatch engine.
//!
//! Every failure crosses thread boundaries as a value: callbacks return
//! [`CallbackError`], the bridge and router surface [`DispatchError`], and
//! the session manager reports [`SessionError`]. None of these are fatal
//! to the process.

use crate::session::ConnectionId;

/// A failure produced by an endpoint callback itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    /// The callback reported a failure.
    #[error("{message}")]
    Failed {
        /// Description supplied by the callback.
        message: String,
    },

    /// The callback panicked; the panic was caught at the dispatch boundary.
    #[error("callback panicked: {message}")]
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },
}

impl CallbackError {
    /// Create a [`CallbackError::Failed`] from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CallbackError {
    fn from(source: serde_json::Error) -> Self {
        Self::new(format!("serialization failed: {source}"))
    }
}

/// Errors surfaced by the registry, bridge, and router.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// No endpoint is registered under the requested name.
    #[error("endpoint not found: {name}")]
    EndpointNotFound {
        /// The requested endpoint name.
        name: String,
    },

    /// The owner context did not run the queued work within the timeout.
    #[error("endpoint {name} timed out after {timeout_ms} ms waiting for the owner context")]
    Timeout {
        /// The endpoint that timed out.
        name: String,
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The endpoint callback failed or panicked.
    #[error("endpoint {name} failed: {source}")]
    CallbackFailure {
        /// The endpoint whose callback failed.
        name: String,
        /// The underlying callback error.
        source: CallbackError,
    },

    /// The owner context has shut down and no longer drains its queue.
    #[error("owner context unavailable for endpoint {name}")]
    OwnerUnavailable {
        /// The endpoint that could not be dispatched.
        name: String,
    },
}

impl DispatchError {
    /// The endpoint name this error refers to.
    pub fn endpoint(&self) -> &str {
        match self {
            Self::EndpointNotFound { name }
            | Self::Timeout { name, .. }
            | Self::CallbackFailure { name, .. }
            | Self::OwnerUnavailable { name } => name,
        }
    }

    /// Short machine-readable kind, used in logs and aggregate failure lists.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::EndpointNotFound { .. } => "endpoint_not_found",
            Self::Timeout { .. } => "timeout",
            Self::CallbackFailure { .. } => "callback_failure",
            Self::OwnerUnavailable { .. } => "owner_unavailable",
        }
    }
}

/// Errors from `WebSocket` session bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The control message was not valid JSON or had an unknown action.
    #[error("malformed control message: {reason}")]
    MalformedControlMessage {
        /// Why the message was rejected.
        reason: String,
    },

    /// No active session exists for the connection.
    #[error("unknown session: {0}")]
    UnknownSession(ConnectionId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_error_reports_endpoint_and_kind() {
        let err = DispatchError::Timeout {
            name: String::from("getPower"),
            timeout_ms: 500,
        };
        assert_eq!(err.endpoint(), "getPower");
        assert_eq!(err.kind(), "timeout");
        assert!(err.to_string().contains("500 ms"));
    }

    #[test]
    fn callback_failure_displays_source() {
        let err = DispatchError::CallbackFailure {
            name: String::from("getDrone"),
            source: CallbackError::new("no drones"),
        };
        assert_eq!(err.to_string(), "endpoint getDrone failed: no drones");
    }
}
