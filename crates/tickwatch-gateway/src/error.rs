//! Error types for the gateway HTTP layer.
//!
//! [`GatewayError`] maps dispatch failures onto HTTP status codes through
//! its [`IntoResponse`](axum::response::IntoResponse) implementation. The
//! body is always `{"error": <message>, "status": <code>}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tickwatch_dispatch::DispatchError;

/// Message returned for any name that is neither an endpoint nor a file.
pub const NOT_FOUND_MESSAGE: &str =
    "Endpoint not found. Please consult the endpoint documentation for more information.";

/// Errors surfaced to HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Endpoint resolution or invocation failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The endpoint value could not be rendered as JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatewayError {
    /// The status code this error maps to.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Dispatch(DispatchError::EndpointNotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Dispatch(DispatchError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            Self::Dispatch(DispatchError::OwnerUnavailable { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Dispatch(DispatchError::CallbackFailure { .. }) | Self::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Dispatch(DispatchError::EndpointNotFound { .. }) => NOT_FOUND_MESSAGE.to_owned(),
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use tickwatch_dispatch::CallbackError;

    use super::*;

    #[test]
    fn dispatch_errors_map_to_distinct_statuses() {
        let cases = [
            (
                DispatchError::EndpointNotFound {
                    name: String::from("getUnicorns"),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                DispatchError::Timeout {
                    name: String::from("getPlayer"),
                    timeout_ms: 3000,
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                DispatchError::CallbackFailure {
                    name: String::from("getDrone"),
                    source: CallbackError::new("no drones"),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                DispatchError::OwnerUnavailable {
                    name: String::from("getPlayer"),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, expected) in cases {
            let response = GatewayError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
