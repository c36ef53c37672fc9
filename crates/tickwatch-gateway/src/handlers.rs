//! HTTP handlers for the gateway.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | `301` to `/index.html` |
//! | `GET` | `/api` | Index of endpoint names, groups, and the "all" alias |
//! | `GET`, `POST` | `/api/{endpoint}` | Dispatch an endpoint, group, or the "all" alias |
//! | `GET` | `/getCoffee` | `418 I'm a teapot` |
//! | any | `/{path}` | Dispatch if `path` names an endpoint, else a static file |

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tickwatch_dispatch::{DispatchError, Origin, RequestRouter};
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET / -- redirect to the dashboard
// ---------------------------------------------------------------------------

/// Send browsers to the static dashboard.
pub async fn index() -> impl IntoResponse {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, "/index.html")],
    )
}

// ---------------------------------------------------------------------------
// GET /getCoffee
// ---------------------------------------------------------------------------

/// The gateway does not brew coffee.
pub async fn get_coffee() -> impl IntoResponse {
    (StatusCode::IM_A_TEAPOT, "I'm a teapot")
}

// ---------------------------------------------------------------------------
// GET /api -- endpoint index
// ---------------------------------------------------------------------------

/// List every servable name.
pub async fn list_endpoints<S: Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    let router = &state.router;
    Json(serde_json::json!({
        "endpoints": router.registry().names(),
        "groups": router.groups(),
        "all": router.all_alias(),
        "sessions": state.sessions.session_count(),
        "started_at": state.started_at,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/{endpoint}
// ---------------------------------------------------------------------------

/// Dispatch a named endpoint.
///
/// # Errors
///
/// Unknown names map to `404`, owner-thread timeouts to `504`, callback
/// failures to `500`, and a stopped owner thread to `503`.
pub async fn dispatch<S: Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(endpoint): Path<String>,
) -> Result<Response, GatewayError> {
    dispatch_name(&state, &endpoint).await
}

// ---------------------------------------------------------------------------
// /{path} -- endpoint or static file
// ---------------------------------------------------------------------------

/// Serve a bare endpoint name, falling back to `web_root` for anything
/// else.
///
/// # Errors
///
/// Same mapping as [`dispatch`]. A missing static file is reported as an
/// unknown endpoint.
pub async fn endpoint_or_file<S: Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    request: Request,
) -> Result<Response, GatewayError> {
    let path = request.uri().path().trim_start_matches('/');
    if !path.is_empty() && !path.contains('/') && state.router.is_known(path) {
        let endpoint = path.to_owned();
        return dispatch_name(&state, &endpoint).await;
    }

    let name = path.to_owned();
    let response = match ServeDir::new(&state.web_root).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    if response.status() == StatusCode::NOT_FOUND {
        debug!(path = %name, "no endpoint or file");
        return Err(DispatchError::EndpointNotFound { name }.into());
    }
    Ok(response.map(Body::new))
}

async fn dispatch_name<S: Clone + 'static>(
    state: &AppState<S>,
    endpoint: &str,
) -> Result<Response, GatewayError> {
    let response = state.router.handle_name(endpoint, Origin::Http).await?;
    if !response.failures.is_empty() {
        let failed: Vec<&str> = response
            .failures
            .iter()
            .map(|f| f.endpoint.as_str())
            .collect();
        warn!(endpoint, ?failed, "aggregate served with failed members");
    }
    let body = RequestRouter::<S>::render(&response.payload, state.json_debug)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}
