//! Axum router construction for the gateway.
//!
//! Assembles the HTTP and `WebSocket` routes into a single [`Router`] with
//! CORS and request tracing.

use std::sync::Arc;

use axum::Router;
use axum::http::{Method, header};
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router for the gateway.
///
/// The router includes:
/// - `GET /` -- redirect to `/index.html`
/// - `GET /ws` -- `WebSocket` subscriptions
/// - `GET /api` -- endpoint index
/// - `GET|POST /api/{endpoint}` -- endpoint dispatch
/// - `GET /getCoffee` -- teapot
/// - everything else -- bare endpoint name or static file
///
/// CORS allows any origin with `GET`/`POST` and the `Content-Type` header,
/// which is what browser dashboards served from elsewhere need.
pub fn build_router<S: Clone + 'static>(state: Arc<AppState<S>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(handlers::index))
        .route("/ws", get(ws::ws_session::<S>))
        .route("/api", get(handlers::list_endpoints::<S>))
        .route(
            "/api/{endpoint}",
            get(handlers::dispatch::<S>).post(handlers::dispatch::<S>),
        )
        .route("/getCoffee", get(handlers::get_coffee))
        .fallback(handlers::endpoint_or_file::<S>)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
