//! `WebSocket` handler for endpoint subscriptions.
//!
//! Clients connect to `GET /ws` and send control messages:
//!
//! ```json
//! { "action": "subscribe", "endpoints": ["getPower"] }
//! { "action": "unsubscribe", "endpoints": ["getPower"] }
//! ```
//!
//! Every publish cycle, each subscribed endpoint's payload is pushed as
//! `{"endpoint": <name>, "data": <payload>}`. Frames come from the
//! connection's own bounded queue in [`SessionManager`]; when a client
//! falls behind, new frames for it are dropped instead of queueing without
//! bound.
//!
//! [`SessionManager`]: tickwatch_dispatch::SessionManager

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use tickwatch_dispatch::ConnectionId;
use tracing::{debug, info};

use crate::state::AppState;

/// Upgrade an HTTP request to a `WebSocket` session.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_session<S: Clone + 'static>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Drive one connection: forward queued frames out, apply control
/// messages coming in, and drop the session when either side closes.
async fn handle_ws<S: Clone + 'static>(mut socket: WebSocket, state: Arc<AppState<S>>) {
    let id = ConnectionId::new();
    let mut outbound = state.sessions.on_open(id);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    debug!(conn_id = %id, "outbound queue closed");
                    break;
                };
                let msg = Message::Text(frame.as_ref().into());
                if socket.send(msg).await.is_err() {
                    debug!(conn_id = %id, "WebSocket client disconnected (send failed)");
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        // Malformed messages are logged by the session manager.
                        if let Ok(outcome) = state.sessions.on_control_message(id, text.as_str()) {
                            debug!(
                                conn_id = %id,
                                action = ?outcome.action,
                                changed = outcome.changed,
                                subscriptions = outcome.subscriptions,
                                "subscriptions updated"
                            );
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!(conn_id = %id, "WebSocket client disconnected (pong failed)");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(conn_id = %id, "WebSocket client closed");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(conn_id = %id, error = %e, "WebSocket error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    if state.sessions.on_close(id) {
        info!(conn_id = %id, "WebSocket session ended");
    }
}
