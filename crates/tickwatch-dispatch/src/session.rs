//! `WebSocket` session bookkeeping and fan-out.
//!
//! Each live connection owns one session record holding the set of
//! endpoint names it subscribed to and the sending half of a bounded
//! outbound queue. The transport drains the receiving half into the
//! socket, so [`SessionManager::publish`] only ever does a non-blocking
//! `try_send`: a stalled client fills its own queue and loses frames, and
//! nobody else waits for it.
//!
//! # Lifecycle
//!
//! ```text
//! on_open ──> Open ──> Active ──(on_close)──> Closed
//!                        │
//!                        └── on_control_message: subscribe / unsubscribe
//! ```
//!
//! # Control messages
//!
//! ```json
//! { "action": "subscribe", "endpoints": ["getPower", "getProdStats"] }
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SessionError;

/// Default capacity of a connection's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Identity of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Generate a fresh random connection id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session state machine. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Registered, not yet accepting control messages.
    Open,
    /// Accepting control messages and receiving fan-out.
    Active,
    /// Connection gone; no further delivery.
    Closed,
}

/// Subscription action carried by a control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    /// Add endpoints to the subscription set.
    Subscribe,
    /// Remove endpoints from the subscription set.
    Unsubscribe,
}

#[derive(Debug, Deserialize)]
struct ControlMessage {
    action: ControlAction,
    endpoints: Vec<String>,
}

/// Result of applying a control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlOutcome {
    /// The applied action.
    pub action: ControlAction,
    /// How many names actually changed membership.
    pub changed: usize,
    /// Size of the subscription set afterwards.
    pub subscriptions: usize,
}

/// Frame pushed to subscribers.
#[derive(Debug, Serialize)]
struct UpdateFrame<'a> {
    endpoint: &'a str,
    data: &'a Value,
}

/// Per-connection state.
#[derive(Debug)]
struct ClientSession {
    id: ConnectionId,
    phase: SessionPhase,
    subscriptions: BTreeSet<String>,
    outbound: mpsc::Sender<Arc<str>>,
    dropped: AtomicU64,
}

impl ClientSession {
    fn deliver(&self, frame: &Arc<str>) -> bool {
        match self.outbound.try_send(Arc::clone(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                warn!(conn_id = %self.id, dropped, "outbound queue full, dropping update");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = %self.id, "outbound queue closed, skipping update");
                false
            }
        }
    }
}

/// Tracks every live connection and fans updates out to subscribers.
pub struct SessionManager {
    sessions: DashMap<ConnectionId, ClientSession>,
    queue_capacity: usize,
}

impl SessionManager {
    /// Create a manager whose per-connection queues hold `queue_capacity`
    /// frames.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new connection with an empty subscription set.
    ///
    /// Returns the receiving half of the connection's outbound queue; the
    /// transport forwards every frame it yields to the socket.
    pub fn on_open(&self, id: ConnectionId) -> mpsc::Receiver<Arc<str>> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let mut session = ClientSession {
            id,
            phase: SessionPhase::Open,
            subscriptions: BTreeSet::new(),
            outbound: tx,
            dropped: AtomicU64::new(0),
        };
        session.phase = SessionPhase::Active;
        self.sessions.insert(id, session);
        info!(conn_id = %id, total = self.sessions.len(), "client connected");
        rx
    }

    /// Remove a connection. Pending frames for it are dropped with the
    /// queue. Returns `false` if the connection was unknown.
    pub fn on_close(&self, id: ConnectionId) -> bool {
        let Some((_, mut session)) = self.sessions.remove(&id) else {
            return false;
        };
        session.phase = SessionPhase::Closed;
        info!(
            conn_id = %id,
            subscriptions = session.subscriptions.len(),
            dropped = session.dropped.load(Ordering::Relaxed),
            total = self.sessions.len(),
            "client disconnected"
        );
        true
    }

    /// Apply a subscribe/unsubscribe control message from `id`.
    ///
    /// Both actions are idempotent. Malformed messages and unknown actions
    /// leave the session untouched.
    pub fn on_control_message(
        &self,
        id: ConnectionId,
        message: &str,
    ) -> Result<ControlOutcome, SessionError> {
        let parsed: ControlMessage = serde_json::from_str(message).map_err(|e| {
            warn!(conn_id = %id, error = %e, "failed to parse client control message");
            SessionError::MalformedControlMessage {
                reason: e.to_string(),
            }
        })?;

        let mut session = self
            .sessions
            .get_mut(&id)
            .filter(|s| s.phase == SessionPhase::Active)
            .ok_or(SessionError::UnknownSession(id))?;

        let mut changed: usize = 0;
        for endpoint in parsed.endpoints {
            let applied = match parsed.action {
                ControlAction::Subscribe => session.subscriptions.insert(endpoint.clone()),
                ControlAction::Unsubscribe => session.subscriptions.remove(&endpoint),
            };
            if applied {
                changed = changed.saturating_add(1);
            }
            debug!(conn_id = %id, action = ?parsed.action, endpoint = %endpoint, applied, "control message applied");
        }

        Ok(ControlOutcome {
            action: parsed.action,
            changed,
            subscriptions: session.subscriptions.len(),
        })
    }

    /// Queue `payload` for every active session subscribed to `endpoint`.
    ///
    /// Never blocks. Returns how many sessions accepted the frame.
    pub fn publish(&self, endpoint: &str, payload: &Value) -> usize {
        let frame: Arc<str> = match serde_json::to_string(&UpdateFrame {
            endpoint,
            data: payload,
        }) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(endpoint, error = %e, "failed to serialize update frame");
                return 0;
            }
        };

        let mut delivered: usize = 0;
        for session in &self.sessions {
            if session.phase == SessionPhase::Active
                && session.subscriptions.contains(endpoint)
                && session.deliver(&frame)
            {
                delivered = delivered.saturating_add(1);
            }
        }
        debug!(endpoint, delivered, "update published");
        delivered
    }

    /// Subscription set of one connection.
    pub fn subscriptions(&self, id: ConnectionId) -> Option<BTreeSet<String>> {
        self.sessions.get(&id).map(|s| s.subscriptions.clone())
    }

    /// Lifecycle phase of one connection, if it is still tracked.
    pub fn phase(&self, id: ConnectionId) -> Option<SessionPhase> {
        self.sessions.get(&id).map(|s| s.phase)
    }

    /// Union of every session's subscriptions.
    pub fn subscribed_endpoints(&self) -> BTreeSet<String> {
        self.sessions
            .iter()
            .flat_map(|s| s.subscriptions.iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Frames dropped for `id` because its queue was full.
    pub fn dropped_frames(&self, id: ConnectionId) -> Option<u64> {
        self.sessions
            .get(&id)
            .map(|s| s.dropped.load(Ordering::Relaxed))
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn subscribe(names: &[&str]) -> String {
        json!({ "action": "subscribe", "endpoints": names }).to_string()
    }

    fn unsubscribe(names: &[&str]) -> String {
        json!({ "action": "unsubscribe", "endpoints": names }).to_string()
    }

    #[test]
    fn open_creates_active_session_with_no_subscriptions() {
        let manager = SessionManager::default();
        let id = ConnectionId::new();
        let _rx = manager.on_open(id);

        assert_eq!(manager.phase(id), Some(SessionPhase::Active));
        assert_eq!(manager.subscriptions(id), Some(BTreeSet::new()));
        assert_eq!(manager.session_count(), 1);
    }

    #[test]
    fn subscribe_then_unsubscribe_twice_leaves_empty_set() {
        let manager = SessionManager::default();
        let id = ConnectionId::new();
        let _rx = manager.on_open(id);

        let first = manager.on_control_message(id, &subscribe(&["getPower"]));
        let again = manager.on_control_message(id, &subscribe(&["getPower"]));
        let removed = manager.on_control_message(id, &unsubscribe(&["getPower"]));
        let repeat = manager.on_control_message(id, &unsubscribe(&["getPower"]));

        assert_eq!(first.map(|o| o.changed), Ok(1));
        assert_eq!(again.map(|o| o.changed), Ok(0));
        assert_eq!(removed.map(|o| o.subscriptions), Ok(0));
        assert_eq!(
            repeat,
            Ok(ControlOutcome {
                action: ControlAction::Unsubscribe,
                changed: 0,
                subscriptions: 0,
            })
        );
        assert_eq!(manager.subscriptions(id), Some(BTreeSet::new()));
    }

    #[test]
    fn malformed_messages_leave_state_unchanged() {
        let manager = SessionManager::default();
        let id = ConnectionId::new();
        let _rx = manager.on_open(id);
        manager.on_control_message(id, &subscribe(&["getPower"])).ok();

        for bad in [
            "not json",
            r#"{"action":"explode","endpoints":["getPower"]}"#,
            r#"{"action":"unsubscribe"}"#,
            r#"{"endpoints":["getPower"]}"#,
        ] {
            let result = manager.on_control_message(id, bad);
            assert!(
                matches!(result, Err(SessionError::MalformedControlMessage { .. })),
                "{bad} was accepted"
            );
        }
        assert_eq!(
            manager.subscriptions(id),
            Some(BTreeSet::from([String::from("getPower")]))
        );
    }

    #[test]
    fn control_message_for_closed_session_is_rejected() {
        let manager = SessionManager::default();
        let id = ConnectionId::new();
        let _rx = manager.on_open(id);
        assert!(manager.on_close(id));
        assert!(!manager.on_close(id));

        let result = manager.on_control_message(id, &subscribe(&["getPower"]));
        assert_eq!(result, Err(SessionError::UnknownSession(id)));
        assert_eq!(manager.phase(id), None);
    }

    #[tokio::test]
    async fn publish_reaches_only_subscribers() {
        let manager = SessionManager::default();
        let power = ConnectionId::new();
        let other = ConnectionId::new();
        let mut power_rx = manager.on_open(power);
        let mut other_rx = manager.on_open(other);
        manager.on_control_message(power, &subscribe(&["getPower"])).ok();
        manager.on_control_message(other, &subscribe(&["getTrains"])).ok();

        let delivered = manager.publish("getPower", &json!([{ "CircuitID": 1 }]));

        assert_eq!(delivered, 1);
        let frame = power_rx.recv().await.map(|f| f.to_string());
        assert_eq!(
            frame.and_then(|f| serde_json::from_str::<Value>(&f).ok()),
            Some(json!({ "endpoint": "getPower", "data": [{ "CircuitID": 1 }] }))
        );
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_for_that_session_only() {
        let manager = SessionManager::new(1);
        let slow = ConnectionId::new();
        let fast = ConnectionId::new();
        let _slow_rx = manager.on_open(slow);
        let mut fast_rx = manager.on_open(fast);
        for id in [slow, fast] {
            manager.on_control_message(id, &subscribe(&["getPower"])).ok();
        }

        assert_eq!(manager.publish("getPower", &json!(1)), 2);
        // Drain the fast client, leave the slow one stalled.
        assert!(fast_rx.recv().await.is_some());
        assert_eq!(manager.publish("getPower", &json!(2)), 1);

        assert_eq!(manager.dropped_frames(slow), Some(1));
        assert_eq!(manager.dropped_frames(fast), Some(0));
        let latest = fast_rx.recv().await.map(|f| f.to_string()).unwrap_or_default();
        assert!(latest.contains("\"data\":2"));
    }

    #[test]
    fn per_connection_delivery_is_fifo() {
        let manager = SessionManager::default();
        let id = ConnectionId::new();
        let mut rx = manager.on_open(id);
        manager.on_control_message(id, &subscribe(&["getPower", "getBelts"])).ok();

        manager.publish("getPower", &json!(1));
        manager.publish("getBelts", &json!(2));
        manager.publish("getPower", &json!(3));

        let mut order = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let value: Value = serde_json::from_str(&frame).unwrap_or_default();
            order.push(value["data"].clone());
        }
        assert_eq!(order, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn unknown_endpoint_subscription_is_accepted_but_silent() {
        let manager = SessionManager::default();
        let id = ConnectionId::new();
        let _rx = manager.on_open(id);

        let outcome = manager.on_control_message(id, &subscribe(&["getUnicorns"]));
        assert_eq!(outcome.map(|o| o.changed), Ok(1));
        assert_eq!(manager.publish("getPower", &json!(null)), 0);
        assert_eq!(
            manager.subscribed_endpoints(),
            BTreeSet::from([String::from("getUnicorns")])
        );
    }
}
