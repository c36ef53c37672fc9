//! Periodic subscription publisher.
//!
//! Every `publish_interval_ms` the publisher collects the union of all
//! sessions' subscriptions, evaluates each known endpoint once through the
//! router, and hands the payload to [`SessionManager::publish`]. Names
//! nobody subscribed to are never evaluated.
//!
//! Endpoints are evaluated concurrently and each one is published as soon
//! as it resolves, so an owner-affine endpoint waiting on a stalled tick
//! loop never holds back the inline ones.
//!
//! [`SessionManager::publish`]: tickwatch_dispatch::SessionManager::publish

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tickwatch_dispatch::Origin;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Run one publish cycle. Returns how many frames were queued in total.
pub async fn publish_once<S: Clone + 'static>(state: &AppState<S>) -> usize {
    let endpoints: Vec<String> = state
        .sessions
        .subscribed_endpoints()
        .into_iter()
        .filter(|endpoint| state.router.is_known(endpoint))
        .collect();

    join_all(endpoints.iter().map(|endpoint| publish_endpoint(state, endpoint)))
        .await
        .into_iter()
        .fold(0, usize::saturating_add)
}

async fn publish_endpoint<S: Clone + 'static>(state: &AppState<S>, endpoint: &str) -> usize {
    match state.router.handle_name(endpoint, Origin::Publish).await {
        Ok(response) => state.sessions.publish(endpoint, &response.payload),
        Err(e) => {
            warn!(endpoint, kind = e.kind(), error = %e, "skipping publish");
            0
        }
    }
}

/// Spawn the publisher loop on the current runtime.
///
/// The loop runs until the returned task is aborted. Cycles that overrun
/// the interval are skipped rather than bunched up.
pub fn spawn_publisher<S: Clone + 'static>(
    state: Arc<AppState<S>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        info!(interval_ms, "publisher started");
        loop {
            ticker.tick().await;
            if state.sessions.session_count() == 0 {
                continue;
            }
            let queued = publish_once(&state).await;
            debug!(queued, "publish cycle complete");
        }
    })
}
