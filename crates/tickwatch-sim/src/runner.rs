//! The tick loop thread.
//!
//! [`spawn_tick_loop`] starts a dedicated OS thread that owns the
//! [`FactoryWorld`]. Each tick it:
//!
//! 1. advances the world by one tick interval,
//! 2. publishes a fresh [`WorldSnapshot`] for inline endpoints,
//! 3. drains the owner-thread job queue (bounded by `max_jobs_per_tick`),
//! 4. sleeps until the next tick is due.
//!
//! The world lives in an `Rc<RefCell<..>>` and never leaves the thread.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use arc_swap::ArcSwap;
use tickwatch_dispatch::OwnerReceiver;
use tracing::{debug, info};

use crate::config::SimulationConfig;
use crate::error::HostError;
use crate::world::{FactoryWorld, WorldSnapshot};

/// Owner-thread state handle.
pub type World = Rc<RefCell<FactoryWorld>>;

/// Latest snapshot, readable from any thread.
pub type SharedSnapshot = Arc<ArcSwap<WorldSnapshot>>;

/// What the tick loop did before it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Ticks advanced.
    pub total_ticks: u64,
    /// Owner jobs executed.
    pub jobs_run: u64,
}

/// Handle to the running tick loop.
#[derive(Debug)]
pub struct TickLoop {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<RunSummary>,
}

impl TickLoop {
    /// Ask the loop to stop and wait for it.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::TickLoop`] if the thread panicked.
    pub fn stop(self) -> Result<RunSummary, HostError> {
        self.stop.store(true, Ordering::Release);
        self.handle.join().map_err(|_| HostError::TickLoop {
            message: String::from("tick loop thread panicked"),
        })
    }
}

/// Create an empty snapshot cell to hand to the endpoint catalog.
pub fn shared_snapshot() -> SharedSnapshot {
    Arc::new(ArcSwap::from_pointee(WorldSnapshot::default()))
}

/// Start the tick loop on its own thread.
///
/// # Errors
///
/// Returns [`HostError::TickLoop`] if the OS refuses to spawn the thread.
pub fn spawn_tick_loop(
    config: &SimulationConfig,
    receiver: OwnerReceiver<World>,
    snapshot: SharedSnapshot,
) -> Result<TickLoop, HostError> {
    let stop = Arc::new(AtomicBool::new(false));
    let config = config.clone();
    let thread_stop = Arc::clone(&stop);

    let handle = thread::Builder::new()
        .name(String::from("tick-loop"))
        .spawn(move || run(&config, receiver, &snapshot, &thread_stop))
        .map_err(|e| HostError::TickLoop {
            message: format!("failed to spawn tick loop thread: {e}"),
        })?;

    Ok(TickLoop { stop, handle })
}

fn run(
    config: &SimulationConfig,
    receiver: OwnerReceiver<World>,
    snapshot: &ArcSwap<WorldSnapshot>,
    stop: &AtomicBool,
) -> RunSummary {
    let world: World = Rc::new(RefCell::new(FactoryWorld::new(
        config.session_name.clone(),
        config.seed,
    )));
    let mut queue = receiver.attach(Rc::clone(&world));
    let interval = config.tick_interval();
    let dt = interval.as_secs_f64();
    let mut summary = RunSummary {
        total_ticks: 0,
        jobs_run: 0,
    };

    info!(
        tick_interval_ms = config.tick_interval_ms,
        max_jobs_per_tick = config.max_jobs_per_tick,
        seed = config.seed,
        "Tick loop started"
    );

    let mut next_tick = Instant::now();
    while !stop.load(Ordering::Acquire) {
        let published = {
            let mut live = world.borrow_mut();
            live.advance(dt);
            live.snapshot()
        };
        snapshot.store(Arc::new(published));
        summary.total_ticks = summary.total_ticks.saturating_add(1);

        let ran = queue.run_pending_limited(config.max_jobs_per_tick);
        summary.jobs_run = summary
            .jobs_run
            .saturating_add(u64::try_from(ran).unwrap_or(u64::MAX));
        if ran > 0 {
            debug!(
                tick = summary.total_ticks,
                ran,
                backlog = queue.backlog(),
                "owner jobs drained"
            );
        }

        let due = next_tick.checked_add(interval).unwrap_or_else(Instant::now);
        let wait = due.saturating_duration_since(Instant::now());
        if wait.is_zero() {
            // Overran; do not try to catch up.
            next_tick = Instant::now();
        } else {
            thread::sleep(wait);
            next_tick = due;
        }
    }

    // Answer anything still queued before the queue goes away.
    let ran = queue.run_pending();
    summary.jobs_run = summary
        .jobs_run
        .saturating_add(u64::try_from(ran).unwrap_or(u64::MAX));
    info!(
        total_ticks = summary.total_ticks,
        world_tick = world.borrow().tick(),
        jobs_run = summary.jobs_run,
        "Tick loop stopped"
    );
    summary
}
