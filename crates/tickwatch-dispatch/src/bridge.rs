//! Owner-thread bridge.
//!
//! Some endpoints read state that only the simulation tick loop may touch.
//! [`OwnerThreadBridge`] lets any serving thread run such a callback on
//! that loop and get the result back, waiting at most a bounded time.
//!
//! # Wiring
//!
//! ```rust,ignore
//! let (bridge, receiver) = OwnerThreadBridge::channel(DEFAULT_TIMEOUT);
//! std::thread::spawn(move || {
//!     let world = Rc::new(RefCell::new(World::new()));
//!     let mut queue = receiver.attach(Rc::clone(&world));
//!     loop {
//!         world.borrow_mut().advance();
//!         queue.run_pending();
//!     }
//! });
//! // hand `bridge` (Clone + Send + Sync) to the HTTP server
//! ```
//!
//! # Guarantees
//!
//! - Owner-affine jobs run only inside [`OwnerQueue::run_pending`], one at
//!   a time, in FIFO submission order across all callers.
//! - A caller that times out gets [`DispatchError::Timeout`]; the job stays
//!   queued and its result is dropped when it eventually runs.
//! - A call made on the owner thread itself runs inline instead of
//!   waiting on its own queue.
//! - Panics in callbacks are caught and reported as
//!   [`DispatchError::CallbackFailure`].

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc as std_mpsc};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::descriptor::{CallbackResult, EndpointDescriptor, EndpointHandler, InvokeContext, OwnerFn};
use crate::error::{CallbackError, DispatchError};

/// Default bound on how long a caller waits for the owner context.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// A unit of owner-thread work.
type Job<S> = Box<dyn FnOnce(&S) + Send>;

static NEXT_BRIDGE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Owner states attached on this thread, keyed by bridge id.
    static ATTACHED: RefCell<Vec<AttachedOwner>> = const { RefCell::new(Vec::new()) };
}

struct AttachedOwner {
    bridge_id: u64,
    state: Box<dyn Any>,
}

/// Caller-side handle of the bridge. Cheap to clone and shareable across
/// threads.
pub struct OwnerThreadBridge<S> {
    id: u64,
    jobs: mpsc::UnboundedSender<Job<S>>,
    pending: Arc<AtomicUsize>,
    default_timeout: Duration,
}

/// The not-yet-attached receiving end of a bridge.
///
/// Move it to the owner thread and call [`attach`](Self::attach) there.
/// Until then, queued jobs simply wait.
pub struct OwnerReceiver<S> {
    id: u64,
    jobs: mpsc::UnboundedReceiver<Job<S>>,
    pending: Arc<AtomicUsize>,
}

/// The owner-thread end of a bridge. Not `Send`: it stays on the thread
/// that attached it.
pub struct OwnerQueue<S> {
    id: u64,
    jobs: mpsc::UnboundedReceiver<Job<S>>,
    pending: Arc<AtomicUsize>,
    state: S,
    _not_send: PhantomData<*const ()>,
}

impl<S: Clone + 'static> OwnerThreadBridge<S> {
    /// Create a bridge and its receiving end.
    pub fn channel(default_timeout: Duration) -> (Self, OwnerReceiver<S>) {
        let id = NEXT_BRIDGE_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let bridge = Self {
            id,
            jobs: tx,
            pending: Arc::clone(&pending),
            default_timeout,
        };
        let receiver = OwnerReceiver {
            id,
            jobs: rx,
            pending,
        };
        (bridge, receiver)
    }

    /// The timeout configured at construction.
    pub const fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Owner jobs queued but not yet started.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the current thread is this bridge's owner thread.
    pub fn is_owner_thread(&self) -> bool {
        ATTACHED.with(|attached| attached.borrow().iter().any(|o| o.bridge_id == self.id))
    }

    /// Run `descriptor` and wait asynchronously for its result.
    ///
    /// Inline endpoints run immediately on the calling task. Owner-affine
    /// endpoints are queued for the owner thread; if it does not get to
    /// them within `timeout` the call fails with
    /// [`DispatchError::Timeout`].
    pub async fn invoke(
        &self,
        descriptor: &EndpointDescriptor<S>,
        ctx: &InvokeContext,
        timeout: Duration,
    ) -> Result<Value, DispatchError> {
        let owner_fn = match descriptor.handler() {
            EndpointHandler::Inline(f) => return guarded(descriptor.name(), || f(ctx)),
            EndpointHandler::OwnerAffine(f) => Arc::clone(f),
        };
        if let Some(result) = self.run_if_owner(&owner_fn, ctx) {
            return result;
        }

        let name = descriptor.name().to_owned();
        let (reply_tx, reply_rx) = oneshot::channel();
        let job_ctx = ctx.clone();
        self.enqueue(
            &name,
            Box::new(move |state: &S| {
                let result = guarded(job_ctx.endpoint(), || owner_fn(state, &job_ctx));
                if reply_tx.send(result).is_err() {
                    debug!(
                        endpoint = job_ctx.endpoint(),
                        "caller already released, discarding late owner result"
                    );
                }
            }),
        )?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DispatchError::OwnerUnavailable { name }),
            Err(_) => Err(self.timed_out(name, timeout)),
        }
    }

    /// Run `descriptor` and block the calling thread for its result.
    ///
    /// Same contract as [`invoke`](Self::invoke), for callers that are not
    /// running inside an async runtime.
    pub fn invoke_blocking(
        &self,
        descriptor: &EndpointDescriptor<S>,
        ctx: &InvokeContext,
        timeout: Duration,
    ) -> Result<Value, DispatchError> {
        let owner_fn = match descriptor.handler() {
            EndpointHandler::Inline(f) => return guarded(descriptor.name(), || f(ctx)),
            EndpointHandler::OwnerAffine(f) => Arc::clone(f),
        };
        if let Some(result) = self.run_if_owner(&owner_fn, ctx) {
            return result;
        }

        let name = descriptor.name().to_owned();
        let (reply_tx, reply_rx) = std_mpsc::sync_channel(1);
        let job_ctx = ctx.clone();
        self.enqueue(
            &name,
            Box::new(move |state: &S| {
                let result = guarded(job_ctx.endpoint(), || owner_fn(state, &job_ctx));
                if reply_tx.send(result).is_err() {
                    debug!(
                        endpoint = job_ctx.endpoint(),
                        "caller already released, discarding late owner result"
                    );
                }
            }),
        )?;

        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                Err(DispatchError::OwnerUnavailable { name })
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => Err(self.timed_out(name, timeout)),
        }
    }

    fn owner_state(&self) -> Option<S> {
        ATTACHED.with(|attached| {
            attached
                .borrow()
                .iter()
                .find(|o| o.bridge_id == self.id)
                .and_then(|o| o.state.downcast_ref::<S>())
                .cloned()
        })
    }

    /// Reentrant path: already on the owner thread, so run in place.
    fn run_if_owner(
        &self,
        owner_fn: &Arc<OwnerFn<S>>,
        ctx: &InvokeContext,
    ) -> Option<Result<Value, DispatchError>> {
        let state = self.owner_state()?;
        debug!(endpoint = ctx.endpoint(), "invoked on owner thread, running inline");
        Some(guarded(ctx.endpoint(), || owner_fn(&state, ctx)))
    }

    fn enqueue(&self, name: &str, job: Job<S>) -> Result<(), DispatchError> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.jobs.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(DispatchError::OwnerUnavailable {
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    fn timed_out(&self, name: String, timeout: Duration) -> DispatchError {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        warn!(
            endpoint = %name,
            timeout_ms,
            pending = self.pending(),
            "owner context did not run endpoint in time"
        );
        DispatchError::Timeout { name, timeout_ms }
    }
}

impl<S> Clone for OwnerThreadBridge<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            jobs: self.jobs.clone(),
            pending: Arc::clone(&self.pending),
            default_timeout: self.default_timeout,
        }
    }
}

impl<S> fmt::Debug for OwnerThreadBridge<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerThreadBridge")
            .field("id", &self.id)
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl<S: Clone + 'static> OwnerReceiver<S> {
    /// Bind the receiver to the current thread with the owner state.
    ///
    /// Must be called on the owner thread. From then on, bridge calls made
    /// on this thread run inline against `state`.
    pub fn attach(self, state: S) -> OwnerQueue<S> {
        ATTACHED.with(|attached| {
            attached.borrow_mut().push(AttachedOwner {
                bridge_id: self.id,
                state: Box::new(state.clone()),
            });
        });
        debug!(bridge_id = self.id, "owner context attached");
        OwnerQueue {
            id: self.id,
            jobs: self.jobs,
            pending: self.pending,
            state,
            _not_send: PhantomData,
        }
    }
}

impl<S> fmt::Debug for OwnerReceiver<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerReceiver").field("id", &self.id).finish_non_exhaustive()
    }
}

impl<S> OwnerQueue<S> {
    /// Run every job queued so far, in FIFO order. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        self.run_pending_limited(0)
    }

    /// Run at most `max_jobs` queued jobs (0 means no limit).
    pub fn run_pending_limited(&mut self, max_jobs: usize) -> usize {
        let mut ran: usize = 0;
        while max_jobs == 0 || ran < max_jobs {
            let Ok(job) = self.jobs.try_recv() else {
                break;
            };
            self.pending.fetch_sub(1, Ordering::AcqRel);
            job(&self.state);
            ran = ran.saturating_add(1);
        }
        ran
    }

    /// Jobs waiting to run.
    pub fn backlog(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

impl<S> Drop for OwnerQueue<S> {
    fn drop(&mut self) {
        let id = self.id;
        ATTACHED.with(|attached| attached.borrow_mut().retain(|o| o.bridge_id != id));
        debug!(bridge_id = id, "owner context detached");
    }
}

impl<S> fmt::Debug for OwnerQueue<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerQueue")
            .field("id", &self.id)
            .field("backlog", &self.pending.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Run a callback, converting failures and panics into [`DispatchError`].
fn guarded<F>(name: &str, callback: F) -> Result<Value, DispatchError>
where
    F: FnOnce() -> CallbackResult,
{
    panic::catch_unwind(AssertUnwindSafe(callback))
        .unwrap_or_else(|payload| {
            Err(CallbackError::Panicked {
                message: panic_message(payload.as_ref()),
            })
        })
        .map_err(|source| DispatchError::CallbackFailure {
            name: name.to_owned(),
            source,
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("non-string panic payload"))
}
