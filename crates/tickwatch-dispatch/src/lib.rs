//! Concurrent dispatch engine for the Tickwatch monitoring gateway.
//!
//! This crate sits between a multi-threaded network server and the
//! single-threaded simulation tick loop that owns the world state. It
//! provides:
//!
//! - [`registry`] -- [`EndpointRegistry`], the name to descriptor map,
//!   read through immutable snapshots so lookups never contend.
//! - [`bridge`] -- [`OwnerThreadBridge`], which marshals owner-affine
//!   callbacks onto the tick loop's FIFO queue and waits for the result
//!   with a bounded timeout.
//! - [`router`] -- [`RequestRouter`], which resolves single, grouped,
//!   and "all endpoints" requests and tolerates partial failures.
//! - [`session`] -- [`SessionManager`], the per-connection
//!   subscribe/unsubscribe bookkeeping and best-effort fan-out.
//!
//! # Execution domains
//!
//! ```text
//!  serving tasks (Tokio)              owner thread (tick loop)
//!  ---------------------              ------------------------
//!  RequestRouter::handle
//!     |-- inline endpoint -> run here
//!     `-- owner-affine ---> enqueue --> OwnerQueue::run_pending
//!            wait <=timeout <-- reply --'
//! ```

pub mod bridge;
pub mod descriptor;
pub mod error;
pub mod registry;
pub mod router;
pub mod session;

pub use bridge::{OwnerQueue, OwnerReceiver, OwnerThreadBridge, DEFAULT_TIMEOUT};
pub use descriptor::{CallbackResult, EndpointDescriptor, EndpointHandler, InvokeContext, Origin};
pub use error::{CallbackError, DispatchError, SessionError};
pub use registry::EndpointRegistry;
pub use router::{DispatchRequest, PartialFailure, RequestRouter, RouterResponse};
pub use session::{ConnectionId, ControlAction, ControlOutcome, SessionManager, SessionPhase};
