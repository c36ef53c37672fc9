//! Endpoint descriptors and the callables they carry.
//!
//! A descriptor binds a name to a typed closure captured at registration
//! time. The closure comes in two flavours, tagged by [`EndpointHandler`]:
//!
//! - [`EndpointHandler::Inline`] runs on whichever thread serves the
//!   request. It typically reads a snapshot the tick loop publishes.
//! - [`EndpointHandler::OwnerAffine`] must run on the owner thread and
//!   receives the owner state `S` (for example an `Rc<RefCell<World>>`
//!   that never leaves that thread).

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::CallbackError;

/// Result of a single endpoint callback.
pub type CallbackResult = Result<Value, CallbackError>;

/// Callable for an endpoint that may run on any thread.
pub type InlineFn = dyn Fn(&InvokeContext) -> CallbackResult + Send + Sync;

/// Callable for an endpoint that must run on the owner thread.
pub type OwnerFn<S> = dyn Fn(&S, &InvokeContext) -> CallbackResult + Send + Sync;

/// Where an invocation originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// A single-endpoint HTTP request.
    Http,
    /// One member of an aggregate (`all` or group) request.
    Aggregate,
    /// The periodic publisher evaluating a subscribed endpoint.
    Publish,
    /// Called from host code directly.
    Internal,
}

/// Execution context handed to every callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeContext {
    endpoint: String,
    origin: Origin,
}

impl InvokeContext {
    /// Build a context for invoking `endpoint`.
    pub fn new(endpoint: impl Into<String>, origin: Origin) -> Self {
        Self {
            endpoint: endpoint.into(),
            origin,
        }
    }

    /// The endpoint being invoked.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Where the invocation came from.
    pub const fn origin(&self) -> Origin {
        self.origin
    }
}

/// The callable bound to an endpoint.
pub enum EndpointHandler<S> {
    /// Runs on the calling thread.
    Inline(Arc<InlineFn>),
    /// Runs on the owner thread with access to the owner state.
    OwnerAffine(Arc<OwnerFn<S>>),
}

impl<S> Clone for EndpointHandler<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Inline(f) => Self::Inline(Arc::clone(f)),
            Self::OwnerAffine(f) => Self::OwnerAffine(Arc::clone(f)),
        }
    }
}

impl<S> fmt::Debug for EndpointHandler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("Inline(..)"),
            Self::OwnerAffine(_) => f.write_str("OwnerAffine(..)"),
        }
    }
}

/// A registered endpoint. Immutable once built.
pub struct EndpointDescriptor<S> {
    name: String,
    aggregable: bool,
    handler: EndpointHandler<S>,
}

impl<S> EndpointDescriptor<S> {
    /// Describe an endpoint whose callback may run on any thread.
    pub fn inline<F>(name: impl Into<String>, aggregable: bool, callback: F) -> Self
    where
        F: Fn(&InvokeContext) -> CallbackResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            aggregable,
            handler: EndpointHandler::Inline(Arc::new(callback)),
        }
    }

    /// Describe an endpoint whose callback must run on the owner thread.
    pub fn owner_affine<F>(name: impl Into<String>, aggregable: bool, callback: F) -> Self
    where
        F: Fn(&S, &InvokeContext) -> CallbackResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            aggregable,
            handler: EndpointHandler::OwnerAffine(Arc::new(callback)),
        }
    }

    /// The endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the endpoint is part of the "all endpoints" composite.
    pub const fn aggregable(&self) -> bool {
        self.aggregable
    }

    /// Whether invocation must be marshaled to the owner thread.
    pub const fn is_owner_affine(&self) -> bool {
        matches!(self.handler, EndpointHandler::OwnerAffine(_))
    }

    /// The bound callable.
    pub const fn handler(&self) -> &EndpointHandler<S> {
        &self.handler
    }
}

impl<S> fmt::Debug for EndpointDescriptor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointDescriptor")
            .field("name", &self.name)
            .field("aggregable", &self.aggregable)
            .field("handler", &self.handler)
            .finish()
    }
}
