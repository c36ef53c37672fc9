//! Thread-safe endpoint registry.
//!
//! The registry keeps its descriptors in an immutable, registration-ordered
//! vector behind an [`ArcSwap`]. Readers load the current snapshot without
//! taking a lock; [`register`](EndpointRegistry::register) builds a new
//! vector and swaps it in, so a concurrent reader sees either the old or
//! the new list, never a partial one.
//!
//! Names are resolved by first match. Registering a duplicate name is
//! accepted and the later descriptor is shadowed for good.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;

use crate::descriptor::EndpointDescriptor;
use crate::error::DispatchError;

/// Registration-ordered snapshot of every descriptor.
pub type RegistrySnapshot<S> = Arc<Vec<Arc<EndpointDescriptor<S>>>>;

/// Name to descriptor map with lock-free reads.
pub struct EndpointRegistry<S> {
    endpoints: ArcSwap<Vec<Arc<EndpointDescriptor<S>>>>,
}

impl<S> EndpointRegistry<S> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            endpoints: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Append a descriptor.
    ///
    /// Always succeeds. If the name is already taken the new descriptor is
    /// stored but never returned by [`lookup`](Self::lookup).
    pub fn register(&self, descriptor: EndpointDescriptor<S>) {
        let name = descriptor.name().to_owned();
        let owner_affine = descriptor.is_owner_affine();
        let aggregable = descriptor.aggregable();
        let descriptor = Arc::new(descriptor);

        self.endpoints.rcu(|current| {
            let mut next = Vec::with_capacity(current.len().saturating_add(1));
            next.extend(current.iter().cloned());
            next.push(Arc::clone(&descriptor));
            next
        });

        debug!(endpoint = %name, owner_affine, aggregable, "endpoint registered");
    }

    /// Return the first descriptor registered under `name`.
    pub fn lookup(&self, name: &str) -> Result<Arc<EndpointDescriptor<S>>, DispatchError> {
        self.endpoints
            .load()
            .iter()
            .find(|d| d.name() == name)
            .cloned()
            .ok_or_else(|| DispatchError::EndpointNotFound {
                name: name.to_owned(),
            })
    }

    /// Whether any descriptor is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.endpoints.load().iter().any(|d| d.name() == name)
    }

    /// Snapshot of every descriptor in registration order, shadowed
    /// duplicates included.
    pub fn all(&self) -> RegistrySnapshot<S> {
        self.endpoints.load_full()
    }

    /// Endpoint names in registration order, one per distinct name.
    pub fn names(&self) -> Vec<String> {
        let snapshot = self.endpoints.load();
        let mut seen = HashSet::with_capacity(snapshot.len());
        let mut names = Vec::with_capacity(snapshot.len());
        for descriptor in snapshot.iter() {
            if seen.insert(descriptor.name()) {
                names.push(descriptor.name().to_owned());
            }
        }
        names
    }

    /// Number of registered descriptors, duplicates included.
    pub fn len(&self) -> usize {
        self.endpoints.load().len()
    }

    /// Whether nothing has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.endpoints.load().is_empty()
    }
}

impl<S> Default for EndpointRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for EndpointRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointRegistry")
            .field("endpoints", &self.names())
            .finish()
    }
}
