//! Request routing and aggregation.
//!
//! [`RequestRouter`] turns a request name into one of three shapes:
//!
//! | Shape | Source | Failure handling |
//! |-------|--------|------------------|
//! | [`DispatchRequest::Single`] | a registered endpoint name | error returned to the caller |
//! | [`DispatchRequest::List`] | a configured endpoint group | per-key `null` |
//! | [`DispatchRequest::All`] | the "all" alias | per-key `null` |
//!
//! Aggregates invoke their members concurrently and always return an
//! object keyed by endpoint name in registration (or group) order. One slow
//! or broken endpoint only blanks its own key.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::bridge::OwnerThreadBridge;
use crate::descriptor::{EndpointDescriptor, InvokeContext, Origin};
use crate::error::DispatchError;
use crate::registry::EndpointRegistry;

/// Default name of the "all endpoints" composite.
pub const DEFAULT_ALL_ALIAS: &str = "getAll";

/// What a caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchRequest {
    /// One endpoint by name.
    Single(String),
    /// An explicit list of endpoints.
    List(Vec<String>),
    /// Every aggregable endpoint.
    All,
}

/// An endpoint that failed inside an aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialFailure {
    /// The endpoint that failed.
    pub endpoint: String,
    /// Why it failed.
    pub error: DispatchError,
}

/// Payload plus the members of an aggregate that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterResponse {
    /// The endpoint value, or an object keyed by endpoint name.
    pub payload: Value,
    /// Aggregate members replaced by `null`. Always empty for single
    /// requests.
    pub failures: Vec<PartialFailure>,
}

/// Resolves requests against the registry and invokes through the bridge.
pub struct RequestRouter<S> {
    registry: Arc<EndpointRegistry<S>>,
    bridge: OwnerThreadBridge<S>,
    timeout: Duration,
    all_alias: String,
    groups: BTreeMap<String, Vec<String>>,
}

impl<S: Clone + 'static> RequestRouter<S> {
    /// Create a router using the bridge's default timeout and the
    /// `getAll` alias.
    pub fn new(registry: Arc<EndpointRegistry<S>>, bridge: OwnerThreadBridge<S>) -> Self {
        let timeout = bridge.default_timeout();
        Self {
            registry,
            bridge,
            timeout,
            all_alias: String::from(DEFAULT_ALL_ALIAS),
            groups: BTreeMap::new(),
        }
    }

    /// Override the per-endpoint wait bound.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the name that maps to [`DispatchRequest::All`].
    #[must_use]
    pub fn with_all_alias(mut self, alias: impl Into<String>) -> Self {
        self.all_alias = alias.into();
        self
    }

    /// Register named endpoint groups that map to [`DispatchRequest::List`].
    #[must_use]
    pub fn with_groups(mut self, groups: BTreeMap<String, Vec<String>>) -> Self {
        self.groups = groups;
        self
    }

    /// The registry this router reads.
    pub const fn registry(&self) -> &Arc<EndpointRegistry<S>> {
        &self.registry
    }

    /// The bridge this router invokes through.
    pub const fn bridge(&self) -> &OwnerThreadBridge<S> {
        &self.bridge
    }

    /// Configured endpoint groups.
    pub const fn groups(&self) -> &BTreeMap<String, Vec<String>> {
        &self.groups
    }

    /// The "all endpoints" alias.
    pub fn all_alias(&self) -> &str {
        &self.all_alias
    }

    /// Map a request name to its shape.
    ///
    /// Registered endpoints are authoritative: a registered name shadows
    /// the alias and any group of the same name.
    pub fn resolve(&self, name: &str) -> DispatchRequest {
        if self.registry.contains(name) {
            return DispatchRequest::Single(name.to_owned());
        }
        if name == self.all_alias {
            return DispatchRequest::All;
        }
        self.groups.get(name).map_or_else(
            || DispatchRequest::Single(name.to_owned()),
            |members| DispatchRequest::List(members.clone()),
        )
    }

    /// Whether `name` resolves to something servable.
    pub fn is_known(&self, name: &str) -> bool {
        self.registry.contains(name) || name == self.all_alias || self.groups.contains_key(name)
    }

    /// Resolve `name` and handle it.
    pub async fn handle_name(
        &self,
        name: &str,
        origin: Origin,
    ) -> Result<RouterResponse, DispatchError> {
        self.handle(self.resolve(name), origin).await
    }

    /// Handle a request.
    ///
    /// Single requests return the endpoint's failure as `Err`. Aggregates
    /// always return `Ok` and list their failed members.
    pub async fn handle(
        &self,
        request: DispatchRequest,
        origin: Origin,
    ) -> Result<RouterResponse, DispatchError> {
        match request {
            DispatchRequest::Single(name) => {
                let descriptor = self.registry.lookup(&name)?;
                let ctx = InvokeContext::new(name.as_str(), origin);
                let payload = self.bridge.invoke(&descriptor, &ctx, self.timeout).await?;
                Ok(RouterResponse {
                    payload,
                    failures: Vec::new(),
                })
            }
            DispatchRequest::List(names) => Ok(self.aggregate_list(&names).await),
            DispatchRequest::All => Ok(self.aggregate_all().await),
        }
    }

    /// Render a payload as pretty JSON when `debug` is set, compact
    /// otherwise.
    pub fn render(payload: &Value, debug: bool) -> Result<String, serde_json::Error> {
        if debug {
            serde_json::to_string_pretty(payload)
        } else {
            serde_json::to_string(payload)
        }
    }

    async fn aggregate_all(&self) -> RouterResponse {
        let snapshot = self.registry.all();
        let mut seen = HashSet::with_capacity(snapshot.len());
        let members: Vec<Arc<EndpointDescriptor<S>>> = snapshot
            .iter()
            .filter(|d| seen.insert(d.name().to_owned()))
            .filter(|d| d.aggregable())
            .cloned()
            .collect();

        let names: Vec<String> = members.iter().map(|d| d.name().to_owned()).collect();
        let results = join_all(members.iter().map(|d| self.invoke_member(d))).await;
        Self::assemble(names, results)
    }

    async fn aggregate_list(&self, names: &[String]) -> RouterResponse {
        let results = join_all(names.iter().map(|name| self.invoke_named(name))).await;
        Self::assemble(names.to_vec(), results)
    }

    async fn invoke_named(&self, name: &str) -> Result<Value, DispatchError> {
        let descriptor = self.registry.lookup(name)?;
        self.invoke_member(&descriptor).await
    }

    async fn invoke_member(&self, descriptor: &EndpointDescriptor<S>) -> Result<Value, DispatchError> {
        let ctx = InvokeContext::new(descriptor.name(), Origin::Aggregate);
        self.bridge.invoke(descriptor, &ctx, self.timeout).await
    }

    fn assemble(names: Vec<String>, results: Vec<Result<Value, DispatchError>>) -> RouterResponse {
        let mut payload = Map::with_capacity(names.len());
        let mut failures = Vec::new();

        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(value) => {
                    payload.insert(name, value);
                }
                Err(err) => {
                    match &err {
                        DispatchError::CallbackFailure { source, .. } => {
                            error!(endpoint = %name, error = %source, "aggregate member failed");
                        }
                        DispatchError::EndpointNotFound { .. } => {
                            debug!(endpoint = %name, "aggregate member not registered");
                        }
                        _ => {
                            warn!(endpoint = %name, kind = err.kind(), "aggregate member unavailable");
                        }
                    }
                    payload.insert(name.clone(), Value::Null);
                    failures.push(PartialFailure {
                        endpoint: name,
                        error: err,
                    });
                }
            }
        }

        RouterResponse {
            payload: Value::Object(payload),
            failures,
        }
    }
}

impl<S> fmt::Debug for RequestRouter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRouter")
            .field("registry", &self.registry)
            .field("timeout", &self.timeout)
            .field("all_alias", &self.all_alias)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::bridge::{DEFAULT_TIMEOUT, OwnerReceiver};
    use crate::error::CallbackError;

    fn router_with(
        endpoints: Vec<EndpointDescriptor<()>>,
    ) -> (RequestRouter<()>, OwnerReceiver<()>) {
        let registry = Arc::new(EndpointRegistry::new());
        for endpoint in endpoints {
            registry.register(endpoint);
        }
        let (bridge, receiver) = OwnerThreadBridge::channel(DEFAULT_TIMEOUT);
        (RequestRouter::new(registry, bridge), receiver)
    }

    fn ok(name: &str, value: Value) -> EndpointDescriptor<()> {
        EndpointDescriptor::inline(name, true, move |_| Ok(value.clone()))
    }

    fn failing(name: &str) -> EndpointDescriptor<()> {
        EndpointDescriptor::inline(name, true, |_| Err(CallbackError::new("sensor offline")))
    }

    #[tokio::test]
    async fn single_unknown_endpoint_is_not_found() {
        let (router, _rx) = router_with(vec![ok("getPower", json!([]))]);
        let result = router.handle_name("getNothing", Origin::Http).await;
        assert_eq!(
            result,
            Err(DispatchError::EndpointNotFound {
                name: String::from("getNothing")
            })
        );
    }

    #[tokio::test]
    async fn single_endpoint_returns_its_value() {
        let (router, _rx) = router_with(vec![ok("getPower", json!([{ "CircuitID": 1 }]))]);
        let result = router.handle_name("getPower", Origin::Http).await;
        assert_eq!(
            result.map(|r| r.payload),
            Ok(json!([{ "CircuitID": 1 }]))
        );
    }

    #[tokio::test]
    async fn single_endpoint_failure_is_an_error() {
        let (router, _rx) = router_with(vec![failing("getPower")]);
        let result = router.handle_name("getPower", Origin::Http).await;
        assert!(matches!(result, Err(DispatchError::CallbackFailure { .. })));
    }

    #[tokio::test]
    async fn aggregate_skips_non_aggregable_and_keeps_order() {
        let (router, _rx) = router_with(vec![
            ok("getZ", json!(1)),
            EndpointDescriptor::inline("getHidden", false, |_| Ok(json!(2))),
            ok("getA", json!(3)),
            ok("getZ", json!(99)),
        ]);

        let response = router.handle_name(DEFAULT_ALL_ALIAS, Origin::Http).await;
        let payload = response.map(|r| r.payload).unwrap_or_default();
        let keys: Vec<_> = payload
            .as_object()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        assert_eq!(keys, vec!["getZ", "getA"]);
        assert_eq!(payload["getZ"], json!(1));
    }

    #[tokio::test]
    async fn group_resolves_to_list_and_marks_unknown_members() {
        let (router, _rx) = router_with(vec![ok("getFuelGenerator", json!([]))]);
        let router = router.with_groups(BTreeMap::from([(
            String::from("getGenerators"),
            vec![String::from("getFuelGenerator"), String::from("getMissing")],
        )]));

        assert_eq!(
            router.resolve("getGenerators"),
            DispatchRequest::List(vec![
                String::from("getFuelGenerator"),
                String::from("getMissing")
            ])
        );
        let response = router.handle_name("getGenerators", Origin::Http).await;
        let response = response.unwrap_or(RouterResponse {
            payload: Value::Null,
            failures: Vec::new(),
        });
        assert_eq!(response.payload, json!({ "getFuelGenerator": [], "getMissing": null }));
        let failed: Vec<_> = response.failures.iter().map(|f| f.endpoint.as_str()).collect();
        assert_eq!(failed, vec!["getMissing"]);
    }

    #[tokio::test]
    async fn registered_name_shadows_alias() {
        let (router, _rx) = router_with(vec![ok("getAll", json!("custom"))]);
        assert_eq!(router.resolve("getAll"), DispatchRequest::Single(String::from("getAll")));
    }

    #[test]
    fn render_respects_debug_flag() {
        let value = json!({ "a": 1 });
        assert_eq!(RequestRouter::<()>::render(&value, false).ok(), Some(String::from("{\"a\":1}")));
        assert_eq!(
            RequestRouter::<()>::render(&value, true).ok(),
            Some(String::from("{\n  \"a\": 1\n}"))
        );
    }
}
