//! Per-pass execution context
//!
//! The fixed vocabulary every pass carries (request, spec snapshot, store
//! handles, change flag, deploy type, results) lives in typed fields. Values a
//! step introduces for later steps go through [`ContextKey`] tokens, which
//! keep the type attached to the key.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::{debug, warn};

use super::DeployType;
use crate::clients::{SecretStore, ServiceRegistry};
use crate::store::{ClusterStore, SpecHashStore};
use crate::{Error, Result};

/// Result recorded for a micro-service whose sequence completed
pub const DEPLOY_SUCCESS: &str = "success";

/// Typed key for values introduced by steps
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    /// Declare a key; names must be unique across a step tree
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Key name used in diagnostics
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.name).finish()
    }
}

/// Identity of the object being reconciled
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Request {
    /// Object name
    pub name: String,
    /// Object namespace
    pub namespace: String,
}

impl Request {
    /// Create a request
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Clone, Debug)]
struct SpecCheck {
    digest: String,
    changed: bool,
}

/// Mutable state shared by every step of one pass
pub struct ExecutionContext {
    request: Request,
    spec: serde_json::Value,
    owner: Option<OwnerReference>,
    cluster: Arc<dyn ClusterStore>,
    hash_store: Arc<dyn SpecHashStore>,
    hash_record: String,
    secret_store: Option<Arc<dyn SecretStore>>,
    registry: Option<Arc<dyn ServiceRegistry>>,
    spec_has_changes: bool,
    deploy_type: DeployType,
    deployment_results: BTreeMap<String, String>,
    spec_checks: HashMap<String, SpecCheck>,
    values: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl ExecutionContext {
    /// Create a context for `request` whose spec-hash record is `hash_record`
    pub fn new(
        request: Request,
        cluster: Arc<dyn ClusterStore>,
        hash_store: Arc<dyn SpecHashStore>,
        hash_record: impl Into<String>,
    ) -> Self {
        Self {
            request,
            spec: serde_json::Value::Null,
            owner: None,
            cluster,
            hash_store,
            hash_record: hash_record.into(),
            secret_store: None,
            registry: None,
            spec_has_changes: false,
            deploy_type: DeployType::Empty,
            deployment_results: BTreeMap::new(),
            spec_checks: HashMap::new(),
            values: HashMap::new(),
        }
    }

    /// Attach the desired spec snapshot
    pub fn with_spec(mut self, spec: serde_json::Value) -> Self {
        self.spec = spec;
        self
    }

    /// Attach the owner reference used for created objects
    pub fn with_owner(mut self, owner: Option<OwnerReference>) -> Self {
        self.owner = owner;
        self
    }

    /// Attach the secret store client
    pub fn with_secret_store(mut self, store: Option<Arc<dyn SecretStore>>) -> Self {
        self.secret_store = store;
        self
    }

    /// Object being reconciled
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Namespace of the object being reconciled
    pub fn namespace(&self) -> &str {
        &self.request.namespace
    }

    /// Desired spec as seen at the start of the pass
    pub fn spec(&self) -> &serde_json::Value {
        &self.spec
    }

    /// Owner reference for objects created during the pass
    pub fn owner(&self) -> Option<&OwnerReference> {
        self.owner.as_ref()
    }

    /// Cluster store handle
    pub fn cluster(&self) -> &Arc<dyn ClusterStore> {
        &self.cluster
    }

    /// Spec-hash store handle
    pub fn hash_store(&self) -> &Arc<dyn SpecHashStore> {
        &self.hash_store
    }

    /// Name of the spec-hash record
    pub fn hash_record(&self) -> &str {
        &self.hash_record
    }

    /// Secret store client, when the integration is enabled
    pub fn secret_store(&self) -> Option<&Arc<dyn SecretStore>> {
        self.secret_store.as_ref()
    }

    /// Service registry client, published before the main phase
    pub fn registry(&self) -> Option<&Arc<dyn ServiceRegistry>> {
        self.registry.as_ref()
    }

    /// Publish the service registry client
    pub fn set_registry(&mut self, registry: Option<Arc<dyn ServiceRegistry>>) {
        self.registry = registry;
    }

    /// Whether the desired spec changed since the last successful pass
    pub fn spec_has_changes(&self) -> bool {
        self.spec_has_changes
    }

    /// Set the change flag
    pub fn set_spec_has_changes(&mut self, changed: bool) {
        self.spec_has_changes = changed;
    }

    /// Deploy type of the innermost running micro-service sequence
    pub fn deploy_type(&self) -> DeployType {
        self.deploy_type
    }

    /// Publish a deploy type
    pub fn set_deploy_type(&mut self, deploy_type: DeployType) {
        self.deploy_type = deploy_type;
    }

    /// Record the outcome of a micro-service
    pub fn record_deployment_result(&mut self, service: impl Into<String>, result: impl Into<String>) {
        self.deployment_results.insert(service.into(), result.into());
    }

    /// Outcomes recorded so far, keyed by micro-service name
    pub fn deployment_results(&self) -> &BTreeMap<String, String> {
        &self.deployment_results
    }

    pub(crate) fn cached_spec_check(&self, key: &str, digest: &str) -> Option<bool> {
        self.spec_checks
            .get(key)
            .filter(|c| c.digest == digest)
            .map(|c| c.changed)
    }

    pub(crate) fn cache_spec_check(&mut self, key: &str, digest: String, changed: bool) {
        self.spec_checks
            .insert(key.to_string(), SpecCheck { digest, changed });
    }

    pub(crate) fn clear_spec_checks(&mut self) {
        self.spec_checks.clear();
    }

    /// Store a value, replacing any previous one under the same key
    pub fn set<T: Any + Send + Sync>(&mut self, key: &ContextKey<T>, value: T) {
        self.values.insert(key.name, Box::new(value));
    }

    /// Stored value, or `None` when the key was never set
    pub fn get<T: Any + Send + Sync>(&self, key: &ContextKey<T>) -> Option<&T> {
        let Some(value) = self.values.get(key.name) else {
            debug!(key = key.name, "context value not set");
            return None;
        };
        let typed = value.downcast_ref::<T>();
        if typed.is_none() {
            warn!(key = key.name, "context value has a different type");
        }
        typed
    }

    /// Mutable access to a stored value
    pub fn get_mut<T: Any + Send + Sync>(&mut self, key: &ContextKey<T>) -> Option<&mut T> {
        self.values
            .get_mut(key.name)
            .and_then(|v| v.downcast_mut::<T>())
    }

    /// Stored value, failing when it is missing
    pub fn require<T: Any + Send + Sync>(&self, key: &ContextKey<T>) -> Result<&T> {
        self.get(key)
            .ok_or_else(|| Error::MissingContext(key.name.to_string()))
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("request", &self.request)
            .field("hash_record", &self.hash_record)
            .field("spec_has_changes", &self.spec_has_changes)
            .field("deploy_type", &self.deploy_type)
            .field("deployment_results", &self.deployment_results)
            .field("values", &self.values.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
