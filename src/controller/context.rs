//! Shared controller state
//!
//! Every collaborator of the reconcile loop sits behind a trait object so a
//! pass can run against the real cluster or against in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use kube::Client;
use tracing::info;

use super::resource::{KubeResourceApi, ManagedResource, ResourceApi};
use crate::clients::{ClientFactory, NoExternalClients};
use crate::config::OperatorConfig;
use crate::credentials::{CredentialWatcher, KubeCredentialWatcher};
use crate::engine::{DefaultExecutor, ExecutionContext, Executor, Step};
use crate::store::{ClusterStore, ConfigMapHashStore, KubeClusterStore, SpecHashStore};
use crate::{Error, Result};

/// Turns a resource into the step tree for one phase
pub trait StepBuilder<K>: Send + Sync {
    /// Build the tree; the context is read-only at this point
    fn build(&self, resource: &K, ctx: &ExecutionContext) -> Result<Box<dyn Step>>;
}

impl<K, F> StepBuilder<K> for F
where
    F: Fn(&K, &ExecutionContext) -> Result<Box<dyn Step>> + Send + Sync,
{
    fn build(&self, resource: &K, ctx: &ExecutionContext) -> Result<Box<dyn Step>> {
        self(resource, ctx)
    }
}

/// Stops the operator process
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Wait `after`, then stop; may never return
    async fn halt(&self, after: Duration);
}

/// Sleeps and exits the process cleanly
#[derive(Clone, Copy, Debug, Default)]
pub struct ExitProcess;

#[async_trait]
impl ProcessControl for ExitProcess {
    async fn halt(&self, after: Duration) {
        info!(sleep_secs = after.as_secs(), "halting operator");
        tokio::time::sleep(after).await;
        std::process::exit(0);
    }
}

/// State shared by every reconcile pass of one resource kind
pub struct Context<K: ManagedResource> {
    /// Process-wide settings
    pub config: OperatorConfig,
    /// Resource reads and status writes
    pub resources: Arc<dyn ResourceApi<K>>,
    /// Cluster queries used by steps and classifiers
    pub cluster: Arc<dyn ClusterStore>,
    /// Spec-hash record storage
    pub hash_store: Arc<dyn SpecHashStore>,
    /// External client construction
    pub clients: Arc<dyn ClientFactory>,
    /// Admin secret tracking
    pub credentials: Arc<dyn CredentialWatcher>,
    /// Runs step trees
    pub executor: Arc<dyn Executor>,
    /// Version-mismatch shutdown
    pub process: Arc<dyn ProcessControl>,
    /// Main deployment tree
    pub main: Arc<dyn StepBuilder<K>>,
    /// Runs before the main tree
    pub predeploy: Option<Arc<dyn StepBuilder<K>>>,
    /// Runs after a successful main tree
    pub disaster_recovery: Option<Arc<dyn StepBuilder<K>>>,
    /// Runs on credential rotation when a full pass is not requested
    pub password_update: Option<Arc<dyn StepBuilder<K>>>,
    watched_secrets: DashSet<String>,
}

impl<K: ManagedResource> Context<K> {
    /// Start building a context around the main tree builder
    pub fn builder(main: impl StepBuilder<K> + 'static) -> ContextBuilder<K> {
        ContextBuilder::new(Arc::new(main))
    }

    /// Claim the watch for `key`; false when one is already registered
    pub(crate) fn claim_watch(&self, key: &str) -> bool {
        self.watched_secrets.insert(key.to_string())
    }

    /// Forget a watch whose registration failed
    pub(crate) fn release_watch(&self, key: &str) {
        self.watched_secrets.remove(key);
    }

    /// Whether a watch is registered for `key`
    pub fn is_watching(&self, key: &str) -> bool {
        self.watched_secrets.contains(key)
    }
}

/// Builder for [`Context`]
///
/// Components left unset fall back to Kubernetes-backed implementations,
/// which requires a client.
pub struct ContextBuilder<K: ManagedResource> {
    client: Option<Client>,
    config: OperatorConfig,
    resources: Option<Arc<dyn ResourceApi<K>>>,
    cluster: Option<Arc<dyn ClusterStore>>,
    hash_store: Option<Arc<dyn SpecHashStore>>,
    clients: Option<Arc<dyn ClientFactory>>,
    credentials: Option<Arc<dyn CredentialWatcher>>,
    executor: Option<Arc<dyn Executor>>,
    process: Option<Arc<dyn ProcessControl>>,
    main: Arc<dyn StepBuilder<K>>,
    predeploy: Option<Arc<dyn StepBuilder<K>>>,
    disaster_recovery: Option<Arc<dyn StepBuilder<K>>>,
    password_update: Option<Arc<dyn StepBuilder<K>>>,
}

impl<K: ManagedResource> ContextBuilder<K> {
    fn new(main: Arc<dyn StepBuilder<K>>) -> Self {
        Self {
            client: None,
            config: OperatorConfig::default(),
            resources: None,
            cluster: None,
            hash_store: None,
            clients: None,
            credentials: None,
            executor: None,
            process: None,
            main,
            predeploy: None,
            disaster_recovery: None,
            password_update: None,
        }
    }

    /// Client used for every component not set explicitly
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Operator settings
    pub fn config(mut self, config: OperatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Override resource access
    pub fn resource_api(mut self, api: Arc<dyn ResourceApi<K>>) -> Self {
        self.resources = Some(api);
        self
    }

    /// Override the cluster store
    pub fn cluster_store(mut self, store: Arc<dyn ClusterStore>) -> Self {
        self.cluster = Some(store);
        self
    }

    /// Override the spec-hash store
    pub fn hash_store(mut self, store: Arc<dyn SpecHashStore>) -> Self {
        self.hash_store = Some(store);
        self
    }

    /// Override external client construction
    pub fn client_factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.clients = Some(factory);
        self
    }

    /// Override credential tracking
    pub fn credential_watcher(mut self, watcher: Arc<dyn CredentialWatcher>) -> Self {
        self.credentials = Some(watcher);
        self
    }

    /// Override the executor
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Override process shutdown
    pub fn process_control(mut self, process: Arc<dyn ProcessControl>) -> Self {
        self.process = Some(process);
        self
    }

    /// Pre-deploy tree builder
    pub fn predeploy(mut self, builder: impl StepBuilder<K> + 'static) -> Self {
        self.predeploy = Some(Arc::new(builder));
        self
    }

    /// Disaster-recovery tree builder
    pub fn disaster_recovery(mut self, builder: impl StepBuilder<K> + 'static) -> Self {
        self.disaster_recovery = Some(Arc::new(builder));
        self
    }

    /// Password-update tree builder
    pub fn password_update(mut self, builder: impl StepBuilder<K> + 'static) -> Self {
        self.password_update = Some(Arc::new(builder));
        self
    }

    /// Assemble the context
    pub fn build(self) -> Result<Context<K>> {
        let client = self.client;
        Ok(Context {
            resources: or_from_client(self.resources, &client, "resource api", |c| {
                Arc::new(KubeResourceApi::<K>::new(c))
            })?,
            cluster: or_from_client(self.cluster, &client, "cluster store", |c| {
                Arc::new(KubeClusterStore::new(c))
            })?,
            hash_store: or_from_client(self.hash_store, &client, "hash store", |c| {
                Arc::new(ConfigMapHashStore::new(c))
            })?,
            credentials: or_from_client(self.credentials, &client, "credential watcher", |c| {
                Arc::new(KubeCredentialWatcher::new(c))
            })?,
            clients: self.clients.unwrap_or_else(|| Arc::new(NoExternalClients)),
            executor: self.executor.unwrap_or_else(|| Arc::new(DefaultExecutor)),
            process: self.process.unwrap_or_else(|| Arc::new(ExitProcess)),
            config: self.config,
            main: self.main,
            predeploy: self.predeploy,
            disaster_recovery: self.disaster_recovery,
            password_update: self.password_update,
            watched_secrets: DashSet::new(),
        })
    }
}

fn or_from_client<T: ?Sized>(
    slot: Option<Arc<T>>,
    client: &Option<Client>,
    what: &str,
    make: impl FnOnce(Client) -> Arc<T>,
) -> Result<Arc<T>> {
    match (slot, client) {
        (Some(component), _) => Ok(component),
        (None, Some(client)) => Ok(make(client.clone())),
        (None, None) => Err(Error::config(format!(
            "no {what} configured and no kubernetes client to build one"
        ))),
    }
}
