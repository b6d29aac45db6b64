//! In-memory collaborators for reconcile scenarios

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::runtime::controller::Action;

use nosqldb_operator::config::OperatorConfig;
use nosqldb_operator::controller::{
    reconcile, Context, ContextBuilder, ProcessControl, ResourceApi,
};
use nosqldb_operator::credentials::{CredentialCallback, CredentialWatcher};
use nosqldb_operator::crd::{DeploymentStatus, NoSqlDb, NoSqlDbSpec, StorageSpec};
use nosqldb_operator::engine::{from_fn, ExecutionContext, Sequence, Step};
use nosqldb_operator::store::{ClusterStore, SpecHashStore};
use nosqldb_operator::{Error, Result};

pub const NAMESPACE: &str = "prod";
pub const ADMIN_SECRET: &str = "orders-admin";

/// A NoSqlDb named `orders` with two replicas on the standard class
pub fn sample_db() -> NoSqlDb {
    NoSqlDb {
        metadata: ObjectMeta {
            name: Some("orders".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            uid: Some("6f1c9c52-orders".to_string()),
            ..Default::default()
        },
        spec: NoSqlDbSpec {
            deployment_version: Some("1.4.0".to_string()),
            replicas: 2,
            storage: StorageSpec {
                size: vec!["5Gi".to_string()],
                storage_classes: Some(vec!["standard".to_string()]),
                ..Default::default()
            },
            secret_store: None,
            registry: None,
            admin_secret: None,
            full_reconcile_on_password_change: false,
        },
        status: None,
    }
}

/// Defaults with failed passes eligible for retry immediately
pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        failed_retry_interval: Duration::ZERO,
        ..Default::default()
    }
}

/// What a recording step does when executed
#[derive(Clone, Debug)]
pub enum Behavior {
    Succeed,
    Fail(String),
    Panic(String),
    FailDisasterRecovery(String),
}

impl Behavior {
    fn run(&self) -> Result<()> {
        match self {
            Behavior::Succeed => Ok(()),
            Behavior::Fail(msg) => Err(Error::execution(msg.clone())),
            Behavior::Panic(msg) => panic!("{}", msg),
            Behavior::FailDisasterRecovery(msg) => Err(Error::disaster_recovery(msg.clone())),
        }
    }
}

pub type Switch = Arc<Mutex<Behavior>>;
pub type Log = Arc<Mutex<Vec<String>>>;

pub fn switch(behavior: Behavior) -> Switch {
    Arc::new(Mutex::new(behavior))
}

/// Tree builder whose single step logs `label` and then behaves as `behavior` says
pub fn recording_tree(
    log: Log,
    label: &'static str,
    behavior: Switch,
) -> impl Fn(&NoSqlDb, &ExecutionContext) -> Result<Box<dyn Step>> + Send + Sync + 'static {
    move |_db, _ctx| {
        let log = log.clone();
        let behavior = behavior.lock().unwrap().clone();
        let step: Box<dyn Step> = Box::new(Sequence::new(label).then(from_fn(
            label,
            move |_ctx| {
                log.lock().unwrap().push(label.to_string());
                behavior.run()
            },
        )));
        Ok(step)
    }
}

// =============================================================================
// Resource API
// =============================================================================

pub struct FakeResources {
    current: Mutex<Option<NoSqlDb>>,
    writes: Mutex<Vec<DeploymentStatus>>,
}

impl FakeResources {
    pub fn new(db: NoSqlDb) -> Self {
        Self {
            current: Mutex::new(Some(db)),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// The resource as the next watch event would deliver it
    pub fn current(&self) -> Arc<NoSqlDb> {
        Arc::new(self.current.lock().unwrap().clone().expect("resource deleted"))
    }

    pub fn update_spec(&self, edit: impl FnOnce(&mut NoSqlDbSpec)) {
        if let Some(db) = self.current.lock().unwrap().as_mut() {
            edit(&mut db.spec);
        }
    }

    pub fn delete(&self) {
        *self.current.lock().unwrap() = None;
    }

    pub fn status(&self) -> DeploymentStatus {
        self.current
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|db| db.status.clone())
            .unwrap_or_default()
    }

    pub fn set_status(&self, status: DeploymentStatus) {
        if let Some(db) = self.current.lock().unwrap().as_mut() {
            db.status = Some(status);
        }
    }

    /// Drop the status, as a restore from a status-less backup would
    pub fn clear_status(&self) {
        if let Some(db) = self.current.lock().unwrap().as_mut() {
            db.status = None;
        }
    }

    pub fn status_writes(&self) -> Vec<DeploymentStatus> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceApi<NoSqlDb> for FakeResources {
    async fn get(&self, _namespace: &str, _name: &str) -> Result<Option<NoSqlDb>> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn patch_status(
        &self,
        _namespace: &str,
        _name: &str,
        status: &DeploymentStatus,
    ) -> Result<()> {
        self.writes.lock().unwrap().push(status.clone());
        self.set_status(status.clone());
        Ok(())
    }
}

// =============================================================================
// Spec-hash record
// =============================================================================

#[derive(Default)]
pub struct MemoryHashStore {
    records: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    pub writes: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl MemoryHashStore {
    pub fn record(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.records
            .lock()
            .unwrap()
            .get(&format!("{NAMESPACE}/{name}"))
            .cloned()
    }
}

#[async_trait]
impl SpecHashStore for MemoryHashStore {
    async fn get_or_create(
        &self,
        namespace: &str,
        name: &str,
        _owner: Option<OwnerReference>,
    ) -> Result<BTreeMap<String, String>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .entry(format!("{namespace}/{name}"))
            .or_default()
            .clone())
    }

    async fn write_field(&self, namespace: &str, name: &str, key: &str, value: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .entry(format!("{namespace}/{name}"))
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str, _timeout: Duration) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .remove(&format!("{namespace}/{name}"));
        Ok(())
    }
}

// =============================================================================
// Cluster
// =============================================================================

/// Claims and recycler pods; pods complete as soon as they are created
#[derive(Default)]
pub struct FakeCluster {
    claims: Mutex<Vec<String>>,
    pods: Mutex<Vec<String>>,
    recycled: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn claims(&self) -> Vec<String> {
        self.claims.lock().unwrap().clone()
    }

    /// Names of every recycler pod that ran to completion
    pub fn recycled(&self) -> Vec<String> {
        self.recycled.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterStore for FakeCluster {
    async fn count_pvcs(&self, _namespace: &str, _labels: &BTreeMap<String, String>) -> Result<usize> {
        Ok(self.claims.lock().unwrap().len())
    }

    async fn ensure_pvc(&self, _namespace: &str, pvc: PersistentVolumeClaim) -> Result<()> {
        let name = pvc.metadata.name.unwrap_or_default();
        let mut claims = self.claims.lock().unwrap();
        if !claims.contains(&name) {
            claims.push(name);
        }
        Ok(())
    }

    async fn wait_for_pvc_bound(&self, _namespace: &str, _name: &str, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn ensure_pod(&self, _namespace: &str, pod: Pod) -> Result<()> {
        self.pods
            .lock()
            .unwrap()
            .push(pod.metadata.name.unwrap_or_default());
        Ok(())
    }

    async fn wait_for_pods_succeeded(
        &self,
        _namespace: &str,
        _labels: &BTreeMap<String, String>,
        count: usize,
        _timeout: Duration,
    ) -> Result<()> {
        let pods = self.pods.lock().unwrap().clone();
        if pods.len() < count {
            return Err(Error::timeout(format!("{} of {count} pods completed", pods.len())));
        }
        self.recycled.lock().unwrap().extend(pods);
        Ok(())
    }

    async fn delete_pods(
        &self,
        _namespace: &str,
        _labels: &BTreeMap<String, String>,
        _timeout: Duration,
    ) -> Result<()> {
        self.pods.lock().unwrap().clear();
        Ok(())
    }
}

// =============================================================================
// Process control
// =============================================================================

#[derive(Default)]
pub struct RecordingHalt {
    halts: Mutex<Vec<Duration>>,
}

impl RecordingHalt {
    pub fn halts(&self) -> Vec<Duration> {
        self.halts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessControl for RecordingHalt {
    async fn halt(&self, after: Duration) {
        self.halts.lock().unwrap().push(after);
    }
}

// =============================================================================
// Credentials
// =============================================================================

#[derive(Default)]
pub struct FakeCredentials {
    changed: AtomicBool,
    pub fail_watch: AtomicBool,
    pub watches: AtomicUsize,
    pub unwatches: AtomicUsize,
    pub actualized: AtomicUsize,
    callback: Mutex<Option<CredentialCallback>>,
}

impl FakeCredentials {
    /// Rotate the admin password out of band
    pub fn rotate(&self) {
        self.changed.store(true, Ordering::SeqCst);
    }

    pub fn is_changed(&self) -> bool {
        self.changed.load(Ordering::SeqCst)
    }

    /// Deliver the watch event for a rotation
    pub async fn fire(&self) {
        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback().await;
        }
    }
}

#[async_trait]
impl CredentialWatcher for FakeCredentials {
    async fn watch(&self, _namespace: &str, secret: &str, on_change: CredentialCallback) -> Result<()> {
        if self.fail_watch.load(Ordering::SeqCst) {
            return Err(Error::not_found(format!("secret {secret}")));
        }
        self.watches.fetch_add(1, Ordering::SeqCst);
        *self.callback.lock().unwrap() = Some(on_change);
        Ok(())
    }

    async fn are_creds_changed(&self, _namespace: &str, _secret: &str) -> Result<bool> {
        Ok(self.changed.load(Ordering::SeqCst))
    }

    async fn actualize_creds(&self, _namespace: &str, _secret: &str) -> Result<()> {
        self.changed.store(false, Ordering::SeqCst);
        self.actualized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unwatch(&self, _namespace: &str, _secret: &str) -> Result<()> {
        self.unwatches.fetch_add(1, Ordering::SeqCst);
        *self.callback.lock().unwrap() = None;
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

/// One resource and every collaborator a pass touches
pub struct Harness {
    pub resources: Arc<FakeResources>,
    pub hashes: Arc<MemoryHashStore>,
    pub cluster: Arc<FakeCluster>,
    pub halt: Arc<RecordingHalt>,
    pub credentials: Arc<FakeCredentials>,
    pub log: Log,
    pub main: Switch,
}

impl Harness {
    pub fn new(db: NoSqlDb) -> Self {
        Self {
            resources: Arc::new(FakeResources::new(db)),
            hashes: Arc::new(MemoryHashStore::default()),
            cluster: Arc::new(FakeCluster::default()),
            halt: Arc::new(RecordingHalt::default()),
            credentials: Arc::new(FakeCredentials::default()),
            log: Arc::new(Mutex::new(Vec::new())),
            main: switch(Behavior::Succeed),
        }
    }

    /// Context wired to the fakes with a recording main tree
    pub fn builder(&self) -> ContextBuilder<NoSqlDb> {
        self.wire(Context::builder(recording_tree(
            self.log.clone(),
            "main",
            self.main.clone(),
        )))
    }

    /// Wire the fakes into an existing builder
    pub fn wire(&self, builder: ContextBuilder<NoSqlDb>) -> ContextBuilder<NoSqlDb> {
        builder
            .config(test_config())
            .resource_api(self.resources.clone())
            .cluster_store(self.cluster.clone())
            .hash_store(self.hashes.clone())
            .credential_watcher(self.credentials.clone())
            .process_control(self.halt.clone())
    }

    pub fn tree(
        &self,
        label: &'static str,
        behavior: Behavior,
    ) -> impl Fn(&NoSqlDb, &ExecutionContext) -> Result<Box<dyn Step>> + Send + Sync + 'static {
        recording_tree(self.log.clone(), label, switch(behavior))
    }

    pub fn set_main(&self, behavior: Behavior) {
        *self.main.lock().unwrap() = behavior;
    }

    /// Pretend the current condition transitioned `by` earlier than recorded
    pub fn age_status(&self, by: Duration) {
        let mut status = self.resources.status();
        let by = chrono::Duration::from_std(by).expect("age fits");
        for condition in &mut status.conditions {
            condition.last_transition_time -= by;
        }
        self.resources.set_status(status);
    }

    /// Run one pass for the resource as currently stored
    pub async fn pass(&self, ctx: &Arc<Context<NoSqlDb>>) -> Action {
        reconcile(self.resources.current(), ctx.clone())
            .await
            .expect("reconcile never fails")
    }

    /// Labels of the trees that ran, in order
    pub fn ran(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

pub fn build(builder: ContextBuilder<NoSqlDb>) -> Arc<Context<NoSqlDb>> {
    Arc::new(builder.build().expect("context"))
}
