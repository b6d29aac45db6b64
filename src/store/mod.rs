//! Cluster-facing collaborators consumed by the engine
//!
//! Both traits are object-safe and mocked in unit tests; the Kubernetes
//! implementations live in the submodules.

mod config_map;
mod pvc;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

#[cfg(test)]
use mockall::automock;

use crate::Result;

pub use config_map::ConfigMapHashStore;
pub use pvc::KubeClusterStore;

/// Cluster resource operations used by the deploy-type classifier and leaf steps
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Count PVCs in `namespace` matching all `labels`
    async fn count_pvcs(&self, namespace: &str, labels: &BTreeMap<String, String>)
        -> Result<usize>;

    /// Create the PVC unless one with the same name already exists
    async fn ensure_pvc(&self, namespace: &str, pvc: PersistentVolumeClaim) -> Result<()>;

    /// Wait until the named PVC reports phase `Bound`
    async fn wait_for_pvc_bound(&self, namespace: &str, name: &str, timeout: Duration)
        -> Result<()>;

    /// Create the pod unless one with the same name already exists
    async fn ensure_pod(&self, namespace: &str, pod: Pod) -> Result<()>;

    /// Wait until `count` pods matching `labels` have succeeded
    ///
    /// A matching pod in phase `Failed` ends the wait with an error.
    async fn wait_for_pods_succeeded(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
        count: usize,
        timeout: Duration,
    ) -> Result<()>;

    /// Delete every pod matching `labels` and wait until none is left
    async fn delete_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<()>;
}

/// Durable key/value record holding spec digests
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpecHashStore: Send + Sync {
    /// Fetch the record's fields, creating an empty record owned by `owner` if missing
    async fn get_or_create(
        &self,
        namespace: &str,
        name: &str,
        owner: Option<OwnerReference>,
    ) -> Result<BTreeMap<String, String>>;

    /// Set one field; no-op when it already holds `value`
    async fn write_field(&self, namespace: &str, name: &str, key: &str, value: &str)
        -> Result<()>;

    /// Delete the record and wait until it is gone
    async fn delete(&self, namespace: &str, name: &str, timeout: Duration) -> Result<()>;
}
