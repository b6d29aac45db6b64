//! PersistentVolumeClaim and helper pod operations

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info};

use super::ClusterStore;
use crate::kube_utils::{label_selector, poll_until, DEFAULT_POLL_INTERVAL};
use crate::{Error, Result};

/// [`ClusterStore`] backed by the Kubernetes API
pub struct KubeClusterStore {
    client: Client,
}

impl KubeClusterStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pvcs(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Create `object`, treating a name clash as success
async fn create_if_absent<K>(api: &Api<K>, object: &K, kind: &str) -> Result<()>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + serde::Serialize + std::fmt::Debug,
{
    let name = object.name_any();
    match api.create(&PostParams::default(), object).await {
        Ok(_) => {
            info!(kind, name = %name, "created");
            Ok(())
        }
        // another writer got there first
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            debug!(kind, name = %name, "already exists");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.phase.as_deref())
}

#[async_trait]
impl ClusterStore for KubeClusterStore {
    async fn count_pvcs(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<usize> {
        let params = ListParams::default().labels(&label_selector(labels));
        let list = self.pvcs(namespace).list(&params).await?;
        Ok(list.items.len())
    }

    async fn ensure_pvc(&self, namespace: &str, pvc: PersistentVolumeClaim) -> Result<()> {
        let api = self.pvcs(namespace);
        if api.get_opt(&pvc.name_any()).await?.is_some() {
            debug!(pvc = %pvc.name_any(), "pvc already exists");
            return Ok(());
        }
        create_if_absent(&api, &pvc, "pvc").await
    }

    async fn wait_for_pvc_bound(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<()> {
        let api = self.pvcs(namespace);
        poll_until(
            timeout,
            DEFAULT_POLL_INTERVAL,
            format!("pvc {name} was not bound within {}s", timeout.as_secs()),
            || async {
                let pvc = api.get(name).await?;
                let phase = pvc.status.and_then(|s| s.phase);
                Ok::<_, Error>(phase.as_deref() == Some("Bound"))
            },
        )
        .await
    }

    async fn ensure_pod(&self, namespace: &str, pod: Pod) -> Result<()> {
        create_if_absent(&self.pods(namespace), &pod, "pod").await
    }

    async fn wait_for_pods_succeeded(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
        count: usize,
        timeout: Duration,
    ) -> Result<()> {
        let api = self.pods(namespace);
        let params = ListParams::default().labels(&label_selector(labels));
        poll_until(
            timeout,
            DEFAULT_POLL_INTERVAL,
            format!("{count} pods did not complete within {}s", timeout.as_secs()),
            || async {
                let pods = api.list(&params).await?;
                if let Some(failed) = pods.items.iter().find(|p| pod_phase(p) == Some("Failed")) {
                    return Err(Error::execution(format!("pod {} failed", failed.name_any())));
                }
                let succeeded = pods
                    .items
                    .iter()
                    .filter(|p| pod_phase(p) == Some("Succeeded"))
                    .count();
                debug!(succeeded, expected = count, "waiting for pods");
                Ok::<_, Error>(succeeded >= count)
            },
        )
        .await
    }

    async fn delete_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<()> {
        let api = self.pods(namespace);
        let params = ListParams::default().labels(&label_selector(labels));
        api.delete_collection(&DeleteParams::default(), &params)
            .await?;
        poll_until(
            timeout,
            DEFAULT_POLL_INTERVAL,
            format!("pods were not deleted within {}s", timeout.as_secs()),
            || async {
                let pods = api.list(&params).await?;
                Ok::<_, Error>(pods.items.is_empty())
            },
        )
        .await?;
        info!(namespace, "helper pods deleted");
        Ok(())
    }
}
