//! Persistent volume claim provisioning

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use tracing::{debug, info};

use crate::crd::StorageSpec;
use crate::engine::{ContextKey, ExecutionContext, Step};
use crate::{Error, Result};

/// Names of the claims provisioned during the pass
pub const PVC_NAMES: ContextKey<Vec<String>> = ContextKey::new("pvc-names");

/// Default access mode for provisioned claims
pub const DEFAULT_ACCESS_MODE: &str = "ReadWriteOnce";

/// Creates one claim per index from a storage spec
///
/// The name format's `{}` placeholder is replaced by the claim index. Size,
/// storage class, volume and selector lists are indexed modulo their length.
pub struct CreatePvcStep {
    storage: StorageSpec,
    name_format: String,
    labels: BTreeMap<String, String>,
    count: usize,
    first_index: usize,
    access_mode: String,
    wait_bound: Option<Duration>,
}

impl CreatePvcStep {
    /// One claim at index 0
    pub fn new(
        storage: StorageSpec,
        name_format: impl Into<String>,
        labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            storage,
            name_format: name_format.into(),
            labels,
            count: 1,
            first_index: 0,
            access_mode: DEFAULT_ACCESS_MODE.to_string(),
            wait_bound: None,
        }
    }

    /// Number of claims to create
    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// Index of the first claim
    pub fn first_index(mut self, index: usize) -> Self {
        self.first_index = index;
        self
    }

    /// Override the access mode
    pub fn access_mode(mut self, mode: impl Into<String>) -> Self {
        self.access_mode = mode.into();
        self
    }

    /// Wait up to `timeout` for each claim to be bound
    pub fn wait_bound(mut self, timeout: Duration) -> Self {
        self.wait_bound = Some(timeout);
        self
    }

    /// Claim name for `index`
    pub fn claim_name(&self, index: usize) -> String {
        self.name_format.replace("{}", &index.to_string())
    }

    /// Render the claim for `index`
    pub fn claim(
        &self,
        index: usize,
        namespace: &str,
        owner: Option<&OwnerReference>,
    ) -> PersistentVolumeClaim {
        let size = pick(&self.storage.size, index)
            .cloned()
            .unwrap_or_default();
        let storage_class = self
            .storage
            .storage_classes
            .as_deref()
            .and_then(|c| pick(c, index))
            .cloned();
        let volume = self
            .storage
            .volumes
            .as_deref()
            .and_then(|v| pick(v, index))
            .cloned();
        let selector = self
            .storage
            .match_label_selectors
            .as_deref()
            .and_then(|s| pick(s, index))
            .map(|labels| LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            });

        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(self.claim_name(index)),
                namespace: Some(namespace.to_string()),
                labels: Some(self.labels.clone()),
                owner_references: owner.map(|o| vec![o.clone()]),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec![self.access_mode.clone()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([("storage".to_string(), Quantity(size))])),
                    ..Default::default()
                }),
                storage_class_name: storage_class,
                volume_name: volume,
                selector,
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn pick<T>(items: &[T], index: usize) -> Option<&T> {
    if items.is_empty() {
        None
    } else {
        items.get(index % items.len())
    }
}

#[async_trait]
impl Step for CreatePvcStep {
    async fn validate(&self, _ctx: &mut ExecutionContext) -> Result<()> {
        let has_target = self.storage.volumes.as_ref().is_some_and(|v| !v.is_empty())
            || self
                .storage
                .storage_classes
                .as_ref()
                .is_some_and(|c| !c.is_empty())
            || self
                .storage
                .match_label_selectors
                .as_ref()
                .is_some_and(|s| !s.is_empty());
        if self.storage.size.is_empty() || !has_target {
            return Err(Error::validation(
                "storage size must be set together with volumes, storage classes or label selectors",
            ));
        }
        if !self.name_format.contains("{}") && self.count > 1 {
            return Err(Error::validation(format!(
                "claim name format {} has no index placeholder for {} claims",
                self.name_format, self.count
            )));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let namespace = ctx.namespace().to_string();
        let cluster = ctx.cluster().clone();
        let mut created = Vec::with_capacity(self.count);

        for index in self.first_index..self.first_index + self.count {
            let claim = self.claim(index, &namespace, ctx.owner());
            let name = self.claim_name(index);
            cluster.ensure_pvc(&namespace, claim).await?;
            debug!(pvc = %name, "claim ensured");
            created.push(name);
        }

        if let Some(timeout) = self.wait_bound {
            for name in &created {
                cluster.wait_for_pvc_bound(&namespace, name, timeout).await?;
            }
        }

        info!(count = created.len(), namespace = %namespace, "persistent volume claims ready");
        match ctx.get_mut(&PVC_NAMES) {
            Some(names) => names.extend(created),
            None => ctx.set(&PVC_NAMES, created),
        }
        Ok(())
    }
}
