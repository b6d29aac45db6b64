//! Scrubbing of claimed volumes before first use
//!
//! A clean deploy may bind claims to pre-provisioned volumes that still hold
//! data from an earlier installation. One short-lived pod per claim empties
//! the volume; the step waits for all of them and then removes them.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Affinity, Capabilities, Container, PersistentVolumeClaimVolumeSource, Pod, PodAffinityTerm,
    PodAntiAffinity, PodSpec, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta, OwnerReference,
};
use tracing::{debug, info};

use super::pvc::PVC_NAMES;
use crate::engine::{ExecutionContext, Step};
use crate::Result;

/// Value of the `app` and `microservice` labels on recycler pods
pub const RECYCLER_POD: &str = "recycler-pod";

/// Image used when the storage spec names none
pub const DEFAULT_RECYCLER_IMAGE: &str = "busybox:1.36";

/// Default time allowed for the pods to finish and to disappear
pub const DEFAULT_RECYCLE_TIMEOUT: Duration = Duration::from_secs(300);

const SCRUB_PATH: &str = "/scrub";
const SCRUB_SCRIPT: &str =
    "rm -rf /scrub/..?* /scrub/.[!.]* /scrub/* && test -z \"$(ls -A /scrub)\"";
const HOSTNAME_TOPOLOGY: &str = "kubernetes.io/hostname";

/// Labels carried by the recycler pods of one database
pub fn recycler_labels(db_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), RECYCLER_POD.to_string()),
        ("microservice".to_string(), RECYCLER_POD.to_string()),
        ("recycles".to_string(), db_name.to_string()),
    ])
}

/// Empties every claim listed under [`PVC_NAMES`]
///
/// Runs whenever it is reached; trees gate it on a clean deploy. With no
/// claims in the context it does nothing.
pub struct RecyclePvcStep {
    image: String,
    labels: BTreeMap<String, String>,
    timeout: Duration,
}

impl RecyclePvcStep {
    /// Recycle with the default image and timeout, labelling pods with `labels`
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self {
            image: DEFAULT_RECYCLER_IMAGE.to_string(),
            labels,
            timeout: DEFAULT_RECYCLE_TIMEOUT,
        }
    }

    /// Override the scrubbing image
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Override how long to wait for completion and for deletion
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name of the pod recycling `claim`
    pub fn pod_name(claim: &str) -> String {
        format!("pv-recycler-{claim}")
    }

    /// Render the pod that empties `claim`
    pub fn pod(&self, claim: &str, namespace: &str, owner: Option<&OwnerReference>) -> Pod {
        let name = Self::pod_name(claim);
        // at most one recycler per node
        let spread = PodAntiAffinity {
            required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
                label_selector: Some(LabelSelector {
                    match_expressions: Some(vec![LabelSelectorRequirement {
                        key: "microservice".to_string(),
                        operator: "In".to_string(),
                        values: Some(vec![RECYCLER_POD.to_string()]),
                    }]),
                    ..Default::default()
                }),
                topology_key: HOSTNAME_TOPOLOGY.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        };

        Pod {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.to_string()),
                labels: Some(self.labels.clone()),
                owner_references: owner.map(|o| vec![o.clone()]),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                affinity: Some(Affinity {
                    pod_anti_affinity: Some(spread),
                    ..Default::default()
                }),
                volumes: Some(vec![Volume {
                    name: name.clone(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: claim.to_string(),
                        read_only: None,
                    }),
                    ..Default::default()
                }]),
                containers: vec![Container {
                    name: "recycler".to_string(),
                    image: Some(self.image.clone()),
                    command: Some(vec![
                        "/bin/sh".to_string(),
                        "-c".to_string(),
                        SCRUB_SCRIPT.to_string(),
                    ]),
                    volume_mounts: Some(vec![VolumeMount {
                        name,
                        mount_path: SCRUB_PATH.to_string(),
                        ..Default::default()
                    }]),
                    security_context: Some(SecurityContext {
                        allow_privilege_escalation: Some(false),
                        capabilities: Some(Capabilities {
                            drop: Some(vec!["ALL".to_string()]),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Step for RecyclePvcStep {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let claims = ctx.get(&PVC_NAMES).cloned().unwrap_or_default();
        if claims.is_empty() {
            debug!("no claims to recycle");
            return Ok(());
        }

        let namespace = ctx.namespace().to_string();
        let cluster = ctx.cluster().clone();
        let pods: Vec<Pod> = claims
            .iter()
            .map(|claim| self.pod(claim, &namespace, ctx.owner()))
            .collect();

        info!(count = pods.len(), namespace = %namespace, "recycling volumes");
        for pod in pods {
            cluster.ensure_pod(&namespace, pod).await?;
        }
        cluster
            .wait_for_pods_succeeded(&namespace, &self.labels, claims.len(), self.timeout)
            .await?;
        cluster
            .delete_pods(&namespace, &self.labels, self.timeout)
            .await?;
        info!(count = claims.len(), "volumes recycled");
        Ok(())
    }
}
