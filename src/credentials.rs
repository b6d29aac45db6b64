//! Admin credential rotation tracking
//!
//! A secret's credentials are "actualized" by stamping the digest of its
//! data into an annotation. A secret whose data no longer matches its stamp
//! has been rotated out of band and not yet consumed by a pass.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, ResourceExt};
use serde_json::json;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::engine::spec_digest;
use crate::Result;

/// Annotation holding the digest of the last actualized secret data
pub const ACTUALIZED_ANNOTATION: &str = "qubership.org/actualized-credentials-hash";

/// Invoked each time a watched secret is rotated
pub type CredentialCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Watches admin secrets and tracks whether their rotation was consumed
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialWatcher: Send + Sync {
    /// Start watching `secret`; `on_change` runs on a background task
    async fn watch(&self, namespace: &str, secret: &str, on_change: CredentialCallback)
        -> Result<()>;

    /// Whether the secret changed since it was last actualized
    async fn are_creds_changed(&self, namespace: &str, secret: &str) -> Result<bool>;

    /// Mark the secret's current data as consumed
    async fn actualize_creds(&self, namespace: &str, secret: &str) -> Result<()>;

    /// Stop watching `secret`; unknown secrets are ignored
    async fn unwatch(&self, namespace: &str, secret: &str) -> Result<()>;
}

/// Digest of a secret's data
pub fn secret_digest(secret: &Secret) -> Result<String> {
    spec_digest(&secret.data)
}

/// True when the secret carries a stamp that no longer matches its data
pub fn credentials_rotated(secret: &Secret) -> Result<bool> {
    match secret.annotations().get(ACTUALIZED_ANNOTATION) {
        Some(stamp) => Ok(*stamp != secret_digest(secret)?),
        None => Ok(false),
    }
}

/// [`CredentialWatcher`] backed by the Kubernetes API
///
/// Each watched secret runs on its own task, keyed by `namespace/name`.
pub struct KubeCredentialWatcher {
    client: Client,
    tasks: DashMap<String, AbortHandle>,
}

impl KubeCredentialWatcher {
    /// Create a watcher using the given client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            tasks: DashMap::new(),
        }
    }

    /// Number of running watch tasks
    pub fn active_watches(&self) -> usize {
        self.tasks.len()
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl CredentialWatcher for KubeCredentialWatcher {
    async fn watch(
        &self,
        namespace: &str,
        secret: &str,
        on_change: CredentialCallback,
    ) -> Result<()> {
        let api = self.secrets(namespace);
        // fail registration early when the secret is missing
        api.get(secret).await?;

        let config = watcher::Config::default().fields(&format!("metadata.name={secret}"));
        let name = secret.to_string();
        let task = tokio::spawn(async move {
            let mut events = watcher(api, config)
                .default_backoff()
                .applied_objects()
                .boxed();
            while let Some(event) = events.next().await {
                match event.map(|s| credentials_rotated(&s)) {
                    Ok(Ok(true)) => {
                        info!(secret = %name, "admin credentials rotated");
                        on_change().await;
                    }
                    Ok(Ok(false)) => debug!(secret = %name, "secret event without rotation"),
                    Ok(Err(e)) => warn!(secret = %name, error = %e, "cannot digest secret"),
                    Err(e) => warn!(secret = %name, error = %e, "secret watch error"),
                }
            }
            warn!(secret = %name, "secret watch ended");
        });

        if let Some(previous) = self
            .tasks
            .insert(format!("{namespace}/{secret}"), task.abort_handle())
        {
            previous.abort();
        }

        info!(namespace, secret, "watching admin secret");
        Ok(())
    }

    async fn are_creds_changed(&self, namespace: &str, secret: &str) -> Result<bool> {
        let secret = self.secrets(namespace).get(secret).await?;
        credentials_rotated(&secret)
    }

    async fn actualize_creds(&self, namespace: &str, secret: &str) -> Result<()> {
        let api = self.secrets(namespace);
        let current = api.get(secret).await?;
        let digest = secret_digest(&current)?;
        if current.annotations().get(ACTUALIZED_ANNOTATION) == Some(&digest) {
            return Ok(());
        }

        let mut annotations = serde_json::Map::new();
        annotations.insert(ACTUALIZED_ANNOTATION.to_string(), json!(digest));
        let patch = json!({ "metadata": { "annotations": annotations } });
        api.patch(secret, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(namespace, secret, "credentials actualized");
        Ok(())
    }

    async fn unwatch(&self, namespace: &str, secret: &str) -> Result<()> {
        if let Some((_, task)) = self.tasks.remove(&format!("{namespace}/{secret}")) {
            task.abort();
            info!(namespace, secret, "stopped watching admin secret");
        }
        Ok(())
    }
}
