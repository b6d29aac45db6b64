//! Spec-hash record stored as a ConfigMap

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, PostParams};
use kube::Client;
use tracing::{debug, info};

use super::SpecHashStore;
use crate::kube_utils::delete_and_wait;
use crate::retry::{retry_if, RetryConfig};
use crate::{Error, Result};

const WRITE_ATTEMPTS: u32 = 5;

/// [`SpecHashStore`] backed by one ConfigMap per managed resource
pub struct ConfigMapHashStore {
    client: Client,
}

impl ConfigMapHashStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl SpecHashStore for ConfigMapHashStore {
    async fn get_or_create(
        &self,
        namespace: &str,
        name: &str,
        owner: Option<OwnerReference>,
    ) -> Result<BTreeMap<String, String>> {
        let api = self.api(namespace);
        if let Some(cm) = api.get_opt(name).await? {
            return Ok(cm.data.unwrap_or_default());
        }

        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                owner_references: owner.map(|o| vec![o]),
                ..Default::default()
            },
            data: Some(BTreeMap::new()),
            ..Default::default()
        };

        match api.create(&PostParams::default(), &cm).await {
            Ok(_) => {
                info!(namespace, name, "created spec hash record");
                Ok(BTreeMap::new())
            }
            // lost a creation race; read the winner
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                let cm = api.get(name).await?;
                Ok(cm.data.unwrap_or_default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_field(&self, namespace: &str, name: &str, key: &str, value: &str) -> Result<()> {
        let api = self.api(namespace);
        retry_if(
            &RetryConfig::with_max_attempts(WRITE_ATTEMPTS),
            "write_spec_hash",
            Error::is_conflict,
            || async {
                let mut cm = api.get(name).await?;
                let data = cm.data.get_or_insert_with(BTreeMap::new);
                if data.get(key).map(String::as_str) == Some(value) {
                    debug!(name, key, "spec hash already current");
                    return Ok(());
                }
                data.insert(key.to_string(), value.to_string());
                api.replace(name, &PostParams::default(), &cm).await?;
                Ok::<_, Error>(())
            },
        )
        .await
    }

    async fn delete(&self, namespace: &str, name: &str, timeout: Duration) -> Result<()> {
        delete_and_wait(&self.api(namespace), name, timeout).await?;
        info!(namespace, name, "deleted spec hash record");
        Ok(())
    }
}
