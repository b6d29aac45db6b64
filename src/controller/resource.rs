//! Managed resource contract and its status sink

use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crd::{DeploymentStatus, RegistryRegistration, SecretStoreRegistration};
use crate::Result;

/// Field manager used for status patches
pub const FIELD_MANAGER: &str = "nosqldb-operator";

/// A custom resource the controller can reconcile
pub trait ManagedResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    /// Desired-state type hashed by the spec-change detector
    type Spec: Serialize + Send + Sync;

    /// Desired state
    fn desired_spec(&self) -> &Self::Spec;

    /// Status as last written by the controller
    fn deployment_status(&self) -> Option<&DeploymentStatus>;

    /// Deployment version recorded on the resource
    fn deployment_version(&self) -> Option<&str>;

    /// Name of the spec-hash record for this resource
    fn hash_record_name(&self) -> String;

    /// Secret store settings
    fn secret_store_registration(&self) -> Option<&SecretStoreRegistration> {
        None
    }

    /// Service registry settings
    fn registry_registration(&self) -> Option<&RegistryRegistration> {
        None
    }

    /// Admin secret whose rotation triggers reconciliation
    fn admin_secret_name(&self) -> Option<&str> {
        None
    }

    /// Rotation runs a full pass instead of the password-update step
    fn full_reconcile_on_password_change(&self) -> bool {
        false
    }
}

/// Read access and status writes for managed resources
#[async_trait]
pub trait ResourceApi<K: Send + Sync + 'static>: Send + Sync {
    /// Fetch the resource, `None` when it no longer exists
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Replace the status subresource
    async fn patch_status(&self, namespace: &str, name: &str, status: &DeploymentStatus)
        -> Result<()>;
}

/// [`ResourceApi`] backed by the Kubernetes API
pub struct KubeResourceApi<K> {
    client: Client,
    _resource: PhantomData<fn() -> K>,
}

impl<K> KubeResourceApi<K> {
    /// Create an API wrapper using the given client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _resource: PhantomData,
        }
    }
}

#[async_trait]
impl<K: ManagedResource> ResourceApi<K> for KubeResourceApi<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &DeploymentStatus,
    ) -> Result<()> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = serde_json::json!({ "status": status });
        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;
        Ok(())
    }
}
