//! NoSqlDb Custom Resource Definition
//!
//! A NoSqlDb describes one database service deployment: its storage, the
//! external integrations it registers with, and the admin credentials whose
//! rotation should trigger reconciliation.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{DeploymentStatus, RegistryRegistration, SecretStoreRegistration, StorageSpec};
use crate::controller::ManagedResource;

/// Specification for a NoSqlDb
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "qubership.org",
    version = "v1",
    kind = "NoSqlDb",
    plural = "nosqldbs",
    shortname = "ndb",
    status = "DeploymentStatus",
    namespaced,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.deploymentVersion"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NoSqlDbSpec {
    /// Operator deployment version this resource was rendered for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_version: Option<String>,

    /// Number of database nodes
    #[serde(default = "default_replicas")]
    pub replicas: u32,

    /// Persistent storage for database nodes
    pub storage: StorageSpec,

    /// Secret store integration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_store: Option<SecretStoreRegistration>,

    /// Service registry integration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistryRegistration>,

    /// Secret holding the database admin credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_secret: Option<String>,

    /// Run a full pass instead of the password-only path when the admin secret rotates
    #[serde(default)]
    pub full_reconcile_on_password_change: bool,
}

fn default_replicas() -> u32 {
    1
}

impl ManagedResource for NoSqlDb {
    type Spec = NoSqlDbSpec;

    fn desired_spec(&self) -> &NoSqlDbSpec {
        &self.spec
    }

    fn deployment_status(&self) -> Option<&DeploymentStatus> {
        self.status.as_ref()
    }

    fn deployment_version(&self) -> Option<&str> {
        self.spec.deployment_version.as_deref()
    }

    fn hash_record_name(&self) -> String {
        format!("{}-spec-hash", self.name_any())
    }

    fn secret_store_registration(&self) -> Option<&SecretStoreRegistration> {
        self.spec.secret_store.as_ref()
    }

    fn registry_registration(&self) -> Option<&RegistryRegistration> {
        self.spec.registry.as_ref()
    }

    fn admin_secret_name(&self) -> Option<&str> {
        self.spec.admin_secret.as_deref()
    }

    fn full_reconcile_on_password_change(&self) -> bool {
        self.spec.full_reconcile_on_password_change
    }
}
