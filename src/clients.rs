//! Boundary traits for the secret store and service registry
//!
//! The engine never calls these itself. The controller builds clients through
//! a [`ClientFactory`] and publishes them in the execution context for leaf
//! steps to use.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::crd::{RegistryRegistration, SecretStoreRegistration, ServiceRegistration};
use crate::{Error, Result};

/// Static database role managed by the secret store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticRole {
    /// Database connection the role belongs to
    pub db_name: String,
    /// Database user the role rotates
    pub username: String,
    /// Rotation period
    pub rotation_period: Duration,
}

/// Credentials issued for a static role
#[derive(Clone, PartialEq, Eq)]
pub struct StaticCredentials {
    /// Database user
    pub username: String,
    /// Current password
    pub password: String,
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Secret store client (Vault-like)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read the fields stored at `path`
    async fn read(&self, path: &str) -> Result<BTreeMap<String, String>>;

    /// Write `fields` at `path`
    async fn write(&self, path: &str, fields: BTreeMap<String, String>) -> Result<()>;

    /// List keys under `path`
    async fn list(&self, path: &str) -> Result<Vec<String>>;

    /// Generate a password according to the named policy
    async fn generate_password(&self, policy: &str) -> Result<String>;

    /// Create or update a static role
    async fn ensure_static_role(&self, name: &str, role: StaticRole) -> Result<()>;

    /// Whether the static role exists
    async fn static_role_exists(&self, name: &str) -> Result<bool>;

    /// Read the current credentials of a static role
    async fn static_role_credentials(&self, name: &str) -> Result<StaticCredentials>;
}

/// Service registry client (Consul-like)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Register or update a service
    async fn register(&self, registration: ServiceRegistration) -> Result<()>;

    /// Remove a registration by id
    async fn deregister(&self, id: &str) -> Result<()>;

    /// Toggle maintenance mode for a registration
    async fn set_maintenance(&self, id: &str, enabled: bool) -> Result<()>;
}

/// Builds external clients from a resource's registrations
pub trait ClientFactory: Send + Sync {
    /// Secret store client, if the integration is enabled
    fn secret_store(
        &self,
        registration: Option<&SecretStoreRegistration>,
    ) -> Result<Option<Arc<dyn SecretStore>>>;

    /// Service registry client, if the integration is enabled
    fn service_registry(
        &self,
        registration: Option<&RegistryRegistration>,
        host_ip: Option<&str>,
    ) -> Result<Option<Arc<dyn ServiceRegistry>>>;
}

/// Factory for deployments without external integrations
///
/// Disabled or absent registrations yield no client; an enabled one is a
/// configuration error since nothing here can serve it.
#[derive(Clone, Debug, Default)]
pub struct NoExternalClients;

impl ClientFactory for NoExternalClients {
    fn secret_store(
        &self,
        registration: Option<&SecretStoreRegistration>,
    ) -> Result<Option<Arc<dyn SecretStore>>> {
        match registration {
            Some(r) if r.enabled => Err(Error::config(format!(
                "secret store {} is enabled but no client factory is configured",
                r.url
            ))),
            _ => Ok(None),
        }
    }

    fn service_registry(
        &self,
        registration: Option<&RegistryRegistration>,
        _host_ip: Option<&str>,
    ) -> Result<Option<Arc<dyn ServiceRegistry>>> {
        match registration {
            Some(r) if r.enabled => Err(Error::config(format!(
                "service registry {} is enabled but no client factory is configured",
                r.host
            ))),
            _ => Ok(None),
        }
    }
}
