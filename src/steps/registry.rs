//! Service registry registration

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::crd::ServiceRegistration;
use crate::engine::{check_spec_change, ExecutionContext, Step};
use crate::{Error, Result};

/// Spec-hash key tracking the registration settings
pub const REGISTRY_SETTINGS_KEY: &str = "registry-settings";

/// Registers the service's endpoints with the service registry
///
/// Runs only when a registry client is published in the context and the
/// registration settings changed since they were last applied. Disabled
/// registrations that carry an id are deregistered.
pub struct RegisterServicesStep {
    registrations: BTreeMap<String, ServiceRegistration>,
}

impl RegisterServicesStep {
    /// Apply `registrations`, keyed by settings name
    pub fn new(registrations: BTreeMap<String, ServiceRegistration>) -> Self {
        Self { registrations }
    }
}

#[async_trait]
impl Step for RegisterServicesStep {
    async fn validate(&self, _ctx: &mut ExecutionContext) -> Result<()> {
        for (key, registration) in &self.registrations {
            if registration.enabled && registration.name.is_empty() {
                return Err(Error::validation(format!(
                    "service registration {key} has no service name"
                )));
            }
        }
        Ok(())
    }

    async fn should_run(&self, ctx: &mut ExecutionContext) -> Result<bool> {
        if ctx.registry().is_none() {
            debug!("service registry client not set");
            return Ok(false);
        }
        check_spec_change(ctx, &self.registrations, REGISTRY_SETTINGS_KEY).await
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let Some(registry) = ctx.registry().cloned() else {
            return Ok(());
        };

        for (key, registration) in &self.registrations {
            if registration.enabled {
                registry.register(registration.clone()).await?;
                info!(settings = %key, service = %registration.name, "service registered");
            } else if let Some(id) = &registration.id {
                registry.deregister(id).await?;
                info!(settings = %key, id = %id, "service deregistered");
            }
        }
        Ok(())
    }
}
