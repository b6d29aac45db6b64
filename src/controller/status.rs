//! Status bookkeeping for one pass
//!
//! The handler starts from the status the resource carried when the pass
//! began and mutates its own copy; it never re-reads the resource.

use std::sync::Arc;

use tracing::{debug, error};

use super::resource::ResourceApi;
use crate::crd::{ConditionPhase, DeploymentStatus, DrPhase, ServiceCondition};
use crate::engine::Request;

/// Accumulates status changes and writes them to the resource
pub struct StatusHandler<K: Send + Sync + 'static> {
    api: Arc<dyn ResourceApi<K>>,
    request: Request,
    status: DeploymentStatus,
}

impl<K: Send + Sync + 'static> StatusHandler<K> {
    /// Start from the resource's current status
    pub fn new(
        api: Arc<dyn ResourceApi<K>>,
        request: Request,
        current: Option<&DeploymentStatus>,
    ) -> Self {
        Self {
            api,
            request,
            status: current.cloned().unwrap_or_default(),
        }
    }

    /// Make a new condition current
    pub fn set_condition(
        &mut self,
        phase: ConditionPhase,
        reason: &str,
        message: impl Into<String>,
    ) -> &mut Self {
        self.status
            .set_condition(ServiceCondition::new(phase, reason, message));
        self
    }

    /// Set the DR phase
    pub fn set_dr_status(&mut self, phase: DrPhase) -> &mut Self {
        self.status.set_dr_status(phase);
        self
    }

    /// Local copy of the status
    pub fn status(&self) -> &DeploymentStatus {
        &self.status
    }

    /// Write the local copy; failures are logged and otherwise ignored
    pub async fn commit(&self) {
        match self
            .api
            .patch_status(&self.request.namespace, &self.request.name, &self.status)
            .await
        {
            Ok(()) => debug!(
                resource = %self.request,
                phase = ?self.status.current_phase(),
                dr = ?self.status.dr_phase(),
                "status committed"
            ),
            Err(e) => error!(resource = %self.request, error = %e, "failed to update status"),
        }
    }
}
