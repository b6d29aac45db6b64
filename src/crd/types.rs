//! Status and registration types shared by managed database resources

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reason recorded when a pass starts its main phase
pub const REASON_IN_PROGRESS: &str = "ReconcileCycleInProgress";
/// Reason recorded when the main phase succeeds
pub const REASON_SUCCEEDED: &str = "ReconcileCycleSucceeded";
/// Reason recorded when a pass fails
pub const REASON_FAILED: &str = "ReconcileCycleFailed";

/// Phase names a service condition can carry
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionPhase {
    /// Main phase is running
    #[serde(rename = "In Progress")]
    InProgress,
    /// Last main phase completed
    Successful,
    /// Last pass failed
    Failed,
}

impl fmt::Display for ConditionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "In Progress"),
            Self::Successful => write!(f, "Successful"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition describing the outcome of the latest pass
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCondition {
    /// Phase name
    #[serde(rename = "type")]
    pub type_: ConditionPhase,

    /// Whether this condition is the current one
    pub status: bool,

    /// Machine-readable reason
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl ServiceCondition {
    /// Create a current condition stamped with the current time
    pub fn new(type_: ConditionPhase, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_,
            status: true,
            reason: reason.into(),
            // tabs break the printed status columns
            message: message.into().replace('\t', "    "),
            last_transition_time: Utc::now(),
        }
    }
}

/// State of the disaster-recovery workflow
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DrPhase {
    /// DR workflow started with the main phase
    Running,
    /// DR workflow finished
    Done,
    /// DR workflow failed or the pass failed before it ran
    Failed,
}

impl fmt::Display for DrPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Disaster-recovery status, tracked apart from the main condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisasterRecoveryStatus {
    /// Current DR phase
    pub status: DrPhase,

    /// Optional detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Status subresource written by the controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    /// One entry per phase name; at most one has `status: true`
    #[serde(default)]
    pub conditions: Vec<ServiceCondition>,

    /// Disaster-recovery status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disaster_recovery: Option<DisasterRecoveryStatus>,
}

impl DeploymentStatus {
    /// Make `condition` the current one, replacing the entry of the same phase
    pub fn set_condition(&mut self, condition: ServiceCondition) {
        for existing in &mut self.conditions {
            existing.status = false;
        }
        self.conditions.retain(|c| c.type_ != condition.type_);
        self.conditions.push(condition);
    }

    /// The condition currently marked true
    pub fn current_condition(&self) -> Option<&ServiceCondition> {
        self.conditions
            .iter()
            .filter(|c| c.status)
            .max_by_key(|c| c.last_transition_time)
    }

    /// Phase of the current condition
    pub fn current_phase(&self) -> Option<ConditionPhase> {
        self.current_condition().map(|c| c.type_)
    }

    /// Set the DR phase
    pub fn set_dr_status(&mut self, status: DrPhase) {
        self.disaster_recovery = Some(DisasterRecoveryStatus {
            status,
            message: None,
        });
    }

    /// Current DR phase
    pub fn dr_phase(&self) -> Option<DrPhase> {
        self.disaster_recovery.as_ref().map(|dr| dr.status)
    }
}

/// Connection settings for the secret store
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretStoreRegistration {
    /// Whether the integration is on
    #[serde(default)]
    pub enabled: bool,

    /// Secret store address
    #[serde(default)]
    pub url: String,

    /// Auth method mount path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Role used to authenticate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Path prefix for this service's secrets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Connection settings for the service registry
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRegistration {
    /// Whether the integration is on
    #[serde(default)]
    pub enabled: bool,

    /// Registry address
    #[serde(default)]
    pub host: String,

    /// Secret holding the ACL token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl_token_secret: Option<String>,

    /// Registrations keyed by settings name
    #[serde(default)]
    pub services: BTreeMap<String, ServiceRegistration>,
}

/// A single service registration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRegistration {
    /// Whether this registration is active
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,

    /// Registration id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Service name
    pub name: String,

    /// Advertised address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Advertised port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Tags attached to the registration
    #[serde(default)]
    pub tags: Vec<String>,
}

fn enabled_by_default() -> bool {
    true
}

/// Persistent storage requested for a service
///
/// Each list is indexed modulo its length, so a single entry applies to all
/// claims.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Requested sizes, e.g. `10Gi`
    #[serde(default)]
    pub size: Vec<String>,

    /// Storage class names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_classes: Option<Vec<String>>,

    /// Pre-provisioned volume names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<String>>,

    /// Volume label selectors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_label_selectors: Option<Vec<BTreeMap<String, String>>>,

    /// Image of the pod that scrubs claims on a clean deploy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recycler_image: Option<String>,
}
