//! Custom Resource Definitions and status types

mod nosqldb;
mod types;

pub use nosqldb::{NoSqlDb, NoSqlDbSpec};
pub use types::{
    ConditionPhase, DeploymentStatus, DisasterRecoveryStatus, DrPhase, RegistryRegistration,
    SecretStoreRegistration, ServiceCondition, ServiceRegistration, StorageSpec,
    REASON_FAILED, REASON_IN_PROGRESS, REASON_SUCCEEDED,
};
