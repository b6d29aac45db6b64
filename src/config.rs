//! Operator configuration read from the environment
//!
//! Values are read through [`EnvSource`] so tests can supply them without
//! touching process-global state.

use std::time::Duration;

use crate::{Error, Result};

/// Expected deployment version; reconciliation halts when the resource differs
pub const DEPLOYMENT_VERSION_ENV: &str = "DEPLOYMENT_VERSION";
/// Seconds to sleep before exiting on a deployment version mismatch
pub const MISMATCH_SLEEP_ENV: &str = "DEPLOYMENT_VERSION_MISMATCH_SLEEP_SECONDS";
/// Fixed delay before every pass
pub const RECONCILIATION_DELAY_ENV: &str = "RECONCILIATION_DELAY_SECONDS";
/// Enables debug-level logging
pub const DEBUG_LOG_ENV: &str = "DEBUG_LOG";
/// Node address handed to the service-registry client
pub const HOST_IP_ENV: &str = "HOST_IP";
/// Minimum age of a Failed condition before an unchanged spec is retried
pub const FAILED_RETRY_ENV: &str = "FAILED_RECONCILE_RETRY_SECONDS";

const DEFAULT_MISMATCH_SLEEP_SECS: u64 = 300;
const DEFAULT_FAILED_RETRY_SECS: u64 = 60;

/// Source of environment variables
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource: Send + Sync {
    /// Value of the variable, if set
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads from the process environment
#[derive(Clone, Debug, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Knobs affecting how each reconciliation pass behaves
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Deployment version this operator build expects on the resource
    pub deployment_version: Option<String>,
    /// Sleep before exiting when the resource's deployment version differs
    pub version_mismatch_sleep: Duration,
    /// Artificial delay applied before every pass
    pub reconciliation_delay: Duration,
    /// Debug logging toggle
    pub debug_log: bool,
    /// Host address used by the service-registry client
    pub host_ip: Option<String>,
    /// Unchanged specs whose last condition is Failed are retried after this long
    pub failed_retry_interval: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            deployment_version: None,
            version_mismatch_sleep: Duration::from_secs(DEFAULT_MISMATCH_SLEEP_SECS),
            reconciliation_delay: Duration::ZERO,
            debug_log: true,
            host_ip: None,
            failed_retry_interval: Duration::from_secs(DEFAULT_FAILED_RETRY_SECS),
        }
    }
}

impl OperatorConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_source(&OsEnv)
    }

    /// Read configuration from the given source
    pub fn from_source(env: &dyn EnvSource) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            deployment_version: non_empty(env, DEPLOYMENT_VERSION_ENV),
            version_mismatch_sleep: seconds(
                env,
                MISMATCH_SLEEP_ENV,
                defaults.version_mismatch_sleep,
            )?,
            reconciliation_delay: seconds(
                env,
                RECONCILIATION_DELAY_ENV,
                defaults.reconciliation_delay,
            )?,
            debug_log: flag(env, DEBUG_LOG_ENV, defaults.debug_log)?,
            host_ip: non_empty(env, HOST_IP_ENV),
            failed_retry_interval: seconds(env, FAILED_RETRY_ENV, defaults.failed_retry_interval)?,
        })
    }
}

fn non_empty(env: &dyn EnvSource, key: &str) -> Option<String> {
    env.var(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn seconds(env: &dyn EnvSource, key: &str, default: Duration) -> Result<Duration> {
    match non_empty(env, key) {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| Error::config(format!("{key}={raw:?} is not a number of seconds: {e}"))),
        None => Ok(default),
    }
}

fn flag(env: &dyn EnvSource, key: &str, default: bool) -> Result<bool> {
    match non_empty(env, key) {
        Some(raw) => raw
            .to_ascii_lowercase()
            .parse::<bool>()
            .map_err(|_| Error::config(format!("{key}={raw:?} is not a boolean"))),
        None => Ok(default),
    }
}
