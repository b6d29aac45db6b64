//! Clean-deploy vs update classification

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use super::context::ExecutionContext;
use crate::Result;

/// Whether a micro-service already has persistent state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DeployType {
    /// Not classified
    #[default]
    Empty,
    /// No prior persistent state
    CleanDeploy,
    /// Prior persistent state exists and is reused
    Update,
}

impl fmt::Display for DeployType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::CleanDeploy => write!(f, "clean-deploy"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// Map the number of existing persistent-state objects to a deploy type
pub fn classify_by_count(count: usize) -> DeployType {
    if count == 0 {
        DeployType::CleanDeploy
    } else {
        DeployType::Update
    }
}

/// Computes the deploy type of a named micro-service
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeployTypeClassifier: Send + Sync {
    /// Classify `service` against the current cluster state
    async fn classify(&self, service: &str, ctx: &ExecutionContext) -> Result<DeployType>;
}

/// Classifies by counting PVCs that match a label selector in the request namespace
///
/// Query errors propagate unchanged.
#[derive(Clone, Debug)]
pub struct PvcDeployTypeClassifier {
    labels: BTreeMap<String, String>,
}

impl PvcDeployTypeClassifier {
    /// Classify using PVCs carrying all of `labels`
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self { labels }
    }
}

#[async_trait]
impl DeployTypeClassifier for PvcDeployTypeClassifier {
    async fn classify(&self, service: &str, ctx: &ExecutionContext) -> Result<DeployType> {
        let count = ctx.cluster().count_pvcs(ctx.namespace(), &self.labels).await?;
        debug!(service, count, "existing pvcs");
        Ok(classify_by_count(count))
    }
}

/// Always yields the same deploy type
#[derive(Clone, Copy, Debug)]
pub struct FixedDeployType(pub DeployType);

#[async_trait]
impl DeployTypeClassifier for FixedDeployType {
    async fn classify(&self, _service: &str, _ctx: &ExecutionContext) -> Result<DeployType> {
        Ok(self.0)
    }
}
