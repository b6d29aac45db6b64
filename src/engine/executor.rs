//! Two-phase runner for step trees

use async_trait::async_trait;
use tracing::debug;

use super::context::ExecutionContext;
use super::step::Step;
use crate::Result;

/// Runs a step tree against a context
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `root` to completion or first error
    async fn run(&self, root: &dyn Step, ctx: &mut ExecutionContext) -> Result<()>;
}

/// Validates the whole tree, then executes it only if validation passed
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultExecutor;

#[async_trait]
impl Executor for DefaultExecutor {
    async fn run(&self, root: &dyn Step, ctx: &mut ExecutionContext) -> Result<()> {
        debug!(step = root.name(), "validating");
        root.validate(ctx).await?;
        debug!(step = root.name(), "executing");
        root.execute(ctx).await
    }
}
