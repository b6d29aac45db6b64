//! Step protocol and its composition shapes
//!
//! Every unit of deployment logic implements [`Step`]. Steps are composed
//! into trees with [`Sequence`] (ordered children) and
//! [`MicroServiceSequence`] (ordered children running under their own deploy
//! type). [`Conditional`] replaces a step's skip-condition with a predicate.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::context::{ExecutionContext, DEPLOY_SUCCESS};
use super::deploy_type::{DeployType, DeployTypeClassifier};
use crate::error::Stage;
use crate::{Error, Result};

/// A unit of deployment logic
///
/// `validate` runs for the whole tree before any `execute`. `should_run` is
/// consulted by the enclosing sequence before `execute`; `Ok(false)` skips
/// the step and an error aborts the sequence.
#[async_trait]
pub trait Step: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Check preconditions without side effects on the cluster
    async fn validate(&self, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }

    /// Whether the step takes part in this pass
    async fn should_run(&self, _ctx: &mut ExecutionContext) -> Result<bool> {
        Ok(true)
    }

    /// Apply the step; must be safe to re-apply
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()>;
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Ordered composition of steps
///
/// Children run in insertion order and the first error stops the sequence.
#[derive(Default)]
pub struct Sequence {
    name: String,
    steps: Vec<Box<dyn Step>>,
}

impl Sequence {
    /// Create an empty sequence
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a child and return self for chaining
    pub fn then(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Append an already boxed child
    pub fn push(&mut self, step: Box<dyn Step>) {
        self.steps.push(step);
    }

    /// Number of direct children
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when the sequence has no children
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[async_trait]
impl Step for Sequence {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate(&self, ctx: &mut ExecutionContext) -> Result<()> {
        for step in &self.steps {
            step.validate(ctx).await?;
        }
        Ok(())
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        for step in &self.steps {
            if !step.should_run(ctx).await? {
                debug!(step = step.name(), "step skipped");
                continue;
            }
            info!(step = step.name(), "step started");
            step.execute(ctx).await?;
            info!(step = step.name(), "step finished");
        }
        Ok(())
    }
}

/// Sequence whose children run under a freshly classified deploy type
///
/// The previous deploy type is restored when the sequence returns, on both
/// success and error, so nested micro-services never leak their type to
/// siblings. Child errors are wrapped in [`Error::MicroService`].
pub struct MicroServiceSequence {
    classifier: Arc<dyn DeployTypeClassifier>,
    steps: Sequence,
}

impl MicroServiceSequence {
    /// Create an empty micro-service sequence
    pub fn new(name: impl Into<String>, classifier: Arc<dyn DeployTypeClassifier>) -> Self {
        Self {
            classifier,
            steps: Sequence::new(name),
        }
    }

    /// Append a child and return self for chaining
    pub fn then(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Append an already boxed child
    pub fn push(&mut self, step: Box<dyn Step>) {
        self.steps.push(step);
    }

    async fn run_scoped(&self, ctx: &mut ExecutionContext, stage: Stage) -> Result<()> {
        let deploy_type = self.classifier.classify(self.name(), ctx).await?;
        debug!(service = self.name(), %deploy_type, %stage, "deploy type classified");
        ctx.set_deploy_type(deploy_type);
        match stage {
            Stage::Validation => self.steps.validate(ctx).await,
            Stage::Execution => self.steps.execute(ctx).await,
        }
    }

    async fn scoped(&self, ctx: &mut ExecutionContext, stage: Stage) -> Result<()> {
        let previous = ctx.deploy_type();
        let result = self.run_scoped(ctx, stage).await;
        ctx.set_deploy_type(previous);
        result.map_err(|e| Error::micro_service(self.name(), stage, e))
    }
}

#[async_trait]
impl Step for MicroServiceSequence {
    fn name(&self) -> &str {
        self.steps.name()
    }

    async fn validate(&self, ctx: &mut ExecutionContext) -> Result<()> {
        self.scoped(ctx, Stage::Validation).await
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        info!(service = self.name(), "micro-service started");
        let result = self.scoped(ctx, Stage::Execution).await;
        match &result {
            Ok(()) => {
                ctx.record_deployment_result(self.name(), DEPLOY_SUCCESS);
                info!(service = self.name(), "micro-service finished");
            }
            Err(e) => ctx.record_deployment_result(self.name(), e.to_string()),
        }
        result
    }
}

type Predicate = Box<dyn Fn(&ExecutionContext) -> Result<bool> + Send + Sync>;

/// Step whose skip-condition is replaced by a predicate
pub struct Conditional<S> {
    inner: S,
    predicate: Predicate,
}

impl<S: Step> Conditional<S> {
    /// Wrap `inner`, running it only when `predicate` returns true
    pub fn new<P>(inner: S, predicate: P) -> Self
    where
        P: Fn(&ExecutionContext) -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            inner,
            predicate: Box::new(predicate),
        }
    }
}

#[async_trait]
impl<S: Step> Step for Conditional<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn validate(&self, ctx: &mut ExecutionContext) -> Result<()> {
        self.inner.validate(ctx).await
    }

    async fn should_run(&self, ctx: &mut ExecutionContext) -> Result<bool> {
        (self.predicate)(&*ctx)
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        self.inner.execute(ctx).await
    }
}

/// Combinators available on every step
pub trait StepExt: Step + Sized {
    /// Run only when `predicate` returns true
    fn when<P>(self, predicate: P) -> Conditional<Self>
    where
        P: Fn(&ExecutionContext) -> Result<bool> + Send + Sync + 'static,
    {
        Conditional::new(self, predicate)
    }

    /// Run only under the given deploy type
    fn only_on(self, deploy_type: DeployType) -> Conditional<Self> {
        self.when(move |ctx| Ok(ctx.deploy_type() == deploy_type))
    }

    /// Run only when the desired spec changed
    fn when_spec_changed(self) -> Conditional<Self> {
        self.when(|ctx| Ok(ctx.spec_has_changes()))
    }
}

impl<S: Step + Sized> StepExt for S {}

/// Leaf step backed by a synchronous closure
///
/// Validation and skip-condition use the protocol defaults.
pub struct FnStep<F> {
    name: String,
    run: F,
}

/// Build a leaf step from a closure
pub fn from_fn<F>(name: impl Into<String>, run: F) -> FnStep<F>
where
    F: Fn(&mut ExecutionContext) -> Result<()> + Send + Sync,
{
    FnStep {
        name: name.into(),
        run,
    }
}

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: Fn(&mut ExecutionContext) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        (self.run)(ctx)
    }
}
