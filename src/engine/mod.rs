//! Step orchestration engine
//!
//! A pass builds an [`ExecutionContext`], turns the resource into a tree of
//! [`Step`]s and runs it through an [`Executor`]. Steps share state through
//! the context, consult the spec-change detector to decide whether they have
//! work to do, and read the deploy type published by the innermost
//! [`MicroServiceSequence`].

mod canonical;
mod context;
mod deploy_type;
mod executor;
mod spec_hash;
mod step;

pub use canonical::{spec_digest, to_canonical_json};
pub use context::{ContextKey, ExecutionContext, Request, DEPLOY_SUCCESS};
pub use deploy_type::{
    classify_by_count, DeployType, DeployTypeClassifier, FixedDeployType, PvcDeployTypeClassifier,
};
pub use executor::{DefaultExecutor, Executor};
pub use spec_hash::{check_spec_change, reset_spec_record, RECORD_DELETE_TIMEOUT, SPEC_SUMMARY_KEY};
pub use step::{from_fn, Conditional, FnStep, MicroServiceSequence, Sequence, Step, StepExt};

#[cfg(test)]
pub(crate) use context::testing;
