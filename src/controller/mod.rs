//! Reconciliation controller
//!
//! Drives the step engine from resource events: one [`reconcile`] pass per
//! event, with the outcome recorded in the resource's status subresource.

mod context;
mod reconcile;
mod resource;
mod runner;
mod status;

pub use context::{Context, ContextBuilder, ExitProcess, ProcessControl, StepBuilder};
pub use reconcile::{error_policy, reconcile, MIN_FAILED_REQUEUE, WATCH_RETRY_DELAY};
pub use resource::{KubeResourceApi, ManagedResource, ResourceApi, FIELD_MANAGER};
pub use runner::{run_controller, WATCH_TIMEOUT_SECS};
pub use status::StatusHandler;
