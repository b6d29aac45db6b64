//! The reconcile pass
//!
//! One pass walks a fixed sequence of phases: context bootstrap, version
//! gate, optional delay, change detection (including admin credential rotation),
//! stale-failure recovery, pre-deploy, main deploy and disaster recovery.
//! Every failure, including a panic anywhere in the pass, is folded into the
//! resource status and the pass itself reports success to the runtime.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use super::context::Context;
use super::resource::ManagedResource;
use super::status::StatusHandler;
use crate::credentials::CredentialCallback;
use crate::crd::{
    ConditionPhase, DeploymentStatus, DrPhase, REASON_FAILED, REASON_IN_PROGRESS,
    REASON_SUCCEEDED,
};
use crate::engine::{
    check_spec_change, reset_spec_record, ExecutionContext, Request, RECORD_DELETE_TIMEOUT,
    SPEC_SUMMARY_KEY,
};
use crate::{Error, Result};

/// Requeue delay after a failed admin secret watch registration
pub const WATCH_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Shortest requeue after a failed pass
pub const MIN_FAILED_REQUEUE: Duration = Duration::from_secs(1);

/// Run one reconcile pass for `resource`
///
/// Every outcome is recorded in status. A failed pass is requeued after the
/// failed-retry interval so the stale-failure recovery gets its chance; a
/// failed admin secret watch registration is retried after a minute.
#[instrument(skip(resource, ctx), fields(resource = %resource.name_any()))]
pub async fn reconcile<K: ManagedResource>(resource: Arc<K>, ctx: Arc<Context<K>>) -> Result<Action> {
    let request = Request::new(resource.name_any(), resource.namespace().unwrap_or_default());
    info!(request = %request, "reconciling");

    let mut status = StatusHandler::new(
        ctx.resources.clone(),
        request.clone(),
        resource.deployment_status(),
    );

    let outcome = AssertUnwindSafe(run_pass(resource.as_ref(), &ctx, &request, &mut status))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(abrupt_failure(payload)));

    match outcome {
        Ok(action) => Ok(action),
        Err(e) if e.is_disaster_recovery() => {
            record_failure(&mut status, &e).await;
            Ok(Action::await_change())
        }
        Err(e) => {
            record_failure(&mut status, &e).await;
            Ok(Action::requeue(
                ctx.config.failed_retry_interval.max(MIN_FAILED_REQUEUE),
            ))
        }
    }
}

/// Error policy for the controller runtime
///
/// [`reconcile`] folds its own failures, so this only sees runtime errors.
pub fn error_policy<K: ManagedResource>(resource: Arc<K>, error: &Error, _ctx: Arc<Context<K>>) -> Action {
    error!(?error, resource = %resource.name_any(), "reconciliation failed");
    Action::requeue(Duration::from_secs(5))
}

async fn run_pass<K: ManagedResource>(
    resource: &K,
    ctx: &Arc<Context<K>>,
    request: &Request,
    status: &mut StatusHandler<K>,
) -> Result<Action> {
    let mut exec = bootstrap(resource, ctx.as_ref(), request)?;

    if let Some(expected) = ctx.config.deployment_version.as_deref() {
        let actual = resource.deployment_version().unwrap_or_default();
        if expected != actual {
            info!(
                expected,
                actual,
                sleep_secs = ctx.config.version_mismatch_sleep.as_secs(),
                "deployment version mismatch, another operator owns this resource"
            );
            ctx.process.halt(ctx.config.version_mismatch_sleep).await;
            return Ok(Action::await_change());
        }
        debug!(version = expected, "deployment version matches");
    }

    if !ctx.config.reconciliation_delay.is_zero() {
        info!(
            delay_secs = ctx.config.reconciliation_delay.as_secs(),
            "delaying reconciliation"
        );
        tokio::time::sleep(ctx.config.reconciliation_delay).await;
    }

    // before the spec check; a deferred pass must not consume the change
    if let Some(secret) = resource.admin_secret_name() {
        if let Err(e) = ensure_secret_watch(ctx, request, secret).await {
            error!(secret, error = %e, "failed to watch admin secret");
            return Ok(Action::requeue(WATCH_RETRY_DELAY));
        }
    }

    let mut changed = check_spec_change(&mut exec, resource.desired_spec(), SPEC_SUMMARY_KEY).await?;

    let mut rotated_secret = None;
    if let Some(secret) = resource.admin_secret_name() {
        match ctx.credentials.are_creds_changed(&request.namespace, secret).await {
            Ok(true) => {
                info!(secret, "admin credentials changed since last pass");
                changed = true;
                rotated_secret = Some(secret);
            }
            Ok(false) => {
                if let Err(e) = ctx.credentials.actualize_creds(&request.namespace, secret).await {
                    warn!(secret, error = %e, "failed to actualize admin credentials");
                }
            }
            Err(e) => warn!(secret, error = %e, "cannot tell whether admin credentials changed"),
        }
    }

    if needs_recovery(
        resource.deployment_status(),
        changed,
        ctx.config.failed_retry_interval,
    ) {
        info!(record = exec.hash_record(), "last pass did not succeed, resetting spec hash record");
        reset_spec_record(&mut exec).await?;
        changed = check_spec_change(&mut exec, resource.desired_spec(), SPEC_SUMMARY_KEY).await?;
    }
    exec.set_spec_has_changes(changed);

    if let Some(builder) = &ctx.predeploy {
        info!("running pre-deploy");
        let tree = builder.build(resource, &exec)?;
        ctx.executor.run(tree.as_ref(), &mut exec).await?;
        info!("pre-deploy finished");
    }

    if !changed {
        debug!("spec unchanged, nothing to deploy");
        return Ok(Action::await_change());
    }

    status
        .set_condition(ConditionPhase::InProgress, REASON_IN_PROGRESS, "")
        .set_dr_status(DrPhase::Running);
    status.commit().await;

    let registry = ctx
        .clients
        .service_registry(resource.registry_registration(), ctx.config.host_ip.as_deref())?;
    exec.set_registry(registry);

    info!("deploying");
    let tree = ctx.main.build(resource, &exec)?;
    ctx.executor.run(tree.as_ref(), &mut exec).await?;

    status.set_condition(ConditionPhase::Successful, REASON_SUCCEEDED, "");
    status.commit().await;
    info!(results = ?exec.deployment_results(), "reconcile cycle succeeded");

    if let Some(secret) = rotated_secret {
        if let Err(e) = ctx.credentials.actualize_creds(&request.namespace, secret).await {
            warn!(secret, error = %e, "failed to actualize admin credentials");
        }
    }

    if let Some(builder) = &ctx.disaster_recovery {
        info!("running disaster recovery");
        let outcome: Result<()> = async {
            let tree = builder.build(resource, &exec)?;
            ctx.executor.run(tree.as_ref(), &mut exec).await
        }
        .await;
        match outcome {
            Ok(()) => {
                status.set_dr_status(DrPhase::Done);
                status.commit().await;
                info!("disaster recovery finished");
            }
            Err(e) if e.is_disaster_recovery() => return Err(e),
            Err(e) => return Err(Error::disaster_recovery(e.to_string())),
        }
    }

    Ok(Action::await_change())
}

fn bootstrap<K: ManagedResource>(
    resource: &K,
    ctx: &Context<K>,
    request: &Request,
) -> Result<ExecutionContext> {
    let spec = serde_json::to_value(resource.desired_spec())
        .map_err(|e| Error::serialization(e.to_string()))?;
    let secret_store = ctx.clients.secret_store(resource.secret_store_registration())?;

    Ok(ExecutionContext::new(
        request.clone(),
        ctx.cluster.clone(),
        ctx.hash_store.clone(),
        resource.hash_record_name(),
    )
    .with_spec(spec)
    .with_owner(resource.controller_owner_ref(&()))
    .with_secret_store(secret_store))
}

/// Whether the last pass left the resource in a state worth retrying from scratch
///
/// A Successful status never is. A missing condition always is, since the
/// spec-hash record may claim a deploy that no status confirms. Otherwise a
/// changed spec always is, and an unchanged one only once the last transition
/// is older than `retry_after`.
pub(crate) fn needs_recovery(
    status: Option<&DeploymentStatus>,
    changed: bool,
    retry_after: Duration,
) -> bool {
    let Some(current) = status.and_then(DeploymentStatus::current_condition) else {
        return true;
    };
    if current.type_ == ConditionPhase::Successful {
        return false;
    }
    if changed {
        return true;
    }
    let age = (Utc::now() - current.last_transition_time)
        .to_std()
        .unwrap_or_default();
    age >= retry_after
}

async fn record_failure<K: ManagedResource>(status: &mut StatusHandler<K>, error: &Error) {
    if error.is_disaster_recovery() {
        error!(error = %error, "disaster recovery failed");
        status.set_dr_status(DrPhase::Failed);
    } else {
        let message = failure_message(error);
        error!(%message, "reconcile cycle failed");
        status
            .set_condition(ConditionPhase::Failed, REASON_FAILED, message)
            .set_dr_status(DrPhase::Failed);
    }
    status.commit().await;
}

pub(crate) fn failure_message(error: &Error) -> String {
    match error.trace() {
        Some(trace) => format!("Reconciliation exception: {error}\n{trace}"),
        None => format!("Reconciliation exception: {error}"),
    }
}

fn abrupt_failure(payload: Box<dyn Any + Send>) -> Error {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    Error::abrupt(message, Backtrace::force_capture().to_string())
}

async fn ensure_secret_watch<K: ManagedResource>(
    ctx: &Arc<Context<K>>,
    request: &Request,
    secret: &str,
) -> Result<()> {
    let key = format!("{}/{}", request.namespace, secret);
    if !ctx.claim_watch(&key) {
        return Ok(());
    }
    let callback = rotation_callback(ctx.clone(), request.clone(), secret.to_string());
    if let Err(e) = ctx.credentials.watch(&request.namespace, secret, callback).await {
        ctx.release_watch(&key);
        return Err(e);
    }
    Ok(())
}

fn rotation_callback<K: ManagedResource>(
    ctx: Arc<Context<K>>,
    request: Request,
    secret: String,
) -> CredentialCallback {
    Arc::new(move || on_credentials_rotated(ctx.clone(), request.clone(), secret.clone()))
}

/// Reaction to an admin secret rotation
///
/// Returns a boxed future so the full-pass branch can call back into
/// [`reconcile`].
fn on_credentials_rotated<K: ManagedResource>(
    ctx: Arc<Context<K>>,
    request: Request,
    secret: String,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let resource = match ctx.resources.get(&request.namespace, &request.name).await {
            Ok(Some(resource)) => Arc::new(resource),
            Ok(None) => {
                info!(request = %request, secret = %secret, "resource gone, dropping admin secret watch");
                ctx.release_watch(&format!("{}/{}", request.namespace, secret));
                if let Err(e) = ctx.credentials.unwatch(&request.namespace, &secret).await {
                    warn!(request = %request, error = %e, "failed to stop admin secret watch");
                }
                return;
            }
            Err(e) => {
                error!(request = %request, error = %e, "cannot load resource after credential rotation");
                return;
            }
        };

        if resource.full_reconcile_on_password_change() {
            info!(request = %request, "credentials rotated, running full reconcile");
            if let Err(e) = ctx
                .hash_store
                .delete(&request.namespace, &resource.hash_record_name(), RECORD_DELETE_TIMEOUT)
                .await
            {
                warn!(request = %request, error = %e, "failed to reset spec hash record");
            }
            if let Err(e) = reconcile(resource, ctx).await {
                error!(request = %request, error = %e, "reconcile after credential rotation failed");
            }
            return;
        }

        let outcome = AssertUnwindSafe(update_password(resource.as_ref(), ctx.as_ref(), &request))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(abrupt_failure(payload)));
        if let Err(e) = outcome {
            error!(request = %request, error = %e, "password update failed");
        }
    })
}

async fn update_password<K: ManagedResource>(
    resource: &K,
    ctx: &Context<K>,
    request: &Request,
) -> Result<()> {
    let Some(builder) = &ctx.password_update else {
        warn!(request = %request, "no password update configured, ignoring credential rotation");
        return Ok(());
    };
    info!(request = %request, "credentials rotated, updating password");

    let mut exec = bootstrap(resource, ctx, request)?;
    let tree = builder.build(resource, &exec)?;
    ctx.executor.run(tree.as_ref(), &mut exec).await?;

    if let Some(secret) = resource.admin_secret_name() {
        ctx.credentials.actualize_creds(&request.namespace, secret).await?;
    }
    info!(request = %request, "password updated");
    Ok(())
}
