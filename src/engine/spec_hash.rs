//! Spec-change detection against the persisted spec-hash record
//!
//! A check hashes the desired value, compares the digest with the one stored
//! under its key and advances the stored digest when they differ. Results are
//! cached in the execution context per key and digest, so repeating a check
//! within one pass returns the first answer instead of "unchanged".

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::canonical::spec_digest;
use super::context::ExecutionContext;
use crate::Result;

/// Key under which the full resource spec is tracked
pub const SPEC_SUMMARY_KEY: &str = "spec-summary";

/// How long a record reset waits for the deletion to be observed
pub const RECORD_DELETE_TIMEOUT: Duration = Duration::from_secs(60);

/// Report whether `value` changed since the digest stored under `key`
///
/// The first check against a fresh record always reports a change. A failed
/// read propagates; a failed write is logged and the comparison still stands.
pub async fn check_spec_change<T>(ctx: &mut ExecutionContext, value: &T, key: &str) -> Result<bool>
where
    T: Serialize + ?Sized + Sync,
{
    let digest = spec_digest(value)?;
    if let Some(changed) = ctx.cached_spec_check(key, &digest) {
        debug!(key, changed, "spec check answered from pass cache");
        return Ok(changed);
    }

    let store = ctx.hash_store().clone();
    let namespace = ctx.namespace().to_string();
    let record = ctx.hash_record().to_string();

    let data = store
        .get_or_create(&namespace, &record, ctx.owner().cloned())
        .await?;
    let changed = data.get(key) != Some(&digest);

    if changed {
        info!(key, record = %record, "spec changed");
        if let Err(e) = store.write_field(&namespace, &record, key, &digest).await {
            warn!(key, record = %record, error = %e, "failed to persist spec hash");
        }
    } else {
        debug!(key, "spec unchanged");
    }

    ctx.cache_spec_check(key, digest, changed);
    Ok(changed)
}

/// Delete the spec-hash record so the next check reports a change
pub async fn reset_spec_record(ctx: &mut ExecutionContext) -> Result<()> {
    let store = ctx.hash_store().clone();
    store
        .delete(ctx.namespace(), ctx.hash_record(), RECORD_DELETE_TIMEOUT)
        .await?;
    ctx.clear_spec_checks();
    info!(record = ctx.hash_record(), "spec hash record reset");
    Ok(())
}
