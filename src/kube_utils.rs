//! Bounded polling and small Kubernetes helpers

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use kube::api::{Api, DeleteParams};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::{Error, Result};

/// Interval used by the cluster waits
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Poll until a condition is met or timeout is reached
///
/// `check_fn` returns `Ok(true)` when done and `Ok(false)` to keep polling.
/// A check error ends the wait immediately and is returned as-is; running out
/// of time returns [`Error::Timeout`] carrying `timeout_msg`.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if check_fn().await? {
            return Ok(());
        }
        trace!("polling condition not yet met");

        if tokio::time::Instant::now() + poll_interval > deadline {
            return Err(Error::timeout(timeout_msg));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Delete an object and wait until the API server no longer returns it
///
/// A missing object counts as already deleted.
pub async fn delete_and_wait<K>(api: &Api<K>, name: &str, timeout: Duration) -> Result<()>
where
    K: kube::Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => debug!(name, "delete requested"),
        Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    poll_until(
        timeout,
        DEFAULT_POLL_INTERVAL,
        format!("{name} was not deleted within {}s", timeout.as_secs()),
        || async {
            let current = api.get_opt(name).await?;
            Ok::<_, Error>(current.is_none())
        },
    )
    .await
}

/// Render match labels as a label selector string (`k1=v1,k2=v2`)
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
