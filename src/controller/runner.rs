//! Wiring of the reconcile pass into the kube-rs controller runtime

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tracing::{debug, error, info};

use super::context::Context;
use super::reconcile::{error_policy, reconcile};
use super::resource::ManagedResource;

/// Server-side timeout of the resource watch, in seconds
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Run the controller for `K` until a shutdown signal arrives
///
/// Watches every namespace unless `namespace` narrows it to one.
pub async fn run_controller<K: ManagedResource>(
    client: Client,
    namespace: Option<&str>,
    ctx: Arc<Context<K>>,
) {
    let api: Api<K> = match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let kind = K::kind(&()).to_string();
    info!(kind = %kind, namespace = namespace.unwrap_or("*"), "starting controller");

    Controller::new(api, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .shutdown_on_signal()
        .run(reconcile::<K>, error_policy::<K>, ctx)
        .for_each(|result| {
            let kind = kind.clone();
            async move {
                match result {
                    Ok((object, action)) => {
                        debug!(kind = %kind, object = %object.name, ?action, "reconciliation completed")
                    }
                    Err(e) => error!(kind = %kind, error = ?e, "reconciliation error"),
                }
            }
        })
        .await;

    info!(kind = %kind, "controller stopped");
}
