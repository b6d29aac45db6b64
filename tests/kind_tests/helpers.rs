//! Test helpers for integration tests
//!
//! Provides utilities for managing the kind cluster and test namespaces.

use std::process::Command;
use std::sync::OnceLock;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, CustomResourceExt};
use tokio::sync::OnceCell;

use nosqldb_operator::controller::FIELD_MANAGER;
use nosqldb_operator::crd::NoSqlDb;
use nosqldb_operator::kube_utils::{poll_until, DEFAULT_POLL_INTERVAL};
use nosqldb_operator::Error;

/// Name of the kind cluster used for integration tests
pub const TEST_CLUSTER_NAME: &str = "nosqldb-integration-test";

static CLUSTER_INIT: OnceLock<Result<(), String>> = OnceLock::new();
static CRD_INSTALLED: OnceCell<Result<(), String>> = OnceCell::const_new();

fn kind_cluster_exists(name: &str) -> bool {
    Command::new("kind")
        .args(["get", "clusters"])
        .output()
        .map(|out| {
            String::from_utf8_lossy(&out.stdout)
                .lines()
                .any(|line| line.trim() == name)
        })
        .unwrap_or(false)
}

fn create_kind_cluster(name: &str) -> Result<(), String> {
    if kind_cluster_exists(name) {
        return Ok(());
    }
    let output = Command::new("kind")
        .args(["create", "cluster", "--name", name, "--wait", "60s"])
        .output()
        .map_err(|e| format!("failed to run kind: {e}"))?;
    if !output.status.success() {
        return Err(format!(
            "failed to create kind cluster: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(())
}

/// Make sure the kind cluster exists and return a client for it
pub async fn ensure_test_cluster() -> Client {
    CLUSTER_INIT
        .get_or_init(|| create_kind_cluster(TEST_CLUSTER_NAME))
        .clone()
        .expect("kind cluster");
    Client::try_default().await.expect("kubernetes client")
}

/// Client with the NoSqlDb CRD installed and established
pub async fn client_with_crd() -> Client {
    let client = ensure_test_cluster().await;
    CRD_INSTALLED
        .get_or_init(|| async {
            let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
            let crd = NoSqlDb::crd();
            let name = crd.metadata.name.clone().unwrap_or_default();
            crds.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&crd))
                .await
                .map_err(|e| e.to_string())?;
            poll_until(
                std::time::Duration::from_secs(30),
                DEFAULT_POLL_INTERVAL,
                "NoSqlDb CRD established",
                || {
                    let crds = crds.clone();
                    let name = name.clone();
                    async move {
                        let crd = crds.get(&name).await.map_err(Error::from)?;
                        Ok::<_, Error>(crd
                            .status
                            .and_then(|s| s.conditions)
                            .unwrap_or_default()
                            .iter()
                            .any(|c| c.type_ == "Established" && c.status == "True"))
                    }
                },
            )
            .await
            .map_err(|e| e.to_string())
        })
        .await
        .clone()
        .expect("CRD install");
    client
}

/// Create a throwaway namespace
pub async fn create_namespace(client: &Client, name: &str) {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    match namespaces.create(&PostParams::default(), &ns).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 409 => {}
        Err(e) => panic!("failed to create namespace {name}: {e}"),
    }
}

/// Delete a namespace without waiting
pub async fn delete_namespace(client: &Client, name: &str) {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let _ = namespaces.delete(name, &DeleteParams::default()).await;
}
