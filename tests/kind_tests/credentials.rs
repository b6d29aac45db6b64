//! Integration tests for admin credential stamping

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};

use nosqldb_operator::credentials::{CredentialWatcher, KubeCredentialWatcher};

use super::helpers::{create_namespace, delete_namespace, ensure_test_cluster};

const NS: &str = "nosqldb-credentials";

fn admin_secret(password: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some("orders-admin".to_string()),
            ..Default::default()
        },
        string_data: Some(BTreeMap::from([(
            "password".to_string(),
            password.to_string(),
        )])),
        ..Default::default()
    }
}

/// Story: a stamped secret reads as unchanged until someone rotates it
#[tokio::test]
#[ignore = "requires kind cluster"]
async fn story_rotation_is_detected_after_stamp() {
    let client = ensure_test_cluster().await;
    create_namespace(&client, NS).await;
    let secrets: Api<Secret> = Api::namespaced(client.clone(), NS);
    secrets
        .create(&PostParams::default(), &admin_secret("hunter2"))
        .await
        .expect("create secret");

    let watcher = KubeCredentialWatcher::new(client.clone());
    assert!(!watcher.are_creds_changed(NS, "orders-admin").await.unwrap());

    watcher.actualize_creds(NS, "orders-admin").await.unwrap();
    assert!(!watcher.are_creds_changed(NS, "orders-admin").await.unwrap());

    let mut rotated = secrets.get("orders-admin").await.unwrap();
    rotated.data = None;
    rotated.string_data = admin_secret("correct-horse").string_data;
    secrets
        .replace("orders-admin", &PostParams::default(), &rotated)
        .await
        .expect("rotate secret");
    assert!(watcher.are_creds_changed(NS, "orders-admin").await.unwrap());

    delete_namespace(&client, NS).await;
}
