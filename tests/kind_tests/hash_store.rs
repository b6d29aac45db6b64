//! Integration tests for the ConfigMap-backed spec-hash record
//!
//! These tests tell the story of a spec digest being recorded, compared and
//! reset across passes, with the record living in a real ConfigMap.

use std::time::Duration;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::Api;

use nosqldb_operator::store::{ConfigMapHashStore, SpecHashStore};

use super::helpers::{create_namespace, delete_namespace, ensure_test_cluster};

const NS: &str = "nosqldb-hash-store";

/// Story: the first read creates an empty record, writes land in its data,
/// and a reset removes it for good
#[tokio::test]
#[ignore = "requires kind cluster"]
async fn story_record_lifecycle() {
    let client = ensure_test_cluster().await;
    create_namespace(&client, NS).await;
    let store = ConfigMapHashStore::new(client.clone());

    let data = store
        .get_or_create(NS, "orders-spec-hash", None)
        .await
        .expect("create record");
    assert!(data.is_empty());

    store
        .write_field(NS, "orders-spec-hash", "spec-summary", "abc123")
        .await
        .expect("write digest");
    // identical write is a no-op
    store
        .write_field(NS, "orders-spec-hash", "spec-summary", "abc123")
        .await
        .expect("rewrite digest");

    let data = store
        .get_or_create(NS, "orders-spec-hash", None)
        .await
        .expect("read record");
    assert_eq!(data.get("spec-summary").map(String::as_str), Some("abc123"));

    store
        .delete(NS, "orders-spec-hash", Duration::from_secs(30))
        .await
        .expect("delete record");
    let cms: Api<ConfigMap> = Api::namespaced(client.clone(), NS);
    assert!(cms.get_opt("orders-spec-hash").await.unwrap().is_none());

    // deleting a missing record succeeds
    store
        .delete(NS, "orders-spec-hash", Duration::from_secs(5))
        .await
        .expect("delete missing record");

    delete_namespace(&client, NS).await;
}
