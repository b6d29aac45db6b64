//! Stories about admin credential rotation

use std::sync::atomic::Ordering;

use kube::runtime::controller::Action;

use nosqldb_operator::controller::WATCH_RETRY_DELAY;
use nosqldb_operator::crd::{ConditionPhase, NoSqlDb};

use super::fakes::{build, sample_db, Behavior, Harness, ADMIN_SECRET, NAMESPACE};

fn db_with_admin_secret(full_reconcile: bool) -> NoSqlDb {
    let mut db = sample_db();
    db.spec.admin_secret = Some(ADMIN_SECRET.to_string());
    db.spec.full_reconcile_on_password_change = full_reconcile;
    db
}

/// Story: the admin secret is watched once no matter how many passes run
#[tokio::test]
async fn story_secret_watch_is_registered_once() {
    let harness = Harness::new(db_with_admin_secret(false));
    let ctx = build(harness.builder());

    harness.pass(&ctx).await;
    harness.pass(&ctx).await;

    assert_eq!(harness.credentials.watches.load(Ordering::SeqCst), 1);
    assert!(ctx.is_watching(&format!("{NAMESPACE}/{ADMIN_SECRET}")));
}

/// Story: a missing admin secret defers the pass by a minute and is retried
#[tokio::test]
async fn story_watch_failure_requeues_and_retries_registration() {
    let harness = Harness::new(db_with_admin_secret(false));
    harness.credentials.fail_watch.store(true, Ordering::SeqCst);
    let ctx = build(harness.builder());

    let action = harness.pass(&ctx).await;

    assert_eq!(action, Action::requeue(WATCH_RETRY_DELAY));
    assert!(harness.ran().is_empty());
    assert!(harness.resources.status_writes().is_empty());
    assert!(!ctx.is_watching(&format!("{NAMESPACE}/{ADMIN_SECRET}")));

    harness.credentials.fail_watch.store(false, Ordering::SeqCst);
    let action = harness.pass(&ctx).await;

    assert_eq!(action, Action::await_change());
    assert_eq!(harness.credentials.watches.load(Ordering::SeqCst), 1);
    assert_eq!(harness.ran(), vec!["main"]);
}

/// Story: untouched credentials are stamped as consumed on every pass
#[tokio::test]
async fn story_unchanged_credentials_are_actualized() {
    let harness = Harness::new(db_with_admin_secret(false));
    let ctx = build(harness.builder());

    harness.pass(&ctx).await;

    assert_eq!(harness.credentials.actualized.load(Ordering::SeqCst), 1);
}

/// Story: a rotation noticed by a regular pass redeploys and is then consumed
#[tokio::test]
async fn story_rotation_seen_by_pass_redeploys() {
    let harness = Harness::new(db_with_admin_secret(false));
    let ctx = build(harness.builder());

    harness.pass(&ctx).await;
    harness.credentials.rotate();
    harness.pass(&ctx).await;

    assert_eq!(harness.ran(), vec!["main", "main"]);
    assert!(!harness.credentials.is_changed());
    assert_eq!(
        harness.resources.status().current_phase(),
        Some(ConditionPhase::Successful)
    );
}

/// Story: a failed redeploy leaves the rotation unconsumed for the next pass
#[tokio::test]
async fn story_rotation_survives_failed_redeploy() {
    let harness = Harness::new(db_with_admin_secret(false));
    let ctx = build(harness.builder());

    harness.pass(&ctx).await;
    harness.credentials.rotate();
    harness.set_main(Behavior::Fail("auth rejected".to_string()));
    harness.pass(&ctx).await;

    assert!(harness.credentials.is_changed());
    assert_eq!(
        harness.resources.status().current_phase(),
        Some(ConditionPhase::Failed)
    );
}

/// Story: in narrow mode a rotation runs only the password update
#[tokio::test]
async fn story_narrow_mode_runs_password_update() {
    let harness = Harness::new(db_with_admin_secret(false));
    let ctx = build(
        harness
            .builder()
            .password_update(harness.tree("password", Behavior::Succeed)),
    );

    harness.pass(&ctx).await;
    let writes_before = harness.resources.status_writes().len();
    let deletes_before = harness.hashes.deletes.load(Ordering::SeqCst);

    harness.credentials.rotate();
    harness.credentials.fire().await;

    assert_eq!(harness.ran(), vec!["main", "password"]);
    assert!(!harness.credentials.is_changed());
    assert_eq!(harness.resources.status_writes().len(), writes_before);
    assert_eq!(harness.hashes.deletes.load(Ordering::SeqCst), deletes_before);
}

/// Story: a failed password update leaves the credentials unconsumed
#[tokio::test]
async fn story_failed_password_update_keeps_rotation_pending() {
    let harness = Harness::new(db_with_admin_secret(false));
    let ctx = build(harness.builder().password_update(
        harness.tree("password", Behavior::Fail("ALTER ROLE refused".to_string())),
    ));

    harness.pass(&ctx).await;
    harness.credentials.rotate();
    harness.credentials.fire().await;

    assert_eq!(harness.ran(), vec!["main", "password"]);
    assert!(harness.credentials.is_changed());
}

/// Story: in full mode a rotation resets the record and redeploys everything
#[tokio::test]
async fn story_full_mode_reruns_whole_pass() {
    let harness = Harness::new(db_with_admin_secret(true));
    let ctx = build(
        harness
            .builder()
            .password_update(harness.tree("password", Behavior::Succeed)),
    );

    harness.pass(&ctx).await;
    let deletes_before = harness.hashes.deletes.load(Ordering::SeqCst);
    harness.credentials.rotate();
    harness.credentials.fire().await;

    assert_eq!(
        harness.hashes.deletes.load(Ordering::SeqCst),
        deletes_before + 1
    );
    assert_eq!(harness.ran(), vec!["main", "main"]);
    assert!(!harness.credentials.is_changed());
    assert_eq!(
        harness.resources.status().current_phase(),
        Some(ConditionPhase::Successful)
    );
}

/// Story: a rotation arriving after the resource was deleted is ignored and
/// the watch on the admin secret is released
#[tokio::test]
async fn story_rotation_after_delete_is_ignored() {
    let harness = Harness::new(db_with_admin_secret(true));
    let ctx = build(harness.builder());

    harness.pass(&ctx).await;
    let deletes_before = harness.hashes.deletes.load(Ordering::SeqCst);
    harness.resources.delete();
    harness.credentials.rotate();
    harness.credentials.fire().await;

    assert_eq!(harness.ran(), vec!["main"]);
    assert_eq!(harness.hashes.deletes.load(Ordering::SeqCst), deletes_before);
    assert_eq!(harness.credentials.unwatches.load(Ordering::SeqCst), 1);
    assert!(!ctx.is_watching(&format!("{NAMESPACE}/{ADMIN_SECRET}")));
}
