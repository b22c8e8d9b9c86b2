use std::time::Duration;

use jobscout_core::queue::QueueStatus;
use jobscout_core::traits::OrganizationStore;
use jobscout_core::work_queue::WorkQueue;

use crate::common::{create_org, setup_test_db};

#[tokio::test]
async fn enqueue_creates_pending_entry() {
    let (db, _container) = setup_test_db().await;
    let org = create_org(&db.organization_repo(), 90).await;
    let queue = db.queue_repo();

    let entry = queue.enqueue(org.id).await.unwrap().expect("entry created");

    assert_eq!(entry.organization_id, org.id);
    assert_eq!(entry.status, QueueStatus::Pending);
    assert_eq!(entry.retry_count, 0);
    assert!(entry.last_attempt_at.is_none());
}

#[tokio::test]
async fn enqueue_is_noop_while_entry_is_live() {
    let (db, _container) = setup_test_db().await;
    let org = create_org(&db.organization_repo(), 90).await;
    let queue = db.queue_repo();

    assert!(queue.enqueue(org.id).await.unwrap().is_some());
    // Pending entry exists: second enqueue is rejected.
    assert!(queue.enqueue(org.id).await.unwrap().is_none());

    // Still rejected while processing.
    let claimed = queue.claim_next().await.unwrap().unwrap();
    assert!(queue.enqueue(org.id).await.unwrap().is_none());

    // Terminal entry frees the slot.
    queue.complete(claimed.id).await.unwrap();
    assert!(queue.enqueue(org.id).await.unwrap().is_some());
}

#[tokio::test]
async fn claim_transitions_oldest_pending_and_stamps_attempt() {
    let (db, _container) = setup_test_db().await;
    let orgs = db.organization_repo();
    let queue = db.queue_repo();

    let first = create_org(&orgs, 90).await;
    let second = create_org(&orgs, 50).await;
    queue.enqueue(first.id).await.unwrap();
    queue.enqueue(second.id).await.unwrap();

    let claimed = queue.claim_next().await.unwrap().unwrap();
    assert_eq!(claimed.organization_id, first.id, "oldest entry first");
    assert_eq!(claimed.status, QueueStatus::Processing);
    assert!(claimed.last_attempt_at.is_some());
}

#[tokio::test]
async fn claim_returns_none_when_empty() {
    let (db, _container) = setup_test_db().await;
    let queue = db.queue_repo();
    assert!(queue.claim_next().await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_claims_never_return_the_same_entry() {
    let (db, _container) = setup_test_db().await;
    let org = create_org(&db.organization_repo(), 90).await;
    let queue = db.queue_repo();
    queue.enqueue(org.id).await.unwrap();

    let queue_a = queue.clone();
    let queue_b = queue.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { queue_a.claim_next().await.unwrap() }),
        tokio::spawn(async move { queue_b.claim_next().await.unwrap() }),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(
        a.is_some() != b.is_some(),
        "exactly one concurrent claim must win, got {a:?} and {b:?}"
    );
}

#[tokio::test]
async fn fail_increments_retry_and_records_error() {
    let (db, _container) = setup_test_db().await;
    let org = create_org(&db.organization_repo(), 90).await;
    let queue = db.queue_repo();

    queue.enqueue(org.id).await.unwrap();
    let claimed = queue.claim_next().await.unwrap().unwrap();
    let failed = queue.fail(claimed.id, "scrape exploded", 3).await.unwrap();

    assert_eq!(failed.status, QueueStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    assert_eq!(failed.error_message.as_deref(), Some("scrape exploded"));
}

#[tokio::test]
async fn third_failure_flags_organization_problematic() {
    let (db, _container) = setup_test_db().await;
    let orgs = db.organization_repo();
    let org = create_org(&orgs, 90).await;
    let queue = db.queue_repo();

    for round in 1..=3u32 {
        let entry = queue.enqueue(org.id).await.unwrap().unwrap();
        queue.claim_next().await.unwrap().unwrap();
        queue.fail(entry.id, "still down", 3).await.unwrap();

        let updated = orgs.get(org.id).await.unwrap().unwrap();
        assert_eq!(updated.is_problematic, round >= 3, "after {round} failures");
    }
}

#[tokio::test]
async fn success_resets_the_failure_clock() {
    let (db, _container) = setup_test_db().await;
    let orgs = db.organization_repo();
    let org = create_org(&orgs, 90).await;
    let queue = db.queue_repo();

    for _ in 0..2 {
        let entry = queue.enqueue(org.id).await.unwrap().unwrap();
        queue.claim_next().await.unwrap().unwrap();
        queue.fail(entry.id, "flaky", 3).await.unwrap();
    }

    // A successful run stamps the organization; old failures no longer
    // count toward the threshold.
    let entry = queue.enqueue(org.id).await.unwrap().unwrap();
    queue.claim_next().await.unwrap().unwrap();
    queue.complete(entry.id).await.unwrap();
    orgs.mark_scraped(org.id, chrono::Utc::now()).await.unwrap();

    let entry = queue.enqueue(org.id).await.unwrap().unwrap();
    queue.claim_next().await.unwrap().unwrap();
    queue.fail(entry.id, "flaky again", 3).await.unwrap();

    let updated = orgs.get(org.id).await.unwrap().unwrap();
    assert!(!updated.is_problematic);
}

#[tokio::test]
async fn stuck_entries_are_listed_and_reset() {
    let (db, _container) = setup_test_db().await;
    let org = create_org(&db.organization_repo(), 90).await;
    let queue = db.queue_repo();

    queue.enqueue(org.id).await.unwrap();
    let claimed = queue.claim_next().await.unwrap().unwrap();

    // Backdate the attempt to simulate a worker crash 45 minutes ago.
    sqlx::query("UPDATE work_queue SET last_attempt_at = NOW() - INTERVAL '45 minutes' WHERE id = $1")
        .bind(claimed.id)
        .execute(db.pool())
        .await
        .unwrap();

    let threshold = Duration::from_secs(30 * 60);
    let stuck = queue.list_stuck(threshold).await.unwrap();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].id, claimed.id);

    let reset = queue.reset_stuck(threshold).await.unwrap();
    assert_eq!(reset, 1);
    assert_eq!(queue.count_by_status(QueueStatus::Pending).await.unwrap(), 1);
    assert_eq!(queue.count_by_status(QueueStatus::Processing).await.unwrap(), 0);

    // Fresh processing entries are left alone.
    queue.claim_next().await.unwrap().unwrap();
    assert_eq!(queue.reset_stuck(threshold).await.unwrap(), 0);
}

#[tokio::test]
async fn count_by_status_tracks_transitions() {
    let (db, _container) = setup_test_db().await;
    let orgs = db.organization_repo();
    let queue = db.queue_repo();

    for rank in [90, 60, 30] {
        let org = create_org(&orgs, rank).await;
        queue.enqueue(org.id).await.unwrap();
    }

    assert_eq!(queue.count_by_status(QueueStatus::Pending).await.unwrap(), 3);
    queue.claim_next().await.unwrap().unwrap();
    assert_eq!(queue.count_by_status(QueueStatus::Pending).await.unwrap(), 2);
    assert_eq!(queue.count_by_status(QueueStatus::Processing).await.unwrap(), 1);
}
