use jobscout_core::organization::PostingLink;
use jobscout_core::traits::{HistoryStore, find_new_links};
use uuid::Uuid;

use crate::common::{create_org, setup_test_db};

fn links(urls: &[&str]) -> Vec<PostingLink> {
    urls.iter()
        .map(|url| PostingLink::new(*url, "Posting").with_context("Openings"))
        .collect()
}

#[tokio::test]
async fn get_last_returns_none_without_history() {
    let (db, _container) = setup_test_db().await;
    let org = create_org(&db.organization_repo(), 90).await;
    let history = db.history_repo();

    let record = history.get_last(org.id, Uuid::new_v4()).await.unwrap();
    assert!(record.is_none());
}

#[tokio::test]
async fn record_and_get_last_roundtrip() {
    let (db, _container) = setup_test_db().await;
    let org = create_org(&db.organization_repo(), 90).await;
    let history = db.history_repo();
    let user = Uuid::new_v4();

    let first = links(&["https://x.example/jobs/1", "https://x.example/jobs/2"]);
    history.record(org.id, user, &first).await.unwrap();

    let record = history.get_last(org.id, user).await.unwrap().unwrap();
    assert_eq!(record.organization_id, org.id);
    assert_eq!(record.user_id, user);
    assert_eq!(record.links, first);
}

#[tokio::test]
async fn record_overwrites_the_full_link_set() {
    let (db, _container) = setup_test_db().await;
    let org = create_org(&db.organization_repo(), 90).await;
    let history = db.history_repo();
    let user = Uuid::new_v4();

    history
        .record(org.id, user, &links(&["https://x.example/jobs/1"]))
        .await
        .unwrap();
    let replacement = links(&["https://x.example/jobs/9"]);
    history.record(org.id, user, &replacement).await.unwrap();

    let record = history.get_last(org.id, user).await.unwrap().unwrap();
    assert_eq!(record.links, replacement);
}

#[tokio::test]
async fn history_is_scoped_per_user() {
    let (db, _container) = setup_test_db().await;
    let org = create_org(&db.organization_repo(), 90).await;
    let history = db.history_repo();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    history
        .record(org.id, alice, &links(&["https://x.example/jobs/1"]))
        .await
        .unwrap();

    assert!(history.get_last(org.id, alice).await.unwrap().is_some());
    assert!(history.get_last(org.id, bob).await.unwrap().is_none());
}

#[tokio::test]
async fn find_new_roundtrip_against_recorded_history() {
    let (db, _container) = setup_test_db().await;
    let org = create_org(&db.organization_repo(), 90).await;
    let history = db.history_repo();
    let user = Uuid::new_v4();

    let first = links(&["https://x.example/jobs/1", "https://x.example/jobs/2"]);
    history.record(org.id, user, &first).await.unwrap();

    // Identical set: nothing is new.
    let record = history.get_last(org.id, user).await.unwrap();
    assert!(find_new_links(record.as_ref(), &first).is_empty());

    // Superset: exactly the added URLs come back.
    let second = links(&[
        "https://x.example/jobs/1",
        "https://x.example/jobs/2",
        "https://x.example/jobs/3",
    ]);
    let new = find_new_links(record.as_ref(), &second);
    assert_eq!(new.len(), 1);
    assert_eq!(new[0].url, "https://x.example/jobs/3");
}
