//! Idempotency store tests against an in-memory database.

#[path = "test_utils/mod.rs"]
mod test_utils;

use chrono::{Duration, Utc};
use creditsync::models::idempotency_record::IdempotencyStatus;
use creditsync::repositories::{ClaimOutcome, IdempotencyRepository};
use serde_json::json;
use test_utils::setup_test_db_arc;

const KEY: &str = "stripe:webhook:evt_1";

fn ttl() -> Duration {
    Duration::hours(24)
}

#[tokio::test]
async fn first_claim_wins_and_second_sees_in_flight() {
    let repo = IdempotencyRepository::new(setup_test_db_arc().await.unwrap());
    let now = Utc::now();

    let first = repo
        .start_processing(KEY, "stripe", "webhook", ttl(), Some(json!({"event_type": "x"})), now)
        .await
        .unwrap();
    let ClaimOutcome::Claimed(record) = first else {
        panic!("expected claim, got {first:?}");
    };
    assert_eq!(record.status(), IdempotencyStatus::Processing);
    assert_eq!(record.metadata, Some(json!({"event_type": "x"})));

    let second = repo
        .start_processing(KEY, "stripe", "webhook", ttl(), None, now)
        .await
        .unwrap();
    assert_eq!(second, ClaimOutcome::InFlight);

    // Same key under another action is independent
    let other = repo
        .start_processing(KEY, "stripe", "refund", ttl(), None, now)
        .await
        .unwrap();
    assert!(matches!(other, ClaimOutcome::Claimed(_)));
}

#[tokio::test]
async fn completed_record_returns_stored_result() {
    let repo = IdempotencyRepository::new(setup_test_db_arc().await.unwrap());
    let now = Utc::now();

    repo.start_processing(KEY, "stripe", "webhook", ttl(), None, now)
        .await
        .unwrap();
    assert!(
        repo.complete(KEY, "stripe", "webhook", json!({"credits": 200}), now)
            .await
            .unwrap()
    );

    let again = repo
        .start_processing(KEY, "stripe", "webhook", ttl(), None, now)
        .await
        .unwrap();
    let ClaimOutcome::Completed(record) = again else {
        panic!("expected completed, got {again:?}");
    };
    assert_eq!(record.result, Some(json!({"credits": 200})));

    // Finishing twice is a no-op
    assert!(
        !repo
            .fail(KEY, "stripe", "webhook", "late failure", now)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn failed_record_can_be_reclaimed() {
    let repo = IdempotencyRepository::new(setup_test_db_arc().await.unwrap());
    let now = Utc::now();

    repo.start_processing(KEY, "stripe", "webhook", ttl(), None, now)
        .await
        .unwrap();
    repo.fail(KEY, "stripe", "webhook", "user not found", now)
        .await
        .unwrap();

    let checked = repo.check(KEY, "stripe", "webhook", now).await.unwrap().unwrap();
    assert_eq!(checked.status(), IdempotencyStatus::Failed);
    assert_eq!(checked.error.as_deref(), Some("user not found"));

    let retry = repo
        .start_processing(KEY, "stripe", "webhook", ttl(), None, now + Duration::minutes(1))
        .await
        .unwrap();
    let ClaimOutcome::Claimed(record) = retry else {
        panic!("expected re-claim, got {retry:?}");
    };
    assert_eq!(record.status(), IdempotencyStatus::Processing);
    assert!(record.error.is_none());
}

#[tokio::test]
async fn expired_records_are_treated_as_absent() {
    let repo = IdempotencyRepository::new(setup_test_db_arc().await.unwrap());
    let now = Utc::now();

    repo.start_processing(KEY, "stripe", "webhook", ttl(), None, now)
        .await
        .unwrap();
    repo.complete(KEY, "stripe", "webhook", json!({}), now)
        .await
        .unwrap();

    let later = now + Duration::hours(25);
    assert!(repo.check(KEY, "stripe", "webhook", later).await.unwrap().is_none());

    // A stuck processing record can be claimed again once it expires
    repo.start_processing("k2", "square", "webhook", ttl(), None, now)
        .await
        .unwrap();
    let reclaimed = repo
        .start_processing("k2", "square", "webhook", ttl(), None, later)
        .await
        .unwrap();
    assert!(matches!(reclaimed, ClaimOutcome::Claimed(_)));
}

#[tokio::test]
async fn purge_deletes_only_expired_records() {
    let repo = IdempotencyRepository::new(setup_test_db_arc().await.unwrap());
    let now = Utc::now();

    repo.start_processing("old", "backend", "webhook", Duration::hours(1), None, now)
        .await
        .unwrap();
    repo.start_processing("new", "backend", "webhook", ttl(), None, now)
        .await
        .unwrap();

    let purged = repo.purge_expired(now + Duration::hours(2)).await.unwrap();
    assert_eq!(purged, 1);
    assert!(
        repo.check("new", "backend", "webhook", now)
            .await
            .unwrap()
            .is_some()
    );
}

#[test]
fn composite_key_format() {
    assert_eq!(
        IdempotencyRepository::compose_key("square", "webhook", "evt_9"),
        "square:webhook:evt_9"
    );
}
