use std::sync::Arc;

use chrono::{Duration, Utc};
use relay_core::delivery::ContentType;
use relay_core::{
    DeliveryError, DeliveryLedger, DeliveryRecord, DeliveryScope, DeliveryState, DeliveryStatus,
    DeliveryTracker, JsonLedger, StateDetail, StatusUpdate,
};

fn sent(id: &str, medium: &str, hash: &str) -> DeliveryState {
    DeliveryState {
        id: id.into(),
        medium_id: medium.into(),
        article_id_hash: Some(hash.into()),
        detail: StateDetail::Sent {
            content_type: Some(ContentType::ArticleMessage),
            parent: None,
        },
    }
}

#[tokio::test]
async fn records_sharing_a_hash_count_once() {
    let tracker = DeliveryTracker::new(Arc::new(JsonLedger::in_memory()));
    let states = (0..4).map(|i| sent(&format!("r{i}"), "m1", "same")).collect();
    tracker.record_attempts("feed", states).await.unwrap();

    let count = tracker
        .count_recent_deliveries(&DeliveryScope::medium("m1"), 60)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn window_counts_only_sent_and_rejected() {
    let tracker = DeliveryTracker::new(Arc::new(JsonLedger::in_memory()));
    tracker
        .record_attempts(
            "feed",
            vec![
                sent("a", "m1", "h1"),
                DeliveryState {
                    id: "b".into(),
                    medium_id: "m1".into(),
                    article_id_hash: Some("h2".into()),
                    detail: StateDetail::Rejected {
                        error_code: "400".into(),
                        internal_message: "bad embed".into(),
                    },
                },
                DeliveryState {
                    id: "c".into(),
                    medium_id: "m1".into(),
                    article_id_hash: Some("h3".into()),
                    detail: StateDetail::FilteredOut,
                },
                DeliveryState {
                    id: "d".into(),
                    medium_id: "m1".into(),
                    article_id_hash: Some("h4".into()),
                    detail: StateDetail::PendingDelivery {
                        content_type: ContentType::ArticleMessage,
                        parent: None,
                    },
                },
                sent("e", "m2", "h5"),
            ],
        )
        .await
        .unwrap();

    let medium = tracker
        .count_recent_deliveries(&DeliveryScope::medium("m1"), 60)
        .await
        .unwrap();
    assert_eq!(medium, 2);

    let feed = tracker
        .count_recent_deliveries(&DeliveryScope::feed("feed"), 60)
        .await
        .unwrap();
    assert_eq!(feed, 3);

    let other_feed = tracker
        .count_recent_deliveries(&DeliveryScope::feed("elsewhere"), 60)
        .await
        .unwrap();
    assert_eq!(other_feed, 0);
}

#[tokio::test]
async fn update_keeps_untouched_fields() {
    let ledger = Arc::new(JsonLedger::in_memory());
    let tracker = DeliveryTracker::new(ledger.clone());
    tracker
        .record_attempts(
            "feed",
            vec![DeliveryState {
                id: "r1".into(),
                medium_id: "m1".into(),
                article_id_hash: Some("h".into()),
                detail: StateDetail::PendingDelivery {
                    content_type: ContentType::ThreadCreation,
                    parent: Some("p0".into()),
                },
            }],
        )
        .await
        .unwrap();

    let before = ledger.get("r1").await.unwrap().unwrap();
    assert_eq!(before.status, DeliveryStatus::PendingDelivery);

    let updated = tracker
        .update_status(
            "r1",
            StatusUpdate {
                status: DeliveryStatus::Failed,
                error_code: Some("500".into()),
                internal_message: Some("upstream error".into()),
                external_detail: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.status, DeliveryStatus::Failed);
    assert_eq!(updated.error_code.as_deref(), Some("500"));
    assert_eq!(updated.external_detail, None);
    assert_eq!(updated.content_type, Some(ContentType::ThreadCreation));
    assert_eq!(updated.parent_id.as_deref(), Some("p0"));
    assert_eq!(updated.article_id_hash.as_deref(), Some("h"));
    assert_eq!(updated.created_at, before.created_at);

    let stored = ledger.get("r1").await.unwrap().unwrap();
    assert_eq!(stored, updated);
}

#[tokio::test]
async fn updating_unknown_record_is_not_found() {
    let tracker = DeliveryTracker::new(Arc::new(JsonLedger::in_memory()));
    let err = tracker
        .update_status("missing", StatusUpdate::status(DeliveryStatus::Sent))
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::NotFound(id) if id == "missing"));
}

#[tokio::test]
async fn duplicate_ids_insert_nothing() {
    let ledger = Arc::new(JsonLedger::in_memory());
    let tracker = DeliveryTracker::new(ledger.clone());
    tracker
        .record_attempts("feed", vec![sent("r1", "m1", "h1")])
        .await
        .unwrap();

    let result = tracker
        .record_attempts("feed", vec![sent("r2", "m1", "h2"), sent("r1", "m1", "h3")])
        .await;
    assert!(result.is_err());
    assert!(ledger.get("r2").await.unwrap().is_none());

    // Two attempts sharing an id in one call must not collapse into one.
    let result = tracker
        .record_attempts("feed", vec![sent("r3", "m1", "h4"), sent("r3", "m2", "h5")])
        .await;
    assert!(result.is_err());
    assert!(ledger.get("r3").await.unwrap().is_none());
}

#[tokio::test]
async fn pruning_drops_only_expired_records() {
    let ledger = JsonLedger::in_memory();
    let now = Utc::now();
    ledger
        .insert_many(vec![
            DeliveryRecord::from_state("feed", sent("old", "m1", "h1"), now - Duration::days(40)),
            DeliveryRecord::from_state("feed", sent("fresh", "m1", "h2"), now - Duration::days(1)),
        ])
        .await
        .unwrap();

    let pruned = ledger.prune_before(now - Duration::days(30)).await.unwrap();
    assert_eq!(pruned, 1);
    assert!(ledger.get("old").await.unwrap().is_none());
    assert!(ledger.get("fresh").await.unwrap().is_some());
    assert_eq!(ledger.prune_before(now - Duration::days(30)).await.unwrap(), 0);
}
