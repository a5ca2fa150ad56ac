use std::path::PathBuf;
use std::sync::Arc;

use relay_core::failures::FailurePolicy;
use relay_core::{identity, DedupEngine, FailureTable, Item, SeenStore};

async fn temp_dir(tag: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "feedrelay_{tag}_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    dir
}

#[tokio::test]
async fn seen_store_uses_tmp_fallback_on_corrupted_json() {
    let dir = temp_dir("seen_corrupt").await;

    // Produce a valid document through the store itself.
    let good_path = dir.join("good.json");
    let dedup = DedupEngine::new(Arc::new(SeenStore::load_from(&good_path).await));
    let mut items = vec![Item::from_attributes([("guid", "kept")])];
    identity::resolve_batch(&mut items);
    dedup.store("feed", &items, &[]).await.unwrap();

    let path = dir.join("seen_fields.json");
    tokio::fs::write(&path, b"{ this is not json ").await.unwrap();
    tokio::fs::copy(&good_path, dir.join("seen_fields.json.tmp"))
        .await
        .unwrap();

    let recovered = DedupEngine::new(Arc::new(SeenStore::load_from(&path).await));
    assert!(
        recovered.has_prior_history("feed").await.unwrap(),
        "should fall back to tmp file when main is corrupted"
    );

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn unreadable_failure_state_starts_empty() {
    let dir = temp_dir("failures_corrupt").await;
    let path = dir.join("failed_targets.json");
    tokio::fs::write(&path, b"[1, 2").await.unwrap();

    let table = FailureTable::load(&path).await;
    assert!(table.disabled_targets().is_empty());

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn failure_state_round_trips_through_disk() {
    let dir = temp_dir("failures").await;
    let path = dir.join("failed_targets.json");
    let policy = FailurePolicy::new(2, 0.5);

    let mut table = FailureTable::default();
    table.record_failure("https://a.test/feed", &policy);
    table.record_failure("https://a.test/feed", &policy);
    table.record_failure("https://b.test/feed", &policy);
    table.save(&path).await.unwrap();

    let loaded = FailureTable::load(&path).await;
    assert!(loaded.is_disabled("https://a.test/feed"));
    assert_eq!(loaded.count("https://b.test/feed"), 1);
    assert!(!tokio::fs::try_exists(dir.join("failed_targets.json.tmp"))
        .await
        .unwrap());

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
