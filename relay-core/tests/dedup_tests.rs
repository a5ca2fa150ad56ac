use std::sync::Arc;

use relay_core::storage::SeenFieldStore;
use relay_core::{identity, DedupEngine, Item, SeenStore};

fn items(ids: &[&str]) -> Vec<Item> {
    let mut items: Vec<Item> = ids
        .iter()
        .map(|id| {
            Item::from_attributes([
                ("guid", id.to_string()),
                ("title", format!("Title {id}")),
                ("description", format!("Body of {id}")),
            ])
        })
        .collect();
    identity::resolve_batch(&mut items);
    items
}

#[tokio::test]
async fn fresh_feed_has_no_history_until_stored() {
    let dedup = DedupEngine::new(Arc::new(SeenStore::in_memory()));
    let batch = items(&["1", "2", "3"]);

    assert!(!dedup.has_prior_history("feed").await.unwrap());
    let new = dedup.filter_for_new("feed", batch.clone()).await.unwrap();
    assert_eq!(new.len(), 3);

    dedup.store("feed", &new, &[]).await.unwrap();
    assert!(dedup.has_prior_history("feed").await.unwrap());
    assert!(dedup.filter_for_new("feed", batch).await.unwrap().is_empty());

    // Other feeds are unaffected.
    assert!(!dedup.has_prior_history("other").await.unwrap());
}

#[tokio::test]
async fn duplicates_inside_a_batch_collapse_to_first() {
    let dedup = DedupEngine::new(Arc::new(SeenStore::in_memory()));
    let mut batch = items(&["a", "b", "a", "c", "b"]);
    batch[2].set("title", "changed");

    let new = dedup.filter_for_new("feed", batch).await.unwrap();
    let ids: Vec<&str> = new.iter().map(|i| i.identity.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(new[0].title(), Some("Title a"));
}

#[tokio::test]
async fn comparison_registered_once_across_stores() {
    let store = Arc::new(SeenStore::in_memory());
    let dedup = DedupEngine::new(store.clone());
    let fields = vec!["description".to_string()];

    for round in 0..5 {
        let id = format!("item-{round}");
        let batch = items(&[id.as_str()]);
        dedup.store("feed", &batch, &fields).await.unwrap();
    }

    let registered = store
        .registered_comparisons("feed", &fields)
        .await
        .unwrap();
    assert_eq!(registered.len(), 1);
    assert_eq!(
        dedup
            .are_comparisons_registered("feed", &["description".into(), "title".into()])
            .await
            .unwrap(),
        vec![true, false]
    );
}

#[tokio::test]
async fn blocking_fields_detect_previously_seen_values() {
    let dedup = DedupEngine::new(Arc::new(SeenStore::in_memory()));
    let fields = vec!["title".to_string()];
    let first = items(&["1"]);
    dedup.store("feed", &first, &fields).await.unwrap();

    // Same title under a new guid.
    let mut repost = items(&["2"]);
    repost[0].set("title", "Title 1");
    assert!(dedup
        .were_any_fields_seen_before("feed", &repost, &fields)
        .await
        .unwrap());

    let fresh = items(&["3"]);
    assert!(!dedup
        .were_any_fields_seen_before("feed", &fresh, &fields)
        .await
        .unwrap());
    assert!(!dedup
        .were_any_fields_seen_before("feed", &repost, &[])
        .await
        .unwrap());
}

#[tokio::test]
async fn stored_fields_survive_reload() {
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "feedrelay_seen_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    let path = dir.join("seen_fields.json");

    let dedup = DedupEngine::new(Arc::new(SeenStore::load_from(&path).await));
    dedup.store("feed", &items(&["x", "y"]), &[]).await.unwrap();

    let reloaded = DedupEngine::new(Arc::new(SeenStore::load_from(&path).await));
    assert!(reloaded.has_prior_history("feed").await.unwrap());
    let new = reloaded
        .filter_for_new("feed", items(&["x", "y", "z"]))
        .await
        .unwrap();
    assert_eq!(new.len(), 1);
    assert_eq!(new[0].identity, "z");

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
