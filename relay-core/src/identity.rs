//! Stable item identities.
//!
//! The identity type is chosen once per fetched batch so that every item of a
//! feed is keyed the same way: a feed whose items only sometimes carry a guid
//! is keyed by link (or content hash) for all of them.

use sha2::{Digest, Sha256};

use crate::item::Item;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdType {
    Guid,
    Link,
    ContentHash,
}

/// Picks the identity type for a batch. An empty batch resolves to `Guid`.
pub fn id_type_for(items: &[Item]) -> IdType {
    if items.iter().all(|item| item.guid().is_some()) {
        IdType::Guid
    } else if items.iter().all(|item| item.link().is_some()) {
        IdType::Link
    } else {
        IdType::ContentHash
    }
}

pub fn identity_of(item: &Item, id_type: IdType) -> String {
    match id_type {
        IdType::Guid => item.guid().unwrap_or_default().to_owned(),
        IdType::Link => item.link().unwrap_or_default().to_owned(),
        IdType::ContentHash => {
            let mut hasher = Sha256::new();
            hasher.update(item.title().unwrap_or_default().as_bytes());
            hasher.update(item.description().unwrap_or_default().as_bytes());
            hex::encode(hasher.finalize())
        }
    }
}

/// Assigns `identity` on every item of one fetch batch and returns the policy used.
pub fn resolve_batch(items: &mut [Item]) -> IdType {
    let id_type = id_type_for(items);
    for item in items.iter_mut() {
        item.identity = identity_of(item, id_type);
    }
    id_type
}

/// Hash stored on delivery records so that retries of one article share a key.
pub fn article_id_hash(identity: &str) -> String {
    hex::encode(Sha256::digest(identity.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(guid: Option<&str>, link: Option<&str>, title: &str) -> Item {
        let mut item = Item::default();
        if let Some(guid) = guid {
            item.set("guid", guid);
        }
        if let Some(link) = link {
            item.set("link", link);
        }
        item.set("title", title);
        item.set("description", "body");
        item
    }

    #[test]
    fn guid_wins_when_every_item_has_one() {
        let mut items = vec![
            item(Some("g1"), Some("http://e/1"), "a"),
            item(Some("g2"), None, "b"),
        ];
        assert_eq!(resolve_batch(&mut items), IdType::Guid);
        assert_eq!(items[0].identity, "g1");
        assert_eq!(items[1].identity, "g2");
    }

    #[test]
    fn partial_guids_fall_through_for_whole_batch() {
        let mut items = vec![
            item(Some("g1"), Some("http://e/1"), "a"),
            item(None, Some("http://e/2"), "b"),
        ];
        assert_eq!(resolve_batch(&mut items), IdType::Link);
        assert_eq!(items[0].identity, "http://e/1");
        assert_eq!(items[1].identity, "http://e/2");
    }

    #[test]
    fn blank_guid_counts_as_missing() {
        let mut items = vec![item(Some("   "), None, "a"), item(Some("g2"), None, "b")];
        assert_eq!(resolve_batch(&mut items), IdType::ContentHash);
        assert_eq!(items[0].identity.len(), 64);
        assert_ne!(items[0].identity, items[1].identity);
    }

    #[test]
    fn hash_identity_is_deterministic() {
        let a = item(None, None, "same");
        let b = item(None, None, "same");
        assert_eq!(
            identity_of(&a, IdType::ContentHash),
            identity_of(&b, IdType::ContentHash)
        );
    }

    #[test]
    fn article_hash_is_stable_hex() {
        assert_eq!(article_id_hash("x"), article_id_hash("x"));
        assert_eq!(article_id_hash("x").len(), 64);
    }
}
