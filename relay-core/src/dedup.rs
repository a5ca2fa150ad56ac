use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::StorageError;
use crate::item::Item;
use crate::storage::{SeenField, SeenFieldStore};

/// Field name under which primary identities are recorded.
pub const ID_FIELD: &str = "id";

/// Classifies fetched items as new or seen for a feed.
#[derive(Clone)]
pub struct DedupEngine {
    store: Arc<dyn SeenFieldStore>,
}

impl DedupEngine {
    pub fn new(store: Arc<dyn SeenFieldStore>) -> Self {
        Self { store }
    }

    /// Whether any identity was ever recorded for the feed. Callers use this
    /// to baseline a brand-new feed instead of delivering its whole backlog.
    pub async fn has_prior_history(&self, feed_id: &str) -> Result<bool, StorageError> {
        self.store.has_field(feed_id, ID_FIELD).await
    }

    /// Returns the items whose identity has not been stored for the feed.
    ///
    /// Duplicate identities inside `items` collapse to their first occurrence;
    /// input order is otherwise kept.
    pub async fn filter_for_new(
        &self,
        feed_id: &str,
        items: Vec<Item>,
    ) -> Result<Vec<Item>, StorageError> {
        let mut unique_ids = HashSet::new();
        let unique: Vec<Item> = items
            .into_iter()
            .filter(|item| unique_ids.insert(item.identity.clone()))
            .collect();
        if unique.is_empty() {
            return Ok(unique);
        }

        let ids: Vec<String> = unique.iter().map(|item| item.identity.clone()).collect();
        let found = self.store.find_values(feed_id, ID_FIELD, &ids).await?;
        debug!(feed_id, total = ids.len(), seen = found.len(), "filtered items");

        Ok(unique
            .into_iter()
            .filter(|item| !found.contains(&item.identity))
            .collect())
    }

    /// Records identities and comparison values for `items` in one write.
    pub async fn store(
        &self,
        feed_id: &str,
        items: &[Item],
        comparison_fields: &[String],
    ) -> Result<(), StorageError> {
        let mut rows: Vec<SeenField> = items
            .iter()
            .map(|item| SeenField::new(feed_id, ID_FIELD, &item.identity))
            .collect();

        let mut registrations = Vec::new();
        if !comparison_fields.is_empty() {
            let registered = self
                .store
                .registered_comparisons(feed_id, comparison_fields)
                .await?;
            registrations = comparison_fields
                .iter()
                .filter(|name| !registered.contains(name.as_str()))
                .cloned()
                .collect();

            for item in items {
                for name in comparison_fields {
                    if let Some(value) = item.field(name) {
                        rows.push(SeenField::new(feed_id, name, value));
                    }
                }
            }
        }

        self.store.insert(feed_id, rows, registrations).await
    }

    pub async fn are_comparisons_registered(
        &self,
        feed_id: &str,
        names: &[String],
    ) -> Result<Vec<bool>, StorageError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let registered = self.store.registered_comparisons(feed_id, names).await?;
        Ok(names
            .iter()
            .map(|name| registered.contains(name.as_str()))
            .collect())
    }

    /// True if any `(field, value)` drawn from `items` was recorded before.
    pub async fn were_any_fields_seen_before(
        &self,
        feed_id: &str,
        items: &[Item],
        field_names: &[String],
    ) -> Result<bool, StorageError> {
        let pairs: Vec<(String, String)> = items
            .iter()
            .flat_map(|item| {
                field_names
                    .iter()
                    .filter_map(move |name| item.field(name).map(|v| (name.clone(), v.to_owned())))
            })
            .collect();

        if pairs.is_empty() {
            return Ok(false);
        }
        self.store.contains_any(feed_id, &pairs).await
    }
}
