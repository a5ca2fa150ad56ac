use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StorageError;
use crate::persist;

/// Evidence that `field_value` of `field_name` was observed on `feed_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenField {
    pub feed_id: String,
    pub field_name: String,
    pub field_value: String,
    pub is_hashed: bool,
    pub created_at: DateTime<Utc>,
}

impl SeenField {
    pub fn new(feed_id: &str, field_name: &str, field_value: &str) -> Self {
        Self {
            feed_id: feed_id.to_owned(),
            field_name: field_name.to_owned(),
            field_value: field_value.to_owned(),
            is_hashed: false,
            created_at: Utc::now(),
        }
    }
}

/// Persistence contract for seen fields and comparison registrations.
///
/// Every method is scoped to one feed. `insert` must apply all rows and
/// registrations or none of them.
#[async_trait]
pub trait SeenFieldStore: Send + Sync {
    async fn has_field(&self, feed_id: &str, field_name: &str) -> Result<bool, StorageError>;

    /// Returns the subset of `values` already recorded under `field_name`.
    async fn find_values(
        &self,
        feed_id: &str,
        field_name: &str,
        values: &[String],
    ) -> Result<HashSet<String>, StorageError>;

    /// True if any `(field_name, field_value)` pair is recorded.
    async fn contains_any(
        &self,
        feed_id: &str,
        pairs: &[(String, String)],
    ) -> Result<bool, StorageError>;

    async fn registered_comparisons(
        &self,
        feed_id: &str,
        names: &[String],
    ) -> Result<HashSet<String>, StorageError>;

    async fn insert(
        &self,
        feed_id: &str,
        fields: Vec<SeenField>,
        registrations: Vec<String>,
    ) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct FieldMeta {
    is_hashed: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct FeedSeen {
    // field name -> field value -> metadata
    fields: HashMap<String, HashMap<String, FieldMeta>>,
    // registered comparison field names
    comparisons: HashMap<String, DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SeenData {
    feeds: HashMap<String, FeedSeen>,
}

/// In-memory seen store, optionally mirrored to a JSON file.
///
/// Rows are never expired: dropping one would let its article be delivered
/// again. Each insert copies the feed's rows for rollback and rewrites the
/// whole file, which suits a single daemon's history. Larger deployments
/// need a `SeenFieldStore` backed by a database.
#[derive(Debug, Clone)]
pub struct SeenStore {
    inner: Arc<RwLock<SeenData>>,
    path: Option<PathBuf>,
}

impl SeenStore {
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RwLock::new(SeenData::default())),
            path: None,
        }
    }

    pub async fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let data: SeenData = persist::read_json_or_default(&path).await;
        Self {
            inner: Arc::new(RwLock::new(data)),
            path: Some(path),
        }
    }

    async fn persist(&self, data: &SeenData) -> Result<(), StorageError> {
        match &self.path {
            Some(path) => persist::write_json_atomic(path, data).await,
            None => {
                debug!("seen store is in-memory only; skipping persist");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl SeenFieldStore for SeenStore {
    async fn has_field(&self, feed_id: &str, field_name: &str) -> Result<bool, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner
            .feeds
            .get(feed_id)
            .and_then(|feed| feed.fields.get(field_name))
            .map(|values| !values.is_empty())
            .unwrap_or(false))
    }

    async fn find_values(
        &self,
        feed_id: &str,
        field_name: &str,
        values: &[String],
    ) -> Result<HashSet<String>, StorageError> {
        let inner = self.inner.read().await;
        let Some(known) = inner
            .feeds
            .get(feed_id)
            .and_then(|feed| feed.fields.get(field_name))
        else {
            return Ok(HashSet::new());
        };
        Ok(values
            .iter()
            .filter(|value| known.contains_key(value.as_str()))
            .cloned()
            .collect())
    }

    async fn contains_any(
        &self,
        feed_id: &str,
        pairs: &[(String, String)],
    ) -> Result<bool, StorageError> {
        let inner = self.inner.read().await;
        let Some(feed) = inner.feeds.get(feed_id) else {
            return Ok(false);
        };
        Ok(pairs.iter().any(|(name, value)| {
            feed.fields
                .get(name)
                .map(|values| values.contains_key(value))
                .unwrap_or(false)
        }))
    }

    async fn registered_comparisons(
        &self,
        feed_id: &str,
        names: &[String],
    ) -> Result<HashSet<String>, StorageError> {
        let inner = self.inner.read().await;
        let Some(feed) = inner.feeds.get(feed_id) else {
            return Ok(HashSet::new());
        };
        Ok(names
            .iter()
            .filter(|name| feed.comparisons.contains_key(name.as_str()))
            .cloned()
            .collect())
    }

    async fn insert(
        &self,
        feed_id: &str,
        fields: Vec<SeenField>,
        registrations: Vec<String>,
    ) -> Result<(), StorageError> {
        if fields.is_empty() && registrations.is_empty() {
            return Ok(());
        }
        // The write lock is held until the file is written so no reader
        // observes rows that could still be rolled back.
        let mut inner = self.inner.write().await;
        let previous = inner.feeds.get(feed_id).cloned();
        {
            let feed = inner.feeds.entry(feed_id.to_owned()).or_default();
            for field in fields {
                feed.fields
                    .entry(field.field_name)
                    .or_default()
                    .entry(field.field_value)
                    .or_insert(FieldMeta {
                        is_hashed: field.is_hashed,
                        created_at: field.created_at,
                    });
            }
            let now = Utc::now();
            for name in registrations {
                feed.comparisons.entry(name).or_insert(now);
            }
        }

        if let Err(err) = self.persist(&inner).await {
            match previous {
                Some(feed) => {
                    inner.feeds.insert(feed_id.to_owned(), feed);
                }
                None => {
                    inner.feeds.remove(feed_id);
                }
            }
            return Err(err);
        }
        Ok(())
    }
}
