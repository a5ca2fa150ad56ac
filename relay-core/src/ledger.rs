use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::delivery::{DeliveryLedger, DeliveryRecord, DeliveryScope, DeliveryStatus};
use crate::error::StorageError;
use crate::persist;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LedgerData {
    records: HashMap<String, DeliveryRecord>,
}

/// Delivery ledger kept in memory and optionally mirrored to a JSON file.
#[derive(Debug, Clone)]
pub struct JsonLedger {
    inner: Arc<RwLock<LedgerData>>,
    path: Option<PathBuf>,
}

impl JsonLedger {
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RwLock::new(LedgerData::default())),
            path: None,
        }
    }

    pub async fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let data: LedgerData = persist::read_json_or_default(&path).await;
        Self {
            inner: Arc::new(RwLock::new(data)),
            path: Some(path),
        }
    }

    async fn persist(&self, data: &LedgerData) -> Result<(), StorageError> {
        match &self.path {
            Some(path) => persist::write_json_atomic(path, data).await,
            None => {
                debug!("ledger is in-memory only; skipping persist");
                Ok(())
            }
        }
    }
}

impl JsonLedger {
    /// Drops records created before `cutoff` and returns how many went.
    /// Records are otherwise kept forever, and every write rewrites the whole
    /// document, so long-running instances should prune periodically.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut inner = self.inner.write().await;
        let expired: Vec<DeliveryRecord> = inner
            .records
            .values()
            .filter(|r| r.created_at < cutoff)
            .cloned()
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }
        for record in &expired {
            inner.records.remove(&record.id);
        }
        if let Err(err) = self.persist(&inner).await {
            for record in expired {
                inner.records.insert(record.id.clone(), record);
            }
            return Err(err);
        }
        debug!(pruned = expired.len(), "pruned delivery records");
        Ok(expired.len())
    }
}

#[async_trait]
impl DeliveryLedger for JsonLedger {
    async fn insert_many(&self, records: Vec<DeliveryRecord>) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        if let Some(dup) = records.iter().find(|r| inner.records.contains_key(&r.id)) {
            return Err(StorageError::Backend(format!(
                "delivery record {} already exists",
                dup.id
            )));
        }
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let distinct: HashSet<&str> = ids.iter().map(String::as_str).collect();
        if distinct.len() != ids.len() {
            return Err(StorageError::Backend(
                "delivery records in one batch share an id".to_string(),
            ));
        }
        for record in records {
            inner.records.insert(record.id.clone(), record);
        }
        if let Err(err) = self.persist(&inner).await {
            for id in ids {
                inner.records.remove(&id);
            }
            return Err(err);
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DeliveryRecord>, StorageError> {
        Ok(self.inner.read().await.records.get(id).cloned())
    }

    async fn replace(&self, record: DeliveryRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        let previous = inner.records.insert(record.id.clone(), record.clone());
        if let Err(err) = self.persist(&inner).await {
            match previous {
                Some(prev) => {
                    inner.records.insert(prev.id.clone(), prev);
                }
                None => {
                    inner.records.remove(&record.id);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    async fn count_distinct_hashes(
        &self,
        scope: &DeliveryScope,
        statuses: &[DeliveryStatus],
        since: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let inner = self.inner.read().await;
        let hashes: HashSet<Option<&str>> = inner
            .records
            .values()
            .filter(|r| scope.matches(r))
            .filter(|r| statuses.contains(&r.status))
            .filter(|r| r.created_at >= since)
            .map(|r| r.article_id_hash.as_deref())
            .collect();
        Ok(hashes.len() as u64)
    }
}
