use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DeliveryError, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryStatus {
    PendingDelivery,
    Sent,
    /// Something went wrong inside the relay.
    Failed,
    /// The destination refused the content; needs user action.
    Rejected,
    FilteredOut,
    RateLimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    ArticleMessage,
    ThreadCreation,
}

/// Status-specific part of a [`DeliveryState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateDetail {
    PendingDelivery {
        content_type: ContentType,
        parent: Option<String>,
    },
    Sent {
        content_type: Option<ContentType>,
        parent: Option<String>,
    },
    Failed {
        error_code: String,
        internal_message: String,
    },
    Rejected {
        error_code: String,
        internal_message: String,
    },
    FilteredOut,
    RateLimited,
}

impl StateDetail {
    pub fn status(&self) -> DeliveryStatus {
        match self {
            StateDetail::PendingDelivery { .. } => DeliveryStatus::PendingDelivery,
            StateDetail::Sent { .. } => DeliveryStatus::Sent,
            StateDetail::Failed { .. } => DeliveryStatus::Failed,
            StateDetail::Rejected { .. } => DeliveryStatus::Rejected,
            StateDetail::FilteredOut => DeliveryStatus::FilteredOut,
            StateDetail::RateLimited => DeliveryStatus::RateLimited,
        }
    }
}

/// One (item, destination) delivery attempt as handed to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryState {
    pub id: String,
    pub medium_id: String,
    pub article_id_hash: Option<String>,
    pub detail: StateDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: String,
    pub feed_id: String,
    pub medium_id: String,
    pub status: DeliveryStatus,
    pub content_type: Option<ContentType>,
    pub article_id_hash: Option<String>,
    pub parent_id: Option<String>,
    pub error_code: Option<String>,
    pub internal_message: Option<String>,
    pub external_detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn from_state(feed_id: &str, state: DeliveryState, created_at: DateTime<Utc>) -> Self {
        let status = state.detail.status();
        let mut record = Self {
            id: state.id,
            feed_id: feed_id.to_owned(),
            medium_id: state.medium_id,
            status,
            content_type: None,
            article_id_hash: state.article_id_hash,
            parent_id: None,
            error_code: None,
            internal_message: None,
            external_detail: None,
            created_at,
        };
        match state.detail {
            StateDetail::PendingDelivery {
                content_type,
                parent,
            } => {
                record.content_type = Some(content_type);
                record.parent_id = parent;
            }
            StateDetail::Sent {
                content_type,
                parent,
            } => {
                record.content_type = content_type;
                record.parent_id = parent;
            }
            StateDetail::Failed {
                error_code,
                internal_message,
            }
            | StateDetail::Rejected {
                error_code,
                internal_message,
            } => {
                record.error_code = Some(error_code);
                record.internal_message = Some(internal_message);
            }
            StateDetail::FilteredOut | StateDetail::RateLimited => {}
        }
        record
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: DeliveryStatus,
    pub error_code: Option<String>,
    pub internal_message: Option<String>,
    pub external_detail: Option<String>,
}

impl StatusUpdate {
    pub fn status(status: DeliveryStatus) -> Self {
        Self {
            status,
            error_code: None,
            internal_message: None,
            external_detail: None,
        }
    }
}

/// Restricts a windowed count to a medium, a feed, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryScope {
    pub medium_id: Option<String>,
    pub feed_id: Option<String>,
}

impl DeliveryScope {
    pub fn medium(medium_id: impl Into<String>) -> Self {
        Self {
            medium_id: Some(medium_id.into()),
            feed_id: None,
        }
    }

    pub fn feed(feed_id: impl Into<String>) -> Self {
        Self {
            medium_id: None,
            feed_id: Some(feed_id.into()),
        }
    }

    pub fn matches(&self, record: &DeliveryRecord) -> bool {
        self.medium_id
            .as_deref()
            .map_or(true, |m| m == record.medium_id)
            && self.feed_id.as_deref().map_or(true, |f| f == record.feed_id)
    }
}

/// Persistence contract for delivery records.
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    /// Inserts every record or none of them.
    async fn insert_many(&self, records: Vec<DeliveryRecord>) -> Result<(), StorageError>;

    async fn get(&self, id: &str) -> Result<Option<DeliveryRecord>, StorageError>;

    async fn replace(&self, record: DeliveryRecord) -> Result<(), StorageError>;

    /// Number of distinct `article_id_hash` values among matching records
    /// created at or after `since`.
    async fn count_distinct_hashes(
        &self,
        scope: &DeliveryScope,
        statuses: &[DeliveryStatus],
        since: DateTime<Utc>,
    ) -> Result<u64, StorageError>;
}

/// Statuses that consume rate-limit budget.
const COUNTED_STATUSES: [DeliveryStatus; 2] = [DeliveryStatus::Sent, DeliveryStatus::Rejected];

#[derive(Clone)]
pub struct DeliveryTracker {
    ledger: Arc<dyn DeliveryLedger>,
}

impl DeliveryTracker {
    pub fn new(ledger: Arc<dyn DeliveryLedger>) -> Self {
        Self { ledger }
    }

    pub async fn record_attempts(
        &self,
        feed_id: &str,
        states: Vec<DeliveryState>,
    ) -> Result<(), StorageError> {
        if states.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let records: Vec<DeliveryRecord> = states
            .into_iter()
            .map(|state| DeliveryRecord::from_state(feed_id, state, now))
            .collect();
        debug!(feed_id, count = records.len(), "recording delivery attempts");
        self.ledger.insert_many(records).await
    }

    /// Updates status fields of an existing record in place. Detail fields
    /// left as `None` in `update` keep their stored value.
    pub async fn update_status(
        &self,
        record_id: &str,
        update: StatusUpdate,
    ) -> Result<DeliveryRecord, DeliveryError> {
        let mut record = self
            .ledger
            .get(record_id)
            .await?
            .ok_or_else(|| DeliveryError::NotFound(record_id.to_owned()))?;

        record.status = update.status;
        if update.error_code.is_some() {
            record.error_code = update.error_code;
        }
        if update.internal_message.is_some() {
            record.internal_message = update.internal_message;
        }
        if update.external_detail.is_some() {
            record.external_detail = update.external_detail;
        }

        self.ledger.replace(record.clone()).await?;
        Ok(record)
    }

    /// Sent or rejected deliveries inside the trailing window, one unit per
    /// distinct article. Only reports; enforcing a ceiling is up to the caller.
    pub async fn count_recent_deliveries(
        &self,
        scope: &DeliveryScope,
        window_seconds: u64,
    ) -> Result<u64, StorageError> {
        let since = i64::try_from(window_seconds)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.ledger
            .count_distinct_hashes(scope, &COUNTED_STATUSES, since)
            .await
    }
}
