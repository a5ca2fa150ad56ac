use async_trait::async_trait;
use tracing::{info, warn};

use crate::delivery::{DeliveryStatus, StatusUpdate};
use crate::feed::Source;
use crate::item::Item;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureNoticeKind {
    /// The target is nearing the failure ceiling.
    Warning,
    /// The target hit the ceiling and will not be fetched again until reset.
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureNotice {
    pub kind: FailureNoticeKind,
    pub target: String,
    pub failures: u32,
    pub ceiling: u32,
    /// Sources bound to the target when the notice was raised.
    pub source_ids: Vec<String>,
}

/// One item on its way to one destination.
#[derive(Debug, Clone)]
pub struct PendingDelivery {
    pub record_id: String,
    pub feed_id: String,
    pub medium_id: String,
    pub item: Item,
}

/// Final state reported by the sink for a delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Failed { code: String, message: String },
    Rejected { code: String, message: String, detail: Option<String> },
}

impl DeliveryOutcome {
    pub fn into_update(self) -> StatusUpdate {
        match self {
            DeliveryOutcome::Sent => StatusUpdate::status(DeliveryStatus::Sent),
            DeliveryOutcome::Failed { code, message } => StatusUpdate {
                status: DeliveryStatus::Failed,
                error_code: Some(code),
                internal_message: Some(message),
                external_detail: None,
            },
            DeliveryOutcome::Rejected {
                code,
                message,
                detail,
            } => StatusUpdate {
                status: DeliveryStatus::Rejected,
                error_code: Some(code),
                internal_message: Some(message),
                external_detail: detail,
            },
        }
    }
}

/// Downstream collaborator that receives failure notices and deliveries.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_failure(&self, notice: FailureNotice);

    async fn deliver(&self, delivery: &PendingDelivery) -> DeliveryOutcome;
}

/// Decides whether a source's filter rules let an item through.
pub trait ArticleFilter: Send + Sync {
    fn passes(&self, source: &Source, item: &Item) -> bool;
}

/// Lets every item through.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ArticleFilter for AcceptAll {
    fn passes(&self, _source: &Source, _item: &Item) -> bool {
        true
    }
}

/// Writes notices and deliveries to the log and reports every delivery as sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify_failure(&self, notice: FailureNotice) {
        match notice.kind {
            FailureNoticeKind::Warning => warn!(
                url = %notice.target,
                failures = notice.failures,
                ceiling = notice.ceiling,
                sources = notice.source_ids.len(),
                "feed target is nearing the connection failure limit"
            ),
            FailureNoticeKind::Disabled => warn!(
                url = %notice.target,
                failures = notice.failures,
                sources = notice.source_ids.len(),
                "feed target reached the connection failure limit and will not be retried until reset"
            ),
        }
    }

    async fn deliver(&self, delivery: &PendingDelivery) -> DeliveryOutcome {
        info!(
            feed_id = %delivery.feed_id,
            medium = %delivery.medium_id,
            title = delivery.item.title().unwrap_or_default(),
            "delivering article"
        );
        DeliveryOutcome::Sent
    }
}
