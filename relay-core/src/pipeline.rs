//! Turns fetched items into delivery attempts, one source at a time.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DeliveryConfig;
use crate::dedup::DedupEngine;
use crate::delivery::{
    ContentType, DeliveryScope, DeliveryState, DeliveryStatus, DeliveryTracker, StateDetail,
};
use crate::error::DeliveryError;
use crate::feed::Source;
use crate::identity::article_id_hash;
use crate::item::Item;
use crate::notify::{ArticleFilter, NotificationSink, PendingDelivery};
use crate::scheduler::Event;

/// What happened to one source's share of a fetched target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedDispatch {
    pub feed_id: String,
    pub new_items: usize,
    /// First fetch of the feed: items were recorded, nothing was delivered.
    pub baselined: bool,
    /// New items suppressed because a blocking field was seen before.
    pub blocked: usize,
    pub sent: usize,
    pub failed: usize,
    pub rejected: usize,
    pub filtered_out: usize,
    pub rate_limited: usize,
}

#[derive(Clone)]
pub struct Dispatcher {
    dedup: DedupEngine,
    tracker: DeliveryTracker,
    sink: Arc<dyn NotificationSink>,
    filter: Arc<dyn ArticleFilter>,
    limits: DeliveryConfig,
}

impl Dispatcher {
    pub fn new(
        dedup: DedupEngine,
        tracker: DeliveryTracker,
        sink: Arc<dyn NotificationSink>,
        filter: Arc<dyn ArticleFilter>,
        limits: DeliveryConfig,
    ) -> Self {
        Self {
            dedup,
            tracker,
            sink,
            filter,
            limits,
        }
    }

    /// Runs dedup and delivery for every source of a fetched target. A storage
    /// failure only skips the source it happened on.
    pub async fn handle_event(&self, event: Event) -> Vec<FeedDispatch> {
        let Event::TargetFetched {
            target,
            sources,
            items,
            ..
        } = event
        else {
            return Vec::new();
        };

        let mut results = Vec::with_capacity(sources.len());
        for source in &sources {
            match self.dispatch_source(source, &items).await {
                Ok(result) => results.push(result),
                Err(err) => {
                    warn!(feed_id = %source.id, url = %target, error = %err, "feed skipped");
                }
            }
        }
        results
    }

    pub async fn dispatch_source(
        &self,
        source: &Source,
        items: &[Item],
    ) -> Result<FeedDispatch, DeliveryError> {
        let feed_id = source.id.as_str();
        let mut result = FeedDispatch {
            feed_id: feed_id.to_owned(),
            ..FeedDispatch::default()
        };

        let has_history = self.dedup.has_prior_history(feed_id).await?;
        let new_items = self.dedup.filter_for_new(feed_id, items.to_vec()).await?;
        result.new_items = new_items.len();
        if new_items.is_empty() {
            return Ok(result);
        }

        let mut deliverable = Vec::with_capacity(new_items.len());
        for item in &new_items {
            let blocked = self
                .dedup
                .were_any_fields_seen_before(
                    feed_id,
                    std::slice::from_ref(item),
                    &source.blocking_comparisons,
                )
                .await?;
            if blocked {
                result.blocked += 1;
            } else {
                deliverable.push(item);
            }
        }

        let mut recorded_fields = source.comparisons.clone();
        for name in &source.blocking_comparisons {
            if !recorded_fields.contains(name) {
                recorded_fields.push(name.clone());
            }
        }
        self.dedup.store(feed_id, &new_items, &recorded_fields).await?;

        if !has_history {
            info!(feed_id, items = new_items.len(), "first fetch of feed, recorded without delivering");
            result.baselined = true;
            return Ok(result);
        }

        for medium_id in &source.destinations {
            for item in &deliverable {
                let status = self.deliver(source, medium_id, item).await?;
                match status {
                    DeliveryStatus::Sent => result.sent += 1,
                    DeliveryStatus::Failed => result.failed += 1,
                    DeliveryStatus::Rejected => result.rejected += 1,
                    DeliveryStatus::FilteredOut => result.filtered_out += 1,
                    DeliveryStatus::RateLimited => result.rate_limited += 1,
                    DeliveryStatus::PendingDelivery => {}
                }
            }
        }

        debug!(
            feed_id,
            new = result.new_items,
            sent = result.sent,
            filtered = result.filtered_out,
            limited = result.rate_limited,
            "dispatched feed"
        );
        Ok(result)
    }

    async fn deliver(
        &self,
        source: &Source,
        medium_id: &str,
        item: &Item,
    ) -> Result<DeliveryStatus, DeliveryError> {
        let record_id = uuid::Uuid::new_v4().to_string();
        let hash = article_id_hash(&item.identity);

        let detail = if !self.filter.passes(source, item) {
            Some(StateDetail::FilteredOut)
        } else if self.over_rate_limit(medium_id).await? {
            Some(StateDetail::RateLimited)
        } else {
            None
        };

        if let Some(detail) = detail {
            let status = detail.status();
            self.tracker
                .record_attempts(
                    &source.id,
                    vec![DeliveryState {
                        id: record_id,
                        medium_id: medium_id.to_owned(),
                        article_id_hash: Some(hash),
                        detail,
                    }],
                )
                .await?;
            return Ok(status);
        }

        self.tracker
            .record_attempts(
                &source.id,
                vec![DeliveryState {
                    id: record_id.clone(),
                    medium_id: medium_id.to_owned(),
                    article_id_hash: Some(hash),
                    detail: StateDetail::PendingDelivery {
                        content_type: ContentType::ArticleMessage,
                        parent: None,
                    },
                }],
            )
            .await?;

        let pending = PendingDelivery {
            record_id: record_id.clone(),
            feed_id: source.id.clone(),
            medium_id: medium_id.to_owned(),
            item: item.clone(),
        };
        let outcome = self.sink.deliver(&pending).await;
        let record = self
            .tracker
            .update_status(&record_id, outcome.into_update())
            .await?;
        Ok(record.status)
    }

    async fn over_rate_limit(&self, medium_id: &str) -> Result<bool, DeliveryError> {
        let Some(max) = self.limits.rate_limit_max else {
            return Ok(false);
        };
        let recent = self
            .tracker
            .count_recent_deliveries(
                &DeliveryScope::medium(medium_id),
                self.limits.rate_limit_window_seconds,
            )
            .await?;
        Ok(recent >= max)
    }

    /// Consumes scheduler events until every sender is gone.
    pub fn spawn(self, mut events: mpsc::Receiver<Event>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    Event::CycleFinished(report) => {
                        debug!(schedule = %report.schedule, "cycle report received");
                    }
                    fetched @ Event::TargetFetched { .. } => {
                        self.handle_event(fetched).await;
                    }
                }
            }
            info!("dispatcher stopped");
        })
    }
}
