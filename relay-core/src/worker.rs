//! Fetch execution for the three processing strategies.
//!
//! Sequential fetching runs in the caller's task. Worker strategies hand each
//! batch to a disposable task in a `JoinSet`; workers send one report per
//! target over an mpsc channel and the collector enforces the batch deadline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::batch::{Batch, TargetGroup};
use crate::error::FetchError;
use crate::feed::AdvancedOptions;
use crate::fetch::{Fetcher, TargetOutcome};

/// Extra time a worker gets on top of the request timeout before its
/// unreported targets are written off.
pub const WORKER_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct TargetReport {
    pub group: TargetGroup,
    pub outcome: TargetOutcome,
}

async fn fetch_group(
    fetcher: &dyn Fetcher,
    target: &str,
    options: Option<&AdvancedOptions>,
    request_timeout: Duration,
) -> TargetOutcome {
    match tokio::time::timeout(request_timeout, fetcher.fetch(target, options)).await {
        Ok(result) => result.into(),
        Err(_) => TargetOutcome::Timeout,
    }
}

/// Fetches every target of a batch concurrently in the current task.
pub async fn fetch_batch(
    fetcher: &dyn Fetcher,
    batch: Batch,
    request_timeout: Duration,
) -> Vec<TargetReport> {
    let outcomes = join_all(batch.iter().map(|group| {
        fetch_group(fetcher, &group.target, group.options.as_ref(), request_timeout)
    }))
    .await;

    batch
        .into_iter()
        .zip(outcomes)
        .map(|(group, outcome)| TargetReport { group, outcome })
        .collect()
}

struct WorkerMessage {
    key: (usize, usize),
    outcome: TargetOutcome,
}

/// Runs each batch on its own worker task, all concurrently, and collects the
/// reports. Targets a worker never reported are `Timeout` when the deadline
/// passed and `Failed(WorkerCrashed)` when the worker died first.
pub async fn run_workers(
    fetcher: Arc<dyn Fetcher>,
    batches: Vec<Batch>,
    request_timeout: Duration,
) -> Vec<TargetReport> {
    run_workers_within(fetcher, batches, request_timeout, WORKER_GRACE).await
}

async fn run_workers_within(
    fetcher: Arc<dyn Fetcher>,
    batches: Vec<Batch>,
    request_timeout: Duration,
    grace: Duration,
) -> Vec<TargetReport> {
    let deadline = Instant::now() + request_timeout + grace;
    let (tx, mut rx) = mpsc::channel::<WorkerMessage>(64);
    let mut workers = JoinSet::new();
    let mut pending: HashMap<(usize, usize), TargetGroup> = HashMap::new();
    let mut worker_of: HashMap<tokio::task::Id, usize> = HashMap::new();

    for (worker, batch) in batches.into_iter().enumerate() {
        let jobs: Vec<_> = batch
            .iter()
            .enumerate()
            .map(|(index, group)| ((worker, index), group.target.clone(), group.options.clone()))
            .collect();
        for (index, group) in batch.into_iter().enumerate() {
            pending.insert((worker, index), group);
        }

        let fetcher = Arc::clone(&fetcher);
        let tx = tx.clone();
        let handle = workers.spawn(async move {
            let mut running: FuturesUnordered<_> = jobs
                .iter()
                .map(|(key, target, options)| {
                    let fetcher = &fetcher;
                    async move {
                        let outcome =
                            fetch_group(fetcher.as_ref(), target, options.as_ref(), request_timeout)
                                .await;
                        WorkerMessage { key: *key, outcome }
                    }
                })
                .collect();
            while let Some(message) = running.next().await {
                if tx.send(message).await.is_err() {
                    break;
                }
            }
        });
        worker_of.insert(handle.id(), worker);
    }
    drop(tx);

    let mut reports = Vec::with_capacity(pending.len());
    let mut timed_out = false;
    while !pending.is_empty() {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(WorkerMessage { key, outcome })) => {
                if let Some(group) = pending.remove(&key) {
                    reports.push(TargetReport { group, outcome });
                }
            }
            Ok(None) => break,
            Err(_) => {
                timed_out = true;
                break;
            }
        }
    }

    workers.abort_all();
    let mut crashed = HashSet::new();
    while let Some(joined) = workers.join_next().await {
        if let Err(err) = joined {
            if err.is_panic() {
                warn!(error = %err, "fetch worker crashed");
                if let Some(&worker) = worker_of.get(&err.id()) {
                    crashed.insert(worker);
                }
            }
        }
    }

    if !pending.is_empty() {
        debug!(unreported = pending.len(), timed_out, "writing off unreported targets");
    }
    let mut leftovers: Vec<_> = pending.into_iter().collect();
    leftovers.sort_by_key(|(key, _)| *key);
    reports.extend(leftovers.into_iter().map(|((worker, _), group)| TargetReport {
        group,
        outcome: if timed_out && !crashed.contains(&worker) {
            TargetOutcome::Timeout
        } else {
            TargetOutcome::Failed(FetchError::WorkerCrashed)
        },
    }));
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::item::Item;

    /// Panics on `crash`, blocks its thread on `stall`, answers the rest.
    struct Misbehaving;

    #[async_trait]
    impl Fetcher for Misbehaving {
        async fn fetch(
            &self,
            target: &str,
            _options: Option<&AdvancedOptions>,
        ) -> Result<Vec<Item>, FetchError> {
            match target {
                "https://crash.test/feed" => panic!("worker crash"),
                "https://stall.test/feed" => {
                    std::thread::sleep(Duration::from_millis(400));
                    Ok(Vec::new())
                }
                _ => Ok(Vec::new()),
            }
        }
    }

    fn single(target: &str) -> Batch {
        vec![TargetGroup {
            target: target.into(),
            sources: Vec::new(),
            options: None,
        }]
    }

    fn outcome_of<'a>(reports: &'a [TargetReport], target: &str) -> &'a TargetOutcome {
        &reports
            .iter()
            .find(|r| r.group.target == target)
            .unwrap()
            .outcome
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn crashed_worker_is_not_reported_as_timeout() {
        let reports = run_workers_within(
            Arc::new(Misbehaving),
            vec![
                single("https://crash.test/feed"),
                single("https://stall.test/feed"),
                single("https://ok.test/feed"),
            ],
            Duration::from_millis(50),
            Duration::ZERO,
        )
        .await;

        assert_eq!(reports.len(), 3);
        assert!(matches!(
            outcome_of(&reports, "https://crash.test/feed"),
            TargetOutcome::Failed(FetchError::WorkerCrashed)
        ));
        assert!(matches!(
            outcome_of(&reports, "https://stall.test/feed"),
            TargetOutcome::Timeout
        ));
        assert!(matches!(
            outcome_of(&reports, "https://ok.test/feed"),
            TargetOutcome::Ok(_)
        ));
    }
}
