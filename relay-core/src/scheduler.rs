use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::batch::{self, Batch};
use crate::config::{ProcessorMethod, RelayConfig};
use crate::error::ScheduleError;
use crate::failures::FailureTransition;
use crate::feed::{Source, SourceProvider};
use crate::fetch::{Fetcher, TargetOutcome};
use crate::item::Item;
use crate::notify::{FailureNotice, FailureNoticeKind, NotificationSink};
use crate::peers::{CycleCompleted, PeerCoordinator};
use crate::registry::RegistryHandle;
use crate::schedule::Schedule;
use crate::worker::{self, TargetReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CyclePhase {
    #[default]
    Idle,
    Collecting,
    Batched,
    Fetching,
    Draining,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub schedule: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub enum Event {
    /// Items fetched from one target, with every source reading it.
    TargetFetched {
        schedule: String,
        target: String,
        sources: Vec<Source>,
        items: Vec<Item>,
    },
    CycleFinished(CycleReport),
}

/// Cycle tuning shared by every schedule of a process.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub processor: ProcessorMethod,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub request_timeout: Duration,
    pub fail_limit: u32,
    pub notify_on_failure: bool,
    pub cookie_allowlist: Vec<String>,
    pub show_feed_errors: bool,
}

impl SchedulerSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            processor: config.advanced.processor_method,
            batch_size: config.advanced.batch_size,
            batch_delay: config.advanced.batch_delay(),
            request_timeout: config.feeds.request_timeout(),
            fail_limit: config.feeds.fail_limit,
            notify_on_failure: config.feeds.notify_fail,
            cookie_allowlist: config.cookie_allowlist.clone(),
            show_feed_errors: config.log.show_feed_errors,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

/// Collaborators a schedule needs to run a cycle.
#[derive(Clone)]
pub struct ScheduleDeps {
    pub sources: Arc<dyn SourceProvider>,
    pub fetcher: Arc<dyn Fetcher>,
    pub registry: RegistryHandle,
    pub sink: Arc<dyn NotificationSink>,
    pub peers: Arc<dyn PeerCoordinator>,
    pub events: mpsc::Sender<Event>,
}

/// One schedule's fetch cycle.
#[derive(Clone)]
pub struct FeedSchedule {
    schedule: Schedule,
    settings: Arc<SchedulerSettings>,
    deps: ScheduleDeps,
    phase: Arc<watch::Sender<CyclePhase>>,
}

/// Puts the phase back to idle however the cycle ends, including abort.
struct PhaseGuard(Arc<watch::Sender<CyclePhase>>);

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        self.0.send_replace(CyclePhase::Idle);
    }
}

#[derive(Default)]
struct CycleStats {
    succeeded: usize,
    failed: usize,
}

impl FeedSchedule {
    pub fn new(schedule: Schedule, settings: Arc<SchedulerSettings>, deps: ScheduleDeps) -> Self {
        let (phase, _) = watch::channel(CyclePhase::Idle);
        Self {
            schedule,
            settings,
            deps,
            phase: Arc::new(phase),
        }
    }

    pub fn name(&self) -> &str {
        &self.schedule.name
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn phase(&self) -> watch::Receiver<CyclePhase> {
        self.phase.subscribe()
    }

    fn enter(&self, phase: CyclePhase) {
        debug!(schedule = %self.schedule.name, ?phase, "cycle phase");
        self.phase.send_replace(phase);
    }

    /// Runs one complete cycle: collect, batch, fetch, drain.
    pub async fn run_cycle(&self) -> Result<CycleReport, ScheduleError> {
        let started = Instant::now();
        let _guard = PhaseGuard(Arc::clone(&self.phase));
        let settings = &self.settings;

        self.enter(CyclePhase::Collecting);
        let mut sources = self.deps.sources.current_sources().await;
        batch::apply_cookie_allowlist(&mut sources, &settings.cookie_allowlist);
        let claimed = self
            .deps
            .registry
            .claim(&self.schedule.name, sources)
            .await?;

        self.enter(CyclePhase::Batched);
        let plan = batch::plan(claimed, settings.batch_size);
        let total = plan.target_count();
        debug!(
            schedule = %self.schedule.name,
            targets = total,
            batches = plan.batch_count(),
            "batched sources"
        );

        self.enter(CyclePhase::Fetching);
        let mut stats = CycleStats::default();
        let mut fetched = Vec::new();
        let batches = plan.into_batches();
        match settings.processor {
            ProcessorMethod::Sequential => {
                for (i, batch) in batches.into_iter().enumerate() {
                    self.pause_between(i).await;
                    let reports =
                        worker::fetch_batch(self.deps.fetcher.as_ref(), batch, settings.request_timeout)
                            .await;
                    self.account(reports, &mut stats, &mut fetched).await?;
                }
            }
            ProcessorMethod::Isolated => {
                for (i, batch) in batches.into_iter().enumerate() {
                    self.pause_between(i).await;
                    let reports = self.run_workers(vec![batch]).await;
                    self.account(reports, &mut stats, &mut fetched).await?;
                }
            }
            ProcessorMethod::Parallel => {
                let reports = self.run_workers(batches).await;
                self.account(reports, &mut stats, &mut fetched).await?;
            }
        }

        self.enter(CyclePhase::Draining);
        for report in fetched {
            let TargetOutcome::Ok(items) = report.outcome else {
                continue;
            };
            let event = Event::TargetFetched {
                schedule: self.schedule.name.clone(),
                target: report.group.target,
                sources: report.group.sources,
                items,
            };
            if self.deps.events.send(event).await.is_err() {
                warn!(schedule = %self.schedule.name, "event receiver dropped");
            }
        }

        if let Err(err) = self.deps.registry.persist().await? {
            warn!(schedule = %self.schedule.name, error = %err, "failure counters not saved");
        }

        let report = CycleReport {
            schedule: self.schedule.name.clone(),
            total,
            succeeded: stats.succeeded,
            failed: stats.failed,
            elapsed: started.elapsed(),
        };
        info!(
            schedule = %report.schedule,
            "finished cycle ({}/{} failed). Cycle time: {:.2}s",
            report.failed,
            report.total,
            report.elapsed.as_secs_f64()
        );

        if self.deps.peers.owns_timer(&self.schedule.name) {
            let snapshot = self.deps.registry.snapshot().await?;
            self.deps
                .peers
                .cycle_completed(CycleCompleted {
                    schedule: self.schedule.name.clone(),
                    refresh_interval: self.schedule.refresh_interval,
                    failures: snapshot.failures,
                })
                .await;
        }

        if self
            .deps
            .events
            .send(Event::CycleFinished(report.clone()))
            .await
            .is_err()
        {
            warn!(schedule = %self.schedule.name, "event receiver dropped");
        }

        Ok(report)
    }

    async fn pause_between(&self, batch_index: usize) {
        if batch_index > 0 && !self.settings.batch_delay.is_zero() {
            tokio::time::sleep(self.settings.batch_delay).await;
        }
    }

    async fn run_workers(&self, batches: Vec<Batch>) -> Vec<TargetReport> {
        worker::run_workers(
            Arc::clone(&self.deps.fetcher),
            batches,
            self.settings.request_timeout,
        )
        .await
    }

    /// Applies failure accounting to each report and keeps successful ones
    /// for draining.
    async fn account(
        &self,
        reports: Vec<TargetReport>,
        stats: &mut CycleStats,
        fetched: &mut Vec<TargetReport>,
    ) -> Result<(), ScheduleError> {
        for report in reports {
            let target = report.group.target.as_str();
            let success = report.outcome.is_ok();
            let transition = self.deps.registry.record_outcome(target, success).await?;

            match &report.outcome {
                TargetOutcome::Ok(_) => stats.succeeded += 1,
                TargetOutcome::Failed(err) => {
                    stats.failed += 1;
                    self.log_target_error(target, &err.to_string());
                }
                TargetOutcome::Timeout => {
                    stats.failed += 1;
                    self.log_target_error(target, "request timed out");
                }
            }

            if let FailureTransition::Recovered { previous } = transition {
                info!(url = target, previous, "target recovered");
            }
            if transition.is_notable() && self.settings.notify_on_failure {
                self.notify(&report, transition).await;
            }

            if success {
                fetched.push(report);
            }
        }
        Ok(())
    }

    fn log_target_error(&self, target: &str, error: &str) {
        if self.settings.show_feed_errors {
            warn!(schedule = %self.schedule.name, url = target, error, "failed to fetch target");
        } else {
            debug!(schedule = %self.schedule.name, url = target, error, "failed to fetch target");
        }
    }

    async fn notify(&self, report: &TargetReport, transition: FailureTransition) {
        let (kind, failures) = match transition {
            FailureTransition::Warned { count } => (FailureNoticeKind::Warning, count),
            FailureTransition::Disabled { count, .. } => (FailureNoticeKind::Disabled, count),
            _ => return,
        };
        self.deps
            .sink
            .notify_failure(FailureNotice {
                kind,
                target: report.group.target.clone(),
                failures,
                ceiling: self.settings.fail_limit,
                source_ids: report.group.source_ids(),
            })
            .await;
    }
}

/// Controls a running schedule.
pub struct ScheduleHandle {
    name: String,
    trigger_tx: mpsc::Sender<()>,
    phase_rx: watch::Receiver<CyclePhase>,
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl ScheduleHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts a cycle now, subject to the usual re-entrancy rules.
    pub async fn trigger(&self) -> Result<(), ScheduleError> {
        self.trigger_tx
            .send(())
            .await
            .map_err(|_| ScheduleError::RunnerClosed)
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase_rx.borrow()
    }

    pub fn phase_receiver(&self) -> watch::Receiver<CyclePhase> {
        self.phase_rx.clone()
    }

    /// Cancels the timer, aborts a running cycle and waits for the runner.
    pub async fn stop(self) -> Result<(), ScheduleError> {
        let _ = self.cancel_tx.send(());
        self.join.await.map_err(ScheduleError::from)
    }
}

/// Spawns the timer loop for one schedule. The timer only runs when the peer
/// coordinator says this instance owns it; triggers always work.
pub fn spawn_schedule(schedule: FeedSchedule) -> ScheduleHandle {
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let (trigger_tx, mut trigger_rx) = mpsc::channel(4);
    let phase_rx = schedule.phase();
    let name = schedule.name().to_owned();
    let owns_timer = schedule.deps.peers.owns_timer(&name);
    if !owns_timer {
        info!(schedule = %name, "timer owned by a peer, waiting for triggers");
    }

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(schedule.schedule.refresh_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut current: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    info!(schedule = %schedule.name(), "schedule shutdown requested");
                    break;
                }
                _ = ticker.tick(), if owns_timer => {
                    start_cycle(&schedule, &mut current).await;
                }
                Some(()) = trigger_rx.recv() => {
                    start_cycle(&schedule, &mut current).await;
                }
            }
        }

        if let Some(running) = current.take() {
            running.abort();
            let _ = running.await;
        }
    });

    ScheduleHandle {
        name,
        trigger_tx,
        phase_rx,
        cancel_tx,
        join,
    }
}

async fn start_cycle(schedule: &FeedSchedule, current: &mut Option<JoinHandle<()>>) {
    if let Some(running) = current.take() {
        if !running.is_finished() {
            match schedule.settings.processor {
                ProcessorMethod::Sequential => {
                    warn!(
                        schedule = %schedule.name(),
                        "previous cycle is still running, skipping this one"
                    );
                    *current = Some(running);
                    return;
                }
                ProcessorMethod::Isolated | ProcessorMethod::Parallel => {
                    warn!(
                        schedule = %schedule.name(),
                        "previous cycle is still running, aborting it"
                    );
                    running.abort();
                    let _ = running.await;
                }
            }
        }
    }

    let cycle = schedule.clone();
    *current = Some(tokio::spawn(async move {
        if let Err(err) = cycle.run_cycle().await {
            error!(schedule = %cycle.name(), error = %err, "cycle aborted");
        }
    }));
}
