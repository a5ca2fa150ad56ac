use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::failures::FailureTable;
use crate::registry::RegistryHandle;

/// Sent by the timer owner of a schedule after each completed cycle.
#[derive(Debug, Clone)]
pub struct CycleCompleted {
    pub schedule: String,
    pub refresh_interval: Duration,
    pub failures: FailureTable,
}

/// Decides which instance runs a schedule's timer when several cooperate.
#[async_trait]
pub trait PeerCoordinator: Send + Sync {
    fn owns_timer(&self, schedule: &str) -> bool;

    async fn cycle_completed(&self, signal: CycleCompleted);
}

/// Single instance: owns every timer and has nobody to tell.
#[derive(Debug, Clone, Copy, Default)]
pub struct Standalone;

#[async_trait]
impl PeerCoordinator for Standalone {
    fn owns_timer(&self, _schedule: &str) -> bool {
        true
    }

    async fn cycle_completed(&self, _signal: CycleCompleted) {}
}

/// In-process peer group over a broadcast channel. This instance owns the
/// timers of the schedules in `owned`.
#[derive(Clone)]
pub struct BroadcastPeers {
    owned: HashSet<String>,
    sender: broadcast::Sender<CycleCompleted>,
}

impl BroadcastPeers {
    pub fn new(owned: impl IntoIterator<Item = String>, sender: broadcast::Sender<CycleCompleted>) -> Self {
        Self {
            owned: owned.into_iter().collect(),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CycleCompleted> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl PeerCoordinator for BroadcastPeers {
    fn owns_timer(&self, schedule: &str) -> bool {
        self.owned.contains(schedule)
    }

    async fn cycle_completed(&self, signal: CycleCompleted) {
        debug!(schedule = %signal.schedule, "signalling cycle completion to peers");
        // No receivers is fine: peers may not have joined yet.
        let _ = self.sender.send(signal);
    }
}

/// Applies failure counters announced by timer owners to the local registry,
/// so that targets disabled elsewhere are skipped here as well.
pub fn follow_peers(
    registry: RegistryHandle,
    mut signals: broadcast::Receiver<CycleCompleted>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match signals.recv().await {
                Ok(signal) => {
                    debug!(schedule = %signal.schedule, "peer completed a cycle");
                    if registry.sync_failures(signal.failures).await.is_err() {
                        info!("registry closed, no longer following peers");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed peer signals");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
