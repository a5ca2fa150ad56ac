use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::handle::RegistryHandle;
use super::messages::{RegistryMessage, RegistrySnapshot};
use crate::failures::{FailurePolicy, FailureTable};
use crate::feed::{Source, SourceHealth};
use crate::schedule::{AssignmentTable, Schedule};

/// Sole owner of the schedule assignment table and the failure counters.
pub struct RegistryActor {
    schedules: Vec<Schedule>,
    policy: FailurePolicy,
    assignments: AssignmentTable,
    failures: FailureTable,
    failures_path: Option<PathBuf>,
    receiver: mpsc::Receiver<RegistryMessage>,
}

impl RegistryActor {
    pub fn new(
        schedules: Vec<Schedule>,
        policy: FailurePolicy,
        failures: FailureTable,
        failures_path: Option<PathBuf>,
        receiver: mpsc::Receiver<RegistryMessage>,
    ) -> Self {
        Self {
            schedules,
            policy,
            assignments: AssignmentTable::default(),
            failures,
            failures_path,
            receiver,
        }
    }

    pub async fn run(mut self) {
        info!(
            schedules = self.schedules.len(),
            disabled = self.failures.disabled_targets().len(),
            "registry actor started"
        );

        while let Some(msg) = self.receiver.recv().await {
            self.handle_message(msg).await;
        }

        info!("registry actor stopped");
    }

    async fn handle_message(&mut self, msg: RegistryMessage) {
        match msg {
            RegistryMessage::Claim {
                schedule,
                sources,
                reply,
            } => {
                let included = self.claim(&schedule, sources);
                let _ = reply.send(included);
            }

            RegistryMessage::RecordOutcome {
                target,
                success,
                reply,
            } => {
                let transition = if success {
                    self.failures.record_success(&target)
                } else {
                    self.failures.record_failure(&target, &self.policy)
                };
                let _ = reply.send(transition);
            }

            RegistryMessage::Persist { reply } => {
                let result = match &self.failures_path {
                    Some(path) => self.failures.save(path).await,
                    None => Ok(()),
                };
                if let Err(err) = &result {
                    warn!(error = %err, "unable to persist failure counters");
                }
                let _ = reply.send(result);
            }

            RegistryMessage::ResetTarget { target, reply } => {
                let cleared = self.failures.reset(&target);
                if cleared {
                    info!(url = %target, "failure record reset");
                }
                let _ = reply.send(cleared);
            }

            RegistryMessage::SyncFailures { failures } => {
                debug!("merging failure counters from peer");
                self.failures.merge(failures);
            }

            RegistryMessage::Snapshot { reply } => {
                let _ = reply.send(RegistrySnapshot {
                    assignments: self.assignments.clone(),
                    failures: self.failures.clone(),
                });
            }
        }
    }

    fn claim(&mut self, schedule_name: &str, sources: Vec<Source>) -> Vec<Source> {
        let Some(schedule) = self
            .schedules
            .iter()
            .find(|s| s.name == schedule_name)
            .cloned()
        else {
            warn!(schedule = schedule_name, "claim from unknown schedule");
            return Vec::new();
        };

        sources
            .into_iter()
            .filter(|source| {
                source.is_valid()
                    && source.health == SourceHealth::Healthy
                    && !self.failures.is_disabled(&source.target)
            })
            .filter(|source| {
                self.assignments
                    .claim(&schedule, &self.schedules, source)
                    .is_included()
            })
            .collect()
    }
}

/// Starts the registry actor on the current runtime.
pub fn spawn_registry(
    schedules: Vec<Schedule>,
    policy: FailurePolicy,
    failures: FailureTable,
    failures_path: Option<PathBuf>,
) -> RegistryHandle {
    let (sender, receiver) = mpsc::channel(256);
    let actor = RegistryActor::new(schedules, policy, failures, failures_path, receiver);
    tokio::spawn(actor.run());
    RegistryHandle::new(sender)
}
