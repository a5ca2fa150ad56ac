use tokio::sync::{mpsc, oneshot};

use super::messages::{RegistryMessage, RegistrySnapshot};
use crate::error::{RegistryError, StorageError};
use crate::failures::{FailureTable, FailureTransition};
use crate::feed::Source;

/// Cloneable front of the registry actor. Every call is one message, handled
/// in arrival order.
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
}

impl RegistryHandle {
    pub fn new(sender: mpsc::Sender<RegistryMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(build(reply))
            .await
            .map_err(|_| RegistryError::Unavailable)?;
        rx.await.map_err(|_| RegistryError::Unavailable)
    }

    pub async fn claim(
        &self,
        schedule: &str,
        sources: Vec<Source>,
    ) -> Result<Vec<Source>, RegistryError> {
        let schedule = schedule.to_owned();
        self.request(|reply| RegistryMessage::Claim {
            schedule,
            sources,
            reply,
        })
        .await
    }

    pub async fn record_outcome(
        &self,
        target: &str,
        success: bool,
    ) -> Result<FailureTransition, RegistryError> {
        let target = target.to_owned();
        self.request(|reply| RegistryMessage::RecordOutcome {
            target,
            success,
            reply,
        })
        .await
    }

    pub async fn persist(&self) -> Result<Result<(), StorageError>, RegistryError> {
        self.request(|reply| RegistryMessage::Persist { reply }).await
    }

    pub async fn reset_target(&self, target: &str) -> Result<bool, RegistryError> {
        let target = target.to_owned();
        self.request(|reply| RegistryMessage::ResetTarget { target, reply })
            .await
    }

    pub async fn sync_failures(&self, failures: FailureTable) -> Result<(), RegistryError> {
        self.sender
            .send(RegistryMessage::SyncFailures { failures })
            .await
            .map_err(|_| RegistryError::Unavailable)
    }

    pub async fn snapshot(&self) -> Result<RegistrySnapshot, RegistryError> {
        self.request(|reply| RegistryMessage::Snapshot { reply }).await
    }
}
