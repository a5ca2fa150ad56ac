use tokio::sync::oneshot;

use crate::error::StorageError;
use crate::failures::{FailureTable, FailureTransition};
use crate::feed::Source;
use crate::schedule::AssignmentTable;

/// Copy of the registry state at one point in time.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub assignments: AssignmentTable,
    pub failures: FailureTable,
}

pub enum RegistryMessage {
    /// Filters `sources` down to the ones `schedule` fetches this cycle,
    /// assigning unowned sources on the way.
    Claim {
        schedule: String,
        sources: Vec<Source>,
        reply: oneshot::Sender<Vec<Source>>,
    },

    RecordOutcome {
        target: String,
        success: bool,
        reply: oneshot::Sender<FailureTransition>,
    },

    /// Writes failure counters to the failure-state file.
    Persist {
        reply: oneshot::Sender<Result<(), StorageError>>,
    },

    /// Clears a target's failure record, re-enabling a disabled target.
    ResetTarget {
        target: String,
        reply: oneshot::Sender<bool>,
    },

    /// Merges failure counters announced by a peer.
    SyncFailures { failures: FailureTable },

    Snapshot {
        reply: oneshot::Sender<RegistrySnapshot>,
    },
}
