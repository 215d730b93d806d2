//! Remote-side status snapshot artifact.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coarse batch state as reported by the remote executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// Batch accepted but no task has started yet.
    Pending,
    /// A task is currently executing.
    Running,
    /// Every task reached a terminal status.
    Completed,
    /// The queue was halted by stop-on-first-failure.
    Stopped,
}

impl BatchState {
    /// Whether the remote executor is done with the batch.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped)
    }
}

/// Progress snapshot written by the remote executor.
///
/// Overwritten in place on every state change; consumers always read the
/// latest snapshot, never a queue of history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Batch this snapshot belongs to.
    pub batch_id: Uuid,
    /// Total task count in the batch.
    pub total: usize,
    /// Tasks that reached a terminal status so far.
    pub completed: usize,
    /// Identifier of the task currently running, if any.
    pub current_task_id: Option<String>,
    /// Coarse batch state.
    pub state: BatchState,
    /// Snapshot timestamp (Unix epoch seconds).
    pub timestamp: i64,
}

/// Name of the status artifact for a batch.
///
/// Fixed here so the executor and the poller cannot drift apart.
#[must_use]
pub fn status_artifact_name(batch_id: Uuid) -> String {
    format!("batch-{batch_id}.status.json")
}

/// Name of the results artifact for a batch.
#[must_use]
pub fn results_artifact_name(batch_id: Uuid) -> String {
    format!("batch-{batch_id}.results.json")
}
