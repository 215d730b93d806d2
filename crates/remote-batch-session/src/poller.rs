//! Status polling for in-flight batches.

use std::time::Duration;

use remote_batch_core::{
    BatchConfig, BatchEvent, EventStore, RemoteChannel, StatusReport, TaskResult, TransportError,
    results_artifact_name, status_artifact_name,
};
use uuid::Uuid;

/// What polling concluded about a batch.
#[derive(Debug)]
pub enum PollVerdict {
    /// The batch reached a terminal aggregate state; full results inside.
    Completed(Vec<TaskResult>),
    /// The overall execution ceiling elapsed; partial results inside.
    TimedOut(Vec<TaskResult>),
    /// The transport failed mid-batch; partial results inside.
    SessionLost(Vec<TaskResult>),
}

/// Polls the remote status artifact until the batch settles.
///
/// Read-only: one remote read per tick, no mutation of remote state.
pub struct StatusPoller {
    interval: Duration,
    batch_timeout: Duration,
}

impl StatusPoller {
    /// Create a poller with an explicit interval and batch ceiling.
    #[must_use]
    pub const fn new(interval: Duration, batch_timeout: Duration) -> Self {
        Self {
            interval,
            batch_timeout,
        }
    }

    /// Derive the poller from the engine configuration.
    #[must_use]
    pub const fn from_config(config: &BatchConfig) -> Self {
        Self::new(config.status_interval, config.execution_timeout)
    }

    /// Poll until the batch completes, the ceiling elapses, or the
    /// session is lost.
    ///
    /// Progress is monotonic: a snapshot reporting fewer completed tasks
    /// than previously observed signals a corrupted or stale read and is
    /// rejected (logged, mirrored as an event), never applied.
    pub async fn wait(
        &self,
        channel: &dyn RemoteChannel,
        batch_id: Uuid,
        events: &EventStore,
    ) -> PollVerdict {
        let deadline = tokio::time::Instant::now() + self.batch_timeout;
        let mut high_water: usize = 0;
        let mut last_running: Option<String> = None;

        loop {
            let next_tick = tokio::time::Instant::now() + self.interval;
            if next_tick >= deadline {
                tokio::time::sleep_until(deadline).await;
                tracing::warn!(batch_id = %batch_id, "batch exceeded execution ceiling");
                let partial = fetch_results(channel, batch_id).await.unwrap_or_default();
                return PollVerdict::TimedOut(partial);
            }
            tokio::time::sleep_until(next_tick).await;

            let bytes = match channel.read_artifact(&status_artifact_name(batch_id)).await {
                Ok(bytes) => bytes,
                Err(TransportError::ArtifactMissing(_)) => {
                    // Executor has not written its first snapshot yet.
                    continue;
                }
                Err(e) => {
                    tracing::warn!(batch_id = %batch_id, error = %e, "status read failed, session lost");
                    let partial = fetch_results(channel, batch_id).await.unwrap_or_default();
                    return PollVerdict::SessionLost(partial);
                }
            };

            let report: StatusReport = match serde_json::from_slice(&bytes) {
                Ok(report) => report,
                Err(e) => {
                    tracing::warn!(batch_id = %batch_id, error = %e, "corrupted status snapshot rejected");
                    continue;
                }
            };

            if report.completed < high_water {
                tracing::warn!(
                    batch_id = %batch_id,
                    observed = report.completed,
                    high_water,
                    "non-monotonic status snapshot rejected"
                );
                events.push(BatchEvent::SnapshotRejected {
                    batch_id,
                    completed: report.completed,
                });
                continue;
            }
            high_water = report.completed;

            if report.current_task_id != last_running {
                if let Some(ref task_id) = report.current_task_id {
                    events.push(BatchEvent::TaskStarted {
                        batch_id,
                        task_id: task_id.clone(),
                    });
                }
                last_running.clone_from(&report.current_task_id);
            }
            tracing::debug!(
                batch_id = %batch_id,
                completed = report.completed,
                total = report.total,
                state = ?report.state,
                "status snapshot"
            );
            let state = report.state;
            events.push(BatchEvent::SnapshotObserved(report));

            if state.is_terminal() {
                events.push(BatchEvent::BatchFinished { batch_id, state });
                return match fetch_results(channel, batch_id).await {
                    Ok(results) => PollVerdict::Completed(results),
                    Err(e) => {
                        tracing::warn!(batch_id = %batch_id, error = %e, "results read failed after completion");
                        PollVerdict::SessionLost(Vec::new())
                    }
                };
            }
        }
    }
}

/// Best-effort read of the (possibly partial) results manifest.
async fn fetch_results(
    channel: &dyn RemoteChannel,
    batch_id: Uuid,
) -> Result<Vec<TaskResult>, TransportError> {
    let bytes = match channel.read_artifact(&results_artifact_name(batch_id)).await {
        Ok(bytes) => bytes,
        Err(TransportError::ArtifactMissing(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    match serde_json::from_slice(&bytes) {
        Ok(results) => Ok(results),
        Err(e) => {
            tracing::warn!(batch_id = %batch_id, error = %e, "results manifest unparseable");
            Ok(Vec::new())
        }
    }
}
