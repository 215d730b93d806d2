//! Ordered batch execution against an artifact store.

use std::sync::Arc;
use std::time::Duration;

use remote_batch_core::{
    BatchPayload, BatchState, StatusReport, TaskResult, TaskStatus, now, results_artifact_name,
    status_artifact_name,
};
use thiserror::Error;
use uuid::Uuid;

use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::run::run_shell;

/// Executor error.
///
/// Per-task failures are data in the result manifest; only artifact-store
/// breakage surfaces here.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Runs a decoded batch: strictly in order, one task at a time.
///
/// Before each task the status artifact is rewritten, and after each task
/// the results artifact is rewritten, so an observer that stops waiting
/// early still reads a consistent partial manifest.
pub struct BatchExecutor<S> {
    store: Arc<S>,
}

impl<S: ArtifactStore> BatchExecutor<S> {
    /// Create a new executor over an artifact store.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Execute every task in the payload.
    ///
    /// Non-zero exits and spawn failures mark the task `Failed` and
    /// execution continues, unless the payload opts into
    /// stop-on-first-failure, in which case the remainder is `Cancelled`.
    ///
    /// # Errors
    /// Returns error only if an artifact cannot be written.
    pub async fn execute(&self, payload: &BatchPayload) -> Result<Vec<TaskResult>, ExecError> {
        let total = payload.tasks.len();
        let limits = payload.limits;
        let per_task = Duration::from_secs(limits.per_task_timeout_secs);
        let mut results: Vec<TaskResult> = Vec::with_capacity(total);
        let mut halted = false;

        tracing::info!(batch_id = %payload.batch_id, total, "batch accepted");
        let initial_state = if total == 0 {
            BatchState::Completed
        } else {
            BatchState::Pending
        };
        self.write_status(payload.batch_id, total, 0, None, initial_state)
            .await?;

        for record in &payload.tasks {
            if halted {
                results.push(TaskResult::not_executed(&record.task_id));
                self.write_results(payload.batch_id, &results).await?;
                continue;
            }

            self.write_status(
                payload.batch_id,
                total,
                results.len(),
                Some(record.task_id.clone()),
                BatchState::Running,
            )
            .await?;

            tracing::debug!(batch_id = %payload.batch_id, task_id = %record.task_id, "task starting");
            let started_at = now();
            let outcome = run_shell(&record.command, per_task, limits.output_cap_bytes).await;
            let ended_at = now();

            let result = match outcome {
                Ok(out) => {
                    let status = if out.timed_out {
                        TaskStatus::TimedOut
                    } else if out.exit_code == Some(0) {
                        TaskStatus::Succeeded
                    } else {
                        TaskStatus::Failed
                    };
                    TaskResult {
                        task_id: record.task_id.clone(),
                        status,
                        exit_code: out.exit_code,
                        stdout: out.stdout,
                        stderr: out.stderr,
                        truncated: out.truncated,
                        started_at: Some(started_at),
                        ended_at: Some(ended_at),
                    }
                }
                Err(e) => TaskResult {
                    task_id: record.task_id.clone(),
                    status: TaskStatus::Failed,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("failed to spawn: {e}"),
                    truncated: false,
                    started_at: Some(started_at),
                    ended_at: Some(ended_at),
                },
            };

            tracing::debug!(
                batch_id = %payload.batch_id,
                task_id = %record.task_id,
                status = ?result.status,
                exit_code = ?result.exit_code,
                "task finished"
            );

            if limits.stop_on_first_failure && result.status != TaskStatus::Succeeded {
                halted = true;
            }
            results.push(result);
            self.write_results(payload.batch_id, &results).await?;
        }

        let final_state = if halted {
            BatchState::Stopped
        } else {
            BatchState::Completed
        };
        self.write_status(payload.batch_id, total, results.len(), None, final_state)
            .await?;
        tracing::info!(batch_id = %payload.batch_id, state = ?final_state, "batch finished");

        Ok(results)
    }

    async fn write_status(
        &self,
        batch_id: Uuid,
        total: usize,
        completed: usize,
        current_task_id: Option<String>,
        state: BatchState,
    ) -> Result<(), ExecError> {
        let report = StatusReport {
            batch_id,
            total,
            completed,
            current_task_id,
            state,
            timestamp: now(),
        };
        let bytes = serde_json::to_vec(&report)?;
        self.store
            .write(&status_artifact_name(batch_id), &bytes)
            .await?;
        Ok(())
    }

    async fn write_results(
        &self,
        batch_id: Uuid,
        results: &[TaskResult],
    ) -> Result<(), ExecError> {
        let bytes = serde_json::to_vec(results)?;
        self.store
            .write(&results_artifact_name(batch_id), &bytes)
            .await?;
        Ok(())
    }
}
