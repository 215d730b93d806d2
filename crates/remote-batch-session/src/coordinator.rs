//! Orchestrator-facing batch coordination.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use remote_batch_core::{
    BatchConfig, BatchEvent, BatchPayload, Credentials, EncodeError, EncodedPayload, EventStore,
    HostSpec, TaskRecord, TaskResult, TaskSpec, TaskStatus, Transport,
};
use uuid::Uuid;

use crate::manager::SessionManager;
use crate::poller::{PollVerdict, StatusPoller};
use crate::retry::RetryPolicy;

/// The orchestration-facing entry point.
///
/// Accepts an ordered task list for a host, groups it into batches of at
/// most `batch_size`, drives one reused session per host, and returns
/// exactly one result per input task in input order. Unreported tasks
/// come back with an explicit not-executed result, never omitted.
pub struct BatchCoordinator<T: Transport> {
    sessions: SessionManager<T>,
    config: BatchConfig,
    retry: RetryPolicy,
    poller: StatusPoller,
    events: Arc<EventStore>,
}

impl<T: Transport> BatchCoordinator<T> {
    /// Create a coordinator over a transport.
    #[must_use]
    pub fn new(transport: T, config: BatchConfig) -> Self {
        let retry = RetryPolicy::from_config(&config);
        let poller = StatusPoller::from_config(&config);
        let sessions = SessionManager::new(transport, &config);
        Self {
            sessions,
            config,
            retry,
            poller,
            events: Arc::new(EventStore::new()),
        }
    }

    /// Progress event stream for subscribers.
    #[must_use]
    pub fn events(&self) -> Arc<EventStore> {
        Arc::clone(&self.events)
    }

    /// The session registry, for lifecycle control at run end.
    pub const fn sessions(&self) -> &SessionManager<T> {
        &self.sessions
    }

    /// Run an ordered task list against one host.
    ///
    /// The call itself never fails: transport exhaustion, session loss
    /// and batch timeouts all surface inside the returned manifest.
    pub async fn run(
        &self,
        host: &HostSpec,
        credentials: &Credentials,
        tasks: Vec<TaskSpec>,
    ) -> Vec<TaskResult> {
        if tasks.is_empty() {
            return Vec::new();
        }

        let mut outcomes: HashMap<String, TaskResult> = HashMap::new();
        let mut abandoned = false;

        // Work queue of chunks; an oversized chunk is split in half and
        // requeued rather than failing the run.
        let mut queue: VecDeque<Vec<TaskSpec>> = tasks
            .chunks(self.config.batch_size.max(1))
            .map(<[TaskSpec]>::to_vec)
            .collect();

        while let Some(chunk) = queue.pop_front() {
            if abandoned {
                break;
            }
            match self.encode_chunk(&chunk) {
                EncodeOutcome::Encoded(batch_id, encoded) => {
                    abandoned = self
                        .run_batch(host, credentials, &chunk, batch_id, &encoded, &mut outcomes)
                        .await;
                }
                EncodeOutcome::Split(left, right) => {
                    queue.push_front(right);
                    queue.push_front(left);
                }
                EncodeOutcome::Rejected(results) => {
                    for result in results {
                        outcomes.entry(result.task_id.clone()).or_insert(result);
                    }
                }
            }
        }

        // 1:1 ordered manifest, regardless of how batching grouped tasks.
        tasks
            .iter()
            .map(|task| {
                outcomes
                    .remove(&task.id)
                    .unwrap_or_else(|| TaskResult::not_executed(&task.id))
            })
            .collect()
    }

    fn encode_chunk(&self, chunk: &[TaskSpec]) -> EncodeOutcome {
        let records: Vec<TaskRecord> = chunk
            .iter()
            .map(|task| TaskRecord {
                task_id: task.id.clone(),
                command: task.command.clone(),
            })
            .collect();
        let batch_id = Uuid::new_v4();
        let payload = BatchPayload::new(batch_id, records, self.config.exec_limits());

        match payload.encode(self.config.max_payload_bytes) {
            Ok(encoded) => EncodeOutcome::Encoded(batch_id, encoded),
            Err(EncodeError::TooLarge { actual, limit }) if chunk.len() > 1 => {
                tracing::debug!(
                    tasks = chunk.len(),
                    actual,
                    limit,
                    "payload over cap, splitting batch"
                );
                let mid = chunk.len() / 2;
                let (left, right) = chunk.split_at(mid);
                EncodeOutcome::Split(left.to_vec(), right.to_vec())
            }
            Err(e) => {
                tracing::warn!(tasks = chunk.len(), error = %e, "payload rejected before dispatch");
                EncodeOutcome::Rejected(
                    chunk
                        .iter()
                        .map(|task| {
                            TaskResult::rejected(&task.id, format!("payload encoding failed: {e}"))
                        })
                        .collect(),
                )
            }
        }
    }

    /// Dispatch one batch and wait for it. Returns true when the rest of
    /// the run must be abandoned.
    async fn run_batch(
        &self,
        host: &HostSpec,
        credentials: &Credentials,
        chunk: &[TaskSpec],
        batch_id: Uuid,
        encoded: &EncodedPayload,
        outcomes: &mut HashMap<String, TaskResult>,
    ) -> bool {
        let lease = match self
            .retry
            .run("session acquire", || {
                self.sessions.acquire(host, credentials)
            })
            .await
        {
            Ok(lease) => lease,
            Err(e) => {
                tracing::error!(host = %host, error = %e, "session unavailable, abandoning run");
                return true;
            }
        };

        // Dispatch is retryable because a failed dispatch means the
        // remote never accepted the batch; once accepted it is never
        // silently re-run.
        let dispatched = self
            .retry
            .run("batch dispatch", || lease.channel.dispatch(batch_id, encoded))
            .await;
        if let Err(e) = dispatched {
            tracing::error!(host = %host, batch_id = %batch_id, error = %e, "dispatch failed, abandoning run");
            self.sessions.invalidate(host).await;
            return true;
        }

        self.events.push(BatchEvent::Dispatched {
            batch_id,
            total: chunk.len(),
        });
        tracing::info!(host = %host, batch_id = %batch_id, tasks = chunk.len(), "batch dispatched");

        match self
            .poller
            .wait(lease.channel.as_ref(), batch_id, &self.events)
            .await
        {
            PollVerdict::Completed(results) => {
                let failed = results
                    .iter()
                    .any(|r| !matches!(r.status, TaskStatus::Succeeded));
                self.merge(batch_id, results, outcomes);
                self.sessions.release(host).await;
                if self.config.stop_on_first_failure && failed {
                    tracing::info!(host = %host, batch_id = %batch_id, "stopping after first failure");
                    return true;
                }
                false
            }
            PollVerdict::TimedOut(partial) => {
                self.merge(batch_id, partial, outcomes);
                // everything unterminated in this batch hit the ceiling
                for task in chunk {
                    outcomes
                        .entry(task.id.clone())
                        .or_insert_with(|| TaskResult::timed_out(&task.id));
                }
                tracing::error!(host = %host, batch_id = %batch_id, "batch timed out, abandoning run");
                self.sessions.invalidate(host).await;
                true
            }
            PollVerdict::SessionLost(partial) => {
                self.merge(batch_id, partial, outcomes);
                tracing::error!(host = %host, batch_id = %batch_id, "session lost mid-batch, abandoning run");
                self.sessions.invalidate(host).await;
                true
            }
        }
    }

    /// Fold terminal results into the outcome map. First report wins so
    /// no task is ever reported twice with different terminal outcomes.
    fn merge(
        &self,
        batch_id: Uuid,
        results: Vec<TaskResult>,
        outcomes: &mut HashMap<String, TaskResult>,
    ) {
        for result in results {
            if !result.status.is_terminal() {
                continue;
            }
            self.events.push(BatchEvent::TaskFinished {
                batch_id,
                task_id: result.task_id.clone(),
                status: result.status,
            });
            outcomes.entry(result.task_id.clone()).or_insert(result);
        }
    }
}

enum EncodeOutcome {
    Encoded(Uuid, EncodedPayload),
    Split(Vec<TaskSpec>, Vec<TaskSpec>),
    Rejected(Vec<TaskResult>),
}
