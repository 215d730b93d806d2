//! Configuration surface for the batch execution engine.

use std::time::Duration;

use crate::payload::ExecLimits;

/// Recognized options, with defaults matching the connection-layer
/// contract: batching at 20 tasks, bounded retry at 3 attempts,
/// continue-on-error unless explicitly opted out.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum tasks per dispatch.
    pub batch_size: usize,
    /// Maximum encoded payload size in bytes.
    pub max_payload_bytes: usize,
    /// Status poll period.
    pub status_interval: Duration,
    /// Per-batch overall execution ceiling.
    pub execution_timeout: Duration,
    /// Per-task execution ceiling, enforced remotely.
    pub per_task_timeout: Duration,
    /// Maximum attempts for session acquisition and dispatch.
    pub max_retries: u32,
    /// Base delay for exponential retry backoff.
    pub retry_backoff: Duration,
    /// Ceiling for transport connection establishment.
    pub connect_timeout: Duration,
    /// Ceiling for the reuse liveness probe.
    pub probe_timeout: Duration,
    /// Idle period after which a cached session is discarded.
    pub idle_timeout: Duration,
    /// Per-stream output capture cap in bytes.
    pub output_cap_bytes: usize,
    /// Halt a batch on the first non-succeeding task.
    pub stop_on_first_failure: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_payload_bytes: 256 * 1024,
            status_interval: Duration::from_secs(2),
            execution_timeout: Duration::from_secs(3600),
            per_task_timeout: Duration::from_secs(300),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            output_cap_bytes: 1024 * 1024,
            stop_on_first_failure: false,
        }
    }
}

impl BatchConfig {
    /// Set the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the status poll period.
    #[must_use]
    pub const fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    /// Set the per-batch execution ceiling.
    #[must_use]
    pub const fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// Set the per-task execution ceiling.
    #[must_use]
    pub const fn with_per_task_timeout(mut self, timeout: Duration) -> Self {
        self.per_task_timeout = timeout;
        self
    }

    /// Set the retry bound.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Opt in to stop-on-first-failure.
    #[must_use]
    pub const fn with_stop_on_first_failure(mut self, stop: bool) -> Self {
        self.stop_on_first_failure = stop;
        self
    }

    /// The limits shipped to the remote executor.
    #[must_use]
    pub const fn exec_limits(&self) -> ExecLimits {
        ExecLimits {
            per_task_timeout_secs: self.per_task_timeout.as_secs(),
            output_cap_bytes: self.output_cap_bytes,
            stop_on_first_failure: self.stop_on_first_failure,
        }
    }
}
