//! Task model: one unit of remote work and its result manifest entry.

use serde::{Deserialize, Serialize};

/// One unit of remote work, created by the caller.
///
/// The id must be unique within a run and stable across retries; it is
/// how results are matched back to submissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Caller-assigned identifier.
    pub id: String,
    /// Command text, possibly multi-line, with arbitrary quoting.
    pub command: String,
}

impl TaskSpec {
    /// Create a new task spec.
    #[must_use]
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
        }
    }
}

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is queued but not yet started.
    Queued,
    /// Task is currently executing.
    Running,
    /// Task exited with code zero.
    Succeeded,
    /// Task exited non-zero or failed to spawn.
    Failed,
    /// Task exceeded its execution ceiling and was killed.
    TimedOut,
    /// Task was never executed (abandoned batch or stop-on-first-failure).
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }
}

/// Per-task result manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Identifier of the task this result belongs to.
    pub task_id: String,
    /// Terminal status.
    pub status: TaskStatus,
    /// Exit code, if the process ran to completion.
    pub exit_code: Option<i32>,
    /// Captured standard output, up to the configured cap.
    #[serde(default)]
    pub stdout: String,
    /// Captured standard error, up to the configured cap.
    #[serde(default)]
    pub stderr: String,
    /// Whether either output stream exceeded the cap and was cut.
    #[serde(default)]
    pub truncated: bool,
    /// Start timestamp (Unix epoch seconds).
    pub started_at: Option<i64>,
    /// End timestamp (Unix epoch seconds).
    pub ended_at: Option<i64>,
}

impl TaskResult {
    /// Manifest entry for a task that was never executed.
    #[must_use]
    pub fn not_executed(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Cancelled,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            truncated: false,
            started_at: None,
            ended_at: None,
        }
    }

    /// Manifest entry for a task whose batch hit the overall ceiling.
    #[must_use]
    pub fn timed_out(task_id: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::TimedOut,
            ..Self::not_executed(task_id)
        }
    }

    /// Manifest entry for a task rejected before dispatch.
    #[must_use]
    pub fn rejected(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            stderr: reason.into(),
            ..Self::not_executed(task_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::TimedOut.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
    }

    #[test]
    fn test_not_executed_manifest_entry() {
        let result = TaskResult::not_executed("t1");
        assert_eq!(result.status, TaskStatus::Cancelled);
        assert_eq!(result.exit_code, None);
        assert!(result.stdout.is_empty());
    }
}
