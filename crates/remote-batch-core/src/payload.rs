//! Opaque batch payload encoding.
//!
//! Command bodies are treated as opaque bytes: the batch is serialized to
//! JSON and base64-encoded before it is embedded in the remote invocation
//! line. The remote side decodes then executes, so no character of any
//! command can be misinterpreted by an intermediate shell.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::channel::ShellDialect;

/// Payload format version understood by this crate.
pub const PAYLOAD_VERSION: u32 = 1;

/// Encoding error.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("encoded payload is {actual} bytes, exceeding the {limit} byte cap")]
    TooLarge { actual: usize, limit: usize },
    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u32),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// One `{task_id, command_text}` record inside a batch payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task identifier, unique within the batch.
    pub task_id: String,
    /// Raw command text, shipped as opaque data.
    pub command: String,
}

/// Execution limits shipped alongside the task list.
///
/// The remote executor enforces these; the controller only observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecLimits {
    /// Per-task execution ceiling in seconds.
    pub per_task_timeout_secs: u64,
    /// Per-stream output capture cap in bytes.
    pub output_cap_bytes: usize,
    /// Halt the queue on the first non-succeeding task.
    pub stop_on_first_failure: bool,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            per_task_timeout_secs: 300,
            output_cap_bytes: 1024 * 1024,
            stop_on_first_failure: false,
        }
    }
}

/// An ordered batch of tasks plus the limits to run them under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPayload {
    /// Payload format version.
    pub version: u32,
    /// Batch identifier; also keys the remote artifacts.
    pub batch_id: Uuid,
    /// Ordered task records. Submission order is execution order.
    pub tasks: Vec<TaskRecord>,
    /// Limits the remote executor must enforce.
    #[serde(default)]
    pub limits: ExecLimits,
}

impl BatchPayload {
    /// Create a payload for the current format version.
    #[must_use]
    pub fn new(batch_id: Uuid, tasks: Vec<TaskRecord>, limits: ExecLimits) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            batch_id,
            tasks,
            limits,
        }
    }

    /// Encode into a transport-safe blob.
    ///
    /// Pure transform; fails only when the encoded form exceeds
    /// `max_bytes`, which the coordinator must detect before dispatch.
    ///
    /// # Errors
    /// Returns `EncodeError::TooLarge` when the blob exceeds the cap.
    pub fn encode(&self, max_bytes: usize) -> Result<EncodedPayload, EncodeError> {
        let json = serde_json::to_vec(self)?;
        let blob = BASE64.encode(&json);
        if blob.len() > max_bytes {
            return Err(EncodeError::TooLarge {
                actual: blob.len(),
                limit: max_bytes,
            });
        }
        Ok(EncodedPayload { blob })
    }

    /// Decode a blob produced by `encode`.
    ///
    /// Leading and trailing whitespace is tolerated so the blob can be
    /// piped through line-oriented channels.
    ///
    /// # Errors
    /// Returns error on malformed base64/JSON or an unknown version.
    pub fn decode(blob: &str) -> Result<Self, EncodeError> {
        let bytes = BASE64.decode(blob.trim())?;
        let payload: Self = serde_json::from_slice(&bytes)?;
        if payload.version != PAYLOAD_VERSION {
            return Err(EncodeError::UnsupportedVersion(payload.version));
        }
        Ok(payload)
    }
}

/// A transport-safe encoded batch.
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    blob: String,
}

impl EncodedPayload {
    /// The base64 blob.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.blob
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.blob.len()
    }

    /// Build the fixed decode-then-execute invocation line.
    ///
    /// The line contains only the base64 blob, the runner program and the
    /// artifact directory; command bodies never appear in it.
    #[must_use]
    pub fn wrapper_command(&self, dialect: ShellDialect, runner: &str, artifact_dir: &str) -> String {
        match dialect {
            ShellDialect::Posix => format!(
                "printf %s {} | {runner} --artifact-dir {artifact_dir}",
                self.blob
            ),
            ShellDialect::PowerShell => format!(
                "Write-Output {} | {runner} --artifact-dir {artifact_dir}",
                self.blob
            ),
        }
    }
}
