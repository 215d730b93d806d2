//! Core abstractions for batched remote command execution.
//!
//! This crate provides the fundamental building blocks:
//! - `TaskSpec` / `TaskResult` - Units of remote work and their manifests
//! - `BatchPayload` - Opaque, shell-escaping-proof batch encoding
//! - `StatusReport` - Remote-side progress snapshot artifact
//! - `EventStore` - Broadcast + history for progress subscribers
//! - `Transport` / `RemoteChannel` traits - The remote command channel seam

pub mod channel;
pub mod config;
pub mod events;
pub mod payload;
pub mod status;
pub mod task;

pub use channel::{Credentials, HostSpec, RemoteChannel, ShellDialect, Transport, TransportError};
pub use config::BatchConfig;
pub use events::{BatchEvent, EventStore};
pub use payload::{BatchPayload, EncodeError, EncodedPayload, ExecLimits, TaskRecord};
pub use status::{BatchState, StatusReport, results_artifact_name, status_artifact_name};
pub use task::{TaskResult, TaskSpec, TaskStatus};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as Unix epoch seconds.
#[must_use]
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
