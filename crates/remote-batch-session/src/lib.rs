//! Session orchestration for batched remote execution.
//!
//! Provides:
//! - `SessionManager` - Host-keyed registry of persistent sessions
//! - `RetryPolicy` - Bounded retry with exponential backoff
//! - `StatusPoller` - Remote status artifact polling
//! - `BatchCoordinator` - The orchestrator-facing `run` entry point

pub mod coordinator;
pub mod manager;
pub mod poller;
pub mod retry;

pub use coordinator::BatchCoordinator;
pub use manager::{ManagerError, SessionId, SessionInfo, SessionLease, SessionManager, SessionState};
pub use poller::{PollVerdict, StatusPoller};
pub use retry::{RetryPolicy, Retryable};
