//! Remote-side batch executor.
//!
//! Provides:
//! - `BatchExecutor` - Ordered, one-at-a-time task execution with status
//!   and result artifacts
//! - `ArtifactStore` trait with memory and directory backends
//! - `run_shell` - Process-group execution with timeout and output caps

pub mod artifacts;
pub mod executor;
pub mod run;

pub use artifacts::{ArtifactError, ArtifactStore, DirArtifacts, MemoryArtifacts};
pub use executor::{BatchExecutor, ExecError};
pub use run::{CommandOutcome, run_shell};
