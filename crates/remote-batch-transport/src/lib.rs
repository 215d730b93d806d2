//! Concrete remote command channels.
//!
//! Provides:
//! - `LoopbackTransport` - In-process channel driving the executor
//!   directly (local mode, tests)
//! - `OpenSshTransport` - One multiplexed OpenSSH connection per host

pub mod loopback;
pub mod ssh;

pub use loopback::{LoopbackChannel, LoopbackTransport};
pub use ssh::{OpenSshChannel, OpenSshTransport, SshOptions};
