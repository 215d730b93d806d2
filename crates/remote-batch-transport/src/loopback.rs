//! In-process loopback channel.
//!
//! Dispatch decodes the payload and runs the batch executor in a spawned
//! task against a shared in-memory artifact store, so the controller side
//! observes the same asynchronous launch-then-poll shape as over a real
//! transport. Used for local-mode execution and as the reference channel
//! in tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use remote_batch_core::{
    BatchPayload, Credentials, EncodedPayload, HostSpec, RemoteChannel, ShellDialect, Transport,
    TransportError,
};
use remote_batch_executor::{ArtifactError, BatchExecutor, MemoryArtifacts};
use uuid::Uuid;

/// Transport yielding loopback channels.
#[derive(Debug, Default)]
pub struct LoopbackTransport;

impl LoopbackTransport {
    /// Create a loopback transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(
        &self,
        host: &HostSpec,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn RemoteChannel>, TransportError> {
        tracing::debug!(host = %host, "opening loopback channel");
        Ok(Arc::new(LoopbackChannel::new()))
    }
}

/// One in-process channel with its own artifact store.
pub struct LoopbackChannel {
    artifacts: Arc<MemoryArtifacts>,
    closed: AtomicBool,
}

impl Default for LoopbackChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackChannel {
    /// Create a loopback channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            artifacts: Arc::new(MemoryArtifacts::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteChannel for LoopbackChannel {
    async fn probe(&self) -> Result<(), TransportError> {
        self.ensure_open()
    }

    fn dialect(&self) -> ShellDialect {
        ShellDialect::Posix
    }

    async fn dispatch(
        &self,
        batch_id: Uuid,
        payload: &EncodedPayload,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let decoded = BatchPayload::decode(payload.as_str())
            .map_err(|e| TransportError::Unavailable(format!("undecodable payload: {e}")))?;

        let store = Arc::clone(&self.artifacts);
        tokio::spawn(async move {
            let executor = BatchExecutor::new(store);
            if let Err(e) = executor.execute(&decoded).await {
                tracing::error!(batch_id = %batch_id, error = %e, "loopback batch execution failed");
            }
        });
        Ok(())
    }

    async fn read_artifact(&self, name: &str) -> Result<Vec<u8>, TransportError> {
        self.ensure_open()?;
        self.artifacts.read(name).await.map_err(|e| match e {
            ArtifactError::NotFound(name) => TransportError::ArtifactMissing(name),
            ArtifactError::Io(io) => TransportError::Io(io),
            ArtifactError::Internal(msg) => TransportError::Unavailable(msg),
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
