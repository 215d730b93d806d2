//! Session manager: one persistent transport connection per host.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use remote_batch_core::{
    BatchConfig, Credentials, HostSpec, RemoteChannel, Transport, TransportError, now,
};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Session identifier.
pub type SessionId = Uuid;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Transport connection is being established.
    Connecting,
    /// Session is available for the next batch.
    Ready,
    /// A batch is in flight on this session.
    Busy,
    /// Liveness probe failed; awaiting teardown.
    Degraded,
    /// Session has been torn down.
    Closed,
}

/// Session metadata as tracked by the registry.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub id: SessionId,
    /// Host the session is bound to.
    pub host: HostSpec,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
    /// Last activity timestamp.
    pub last_activity: i64,
}

struct SessionEntry {
    info: SessionInfo,
    channel: Arc<dyn RemoteChannel>,
}

/// A borrowed session handle, held only for the duration of one batch.
///
/// The registry keeps ownership; the lease carries the session id and a
/// shared channel handle, never a back-reference.
pub struct SessionLease {
    /// Identifier of the leased session.
    pub id: SessionId,
    /// Channel for the batch in flight.
    pub channel: Arc<dyn RemoteChannel>,
}

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("a batch is already in flight on the session for {0}")]
    SessionBusy(HostSpec),
}

enum CacheDecision {
    /// A Ready session was marked Busy; probe it before handing it out.
    Reuse(SessionLease),
    /// A stale or degraded entry was evicted; close it, then reconnect.
    Teardown(Arc<dyn RemoteChannel>),
    /// Nothing cached for this host.
    Fresh,
}

/// Owns the lifecycle of one persistent session per target host.
///
/// The host-keyed registry is the only cross-host shared structure; it
/// is created at orchestration-run start and torn down by
/// [`SessionManager::shutdown`] at run end.
pub struct SessionManager<T: Transport> {
    transport: T,
    connect_timeout: Duration,
    probe_timeout: Duration,
    idle_timeout: Duration,
    sessions: RwLock<HashMap<HostSpec, SessionEntry>>,
}

impl<T: Transport> SessionManager<T> {
    /// Create a new session manager.
    #[must_use]
    pub fn new(transport: T, config: &BatchConfig) -> Self {
        Self {
            transport,
            connect_timeout: config.connect_timeout,
            probe_timeout: config.probe_timeout,
            idle_timeout: config.idle_timeout,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Acquire a Ready session for a host, reusing a cached one when its
    /// liveness probe passes and connecting fresh otherwise.
    ///
    /// # Errors
    /// Returns `SessionBusy` if a batch is already in flight for the
    /// host, `Transport` if connection establishment fails. Connection
    /// errors are retryable except authentication rejection.
    pub async fn acquire(
        &self,
        host: &HostSpec,
        credentials: &Credentials,
    ) -> Result<SessionLease, ManagerError> {
        // Decide under the lock; probe and connect outside it so a slow
        // host does not serialize the rest of the fleet.
        let decision = {
            let mut sessions = self.sessions.write().await;
            match sessions.remove(host) {
                None => CacheDecision::Fresh,
                Some(entry) => match entry.info.state {
                    SessionState::Busy => {
                        sessions.insert(host.clone(), entry);
                        return Err(ManagerError::SessionBusy(host.clone()));
                    }
                    SessionState::Ready
                        if now().saturating_sub(entry.info.last_activity)
                            <= self.idle_timeout.as_secs() as i64 =>
                    {
                        let mut entry = entry;
                        entry.info.state = SessionState::Busy;
                        entry.info.last_activity = now();
                        let lease = SessionLease {
                            id: entry.info.id,
                            channel: Arc::clone(&entry.channel),
                        };
                        sessions.insert(host.clone(), entry);
                        CacheDecision::Reuse(lease)
                    }
                    state => {
                        tracing::debug!(host = %host, ?state, "discarding stale session");
                        CacheDecision::Teardown(entry.channel)
                    }
                },
            }
        };

        match decision {
            CacheDecision::Reuse(lease) => {
                let probed = tokio::time::timeout(self.probe_timeout, lease.channel.probe()).await;
                match probed {
                    Ok(Ok(())) => {
                        tracing::debug!(host = %host, session_id = %lease.id, "reusing session");
                        return Ok(lease);
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(host = %host, error = %e, "liveness probe failed, reconnecting");
                    }
                    Err(_) => {
                        tracing::warn!(host = %host, "liveness probe timed out, reconnecting");
                    }
                }
                self.demote(host, lease.id).await;
                self.evict(host, lease.id).await;
                let _ = lease.channel.close().await;
            }
            CacheDecision::Teardown(channel) => {
                let _ = channel.close().await;
            }
            CacheDecision::Fresh => {}
        }

        self.connect_fresh(host, credentials).await
    }

    /// Mark a leased session as available for reuse.
    pub async fn release(&self, host: &HostSpec) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(host) {
            entry.info.state = SessionState::Ready;
            entry.info.last_activity = now();
        }
    }

    /// Forcibly tear down the session for a host.
    ///
    /// Used on detected corruption, batch timeout, or session loss; the
    /// next acquire establishes a fresh connection.
    pub async fn invalidate(&self, host: &HostSpec) {
        let removed = self.sessions.write().await.remove(host);
        if let Some(mut entry) = removed {
            entry.info.state = SessionState::Closed;
            tracing::info!(host = %host, session_id = %entry.info.id, "invalidating session");
            if let Err(e) = entry.channel.close().await {
                tracing::debug!(host = %host, error = %e, "error closing invalidated session");
            }
        }
    }

    /// Current session metadata for a host, if any.
    pub async fn info(&self, host: &HostSpec) -> Option<SessionInfo> {
        self.sessions
            .read()
            .await
            .get(host)
            .map(|entry| entry.info.clone())
    }

    /// Tear down every session. Called at orchestration-run end.
    pub async fn shutdown(&self) {
        let entries: Vec<SessionEntry> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            tracing::debug!(host = %entry.info.host, session_id = %entry.info.id, "closing session");
            if let Err(e) = entry.channel.close().await {
                tracing::debug!(error = %e, "error closing session during shutdown");
            }
        }
    }

    async fn connect_fresh(
        &self,
        host: &HostSpec,
        credentials: &Credentials,
    ) -> Result<SessionLease, ManagerError> {
        let id = Uuid::new_v4();
        let mut info = SessionInfo {
            id,
            host: host.clone(),
            state: SessionState::Connecting,
            created_at: now(),
            last_activity: now(),
        };
        tracing::info!(host = %host, session_id = %id, "establishing transport connection");

        let channel = tokio::time::timeout(
            self.connect_timeout,
            self.transport.connect(host, credentials),
        )
        .await
        .map_err(|_| TransportError::Unavailable(format!("connect to {host} timed out")))??;

        info.state = SessionState::Busy;
        info.last_activity = now();
        let entry = SessionEntry {
            info,
            channel: Arc::clone(&channel),
        };

        // Replace whatever raced in; the registry holds one session per host.
        let previous = self.sessions.write().await.insert(host.clone(), entry);
        if let Some(old) = previous {
            let _ = old.channel.close().await;
        }

        tracing::info!(host = %host, session_id = %id, "session established");
        Ok(SessionLease { id, channel })
    }

    /// Mark a session Degraded after a failed probe, if still present.
    async fn demote(&self, host: &HostSpec, id: SessionId) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(host) {
            if entry.info.id == id {
                entry.info.state = SessionState::Degraded;
            }
        }
    }

    /// Remove an entry only if it still belongs to the given session.
    async fn evict(&self, host: &HostSpec, id: SessionId) {
        let mut sessions = self.sessions.write().await;
        if sessions.get(host).is_some_and(|entry| entry.info.id == id) {
            sessions.remove(host);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use remote_batch_core::{EncodedPayload, ShellDialect};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct StubChannel {
        probe_ok: AtomicBool,
        closed: AtomicBool,
    }

    impl StubChannel {
        fn new() -> Self {
            Self {
                probe_ok: AtomicBool::new(true),
                closed: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl RemoteChannel for StubChannel {
        async fn probe(&self) -> Result<(), TransportError> {
            if self.probe_ok.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(TransportError::Unavailable("probe failed".into()))
            }
        }

        fn dialect(&self) -> ShellDialect {
            ShellDialect::Posix
        }

        async fn dispatch(
            &self,
            _batch_id: Uuid,
            _payload: &EncodedPayload,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn read_artifact(&self, name: &str) -> Result<Vec<u8>, TransportError> {
            Err(TransportError::ArtifactMissing(name.to_string()))
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubTransport {
        connects: AtomicUsize,
        channels: std::sync::Mutex<Vec<Arc<StubChannel>>>,
        fail_auth: bool,
    }

    impl StubTransport {
        fn new() -> Self {
            Self {
                connects: AtomicUsize::new(0),
                channels: std::sync::Mutex::new(Vec::new()),
                fail_auth: false,
            }
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn connect(
            &self,
            _host: &HostSpec,
            _credentials: &Credentials,
        ) -> Result<Arc<dyn RemoteChannel>, TransportError> {
            if self.fail_auth {
                return Err(TransportError::AuthRejected("bad key".into()));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            let channel = Arc::new(StubChannel::new());
            self.channels.lock().unwrap().push(Arc::clone(&channel));
            Ok(channel)
        }
    }

    fn manager(transport: StubTransport) -> SessionManager<StubTransport> {
        SessionManager::new(transport, &BatchConfig::default())
    }

    #[tokio::test]
    async fn test_acquire_reuses_a_released_session() {
        let mgr = manager(StubTransport::new());
        let host = HostSpec::new("web01");
        let creds = Credentials::default();

        let first = mgr.acquire(&host, &creds).await.unwrap();
        let first_id = first.id;
        mgr.release(&host).await;

        let second = mgr.acquire(&host, &creds).await.unwrap();
        assert_eq!(second.id, first_id);
        assert_eq!(mgr.transport.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lease_lifecycle_is_visible_in_registry() {
        let mgr = manager(StubTransport::new());
        let host = HostSpec::new("web01");
        let creds = Credentials::default();

        let _lease = mgr.acquire(&host, &creds).await.unwrap();
        assert_eq!(mgr.info(&host).await.unwrap().state, SessionState::Busy);

        mgr.release(&host).await;
        assert_eq!(mgr.info(&host).await.unwrap().state, SessionState::Ready);
    }

    #[tokio::test]
    async fn test_busy_session_rejects_second_acquire() {
        let mgr = manager(StubTransport::new());
        let host = HostSpec::new("web01");
        let creds = Credentials::default();

        let _lease = mgr.acquire(&host, &creds).await.unwrap();
        let err = mgr.acquire(&host, &creds).await.unwrap_err();
        assert!(matches!(err, ManagerError::SessionBusy(_)));
    }

    #[tokio::test]
    async fn test_failed_probe_triggers_reconnect() {
        let mgr = manager(StubTransport::new());
        let host = HostSpec::new("web01");
        let creds = Credentials::default();

        let first = mgr.acquire(&host, &creds).await.unwrap();
        let first_id = first.id;
        mgr.release(&host).await;

        mgr.transport.channels.lock().unwrap()[0]
            .probe_ok
            .store(false, Ordering::SeqCst);

        let second = mgr.acquire(&host, &creds).await.unwrap();
        assert_ne!(second.id, first_id);
        assert_eq!(mgr.transport.connects.load(Ordering::SeqCst), 2);
        // the degraded channel was torn down
        assert!(
            mgr.transport.channels.lock().unwrap()[0]
                .closed
                .load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_idle_session_is_evicted_and_reconnected() {
        let mgr = manager(StubTransport::new());
        let host = HostSpec::new("web01");
        let creds = Credentials::default();

        let first = mgr.acquire(&host, &creds).await.unwrap();
        let first_id = first.id;
        mgr.release(&host).await;

        // age the cached session past the idle ceiling
        {
            let mut sessions = mgr.sessions.write().await;
            sessions.get_mut(&host).unwrap().info.last_activity = now() - 3600;
        }

        let second = mgr.acquire(&host, &creds).await.unwrap();
        assert_ne!(second.id, first_id);
        assert_eq!(mgr.transport.connects.load(Ordering::SeqCst), 2);
        assert!(
            mgr.transport.channels.lock().unwrap()[0]
                .closed
                .load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_auth_rejection_is_terminal() {
        let transport = StubTransport {
            fail_auth: true,
            ..StubTransport::new()
        };
        let mgr = manager(transport);
        let err = mgr
            .acquire(&HostSpec::new("web01"), &Credentials::default())
            .await
            .unwrap_err();
        match err {
            ManagerError::Transport(e) => assert!(!e.is_retryable()),
            ManagerError::SessionBusy(_) => panic!("unexpected busy"),
        }
    }

    #[tokio::test]
    async fn test_invalidate_closes_and_forgets() {
        let mgr = manager(StubTransport::new());
        let host = HostSpec::new("web01");
        let creds = Credentials::default();

        let _lease = mgr.acquire(&host, &creds).await.unwrap();
        mgr.invalidate(&host).await;

        assert!(mgr.info(&host).await.is_none());
        assert!(
            mgr.transport.channels.lock().unwrap()[0]
                .closed
                .load(Ordering::SeqCst)
        );

        // next acquire reconnects
        let _second = mgr.acquire(&host, &creds).await.unwrap();
        assert_eq!(mgr.transport.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_session() {
        let mgr = manager(StubTransport::new());
        let creds = Credentials::default();
        let _a = mgr.acquire(&HostSpec::new("web01"), &creds).await.unwrap();
        let _b = mgr.acquire(&HostSpec::new("web02"), &creds).await.unwrap();

        mgr.shutdown().await;

        assert!(mgr.info(&HostSpec::new("web01")).await.is_none());
        for channel in mgr.transport.channels.lock().unwrap().iter() {
            assert!(channel.closed.load(Ordering::SeqCst));
        }
    }
}
