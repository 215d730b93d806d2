//! The abstract remote command channel capability.
//!
//! Any secure remote-shell transport satisfying this capability set is
//! acceptable; the design does not mandate a specific wire protocol.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::payload::EncodedPayload;

/// Identity of a target host; keys the session registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostSpec {
    /// Hostname or address.
    pub host: String,
    /// Port, if not the transport default.
    pub port: Option<u16>,
    /// Remote user, if not the transport default.
    pub user: Option<String>,
}

impl HostSpec {
    /// Create a host spec with transport defaults for port and user.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            user: None,
        }
    }

    /// Set the remote user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref user) = self.user {
            write!(f, "{user}@")?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

/// Credentials for establishing a transport connection.
///
/// Storage and resolution of credentials is the orchestrator's concern;
/// this is only the handle passed through to the transport.
#[derive(Clone, Default)]
pub struct Credentials {
    /// Username override.
    pub username: Option<String>,
    /// Path to a private key file.
    pub identity_file: Option<PathBuf>,
    /// Password, if the transport supports it.
    pub password: Option<String>,
}

impl Credentials {
    /// Credentials using only an identity file.
    #[must_use]
    pub fn identity(path: impl Into<PathBuf>) -> Self {
        Self {
            identity_file: Some(path.into()),
            ..Self::default()
        }
    }
}

// Manual impl so passwords never reach logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("identity_file", &self.identity_file)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Remote shell dialect for the decode-then-execute wrapper line.
///
/// Negotiated once when a session is set up and fixed for its lifetime,
/// never re-probed per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellDialect {
    /// POSIX `sh` on the remote side.
    Posix,
    /// Windows PowerShell on the remote side.
    PowerShell,
}

/// Transport error taxonomy.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established or was refused. Retryable.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    /// Authentication was rejected. Terminal, never retried.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    /// The channel was closed underneath an operation.
    #[error("channel closed")]
    Closed,
    /// A requested remote artifact does not exist (yet).
    #[error("remote artifact not found: {0}")]
    ArtifactMissing(String),
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the retry controller may retry after this error.
    ///
    /// Authentication failures are terminal; everything else is a
    /// transport-class condition.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::AuthRejected(_))
    }
}

/// One persistent remote command channel, bound to a single host.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Cheap liveness probe, used before a session is reused.
    async fn probe(&self) -> Result<(), TransportError>;

    /// Dialect negotiated at channel setup.
    fn dialect(&self) -> ShellDialect;

    /// Ship an encoded batch and start the remote executor.
    ///
    /// Returns once the remote side has accepted the payload; execution
    /// continues asynchronously and is observed via `read_artifact`.
    async fn dispatch(&self, batch_id: Uuid, payload: &EncodedPayload)
    -> Result<(), TransportError>;

    /// Read a remote artifact by name.
    async fn read_artifact(&self, name: &str) -> Result<Vec<u8>, TransportError>;

    /// Tear down the underlying connection.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Factory for remote channels.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a channel to a host. May block on network connect.
    async fn connect(
        &self,
        host: &HostSpec,
        credentials: &Credentials,
    ) -> Result<Arc<dyn RemoteChannel>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failures_are_terminal() {
        assert!(!TransportError::AuthRejected("denied".into()).is_retryable());
        assert!(TransportError::Unavailable("refused".into()).is_retryable());
        assert!(TransportError::Closed.is_retryable());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            password: Some("hunter2".into()),
            ..Credentials::default()
        };
        let debug = format!("{creds:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_host_spec_display() {
        let host = HostSpec::new("db01.example.com")
            .with_user("deploy")
            .with_port(2222);
        assert_eq!(host.to_string(), "deploy@db01.example.com:2222");
    }
}
