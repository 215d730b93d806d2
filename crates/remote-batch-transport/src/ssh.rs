//! OpenSSH-multiplexed remote channel.
//!
//! Shells out to the OpenSSH client with `ControlMaster`/`ControlPersist`
//! so one TCP connection per host is established on the first probe and
//! reused by every subsequent operation as a cheap mux client. The remote
//! host needs the runner program on its PATH (or at a configured path);
//! everything else travels inside the encoded payload.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use remote_batch_core::{
    Credentials, EncodedPayload, HostSpec, RemoteChannel, ShellDialect, Transport, TransportError,
};
use tokio::process::Command;
use uuid::Uuid;

/// OpenSSH client options.
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Client executable, resolved on PATH at connect time.
    pub ssh_program: String,
    /// Runner program on the remote host.
    pub remote_runner: String,
    /// Remote directory for batch artifacts.
    pub remote_work_dir: String,
    /// Local directory for multiplexing control sockets.
    pub control_dir: PathBuf,
    /// `ControlPersist` lifetime in seconds.
    pub control_persist_secs: u64,
    /// `ConnectTimeout` passed to the client.
    pub connect_timeout_secs: u64,
    /// Ceiling for any single client invocation.
    pub io_timeout_secs: u64,
    /// Remote shell dialect for wrapper and artifact reads.
    pub dialect: ShellDialect,
    /// Extra client arguments, appended verbatim.
    pub extra_args: Vec<String>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".into(),
            remote_runner: "remote-batch-runner".into(),
            remote_work_dir: "/tmp/remote-batch".into(),
            control_dir: std::env::temp_dir(),
            control_persist_secs: 60,
            connect_timeout_secs: 30,
            io_timeout_secs: 60,
            dialect: ShellDialect::Posix,
            extra_args: Vec::new(),
        }
    }
}

impl SshOptions {
    /// Parse extra client arguments from a single string.
    ///
    /// # Errors
    /// Returns error if the string cannot be split into arguments.
    pub fn with_extra_args(mut self, args: &str) -> Result<Self, TransportError> {
        self.extra_args = shlex::split(args).ok_or_else(|| {
            TransportError::Unavailable(format!("unparseable ssh arguments: {args}"))
        })?;
        Ok(self)
    }
}

/// Transport yielding OpenSSH channels.
#[derive(Debug, Default)]
pub struct OpenSshTransport {
    options: SshOptions,
}

impl OpenSshTransport {
    /// Create a transport with the given client options.
    #[must_use]
    pub const fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Transport for OpenSshTransport {
    async fn connect(
        &self,
        host: &HostSpec,
        credentials: &Credentials,
    ) -> Result<Arc<dyn RemoteChannel>, TransportError> {
        let ssh_path = which::which(&self.options.ssh_program)
            .map_err(|e| TransportError::Unavailable(format!("ssh client not found: {e}")))?;

        let channel = OpenSshChannel {
            ssh_path,
            host: host.clone(),
            credentials: credentials.clone(),
            options: self.options.clone(),
        };

        // The first probe verifies reachability and authentication and
        // leaves the control master behind for every later operation.
        channel.probe().await?;
        tracing::info!(host = %host, "ssh control master established");
        Ok(Arc::new(channel))
    }
}

/// One multiplexed OpenSSH connection to a host.
pub struct OpenSshChannel {
    ssh_path: PathBuf,
    host: HostSpec,
    credentials: Credentials,
    options: SshOptions,
}

impl OpenSshChannel {
    fn destination(&self) -> String {
        let user = self
            .credentials
            .username
            .as_ref()
            .or(self.host.user.as_ref());
        match user {
            Some(user) => format!("{user}@{}", self.host.host),
            None => self.host.host.clone(),
        }
    }

    fn control_path(&self) -> String {
        // %r/%h/%p expand client-side, keeping one socket per destination.
        self.options
            .control_dir
            .join("rb-%r@%h-%p")
            .display()
            .to_string()
    }

    fn client_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            "ControlMaster=auto".into(),
            "-o".into(),
            format!("ControlPath={}", self.control_path()),
            "-o".into(),
            format!("ControlPersist={}s", self.options.control_persist_secs),
            "-o".into(),
            format!("ConnectTimeout={}", self.options.connect_timeout_secs),
            "-o".into(),
            "ServerAliveInterval=30".into(),
            "-o".into(),
            "ServerAliveCountMax=3".into(),
        ];
        if let Some(port) = self.host.port {
            args.push("-p".into());
            args.push(port.to_string());
        }
        if let Some(ref identity) = self.credentials.identity_file {
            args.push("-i".into());
            args.push(identity.display().to_string());
        }
        args.extend(self.options.extra_args.iter().cloned());
        args.push(self.destination());
        args
    }

    fn artifact_path(&self, name: &str) -> String {
        format!(
            "{}/{name}",
            self.options.remote_work_dir.trim_end_matches('/')
        )
    }

    /// The remote line that launches the runner detached, so the client
    /// invocation returns as soon as the batch is accepted.
    fn launch_line(&self, wrapper: &str) -> String {
        let dir = self.options.remote_work_dir.trim_end_matches('/');
        match self.options.dialect {
            ShellDialect::Posix => {
                format!("mkdir -p {dir} && nohup sh -c '{wrapper}' >/dev/null 2>&1 &")
            }
            ShellDialect::PowerShell => format!(
                "New-Item -ItemType Directory -Force -Path {dir} | Out-Null; \
                 Start-Process -WindowStyle Hidden powershell -ArgumentList \
                 '-NoProfile','-NonInteractive','-Command','{wrapper}'"
            ),
        }
    }

    fn classify_failure(stderr: &str) -> TransportError {
        let line = stderr.trim();
        if line.contains("Permission denied")
            || line.contains("Authentication failed")
            || line.contains("Too many authentication failures")
        {
            TransportError::AuthRejected(line.to_string())
        } else {
            TransportError::Unavailable(line.to_string())
        }
    }

    async fn run_remote(&self, remote_command: &str) -> Result<std::process::Output, TransportError> {
        let mut cmd = Command::new(&self.ssh_path);
        cmd.args(self.client_args())
            .arg(remote_command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let ceiling = Duration::from_secs(self.options.io_timeout_secs);
        let output = tokio::time::timeout(ceiling, cmd.output())
            .await
            .map_err(|_| TransportError::Unavailable(format!("ssh to {} timed out", self.host)))??;
        Ok(output)
    }
}

#[async_trait]
impl RemoteChannel for OpenSshChannel {
    async fn probe(&self) -> Result<(), TransportError> {
        let nonce = Uuid::new_v4().simple().to_string();
        let output = self.run_remote(&format!("echo {nonce}")).await?;
        if !output.status.success() {
            return Err(Self::classify_failure(&String::from_utf8_lossy(
                &output.stderr,
            )));
        }
        if !String::from_utf8_lossy(&output.stdout).contains(&nonce) {
            return Err(TransportError::Unavailable("probe echo mismatch".into()));
        }
        Ok(())
    }

    fn dialect(&self) -> ShellDialect {
        self.options.dialect
    }

    async fn dispatch(
        &self,
        batch_id: Uuid,
        payload: &EncodedPayload,
    ) -> Result<(), TransportError> {
        let wrapper = payload.wrapper_command(
            self.options.dialect,
            &self.options.remote_runner,
            &self.options.remote_work_dir,
        );
        let line = self.launch_line(&wrapper);
        tracing::debug!(
            host = %self.host,
            batch_id = %batch_id,
            payload_bytes = payload.byte_len(),
            "dispatching batch"
        );

        let output = self.run_remote(&line).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Self::classify_failure(&String::from_utf8_lossy(
                &output.stderr,
            )))
        }
    }

    async fn read_artifact(&self, name: &str) -> Result<Vec<u8>, TransportError> {
        let path = self.artifact_path(name);
        let read_cmd = match self.options.dialect {
            ShellDialect::Posix => format!("cat {path}"),
            ShellDialect::PowerShell => format!("Get-Content -Raw {path}"),
        };

        let output = self.run_remote(&read_cmd).await?;
        if output.status.success() {
            return Ok(output.stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such file") || stderr.contains("Cannot find path") {
            Err(TransportError::ArtifactMissing(name.to_string()))
        } else {
            Err(Self::classify_failure(&stderr))
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Ask the control master to exit; a missing master just means the
        // connection is already gone.
        let mut cmd = Command::new(&self.ssh_path);
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.control_path()))
            .arg("-O")
            .arg("exit")
            .arg(self.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match cmd.output().await {
            Ok(output) if !output.status.success() => {
                tracing::debug!(
                    host = %self.host,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "control master exit reported failure"
                );
            }
            Err(e) => {
                tracing::debug!(host = %self.host, error = %e, "could not signal control master");
            }
            Ok(_) => {}
        }
        Ok(())
    }
}
