//! Shell command execution with process-group teardown and output caps.

use std::process::Stdio;
use std::time::Duration;

use command_group::AsyncCommandGroup;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

const READ_CHUNK: usize = 8192;

/// Outcome of one shell command.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,
    /// Captured stdout, cut at the cap.
    pub stdout: String,
    /// Captured stderr, cut at the cap.
    pub stderr: String,
    /// Whether either stream exceeded the cap.
    pub truncated: bool,
    /// Whether the command hit the execution ceiling and was killed.
    pub timed_out: bool,
}

/// Returns the shell command and argument for the current platform.
#[must_use]
pub fn get_shell_command() -> (&'static str, &'static str) {
    if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") }
}

/// Run one command under the platform shell.
///
/// The command runs in its own process group so a timeout kills the whole
/// tree, not just the shell. Output past `cap` bytes per stream is drained
/// and discarded, with the truncation flagged rather than silent.
///
/// # Errors
/// Returns error if the process cannot be spawned.
pub async fn run_shell(
    command: &str,
    timeout: Duration,
    cap: usize,
) -> std::io::Result<CommandOutcome> {
    let (shell, shell_arg) = get_shell_command();
    let mut cmd = Command::new(shell);
    cmd.arg(shell_arg)
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.group_spawn()?;

    let stdout = child.inner().stdout.take();
    let stderr = child.inner().stderr.take();
    let stdout_task = tokio::spawn(drain_capped(stdout, cap));
    let stderr_task = tokio::spawn(drain_capped(stderr, cap));

    let waited = tokio::time::timeout(timeout, child.wait()).await;
    let (exit_code, timed_out) = match waited {
        Ok(status) => (status?.code(), false),
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::warn!("failed to kill timed-out process group: {e}");
            }
            // Reap so the readers see EOF.
            let _ = child.wait().await;
            (None, true)
        }
    };

    let (stdout, stdout_cut) = stdout_task.await.unwrap_or_default();
    let (stderr, stderr_cut) = stderr_task.await.unwrap_or_default();

    Ok(CommandOutcome {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        truncated: stdout_cut || stderr_cut,
        timed_out,
    })
}

/// Read a stream to EOF, keeping at most `cap` bytes.
///
/// Keeps draining past the cap so the child never blocks on a full pipe.
async fn drain_capped<R>(reader: Option<R>, cap: usize) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return (Vec::new(), false);
    };

    let mut out = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut truncated = false;

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if out.len() < cap {
                    let take = n.min(cap - out.len());
                    out.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }

    (out, truncated)
}
