//! Transport port: how the controller reaches a remote host.
//!
//! The core consumes two primitives: spawn the agent process on a host and
//! hand back its stdio as a byte channel, and upload a local file. The
//! production implementation shells out to `ssh`/`scp` via
//! [`tokio::process::Command`]; tests substitute in-memory doubles.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::inventory::Host;
use crate::protocol::AgentChannel;

/// Default timeout for one file upload.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Command used to launch the agent archive on the remote host.
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Abstraction over the secure shell transport, enabling test doubles.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Launch the agent on `host` and return its stdio channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport process cannot be spawned.
    async fn open_channel(&self, host: &Host, remote_path: &str) -> Result<AgentChannel>;

    /// Upload `local` to `remote` on `host`.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy fails or times out.
    async fn upload(&self, host: &Host, local: &Path, remote: &str) -> Result<()>;
}

/// Production transport: `ssh` for the agent channel, `scp` for uploads.
pub struct SshTransport {
    interpreter: String,
    upload_timeout: Duration,
}

impl SshTransport {
    #[must_use]
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }

    fn destination(host: &Host) -> String {
        format!("{}@{}", host.user, host.address)
    }

    fn common_args(host: &Host, port_flag: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            port_flag.to_string(),
            host.port.to_string(),
        ];
        if let Some(key) = &host.key_file {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args
    }
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new(DEFAULT_INTERPRETER)
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn open_channel(&self, host: &Host, remote_path: &str) -> Result<AgentChannel> {
        let mut cmd = tokio::process::Command::new("ssh");
        cmd.args(Self::common_args(host, "-p"))
            .arg("--")
            .arg(Self::destination(host))
            .arg(&self.interpreter)
            .arg(remote_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning ssh to {}", host.name))?;

        let stdin = child.stdin.take().context("ssh stdin not piped")?;
        let stdout = child.stdout.take().context("ssh stdout not piped")?;

        // Agent stderr carries interpreter tracebacks; keep it out of the
        // protocol stream but visible in the logs.
        if let Some(stderr) = child.stderr.take() {
            let host_name = host.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(host = %host_name, "agent stderr: {line}");
                }
            });
        }

        Ok(AgentChannel {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }

    async fn upload(&self, host: &Host, local: &Path, remote: &str) -> Result<()> {
        let mut cmd = tokio::process::Command::new("scp");
        cmd.args(Self::common_args(host, "-P"))
            .arg("--")
            .arg(local)
            .arg(format!("{}:{}", Self::destination(host), remote))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .with_context(|| format!("spawning scp to {}", host.name))?;

        // Timeout with explicit kill: dropping the future alone would leave
        // the scp process running.
        let output = tokio::select! {
            res = child.wait_with_output() => {
                res.with_context(|| format!("waiting for scp to {}", host.name))?
            }
            () = tokio::time::sleep(self.upload_timeout) => {
                anyhow::bail!(
                    "upload to {} timed out after {}s",
                    host.name,
                    self.upload_timeout.as_secs()
                )
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("upload to {} failed: {}", host.name, stderr.trim());
        }
        Ok(())
    }
}
