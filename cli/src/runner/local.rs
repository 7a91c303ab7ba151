//! Runners for the local host: native handlers in-process, external module
//! files as subprocesses.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ModuleRunner;
use crate::inventory::Host;
use crate::modules::ModuleContext;
use crate::resolver::{ModuleKind, ModuleResolver};
use crate::transport::DEFAULT_INTERPRETER;
use crate::types::{ModuleInvocation, ModuleResult};

/// Executes native and shadowed modules inside the controller process.
/// Never touches the network.
pub struct LocalNativeRunner {
    resolver: Arc<ModuleResolver>,
}

impl LocalNativeRunner {
    #[must_use]
    pub fn new(resolver: Arc<ModuleResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl ModuleRunner for LocalNativeRunner {
    async fn run(
        &self,
        cancel: &CancellationToken,
        host: &Host,
        invocation: &ModuleInvocation,
    ) -> Result<ModuleResult> {
        let handle = match self.resolver.resolve(&invocation.name)? {
            ModuleKind::Native { handle } => handle,
            ModuleKind::NativeShadowing {
                external_name,
                handle,
            } => {
                debug!(module = %external_name, native = handle.name(), "shadowing external module");
                handle
            }
            other => anyhow::bail!(
                "module '{}' is not native ({other:?})",
                invocation.name
            ),
        };

        let ctx = ModuleContext {
            host,
            args: &invocation.args,
            check_mode: invocation.dry_run,
            cancel,
        };
        handle
            .run(ctx)
            .await
            .with_context(|| format!("native module '{}'", invocation.name))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Executes external module files on the local host as subprocesses:
/// the request envelope goes in on stdin, the result comes back on stdout.
pub struct LocalExternalRunner {
    resolver: Arc<ModuleResolver>,
    interpreter: String,
}

impl LocalExternalRunner {
    #[must_use]
    pub fn new(resolver: Arc<ModuleResolver>) -> Self {
        Self {
            resolver,
            interpreter: DEFAULT_INTERPRETER.to_string(),
        }
    }

    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }
}

#[async_trait]
impl ModuleRunner for LocalExternalRunner {
    async fn run(
        &self,
        cancel: &CancellationToken,
        _host: &Host,
        invocation: &ModuleInvocation,
    ) -> Result<ModuleResult> {
        let path = match self.resolver.resolve(&invocation.name)? {
            ModuleKind::External { path } => path,
            other => anyhow::bail!(
                "module '{}' is not an external module ({other:?})",
                invocation.name
            ),
        };

        let mut cmd = tokio::process::Command::new(&self.interpreter);
        cmd.arg(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning {} {}", self.interpreter, path.display()))?;

        // The module reads one JSON envelope on stdin, mirroring the wire
        // request shape. Written from a task so a module that floods stdout
        // before reading stdin cannot deadlock us.
        let envelope = json!({
            "args": invocation.args,
            "check_mode": invocation.dry_run,
        });
        let input = serde_json::to_vec(&envelope).context("encoding module args")?;
        let stdin_handle = child.stdin.take();
        let stdin_task = tokio::spawn(async move {
            if let Some(mut stdin) = stdin_handle {
                use tokio::io::AsyncWriteExt;
                let _ = stdin.write_all(&input).await;
            }
        });

        let mut stdout_handle = child.stdout.take();
        let mut stderr_handle = child.stderr.take();

        // Read stdout/stderr concurrently with wait() to avoid pipe
        // deadlock on large module output.
        let (status, stdout, stderr) = tokio::select! {
            triple = async {
                let (status, stdout, stderr) = tokio::join!(
                    child.wait(),
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stdout_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stderr_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                );
                let _ = stdin_task.await;
                Ok::<_, anyhow::Error>((
                    status.with_context(|| format!("waiting for module '{}'", invocation.name))?,
                    stdout,
                    stderr,
                ))
            } => triple?,
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                anyhow::bail!("cancelled")
            }
        };

        let stderr_text = String::from_utf8_lossy(&stderr).into_owned();
        let mut result = match serde_json::from_slice::<ModuleResult>(&stdout) {
            Ok(result) => result,
            Err(_) => {
                let detail = if stderr_text.trim().is_empty() {
                    String::from_utf8_lossy(&stdout).trim().to_string()
                } else {
                    stderr_text.trim().to_string()
                };
                ModuleResult::failure(format!(
                    "module '{}' exited with {} and produced no parseable result: {detail}",
                    invocation.name, status
                ))
            }
        };
        result.stderr = stderr_text;
        Ok(result)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
