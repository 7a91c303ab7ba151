//! Remote execution through a pooled agent session.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ModuleRunner;
use crate::errors::SessionError;
use crate::inventory::Host;
use crate::pool::ConnectionPool;
use crate::protocol::{AgentEvent, Message};
use crate::resolver::ModuleResolver;
use crate::transport::Transport;
use crate::types::{HostEvent, ModuleInvocation, ModuleResult};

/// Runs modules on remote hosts by framing requests over a pooled session.
///
/// The core never retries: transport and handshake failures evict the
/// session and surface to the caller, who decides what to do next.
pub struct RemoteRunner<T: Transport> {
    pool: Arc<ConnectionPool<T>>,
    resolver: Arc<ModuleResolver>,
    events: mpsc::UnboundedSender<HostEvent>,
}

impl<T: Transport> RemoteRunner<T> {
    pub fn new(
        pool: Arc<ConnectionPool<T>>,
        resolver: Arc<ModuleResolver>,
        events: mpsc::UnboundedSender<HostEvent>,
    ) -> Self {
        Self {
            pool,
            resolver,
            events,
        }
    }

    /// Pick the wire request for this invocation: native-dispatched names
    /// travel as `ftl_module`, external code as `module`.
    fn wire_request(&self, invocation: &ModuleInvocation) -> Message {
        match self.resolver.resolve(&invocation.name) {
            Ok(kind) if kind.is_native() => {
                let name = match &kind {
                    crate::resolver::ModuleKind::Native { handle }
                    | crate::resolver::ModuleKind::NativeShadowing { handle, .. } => {
                        handle.name().to_string()
                    }
                    _ => invocation.name.clone(),
                };
                Message::FtlModule {
                    name,
                    args: invocation.args.clone(),
                    check_mode: invocation.dry_run,
                }
            }
            _ => Message::Module {
                name: invocation.name.clone(),
                args: invocation.args.clone(),
                check_mode: invocation.dry_run,
            },
        }
    }
}

#[async_trait]
impl<T: Transport> ModuleRunner for RemoteRunner<T> {
    async fn run(
        &self,
        cancel: &CancellationToken,
        host: &Host,
        invocation: &ModuleInvocation,
    ) -> Result<ModuleResult> {
        let session = self
            .pool
            .acquire(cancel, host)
            .await
            .with_context(|| format!("acquiring session for '{}'", host.name))?;

        // Bridge session events to the run-wide sink, tagged with the host.
        let (tx, mut rx) = mpsc::unbounded_channel::<AgentEvent>();
        let sink = self.events.clone();
        let host_name = host.name.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let _ = sink.send(HostEvent {
                    host: host_name.clone(),
                    event: event.event,
                    message: event.message,
                });
            }
        });

        let request = self.wire_request(invocation);
        debug!(host = %host.name, request = request.type_name(), module = %invocation.name, "dispatching");
        let outcome = session.call(request, &tx, cancel).await;
        drop(tx);
        let _ = forwarder.await;

        match outcome {
            Ok(result) => Ok(result),
            Err(err) => {
                if matches!(
                    err,
                    SessionError::Transport(_) | SessionError::Handshake(_)
                ) {
                    self.pool.evict(&host.name).await;
                }
                Err(anyhow::Error::from(err)
                    .context(format!("module '{}' on '{}'", invocation.name, host.name)))
            }
        }
    }

    /// Drains the pool: every pooled session gets an orderly shutdown.
    async fn close(&self) -> Result<()> {
        self.pool.drain().await.map_err(anyhow::Error::from)
    }
}
