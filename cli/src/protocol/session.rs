//! One live conversation with a remote agent.
//!
//! A session is created by reading the agent's `hello` frame, then serves
//! `call` requests one at a time under a single-flight mutex. Progress
//! events arriving while a call is in flight are forwarded to the caller's
//! event sink in arrival order; the first `result` frame completes the call.
//!
//! Any protocol deviation or cancellation leaves the channel in an unknown
//! state, so the session is poisoned: it refuses further calls and the pool
//! discards it on next access.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{ProtocolError, SessionError};
use crate::protocol::codec::FrameCodec;
use crate::protocol::messages::{wire_type, Message};
use crate::types::{Diff, ModuleResult};

/// How long `close` waits for the agent to exit after `shutdown` before
/// killing the transport process.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An open byte channel to a freshly launched agent process.
///
/// `child` is present when the channel is backed by a real transport
/// process; test channels built from in-memory pipes leave it `None`.
pub struct AgentChannel {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub child: Option<Child>,
}

/// Identity reported by the agent in its `hello` frame.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub version: String,
    pub pid: u32,
}

/// Progress event forwarded out of a `call`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentEvent {
    pub event: String,
    pub message: String,
}

struct SessionIo {
    codec: FrameCodec<BoxedReader, BoxedWriter>,
    child: Option<Child>,
}

/// A single agent conversation. Cheap to share behind an `Arc`; the
/// single-flight mutex serializes requests.
pub struct AgentSession {
    io: Mutex<SessionIo>,
    meta: SessionMeta,
    poisoned: AtomicBool,
    closed: AtomicBool,
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("meta", &self.meta)
            .field("poisoned", &self.poisoned.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl AgentSession {
    /// Perform the handshake on a fresh channel.
    ///
    /// The first frame must be `hello`; anything else protocol-shaped is a
    /// handshake failure, and lower-level failures surface as transport
    /// errors.
    pub async fn open(
        channel: AgentChannel,
        cancel: &CancellationToken,
    ) -> Result<Self, SessionError> {
        let mut codec = FrameCodec::new(channel.reader, channel.writer);

        let first = codec.receive(cancel).await.map_err(|e| match e {
            SessionError::Protocol(p) => SessionError::Handshake(p.to_string()),
            SessionError::StreamClosed => {
                SessionError::Handshake("stream closed before hello".into())
            }
            other => other,
        })?;

        let meta = match serde_json::from_value::<Message>(first.clone()) {
            Ok(Message::Hello { version, pid }) => SessionMeta { version, pid },
            _ => {
                return Err(SessionError::Handshake(format!(
                    "expected hello, got '{}'",
                    wire_type(&first)
                )));
            }
        };
        debug!(version = %meta.version, pid = meta.pid, "agent handshake complete");

        Ok(Self {
            io: Mutex::new(SessionIo {
                codec,
                child: channel.child,
            }),
            meta,
            poisoned: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    /// `true` once the session's protocol state is unknown. A poisoned
    /// session refuses further calls and must be evicted, never reused.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send one request and wait for its result, forwarding interleaved
    /// `event` frames to `events` in arrival order.
    ///
    /// On cancellation the session is poisoned, a best-effort `shutdown`
    /// frame is written, and `Cancelled` is returned.
    pub async fn call(
        &self,
        request: Message,
        events: &mpsc::UnboundedSender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> Result<ModuleResult, SessionError> {
        let mut io = self.io.lock().await;
        if self.is_closed() || self.is_poisoned() {
            return Err(SessionError::Closed);
        }

        if let Err(e) = io.codec.send(&request, cancel).await {
            return Err(self.fail(&mut io, e).await);
        }

        loop {
            let frame = match io.codec.receive(cancel).await {
                Ok(frame) => frame,
                Err(e) => return Err(self.fail(&mut io, e).await),
            };

            match serde_json::from_value::<Message>(frame.clone()) {
                Ok(Message::Event { event, message }) => {
                    // A dropped receiver only means nobody is listening.
                    let _ = events.send(AgentEvent { event, message });
                }
                Ok(Message::Result {
                    changed,
                    failed,
                    msg,
                    data,
                    warnings,
                    diff,
                }) => {
                    return Ok(convert_result(changed, failed, msg, data, warnings, diff));
                }
                _ => {
                    let ty = wire_type(&frame);
                    self.poisoned.store(true, Ordering::SeqCst);
                    return Err(ProtocolError::Unexpected(ty).into());
                }
            }
        }
    }

    /// Probe the agent's capabilities with an `info` request.
    pub async fn probe(&self, cancel: &CancellationToken) -> Result<Vec<String>, SessionError> {
        let mut io = self.io.lock().await;
        if self.is_closed() || self.is_poisoned() {
            return Err(SessionError::Closed);
        }

        if let Err(e) = io.codec.send(&Message::Info, cancel).await {
            return Err(self.fail(&mut io, e).await);
        }
        let frame = match io.codec.receive(cancel).await {
            Ok(frame) => frame,
            Err(e) => return Err(self.fail(&mut io, e).await),
        };
        match serde_json::from_value::<Message>(frame.clone()) {
            Ok(Message::InfoResponse { features }) => Ok(features),
            _ => {
                self.poisoned.store(true, Ordering::SeqCst);
                Err(ProtocolError::Unexpected(wire_type(&frame)).into())
            }
        }
    }

    /// Shut the session down. Idempotent; shutdown-frame errors are
    /// swallowed, transport teardown errors are reported.
    pub async fn close(&self) -> Result<(), SessionError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut io = self.io.lock().await;

        // Best effort: a poisoned channel may reject the frame.
        let _ = io.codec.send(&Message::Shutdown, &CancellationToken::new()).await;

        if let Some(mut child) = io.child.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await.is_err() {
                warn!("agent did not exit after shutdown, killing transport");
                child
                    .kill()
                    .await
                    .map_err(|e| SessionError::Transport(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Record a mid-call failure: poison the session and, on cancellation,
    /// try to tell the agent to go away before the channel is abandoned.
    async fn fail(&self, io: &mut SessionIo, err: SessionError) -> SessionError {
        if err.poisons_session() {
            self.poisoned.store(true, Ordering::SeqCst);
        }
        if matches!(err, SessionError::Cancelled) {
            let _ = io.codec.send(&Message::Shutdown, &CancellationToken::new()).await;
        }
        err
    }
}

fn convert_result(
    changed: bool,
    failed: bool,
    msg: Option<String>,
    data: Option<Value>,
    warnings: Vec<String>,
    diff: Option<Diff>,
) -> ModuleResult {
    let mut result = if failed {
        ModuleResult::failure(msg.unwrap_or_default())
    } else if changed {
        ModuleResult::changed().with_msg(msg.unwrap_or_default())
    } else {
        ModuleResult::ok().with_msg(msg.unwrap_or_default())
    };
    result.data = data.unwrap_or(Value::Null);
    result.warnings = warnings;
    result.diff = diff;
    result
}
