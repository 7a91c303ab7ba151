//! Shared mock infrastructure for unit tests.
//!
//! Provides an in-memory [`Transport`] whose "remote agents" are spawned
//! tasks speaking the real frame protocol over duplex pipes, plus native
//! module doubles for driving the scheduler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use ftl_cli::inventory::Host;
use ftl_cli::modules::{ModuleContext, NativeModule};
use ftl_cli::protocol::AgentChannel;
use ftl_cli::transport::Transport;
use ftl_cli::types::ModuleResult;

// ── Transport double ─────────────────────────────────────────────────────

/// How a mock agent behaves once launched.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Send `hello`, then answer every request with `events` event frames
    /// followed by a successful result echoing the request args.
    Respond { events: usize },
    /// Send `hello`, then answer the first request with a second `hello`,
    /// violating the message grammar.
    Violate,
    /// Open the stream with an `event` frame instead of `hello`.
    BadHello,
}

/// In-memory transport; records every open and upload.
pub struct MockTransport {
    behavior: Behavior,
    pub opens: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<(String, String)>>,
}

impl MockTransport {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            opens: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().expect("lock").len()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().expect("lock").len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_channel(&self, host: &Host, _remote_path: &str) -> Result<AgentChannel> {
        self.opens.lock().expect("lock").push(host.name.clone());
        let (controller_side, agent_side) = tokio::io::duplex(1024 * 1024);
        tokio::spawn(run_agent(agent_side, self.behavior));
        let (reader, writer) = tokio::io::split(controller_side);
        Ok(AgentChannel {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        })
    }

    async fn upload(&self, host: &Host, _local: &std::path::Path, remote: &str) -> Result<()> {
        self.uploads
            .lock()
            .expect("lock")
            .push((host.name.clone(), remote.to_string()));
        Ok(())
    }
}

async fn write_frame(stream: &mut DuplexStream, body: &Value) {
    let bytes = serde_json::to_vec(body).expect("encode");
    let prefix = format!("{:08x}", bytes.len());
    if stream.write_all(prefix.as_bytes()).await.is_err() {
        return;
    }
    let _ = stream.write_all(&bytes).await;
}

async fn read_frame(stream: &mut DuplexStream) -> Option<Value> {
    let mut prefix = [0u8; 8];
    stream.read_exact(&mut prefix).await.ok()?;
    let text = std::str::from_utf8(&prefix).ok()?;
    let len = u32::from_str_radix(text, 16).ok()? as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.ok()?;
    serde_json::from_slice(&body).ok()
}

fn hello() -> Value {
    json!({"type": "hello", "version": "0.0-test", "pid": 1})
}

async fn run_agent(mut stream: DuplexStream, behavior: Behavior) {
    match behavior {
        Behavior::BadHello => {
            write_frame(
                &mut stream,
                &json!({"type": "event", "event": "oops", "message": "no hello"}),
            )
            .await;
        }
        Behavior::Violate => {
            write_frame(&mut stream, &hello()).await;
            if read_frame(&mut stream).await.is_some() {
                write_frame(&mut stream, &hello()).await;
            }
        }
        Behavior::Respond { events } => {
            write_frame(&mut stream, &hello()).await;
            while let Some(request) = read_frame(&mut stream).await {
                match request["type"].as_str() {
                    Some("shutdown") | None => return,
                    Some("info") => {
                        write_frame(
                            &mut stream,
                            &json!({"type": "info_response", "features": ["events"]}),
                        )
                        .await;
                    }
                    Some("module" | "ftl_module") => {
                        for i in 0..events {
                            write_frame(
                                &mut stream,
                                &json!({
                                    "type": "event",
                                    "event": "progress",
                                    "message": format!("step {i}"),
                                }),
                            )
                            .await;
                        }
                        write_frame(
                            &mut stream,
                            &json!({
                                "type": "result",
                                "changed": false,
                                "failed": false,
                                "msg": "done",
                                "data": {"echo": request["args"]},
                            }),
                        )
                        .await;
                    }
                    Some(_) => {
                        write_frame(
                            &mut stream,
                            &json!({
                                "type": "result",
                                "changed": false,
                                "failed": true,
                                "msg": "unknown request",
                            }),
                        )
                        .await;
                    }
                }
            }
        }
    }
}

// ── Native module doubles ────────────────────────────────────────────────

/// Fails on one specific host, succeeds everywhere else.
pub struct FailOn(pub &'static str);

#[async_trait]
impl NativeModule for FailOn {
    fn name(&self) -> &'static str {
        "failon"
    }

    fn description(&self) -> &'static str {
        "fail on a chosen host"
    }

    async fn run(&self, ctx: ModuleContext<'_>) -> Result<ModuleResult> {
        if ctx.host.name == self.0 {
            Ok(ModuleResult::failure(format!("induced failure on {}", self.0)))
        } else {
            Ok(ModuleResult::ok())
        }
    }
}

/// Sleeps unless cancelled first.
pub struct Sleeper(pub u64);

#[async_trait]
impl NativeModule for Sleeper {
    fn name(&self) -> &'static str {
        "sleeper"
    }

    fn description(&self) -> &'static str {
        "sleep for a while"
    }

    async fn run(&self, ctx: ModuleContext<'_>) -> Result<ModuleResult> {
        tokio::select! {
            () = tokio::time::sleep(std::time::Duration::from_millis(self.0)) => {
                Ok(ModuleResult::ok())
            }
            () = ctx.cancel.cancelled() => anyhow::bail!("cancelled"),
        }
    }
}

/// Tracks how many instances run at once, for concurrency-bound checks.
pub struct Gauge {
    pub active: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

impl Gauge {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let peak = Arc::new(AtomicUsize::new(0));
        (
            Self {
                active: Arc::new(AtomicUsize::new(0)),
                peak: Arc::clone(&peak),
            },
            peak,
        )
    }
}

#[async_trait]
impl NativeModule for Gauge {
    fn name(&self) -> &'static str {
        "gauge"
    }

    fn description(&self) -> &'static str {
        "record peak concurrency"
    }

    async fn run(&self, _ctx: ModuleContext<'_>) -> Result<ModuleResult> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(ModuleResult::ok())
    }
}

/// Panics, exercising the scheduler's panic boundary.
pub struct Panicker;

#[async_trait]
impl NativeModule for Panicker {
    fn name(&self) -> &'static str {
        "panicker"
    }

    fn description(&self) -> &'static str {
        "panic immediately"
    }

    async fn run(&self, _ctx: ModuleContext<'_>) -> Result<ModuleResult> {
        panic!("module blew up");
    }
}

/// A local host named `name` (address in the loopback set).
pub fn local_host(name: &str) -> Host {
    Host::with_address(name, "127.0.0.1")
}

/// A remote host named `name`.
pub fn remote_host(name: &str) -> Host {
    Host::with_address(name, "10.0.0.99")
}
