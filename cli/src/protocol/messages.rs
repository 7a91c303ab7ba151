//! Wire message grammar for the agent channel.
//!
//! Every frame body is a JSON object whose `type` field selects the message
//! class. Unknown fields are ignored for forward compatibility; an unknown
//! `type` is a protocol violation handled by the session.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::Diff;

/// All messages that travel on the agent channel, in both directions.
///
/// Direction is by convention, not by construction: `hello`, `event`,
/// `result`, and `info_response` flow agent→controller; the rest flow
/// controller→agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// First frame on every session, exactly once.
    Hello { version: String, pid: u32 },

    /// Execute an external module shipped in the agent archive.
    Module {
        name: String,
        args: Map<String, Value>,
        check_mode: bool,
    },

    /// Execute a bundled native extension by its short name.
    FtlModule {
        name: String,
        args: Map<String, Value>,
        check_mode: bool,
    },

    /// Capability probe.
    Info,

    /// Capability probe response.
    InfoResponse {
        #[serde(default)]
        features: Vec<String>,
    },

    /// Asynchronous progress notification, zero or more per request,
    /// always before the request's result.
    Event { event: String, message: String },

    /// Terminal response to a module request, exactly one per request.
    Result {
        changed: bool,
        failed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        msg: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diff: Option<Diff>,
    },

    /// Terminate the session. No reply is expected.
    Shutdown,
}

impl Message {
    /// Wire name of the message's `type` field, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::Module { .. } => "module",
            Message::FtlModule { .. } => "ftl_module",
            Message::Info => "info",
            Message::InfoResponse { .. } => "info_response",
            Message::Event { .. } => "event",
            Message::Result { .. } => "result",
            Message::Shutdown => "shutdown",
        }
    }
}

/// Extract the `type` field from a raw frame body, for error reporting when
/// the body does not parse as any known [`Message`].
#[must_use]
pub fn wire_type(body: &Value) -> String {
    body.get("type")
        .and_then(Value::as_str)
        .unwrap_or("<missing>")
        .to_string()
}
