//! Core data types shared across the controller.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One module execution request: what to run and with which arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInvocation {
    /// Module name: bare identifier, `ftl_`-prefixed native name, or a
    /// three-part fully-qualified name `ns.coll.mod`.
    pub name: String,
    /// Untyped argument map, kept as a JSON value tree until it reaches a
    /// native module body.
    pub args: Map<String, Value>,
    /// Check mode: report what would change without changing it.
    pub dry_run: bool,
}

impl ModuleInvocation {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Map::new(),
            dry_run: false,
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Map<String, Value>) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn check_mode(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Before/after text pair attached to a result in check or diff mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diff {
    pub before: String,
    pub after: String,
}

/// Outcome of one module execution on one host.
///
/// Invariants: `failed` implies `!skipped`; `changed` is meaningful only
/// when `!failed`. Constructors and wire conversion enforce both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleResult {
    #[serde(default)]
    pub changed: bool,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<Diff>,
    #[serde(default = "Utc::now")]
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub duration: Duration,
}

impl ModuleResult {
    /// Successful, nothing changed.
    #[must_use]
    pub fn ok() -> Self {
        Self::base(false, false, false)
    }

    /// Successful, something changed.
    #[must_use]
    pub fn changed() -> Self {
        Self::base(true, false, false)
    }

    /// Skipped without doing anything (counts as successful).
    #[must_use]
    pub fn skipped(msg: impl Into<String>) -> Self {
        let mut r = Self::base(false, false, true);
        r.msg = msg.into();
        r
    }

    /// Failed with a message.
    #[must_use]
    pub fn failure(msg: impl Into<String>) -> Self {
        let mut r = Self::base(false, true, false);
        r.msg = msg.into();
        r
    }

    /// Synthetic result for a task that never ran because the run was
    /// cancelled. Message is load-bearing: callers match on it.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::failure("cancelled")
    }

    #[must_use]
    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = msg.into();
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    fn base(changed: bool, failed: bool, skipped: bool) -> Self {
        Self {
            changed: changed && !failed,
            failed,
            skipped: skipped && !failed,
            msg: String::new(),
            data: Value::Null,
            warnings: Vec::new(),
            stdout: String::new(),
            stderr: String::new(),
            diff: None,
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }
}

/// Asynchronous progress event emitted by an agent during a module call,
/// tagged with the host it came from.
#[derive(Debug, Clone)]
pub struct HostEvent {
    pub host: String,
    pub event: String,
    pub message: String,
}
