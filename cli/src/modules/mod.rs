//! Native modules: handlers callable inside the controller process.
//!
//! The registry is built once at startup and treated as read-only for the
//! rest of the process; runs share it behind an `Arc`.

pub mod builtins;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::inventory::Host;
use crate::types::ModuleResult;

/// Everything a native module body sees for one invocation.
pub struct ModuleContext<'a> {
    pub host: &'a Host,
    pub args: &'a Map<String, Value>,
    /// Check mode: report what would change without changing it.
    pub check_mode: bool,
    pub cancel: &'a CancellationToken,
}

/// A module implemented in-process.
#[async_trait]
pub trait NativeModule: Send + Sync {
    /// Short registry name, without the `ftl_` marker.
    fn name(&self) -> &'static str;

    /// One-line description shown by `ftl modules`.
    fn description(&self) -> &'static str;

    async fn run(&self, ctx: ModuleContext<'_>) -> Result<ModuleResult>;
}

/// Process-wide immutable mapping of short names to handlers.
#[derive(Default)]
pub struct NativeRegistry {
    handlers: HashMap<&'static str, Arc<dyn NativeModule>>,
}

impl NativeRegistry {
    /// Registry holding every built-in native module.
    #[must_use]
    pub fn builtin() -> Arc<Self> {
        let mut registry = Self::default();
        for handler in builtins::all() {
            registry.register(handler);
        }
        Arc::new(registry)
    }

    /// Empty registry for callers that assemble their own handler set.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn NativeModule>) {
        self.handlers.insert(handler.name(), handler);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn NativeModule>> {
        self.handlers.get(name).map(Arc::clone)
    }

    /// Registered short names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
