//! Stock native modules.
//!
//! Bodies stay deliberately small: the controller transports arguments and
//! results, it does not interpret module semantics.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ModuleContext, NativeModule};
use crate::types::ModuleResult;

/// Every built-in handler, in registration order.
#[must_use]
pub fn all() -> Vec<Arc<dyn NativeModule>> {
    vec![
        Arc::new(Noop),
        Arc::new(Ping),
        Arc::new(Echo),
        Arc::new(Setup),
    ]
}

/// Does nothing, successfully.
pub struct Noop;

#[async_trait]
impl NativeModule for Noop {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn description(&self) -> &'static str {
        "do nothing and report no change"
    }

    async fn run(&self, _ctx: ModuleContext<'_>) -> Result<ModuleResult> {
        Ok(ModuleResult::ok())
    }
}

/// Liveness check; echoes `data` back like its namesake.
pub struct Ping;

#[async_trait]
impl NativeModule for Ping {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn description(&self) -> &'static str {
        "verify the host is reachable and report pong"
    }

    async fn run(&self, ctx: ModuleContext<'_>) -> Result<ModuleResult> {
        let data = ctx
            .args
            .get("data")
            .cloned()
            .unwrap_or_else(|| Value::from("pong"));
        Ok(ModuleResult::ok().with_data(json!({ "ping": data })))
    }
}

/// Returns its arguments unchanged; useful for wiring checks.
pub struct Echo;

#[async_trait]
impl NativeModule for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn description(&self) -> &'static str {
        "return the argument map as module data"
    }

    async fn run(&self, ctx: ModuleContext<'_>) -> Result<ModuleResult> {
        let msg = ctx
            .args
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(ModuleResult::ok()
            .with_msg(msg)
            .with_data(Value::Object(ctx.args.clone())))
    }
}

/// Gathers controller-side facts about the target.
pub struct Setup;

#[async_trait]
impl NativeModule for Setup {
    fn name(&self) -> &'static str {
        "setup"
    }

    fn description(&self) -> &'static str {
        "gather facts about the host"
    }

    async fn run(&self, ctx: ModuleContext<'_>) -> Result<ModuleResult> {
        let facts = json!({
            "host": ctx.host.name,
            "address": ctx.host.address,
            "local": ctx.host.is_local(),
            "controller_os": std::env::consts::OS,
            "controller_arch": std::env::consts::ARCH,
            "controller_version": env!("CARGO_PKG_VERSION"),
            "vars": Value::Object(ctx.host.vars.clone()),
        });
        Ok(ModuleResult::ok().with_data(json!({ "facts": facts })))
    }
}
