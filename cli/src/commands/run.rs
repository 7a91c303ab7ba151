//! Run command: execute one module across the selected hosts.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::ControllerConfig;
use crate::controller::{ConfigureOptions, Controller};
use crate::inventory::Inventory;
use crate::output::{progress, OutputContext};
use crate::state::StateStore;

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// Module to execute (e.g. ftl_ping, acme.tools.deploy)
    pub module: String,

    /// Module argument as key=value; value parses as JSON, else as a string
    #[arg(short = 'a', long = "arg", value_name = "KEY=VALUE")]
    pub args: Vec<String>,

    /// Inventory file
    #[arg(short, long, default_value = "inventory.yml")]
    pub inventory: PathBuf,

    /// Target expression: `all` or a comma-separated host list
    #[arg(short, long, default_value = "all")]
    pub targets: String,

    /// Hosts executed in parallel per chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Stop scheduling new work after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Check mode: report what would change without changing it
    #[arg(long)]
    pub check: bool,

    /// Extra module root (repeatable)
    #[arg(long = "module-root", value_name = "DIR")]
    pub module_roots: Vec<PathBuf>,

    /// External module to bundle into the agent archive (repeatable)
    #[arg(long = "bundle", value_name = "MODULE")]
    pub bundle: Vec<String>,

    /// Abort the run after this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Verbose diagnostics: probe agent capabilities after each handshake
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Entry point for `ftl run`.
///
/// # Errors
///
/// Returns an error for CLI-level problems (bad arguments, unreadable
/// inventory); per-host failures only affect the exit code.
pub async fn run(
    ctx: &OutputContext,
    cancel: &CancellationToken,
    args: RunArgs,
    json: bool,
) -> Result<i32> {
    if let Some(chunk_size) = args.chunk_size {
        anyhow::ensure!(chunk_size >= 1, "--chunk-size must be at least 1");
    }
    let mut config = ControllerConfig::load().context("loading ~/.ftl/config.yaml")?;
    config.probe |= args.verbose;

    let inventory = Inventory::load(&args.inventory)?;
    let module_args = parse_args(&args.args)?;

    if let Some(seconds) = args.timeout {
        let deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            deadline.cancel();
        });
    }

    let mut controller = Controller::new(config, inventory)?;
    let overrides = configure_options(&args, controller.config());
    controller.configure(overrides).await?;

    let spinner = ctx
        .show_progress()
        .then(|| progress::spinner(&format!("running {} on {}", args.module, args.targets)));

    let summary = controller
        .execute(cancel, &args.targets, &args.module, module_args)
        .await?;

    if let Some(pb) = spinner {
        if summary.all_successful() {
            progress::finish_success(&pb, &format!("{} hosts", summary.results.len()));
        } else {
            progress::finish_error(&pb, &format!("{} failed", summary.failed));
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        ctx.render_summary(&summary);
    }

    persist_state(&args.module, &summary).await;

    if let Err(e) = controller.close().await {
        eprintln!("Warning: {e}");
    }

    if cancel.is_cancelled() {
        return Ok(130);
    }
    Ok(if summary.all_successful() { 0 } else { 1 })
}

/// Translate CLI flags into configuration overrides. Roots and bundle
/// extend the config-file values rather than replacing them.
fn configure_options(args: &RunArgs, current: &ControllerConfig) -> ConfigureOptions {
    let mut opts = ConfigureOptions {
        chunk_size: args.chunk_size,
        fail_fast: args.fail_fast.then_some(true),
        dry_run: args.check.then_some(true),
        ..ConfigureOptions::default()
    };
    if !args.module_roots.is_empty() {
        let mut roots = current.module_roots.clone();
        roots.extend(args.module_roots.iter().cloned());
        opts.module_roots = Some(roots);
    }
    if !args.bundle.is_empty() {
        let mut bundle = current.module_bundle.clone();
        bundle.extend(args.bundle.iter().cloned());
        opts.module_bundle = Some(bundle);
    }
    opts
}

/// Parse repeated `key=value` arguments; values try JSON first so numbers,
/// booleans, and structures come through typed.
fn parse_args(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("argument '{pair}' is not KEY=VALUE"))?;
        anyhow::ensure!(!key.is_empty(), "argument '{pair}' has an empty key");
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

/// Record the run in the cross-run state; state problems are warnings, not
/// run failures.
async fn persist_state(module: &str, summary: &crate::summary::RunSummary) {
    let store = match StateStore::new() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Warning: state unavailable ({e})");
            return;
        }
    };
    let mut state = match store.load().await {
        Ok(state) => state.unwrap_or_default(),
        Err(e) => {
            eprintln!("Warning: state file unreadable ({e}), starting fresh");
            crate::state::ControllerState::new()
        }
    };
    state.record_run(module, summary);
    if let Err(e) = store.save(&state).await {
        eprintln!("Warning: could not persist state: {e}");
    }
}
