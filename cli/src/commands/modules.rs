//! Modules command: list what the controller can execute.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;

use crate::config::ControllerConfig;
use crate::modules::NativeRegistry;
use crate::output::OutputContext;
use crate::resolver::{MODULE_EXTENSION, NATIVE_PREFIX};

/// Arguments for the modules command.
#[derive(Args)]
pub struct ModulesArgs {
    /// Extra module root (repeatable)
    #[arg(long = "module-root", value_name = "DIR")]
    pub module_roots: Vec<PathBuf>,
}

/// Entry point for `ftl modules`.
///
/// # Errors
///
/// Returns an error if the config cannot be loaded.
pub fn run(ctx: &OutputContext, args: &ModulesArgs, json: bool) -> Result<i32> {
    let mut config = ControllerConfig::load()?;
    config.module_roots.extend(args.module_roots.clone());

    let registry = NativeRegistry::builtin();
    let mut native: Vec<(String, String)> = registry
        .names()
        .iter()
        .filter_map(|name| registry.get(name).map(|h| (*name, h)))
        .map(|(name, handle)| {
            (
                format!("{NATIVE_PREFIX}{name}"),
                handle.description().to_string(),
            )
        })
        .collect();
    native.sort();

    let external = discover_external(&config.module_roots);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "native": native
                    .iter()
                    .map(|(n, d)| serde_json::json!({"name": n, "description": d}))
                    .collect::<Vec<_>>(),
                "external": external,
            })
        );
        return Ok(0);
    }

    println!("{}", "native modules".style(ctx.styles.header));
    for (name, description) in &native {
        println!(
            "  {:<16} {}",
            name.style(ctx.styles.bold),
            description.style(ctx.styles.dim)
        );
    }
    if !external.is_empty() {
        println!("\n{}", "external modules".style(ctx.styles.header));
        for name in &external {
            println!("  {name}");
        }
    }
    Ok(0)
}

/// Walk `<root>/collections/<ns>/<coll>/modules/*.py` under every root.
fn discover_external(roots: &[PathBuf]) -> Vec<String> {
    let mut found = Vec::new();
    for root in roots {
        let collections = root.join("collections");
        let Ok(namespaces) = std::fs::read_dir(&collections) else {
            continue;
        };
        for ns in namespaces.flatten() {
            let Ok(colls) = std::fs::read_dir(ns.path()) else {
                continue;
            };
            for coll in colls.flatten() {
                let modules = coll.path().join("modules");
                let Ok(files) = std::fs::read_dir(&modules) else {
                    continue;
                };
                for file in files.flatten() {
                    let path = file.path();
                    if path.extension().is_some_and(|e| e == MODULE_EXTENSION) {
                        if let (Some(stem), Some(ns_name), Some(coll_name)) = (
                            path.file_stem().and_then(|s| s.to_str()),
                            ns.file_name().to_str(),
                            coll.file_name().to_str(),
                        ) {
                            found.push(format!("{ns_name}.{coll_name}.{stem}"));
                        }
                    }
                }
            }
        }
    }
    found.sort();
    found.dedup();
    found
}
