//! CLI argument parsing with clap derive

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::commands;

/// Distributed automation controller
#[derive(Parser)]
#[command(
    name = "ftl",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR", value_parser = clap::builder::BoolishValueParser::new())]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Execute a module across the inventory
    Run(commands::run::RunArgs),

    /// List native and discovered external modules
    Modules(commands::modules::ModulesArgs),

    /// Show version
    Version,
}

impl Cli {
    /// Execute the CLI command, returning the process exit code.
    ///
    /// # Errors
    ///
    /// Returns an error when the command itself fails; per-host module
    /// failures are reflected in the exit code instead.
    pub async fn run(self, cancel: CancellationToken) -> Result<i32> {
        let Cli {
            no_color,
            quiet,
            json,
            command,
        } = self;
        let ctx = crate::output::OutputContext::new(no_color, quiet);
        match command {
            Command::Version => commands::version::run(json),
            Command::Modules(args) => commands::modules::run(&ctx, &args, json),
            Command::Run(args) => commands::run::run(&ctx, &cancel, args, json).await,
        }
    }
}
