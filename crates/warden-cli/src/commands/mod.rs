//! CLI command definitions and dispatch.

pub mod join;
pub mod private_dev;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use warden_common::config::WardenConfig;

/// warden: join running sandboxes and build private device trees.
#[derive(Parser, Debug)]
#[command(name = "warden", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to /etc/warden/warden.json when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print debug messages.
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command inside a running sandbox.
    Join(join::JoinArgs),
    /// Run a command with a private /dev.
    PrivateDev(private_dev::PrivateDevArgs),
}

/// Dispatches the parsed CLI command and returns the exit status.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command
/// fails.
pub fn execute(cli: Cli) -> anyhow::Result<i32> {
    let config = WardenConfig::load_or_default(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration");
    match cli.command {
        Command::Join(args) => join::execute(args, config),
        Command::PrivateDev(args) => private_dev::execute(args, config),
    }
}
