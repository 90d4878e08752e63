//! # warden
//!
//! Setuid helper for sandboxes: joins a running sandbox's namespaces and
//! builds private `/dev` trees.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Diagnostics go to stderr; stdout belongs to the joined command.
    let default_level = if cli.debug { "debug" } else { "error" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Nothing runs as root outside an explicit scope.
    warden_core::privilege::drop_to_user()?;

    let code = commands::execute(cli)?;
    std::process::exit(code);
}
