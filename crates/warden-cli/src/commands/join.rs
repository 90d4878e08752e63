//! `warden join`: Run a command inside a running sandbox.

use std::path::PathBuf;

use clap::Args;
use warden_common::config::WardenConfig;
use warden_common::types::{CommandLine, JoinMode};
use warden_runtime::join::{JoinRequest, Joiner};
use warden_runtime::launch::Caller;

/// Shell value that disables the shell.
const NO_SHELL: &str = "none";

/// Arguments for the `join` command.
#[derive(Args, Debug)]
pub struct JoinArgs {
    /// Pid of the sandbox or of its manager process.
    pub pid: i32,

    /// Join only the network namespace.
    #[arg(long, conflicts_with = "fs")]
    pub net: bool,

    /// Join only the mount namespace.
    #[arg(long)]
    pub fs: bool,

    /// Scheduling priority increment.
    #[arg(long, allow_negative_numbers = true)]
    pub nice: Option<i32>,

    /// Working directory inside the sandbox.
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Shell running the command, or "none" to execute it directly.
    #[arg(long)]
    pub shell: Option<String>,

    /// Command to run; an interactive shell when omitted. Use `--` before
    /// a command that starts with `-`.
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

impl JoinArgs {
    /// Namespaces selected by the flags.
    #[must_use]
    pub const fn mode(&self) -> JoinMode {
        if self.net {
            JoinMode::NetworkOnly
        } else if self.fs {
            JoinMode::FilesystemOnly
        } else {
            JoinMode::Full
        }
    }

    /// Applies the `--shell` override to `config`.
    pub fn apply_shell(&self, config: &mut WardenConfig) {
        if let Some(shell) = &self.shell {
            config.shell = (shell != NO_SHELL).then(|| PathBuf::from(shell));
        }
    }
}

/// Executes the `join` command and returns the joined command's status.
///
/// # Errors
///
/// Returns an error if the sandbox cannot be joined.
pub fn execute(args: JoinArgs, mut config: WardenConfig) -> anyhow::Result<i32> {
    args.apply_shell(&mut config);
    let request = JoinRequest {
        pid: args.pid,
        mode: args.mode(),
        command: CommandLine::new(args.command),
        cwd: args.cwd,
        nice: args.nice,
    };
    let caller = Caller::current()?;
    let code = Joiner::new(&config, caller).join(&request)?;
    Ok(code)
}
