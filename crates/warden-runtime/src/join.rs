//! Joining a running sandbox.
//!
//! The parent resolves and authorizes the target, recovers its policy,
//! joins its cgroup and namespaces, then forks. The child re-applies the
//! recovered policy to itself, sheds every privilege and executes the
//! requested command; the parent waits for it and reports its status.
//!
//! Any failure before the fork is returned to the caller. The child has
//! no caller, so a failure there prints the error and exits with status 1,
//! which the parent reports like any other exit.

use std::fs::File;
use std::path::PathBuf;

use nix::unistd::{ForkResult, fork};
use warden_common::config::{RunPaths, WardenConfig};
use warden_common::error::{Result, WardenError};
use warden_common::types::{CommandLine, JoinMode, SandboxRecord};
use warden_core::privilege::with_root;
use warden_core::{cgroup, namespace};

use crate::inspect::SandboxInspector;
use crate::launch::{self, Caller};
use crate::procfs::ProcFs;
use crate::transition::{ChildTransition, KernelSteps};
use crate::{signals, supervisor, target};

/// Everything the caller asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinRequest {
    /// Pid of the sandbox, or of its manager process.
    pub pid: i32,
    /// Namespaces to enter.
    pub mode: JoinMode,
    /// Command to run; empty for an interactive shell.
    pub command: CommandLine,
    /// Working directory tried before the home directory.
    pub cwd: Option<PathBuf>,
    /// Scheduling priority increment.
    pub nice: Option<i32>,
}

/// Drives one join from target resolution to the child's termination.
#[derive(Debug)]
pub struct Joiner<'a> {
    config: &'a WardenConfig,
    paths: RunPaths,
    proc: ProcFs,
    caller: Caller,
}

impl<'a> Joiner<'a> {
    /// Creates a joiner acting for `caller` on the live `/proc`.
    #[must_use]
    pub fn new(config: &'a WardenConfig, caller: Caller) -> Self {
        Self {
            config,
            paths: config.run_paths(),
            proc: ProcFs::default(),
            caller,
        }
    }

    /// Reads process state from `proc` instead of `/proc`.
    #[must_use]
    pub fn with_proc(mut self, proc: ProcFs) -> Self {
        self.proc = proc;
        self
    }

    /// Resolves `pid` to the sandboxed process and checks that the caller
    /// may join it. Runs with the caller's identity.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::InvalidTarget`] or
    /// [`WardenError::PermissionDenied`].
    pub fn resolve(&self, pid: i32) -> Result<i32> {
        let manager = self.config.manager_name.as_str();
        let resolved = target::switch_to_child(&self.proc, pid, manager)?;
        target::validate(&self.proc, resolved, manager)?;
        target::authorize(&self.proc, resolved, self.caller.uid)?;
        Ok(resolved)
    }

    /// Joins the sandbox and returns the exit status to report.
    ///
    /// # Errors
    ///
    /// Returns an error if any step before the fork fails, or if waiting
    /// on the child fails.
    pub fn join(&self, request: &JoinRequest) -> Result<i32> {
        let pid = self.resolve(request.pid)?;
        tracing::info!(pid, mode = ?request.mode, "joining sandbox");
        signals::install_sigterm_flush()?;

        let (record, root) = with_root(|| self.enter(pid, request))?;

        // SAFETY: the process is single-threaded at this point; the child
        // only runs setup code and then execs or exits.
        match unsafe { fork() }.map_err(|e| WardenError::syscall("fork", e))? {
            ForkResult::Parent { child } => {
                drop(root);
                tracing::debug!(child = child.as_raw(), "forked join child");
                supervisor::supervise(child)
            }
            ForkResult::Child => self.run_child(&record, request, &root),
        }
    }

    /// Recovers the target's policy, joins its cgroup and namespaces, and
    /// returns the record with a handle on the target's root directory.
    fn enter(&self, pid: i32, request: &JoinRequest) -> Result<(SandboxRecord, File)> {
        let inspector = SandboxInspector::new(&self.proc, &self.paths);
        let record = inspector.inspect(pid, request.command.clone(), !self.caller.is_root())?;
        if let Some(tasks) = &record.cgroup {
            cgroup::set_cgroup(tasks)?;
        }
        // Opened before the mount namespace changes what /proc shows.
        let root = File::open(&record.root).map_err(|e| WardenError::io(&record.root, e))?;
        namespace::join_mode(self.proc.root(), pid, request.mode)?;
        Ok((record, root))
    }

    #[allow(clippy::print_stderr)]
    fn run_child(&self, record: &SandboxRecord, request: &JoinRequest, root: &File) -> ! {
        let transition = ChildTransition::new(&KernelSteps, &self.paths, &self.caller, self.config.shell.as_deref());
        let err = match transition.run(record, request, root) {
            Ok(cmd) => launch::exec_command(cmd),
            Err(e) => e,
        };
        tracing::error!(error = %err, "join child failed");
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
