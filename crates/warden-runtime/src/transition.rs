//! The join child's privilege transition.
//!
//! After the fork the child still holds the saved root identity. It drops
//! the DAC override capabilities, enters the target's root, reapplies the
//! target's CPU, capability and seccomp policy, joins the user namespace
//! when one is in use, and finally sheds every privilege before the
//! command is built.
//!
//! [`ChildSteps`] is the seam between that ordering and the kernel:
//! [`KernelSteps`] performs the real calls, while tests substitute a
//! recording implementation.

use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::errno::Errno;
use nix::sys::prctl;
use nix::sys::signal::Signal;
use nix::unistd::{chdir, chroot};
use warden_common::config::RunPaths;
use warden_common::constants::SANDBOX_INIT_PID;
use warden_common::diag;
use warden_common::error::{Result, WardenError};
use warden_common::types::{JoinMode, Namespace, SandboxRecord};
use warden_core::privilege::with_root;
use warden_core::{capability, cgroup, namespace, seccomp};

use crate::join::JoinRequest;
use crate::launch::{self, Caller};

/// Individual operations of the child transition.
pub trait ChildSteps {
    /// Runs `f` with root as the effective identity.
    ///
    /// # Errors
    ///
    /// Returns the error from elevation, from `f`, or from restoring.
    fn elevated<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        with_root(f)
    }

    /// Whether seccomp programs can be loaded at all.
    fn seccomp_available(&self) -> bool {
        seccomp::AVAILABLE
    }

    /// Drops `CAP_DAC_OVERRIDE` and `CAP_DAC_READ_SEARCH`.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel refuses the drop.
    fn drop_dac_override(&self) -> Result<()>;

    /// Makes the directory behind `root` the process root.
    ///
    /// # Errors
    ///
    /// Returns an error if `fchdir`, `chroot` or `chdir` fails.
    fn change_root(&self, root: &File, shown_as: &Path) -> Result<()>;

    /// Arranges for `SIGKILL` when the parent dies.
    ///
    /// # Errors
    ///
    /// Returns an error if `prctl(2)` fails.
    fn set_parent_death_signal(&self) -> Result<()>;

    /// See [`launch::enter_working_dir`].
    ///
    /// # Errors
    ///
    /// Returns an error if no candidate directory can be entered.
    fn enter_working_dir(&self, explicit: Option<&Path>, home: &Path) -> Result<PathBuf>;

    /// Restricts the process to the CPUs in `mask`.
    ///
    /// # Errors
    ///
    /// Returns an error if the affinity cannot be set.
    fn set_cpu_affinity(&self, mask: u64) -> Result<()>;

    /// Installs `mask` as the capability bounding set.
    ///
    /// # Errors
    ///
    /// Returns an error if a capability cannot be dropped.
    fn set_caps(&self, mask: u64) -> Result<()>;

    /// Reads the protocol list from `path`, `None` when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    fn load_protocol_filter(&self, path: &Path) -> Result<Option<String>>;

    /// Loads the seccomp program stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the program is unreadable or rejected.
    fn load_seccomp(&self, path: &Path) -> Result<()>;

    /// Enters the user namespace of `pid` as seen through `/proc`.
    ///
    /// # Errors
    ///
    /// Returns an error if `setns(2)` fails.
    fn join_user_namespace(&self, pid: i32) -> Result<()>;

    /// Adjusts the scheduling priority.
    ///
    /// # Errors
    ///
    /// Returns an error if `nice(2)` fails.
    fn set_nice(&self, increment: i32) -> Result<()>;

    /// Irreversibly takes on the caller's identity.
    ///
    /// # Errors
    ///
    /// Returns an error if any identity change fails.
    fn drop_privs(&self, caller: &Caller, no_groups: bool) -> Result<()>;

    /// Sets the file creation mask.
    fn apply_umask(&self, mask: u32);
}

/// [`ChildSteps`] backed by real system calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelSteps;

impl ChildSteps for KernelSteps {
    fn drop_dac_override(&self) -> Result<()> {
        capability::caps_drop_dac_override()
    }

    fn change_root(&self, root: &File, shown_as: &Path) -> Result<()> {
        // SAFETY: the descriptor is owned by `root` and stays open for the call.
        let rc = unsafe { libc::fchdir(root.as_raw_fd()) };
        Errno::result(rc)
            .map(drop)
            .map_err(|e| WardenError::syscall(format!("entering {}", shown_as.display()), e))?;
        chroot(".").map_err(|e| WardenError::syscall(format!("changing root to {}", shown_as.display()), e))?;
        chdir("/").map_err(|e| WardenError::syscall("chdir(/)", e))?;
        tracing::info!(root = %shown_as.display(), "changed root");
        Ok(())
    }

    fn set_parent_death_signal(&self) -> Result<()> {
        prctl::set_pdeathsig(Signal::SIGKILL)
            .map_err(|e| WardenError::syscall("setting parent death signal", e))
    }

    fn enter_working_dir(&self, explicit: Option<&Path>, home: &Path) -> Result<PathBuf> {
        launch::enter_working_dir(explicit, home)
    }

    fn set_cpu_affinity(&self, mask: u64) -> Result<()> {
        cgroup::set_cpu_affinity(mask)
    }

    fn set_caps(&self, mask: u64) -> Result<()> {
        capability::caps_set(mask)
    }

    fn load_protocol_filter(&self, path: &Path) -> Result<Option<String>> {
        seccomp::protocol_filter_load(path)
    }

    fn load_seccomp(&self, path: &Path) -> Result<()> {
        seccomp::seccomp_load(path)
    }

    fn join_user_namespace(&self, pid: i32) -> Result<()> {
        namespace::join_namespace(Path::new("/proc"), pid, Namespace::User)
    }

    fn set_nice(&self, increment: i32) -> Result<()> {
        launch::set_nice(increment)
    }

    fn drop_privs(&self, caller: &Caller, no_groups: bool) -> Result<()> {
        launch::drop_privs(caller, no_groups)
    }

    fn apply_umask(&self, mask: u32) {
        launch::apply_umask(mask);
    }
}

/// Walks a forked child from the saved root identity to a ready command.
#[derive(Debug)]
pub struct ChildTransition<'a, S: ChildSteps> {
    steps: &'a S,
    paths: &'a RunPaths,
    caller: &'a Caller,
    shell: Option<&'a Path>,
}

impl<'a, S: ChildSteps> ChildTransition<'a, S> {
    /// Creates a transition acting for `caller`.
    #[must_use]
    pub const fn new(steps: &'a S, paths: &'a RunPaths, caller: &'a Caller, shell: Option<&'a Path>) -> Self {
        Self {
            steps,
            paths,
            caller,
            shell,
        }
    }

    /// Runs every step and returns the command to execute.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error. Only a failed `nice` is
    /// downgraded to a warning.
    pub fn run(&self, record: &SandboxRecord, request: &JoinRequest, root: &File) -> Result<Command> {
        let steps = self.steps;
        steps.elevated(|| steps.drop_dac_override())?;
        if request.mode.chroots() {
            steps.elevated(|| steps.change_root(root, &record.root))?;
        }
        steps.set_parent_death_signal()?;
        let _ = steps.enter_working_dir(None, &self.caller.home)?;

        if !self.caller.is_root() {
            steps.elevated(|| self.apply_policy(record, request.mode))?;
        }
        if record.user_namespace {
            steps.elevated(|| self.join_user_namespace(record, request.mode))?;
        }

        if let Some(increment) = request.nice {
            if let Err(e) = steps.set_nice(increment) {
                diag::warning(format!("cannot set nice value: {e}"));
            }
        }
        let env = launch::env_defaults(self.shell, self.caller);
        let cwd = steps.enter_working_dir(request.cwd.as_deref(), &self.caller.home)?;
        tracing::debug!(cwd = %cwd.display(), "working directory");
        steps.drop_privs(self.caller, record.no_groups)?;
        if let Some(mask) = record.umask {
            steps.apply_umask(mask);
        }
        launch::build_command(self.shell, &record.command, &env)
    }

    /// Reapplies the recovered CPU, capability and seccomp policy.
    fn apply_policy(&self, record: &SandboxRecord, mode: JoinMode) -> Result<()> {
        let steps = self.steps;
        if let Some(cpus) = record.cpus {
            steps.set_cpu_affinity(cpus)?;
        }
        if let Some(caps) = record.caps {
            steps.set_caps(caps)?;
        }
        if !steps.seccomp_available() {
            return Ok(());
        }
        // Without a chroot the run files are only reachable through the
        // target's root.
        let run_file = |file: PathBuf| {
            if mode.chroots() {
                file
            } else {
                RunPaths::under(&record.root, &file)
            }
        };
        if let Some(protocols) = steps.load_protocol_filter(&run_file(self.paths.protocol_cfg()))? {
            tracing::debug!(%protocols, "reinstating protocol filter");
            steps.load_seccomp(&run_file(self.paths.seccomp_protocol()))?;
        }
        if record.seccomp {
            steps.load_seccomp(&run_file(self.paths.seccomp_cfg()))?;
        }
        Ok(())
    }

    /// Enters the target's user namespace and reapplies the capability
    /// bounding set, which the transition resets.
    fn join_user_namespace(&self, record: &SandboxRecord, mode: JoinMode) -> Result<()> {
        // After a chroot /proc belongs to the sandbox, whose init is pid 1.
        let pid = if mode.chroots() { SANDBOX_INIT_PID } else { record.pid };
        tracing::debug!(pid, "joining user namespace");
        self.steps.join_user_namespace(pid)?;
        if let Some(caps) = record.caps {
            self.steps.set_caps(caps)?;
        }
        Ok(())
    }
}
