//! Final steps before a joined command runs: environment, working
//! directory, scheduling priority, privilege shed and `exec`.

use std::ffi::CString;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::errno::Errno;
use nix::sys::stat::{Mode, umask};
use nix::unistd::{Gid, Uid, User, getgid, getuid, initgroups, setgroups, setresgid, setresuid};
use warden_common::constants::APP_NAME;
use warden_common::diag;
use warden_common::error::{Result, WardenError};
use warden_common::types::CommandLine;
use warden_core::privilege::Elevated;

/// Identity of the user who invoked the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Real uid.
    pub uid: Uid,
    /// Real gid.
    pub gid: Gid,
    /// Login name.
    pub name: String,
    /// Home directory.
    pub home: PathBuf,
}

impl Caller {
    /// Looks up the real ids of the current process in the user database.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails or the uid has no entry.
    pub fn current() -> Result<Self> {
        let uid = getuid();
        let user = User::from_uid(uid)
            .map_err(|e| WardenError::syscall(format!("looking up uid {uid}"), e))?
            .ok_or_else(|| WardenError::NotFound {
                kind: "user",
                id: uid.to_string(),
            })?;
        Ok(Self {
            uid,
            gid: getgid(),
            name: user.name,
            home: user.dir,
        })
    }

    /// Whether the caller is root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.uid.is_root()
    }
}

/// Default environment of a joined command.
#[must_use]
pub fn env_defaults(shell: Option<&Path>, caller: &Caller) -> Vec<(String, String)> {
    let mut env = vec![("container".to_owned(), APP_NAME.to_owned())];
    if let Some(shell) = shell {
        env.push(("SHELL".to_owned(), shell.display().to_string()));
    }
    env.push(("HOME".to_owned(), caller.home.display().to_string()));
    env.push(("USER".to_owned(), caller.name.clone()));
    env.push(("LOGNAME".to_owned(), caller.name.clone()));
    env
}

/// Changes into the first usable directory among `explicit`, `home`
/// and `/`, returning the one entered.
///
/// An explicit directory that cannot be entered is reported as a warning.
///
/// # Errors
///
/// Returns an error only if `/` itself cannot be entered.
pub fn enter_working_dir(explicit: Option<&Path>, home: &Path) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        match std::env::set_current_dir(dir) {
            Ok(()) => return Ok(dir.to_path_buf()),
            Err(e) => diag::warning(format!("cannot enter {}: {e}", dir.display())),
        }
    }
    if std::env::set_current_dir(home).is_ok() {
        return Ok(home.to_path_buf());
    }
    let root = Path::new("/");
    std::env::set_current_dir(root).map_err(|e| WardenError::io(root, e))?;
    Ok(root.to_path_buf())
}

/// Adjusts the scheduling priority by `increment`.
///
/// # Errors
///
/// Returns the errno reported by `nice(2)`.
pub fn set_nice(increment: i32) -> Result<()> {
    // nice(2) may legitimately return -1, so errno is the only error signal.
    Errno::clear();
    // SAFETY: nice only changes the calling process's priority.
    let rc = unsafe { libc::nice(increment) };
    let errno = Errno::last();
    if rc == -1 && errno != Errno::UnknownErrno {
        return Err(WardenError::syscall(format!("nice({increment})"), errno));
    }
    tracing::debug!(increment, "scheduling priority adjusted");
    Ok(())
}

/// Sets the file creation mask.
pub fn apply_umask(mask: u32) {
    let previous = umask(Mode::from_bits_truncate(mask));
    tracing::debug!(mask = format_args!("{mask:03o}"), previous = format_args!("{:03o}", previous.bits()), "umask applied");
}

/// Irreversibly sets the real, effective and saved ids to the caller's.
///
/// Supplementary groups are cleared when `no_groups` is set or the caller
/// belongs to group 0; otherwise they are initialized from the group
/// database.
///
/// # Errors
///
/// Returns an error if any identity change fails. The process must not
/// continue in that case.
pub fn drop_privs(caller: &Caller, no_groups: bool) -> Result<()> {
    let scope = Elevated::acquire()?;
    if no_groups || caller.gid.as_raw() == 0 {
        setgroups(&[]).map_err(|e| WardenError::syscall("setgroups([])", e))?;
    } else {
        let name = CString::new(caller.name.as_str()).map_err(|_| WardenError::Privilege {
            message: format!("user name {:?} contains a NUL byte", caller.name),
        })?;
        initgroups(&name, caller.gid)
            .map_err(|e| WardenError::syscall(format!("initgroups({})", caller.name), e))?;
    }
    let gid = caller.gid;
    let uid = caller.uid;
    setresgid(gid, gid, gid).map_err(|e| WardenError::syscall(format!("setresgid({gid})"), e))?;
    setresuid(uid, uid, uid).map_err(|e| WardenError::syscall(format!("setresuid({uid})"), e))?;
    scope.relinquish();
    tracing::debug!(uid = uid.as_raw(), gid = gid.as_raw(), no_groups, "privileges dropped");
    Ok(())
}

/// Builds the command a join finally executes.
///
/// With a shell the command line runs through `<shell> -c`, and an empty
/// command starts the shell interactively. Without a shell the tokens are
/// executed directly.
///
/// # Errors
///
/// Returns [`WardenError::Config`] when there is neither a command nor a
/// shell to run.
pub fn build_command(
    shell: Option<&Path>,
    command: &CommandLine,
    env: &[(String, String)],
) -> Result<Command> {
    let mut cmd = match (shell, command.argv().split_first()) {
        (Some(shell), None) => Command::new(shell),
        (Some(shell), Some(_)) => {
            let mut cmd = Command::new(shell);
            let _ = cmd.arg("-c").arg(command.joined());
            cmd
        }
        (None, Some((program, args))) => {
            let mut cmd = Command::new(program);
            let _ = cmd.args(args);
            cmd
        }
        (None, None) => {
            return Err(WardenError::Config {
                message: "no command given and no shell configured".into(),
            });
        }
    };
    let _ = cmd.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    Ok(cmd)
}

/// Replaces the process image. Only returns on failure.
pub fn exec_command(mut cmd: Command) -> WardenError {
    let program = PathBuf::from(cmd.get_program());
    tracing::info!(program = %program.display(), "executing");
    let err = cmd.exec();
    WardenError::io(program, err)
}
