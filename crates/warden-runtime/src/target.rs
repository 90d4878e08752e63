//! Target resolution and authorization for a join.

use nix::unistd::Uid;
use warden_common::error::{Result, WardenError};

use crate::procfs::ProcFs;

/// Substitutes the sandboxed command for its manager process.
///
/// Callers often pass the pid of the manager itself; in that case the
/// lowest-numbered child is the sandbox to join.
///
/// # Errors
///
/// Returns [`WardenError::InvalidTarget`] if the process does not exist,
/// or if it is a manager without children.
pub fn switch_to_child(proc: &ProcFs, pid: i32, manager: &str) -> Result<i32> {
    let comm = proc.comm(pid).map_err(|e| match e {
        WardenError::NotFound { .. } => WardenError::InvalidTarget {
            pid,
            reason: "cannot find process".into(),
        },
        other => other,
    })?;
    if comm != manager {
        return Ok(pid);
    }
    let child = proc
        .children(pid)?
        .first()
        .copied()
        .ok_or_else(|| WardenError::InvalidTarget {
            pid,
            reason: "the sandbox has no running process".into(),
        })?;
    tracing::debug!(manager = pid, child, "switched to sandboxed child");
    Ok(child)
}

/// Confirms that `pid` was started by the sandbox manager.
///
/// # Errors
///
/// Returns [`WardenError::InvalidTarget`] if the parent is not a manager
/// process.
pub fn validate(proc: &ProcFs, pid: i32, manager: &str) -> Result<()> {
    let invalid = |reason: String| WardenError::InvalidTarget { pid, reason };
    let ppid = proc.ppid(pid).map_err(|e| invalid(e.to_string()))?;
    let parent = proc.comm(ppid).map_err(|e| invalid(e.to_string()))?;
    if parent != manager {
        return Err(invalid(format!("parent process {ppid} is {parent:?}, not {manager:?}")));
    }
    Ok(())
}

/// Only root may join a sandbox owned by another user.
///
/// # Errors
///
/// Returns [`WardenError::PermissionDenied`] on an owner mismatch.
pub fn authorize(proc: &ProcFs, pid: i32, caller: Uid) -> Result<()> {
    if caller.is_root() {
        return Ok(());
    }
    let owner = proc.uid(pid)?;
    if owner != caller.as_raw() {
        tracing::warn!(pid, owner, caller = caller.as_raw(), "join refused");
        return Err(WardenError::PermissionDenied {
            message: "permission is denied to join a sandbox created by a different user".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn add_process(root: &Path, pid: i32, comm: &str, ppid: i32, uid: u32) {
        let dir = root.join(pid.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("comm"), format!("{comm}\n")).unwrap();
        std::fs::write(
            dir.join("status"),
            format!("Name:\t{comm}\nPPid:\t{ppid}\nUid:\t{uid}\t{uid}\t{uid}\t{uid}\n"),
        )
        .unwrap();
    }

    #[test]
    fn manager_pid_resolves_to_first_child() {
        let dir = tempfile::tempdir().unwrap();
        add_process(dir.path(), 100, "warden", 1, 1000);
        add_process(dir.path(), 105, "bash", 100, 1000);
        add_process(dir.path(), 103, "bash", 100, 1000);
        let proc = ProcFs::new(dir.path());
        assert_eq!(switch_to_child(&proc, 100, "warden").unwrap(), 103);
        assert_eq!(switch_to_child(&proc, 105, "warden").unwrap(), 105);
    }

    #[test]
    fn missing_process_cannot_be_found() {
        let dir = tempfile::tempdir().unwrap();
        let proc = ProcFs::new(dir.path());
        let err = switch_to_child(&proc, 7, "warden").unwrap_err();
        assert!(err.to_string().contains("cannot find process"));
    }

    #[test]
    fn childless_manager_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        add_process(dir.path(), 100, "warden", 1, 0);
        let proc = ProcFs::new(dir.path());
        assert!(matches!(
            switch_to_child(&proc, 100, "warden"),
            Err(WardenError::InvalidTarget { pid: 100, .. })
        ));
    }

    #[test]
    fn validation_requires_manager_parent() {
        let dir = tempfile::tempdir().unwrap();
        add_process(dir.path(), 100, "warden", 1, 0);
        add_process(dir.path(), 101, "bash", 100, 0);
        add_process(dir.path(), 200, "sshd", 1, 0);
        add_process(dir.path(), 201, "bash", 200, 0);
        let proc = ProcFs::new(dir.path());
        validate(&proc, 101, "warden").unwrap();
        assert!(matches!(
            validate(&proc, 201, "warden"),
            Err(WardenError::InvalidTarget { pid: 201, .. })
        ));
    }

    #[test]
    fn other_users_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        add_process(dir.path(), 101, "bash", 100, 1000);
        let proc = ProcFs::new(dir.path());
        authorize(&proc, 101, Uid::from_raw(1000)).unwrap();
        authorize(&proc, 101, Uid::from_raw(0)).unwrap();
        let err = authorize(&proc, 101, Uid::from_raw(1001)).unwrap_err();
        assert!(matches!(err, WardenError::PermissionDenied { .. }));
        assert!(err.to_string().contains("different user"));
    }
}
