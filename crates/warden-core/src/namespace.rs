//! Joining the namespaces of a running sandbox.
//!
//! Each namespace is entered through `setns(2)` on its
//! `/proc/<pid>/ns/<name>` handle. A failed join aborts the whole
//! sequence; namespaces entered before the failure stay entered until the
//! process exits.

use std::fs::File;
use std::path::Path;

use nix::mount::{MsFlags, mount};
use nix::sched::{CloneFlags, setns, unshare};
use warden_common::error::{Result, WardenError};
use warden_common::types::{JoinMode, Namespace};

/// Enters one namespace of `pid`, using the `/proc` mounted at `proc_root`.
///
/// # Errors
///
/// Returns an error if the namespace handle cannot be opened or
/// `setns(2)` fails.
pub fn join_namespace(proc_root: &Path, pid: i32, ns: Namespace) -> Result<()> {
    let path = proc_root
        .join(pid.to_string())
        .join("ns")
        .join(ns.proc_name());
    let handle = File::open(&path).map_err(|e| WardenError::io(&path, e))?;
    setns(&handle, ns.clone_flag())
        .map_err(|e| WardenError::syscall(format!("joining {ns} namespace of pid {pid}"), e))?;
    tracing::debug!(pid, namespace = %ns, "joined namespace");
    Ok(())
}

/// Enters every namespace implied by `mode`, in order, through `enter`.
///
/// Stops at the first failure.
///
/// # Errors
///
/// Returns the first error reported by `enter`.
pub fn join_mode_with(mode: JoinMode, mut enter: impl FnMut(Namespace) -> Result<()>) -> Result<()> {
    for ns in mode.namespaces() {
        enter(*ns)?;
    }
    Ok(())
}

/// Enters the namespaces of `pid` implied by `mode`.
///
/// # Errors
///
/// Returns an error on the first namespace that cannot be joined.
pub fn join_mode(proc_root: &Path, pid: i32, mode: JoinMode) -> Result<()> {
    join_mode_with(mode, |ns| join_namespace(proc_root, pid, ns))?;
    tracing::info!(pid, ?mode, "joined sandbox namespaces");
    Ok(())
}

/// Moves the calling process into a fresh mount namespace whose mounts
/// do not propagate back to the parent namespace.
///
/// # Errors
///
/// Returns an error if `unshare(2)` or the propagation change fails.
pub fn enter_private_mount_namespace() -> Result<()> {
    unshare(CloneFlags::CLONE_NEWNS).map_err(|e| WardenError::syscall("unshare(CLONE_NEWNS)", e))?;
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| WardenError::syscall("making / private", e))?;
    tracing::debug!("private mount namespace created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(mode: JoinMode) -> Vec<Namespace> {
        let mut entered = Vec::new();
        join_mode_with(mode, |ns| {
            entered.push(ns);
            Ok(())
        })
        .expect("join");
        entered
    }

    #[test]
    fn network_only_enters_net() {
        assert_eq!(record(JoinMode::NetworkOnly), vec![Namespace::Net]);
    }

    #[test]
    fn filesystem_only_enters_mnt() {
        assert_eq!(record(JoinMode::FilesystemOnly), vec![Namespace::Mnt]);
    }

    #[test]
    fn full_join_enters_five_namespaces_in_order() {
        assert_eq!(
            record(JoinMode::Full),
            vec![
                Namespace::Ipc,
                Namespace::Net,
                Namespace::Pid,
                Namespace::Uts,
                Namespace::Mnt
            ]
        );
    }

    #[test]
    fn failure_stops_the_sequence() {
        let mut entered = Vec::new();
        let outcome = join_mode_with(JoinMode::Full, |ns| {
            if ns == Namespace::Pid {
                return Err(WardenError::syscall("setns", nix::errno::Errno::EPERM));
            }
            entered.push(ns);
            Ok(())
        });
        assert!(outcome.is_err());
        assert_eq!(entered, vec![Namespace::Ipc, Namespace::Net]);
    }

    #[test]
    fn missing_namespace_handle_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            join_namespace(dir.path(), 12345, Namespace::Net),
            Err(WardenError::Io { .. })
        ));
    }
}
