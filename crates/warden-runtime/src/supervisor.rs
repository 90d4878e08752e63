//! Waiting on the joined child and reporting its fate.

use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;
use warden_common::error::{Result, WardenError};

use crate::signals;

/// Maps a child's termination to the tool's own exit status.
///
/// A normal exit keeps its code, a signal death reports the signal
/// number, anything else reports 0.
#[must_use]
pub fn exit_status(status: WaitStatus) -> i32 {
    match status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, signal, _) => signal as i32,
        _ => 0,
    }
}

/// Blocks until `child` terminates and returns its mapped status.
///
/// Pending terminal input is discarded before returning.
///
/// # Errors
///
/// Returns an error if waiting fails for a reason other than an
/// interrupted call.
pub fn supervise(child: Pid) -> Result<i32> {
    let status = loop {
        match waitpid(child, None) {
            Ok(status) => break status,
            Err(Errno::EINTR) => {}
            Err(e) => return Err(WardenError::syscall(format!("waiting for child {child}"), e)),
        }
    };
    signals::flush_stdin();
    let code = exit_status(status);
    tracing::info!(child = child.as_raw(), ?status, code, "joined process terminated");
    Ok(code)
}
