//! Terminal hygiene around a join session.

use std::io::IsTerminal;

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::sys::termios::{FlushArg, tcflush};
use warden_common::error::{Result, WardenError};

extern "C" fn flush_and_exit(sig: libc::c_int) {
    // SAFETY: tcflush and _exit are async-signal-safe.
    unsafe {
        let _ = libc::tcflush(libc::STDIN_FILENO, libc::TCIFLUSH);
        libc::_exit(sig);
    }
}

/// Makes SIGTERM discard pending terminal input before the process exits.
///
/// # Errors
///
/// Returns an error if the handler cannot be installed.
pub fn install_sigterm_flush() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(flush_and_exit),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: the handler only calls async-signal-safe functions.
    let _previous = unsafe { sigaction(Signal::SIGTERM, &action) }
        .map_err(|e| WardenError::syscall("installing SIGTERM handler", e))?;
    Ok(())
}

/// Discards unread terminal input, if stdin is a terminal.
pub fn flush_stdin() {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return;
    }
    if let Err(e) = tcflush(stdin, FlushArg::TCIFLUSH) {
        tracing::debug!(error = %e, "terminal input not flushed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flushing_non_terminal_stdin_is_harmless() {
        flush_stdin();
    }
}
