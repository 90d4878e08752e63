//! User-facing diagnostics for degraded conditions.

use std::fmt::Display;

/// Reports a recoverable condition.
///
/// The message is emitted as a `tracing` warning and printed to stderr as
/// `Warning: ...`. Control flow is never affected.
#[allow(clippy::print_stderr)]
pub fn warning(message: impl Display) {
    tracing::warn!("{message}");
    eprintln!("Warning: {message}");
}
