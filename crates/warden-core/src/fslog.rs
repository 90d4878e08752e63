//! Filesystem audit log.
//!
//! Every node and mount created while building a sandbox is recorded as
//! an `"<action> <path>"` line. The log is best-effort: recording and
//! flushing never fail the operation being logged.

use std::io::Write;
use std::path::Path;

/// Append-only list of filesystem actions.
#[derive(Debug, Default, Clone)]
pub struct FsLog {
    entries: Vec<String>,
}

impl FsLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a free-form message.
    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(target: "warden::fslog", "{message}");
        self.entries.push(message);
    }

    /// Records an action on a path.
    pub fn log2(&mut self, action: &str, path: &Path) {
        self.log(format!("{action} {}", path.display()));
    }

    /// All recorded lines, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Appends the recorded lines to `path`.
    pub fn flush(&self, path: &Path) {
        let written = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| {
                self.entries
                    .iter()
                    .try_for_each(|line| writeln!(file, "{line}"))
            });
        if let Err(e) = written {
            tracing::debug!(path = %path.display(), error = %e, "audit log not written");
        }
    }
}
