//! Unified error types for the warden workspace.
//!
//! Every fallible operation returns [`Result`]; only the binary's top-level
//! handler (and the forked join child, which has no caller) turns an error
//! into a process exit.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum WardenError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The caller is not allowed to perform the operation.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// The pid does not resolve to a sandbox managed by this tool.
    #[error("no valid sandbox at pid {pid}: {reason}")]
    InvalidTarget {
        /// Pid supplied by the caller (after child substitution).
        pid: i32,
        /// Why the pid was rejected.
        reason: String,
    },

    /// A privileged kernel primitive failed during setup.
    #[error("{operation} failed: {source}")]
    Syscall {
        /// Human-readable description of the attempted operation.
        operation: String,
        /// Errno reported by the kernel.
        source: nix::errno::Errno,
    },

    /// A run-state file exists but its content cannot be parsed.
    #[error("malformed sandbox state in {path}: {message}")]
    Malformed {
        /// File holding the malformed content.
        path: PathBuf,
        /// What was wrong with it.
        message: String,
    },

    /// A freshly created node does not carry the owner, mode, or device
    /// number that was requested.
    #[error("integrity check failed for {path}: {message}")]
    Integrity {
        /// Node that failed the check.
        path: PathBuf,
        /// Observed mismatch.
        message: String,
    },

    /// The effective identity could not be switched as required.
    #[error("privilege scope: {message}")]
    Privilege {
        /// What went wrong.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl WardenError {
    /// Builds a [`WardenError::Syscall`] from an operation label and errno.
    pub fn syscall(operation: impl Into<String>, source: nix::errno::Errno) -> Self {
        Self::Syscall {
            operation: operation.into(),
            source,
        }
    }

    /// Builds a [`WardenError::Io`] for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`WardenError::Malformed`] for the given path.
    pub fn malformed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, WardenError>;
