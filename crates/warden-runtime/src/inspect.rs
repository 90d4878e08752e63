//! Recovery of a running sandbox's security policy from `/proc`.
//!
//! The target's status file yields its capability bounding set and seccomp
//! mode. Its run directory, reached through `/proc/<pid>/root`, holds the
//! remaining facets. Each facet file is optional; a file that exists but
//! cannot be parsed means the sandbox state is inconsistent and the join
//! is refused.

use std::path::{Path, PathBuf};

use warden_common::config::RunPaths;
use warden_common::error::{Result, WardenError};
use warden_common::types::{CommandLine, SandboxRecord};
use warden_core::cgroup;

use crate::procfs::{ProcFs, status_field};

/// Seccomp mode reported for filter-based policies.
const SECCOMP_MODE_FILTER: u32 = 2;

/// Highest valid umask.
const MAX_UMASK: u32 = 0o777;

/// Capability and seccomp facets of a status file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFacets {
    /// `CapBnd:` mask, when present.
    pub caps: Option<u64>,
    /// Whether `Seccomp:` reports filter mode.
    pub seccomp: bool,
}

/// Parses `CapBnd:` and `Seccomp:` out of a status file.
///
/// # Errors
///
/// Returns [`WardenError::Malformed`] if either line holds an invalid number.
pub fn parse_status(status: &str, path: &Path) -> Result<StatusFacets> {
    let caps = status_field(status, "CapBnd")
        .map(|raw| {
            u64::from_str_radix(raw, 16)
                .map_err(|e| WardenError::malformed(path, format!("invalid CapBnd {raw:?}: {e}")))
        })
        .transpose()?;
    let seccomp = status_field(status, "Seccomp")
        .map(|raw| {
            raw.parse::<u32>()
                .map_err(|e| WardenError::malformed(path, format!("invalid Seccomp {raw:?}: {e}")))
        })
        .transpose()?
        .is_some_and(|mode| mode == SECCOMP_MODE_FILTER);
    Ok(StatusFacets { caps, seccomp })
}

/// Parses an octal umask file.
///
/// # Errors
///
/// Returns [`WardenError::Malformed`] if the content is not an octal
/// value of at most `777`.
pub fn parse_umask(raw: &str, path: &Path) -> Result<u32> {
    let text = raw.trim();
    u32::from_str_radix(text, 8)
        .ok()
        .filter(|mask| *mask <= MAX_UMASK)
        .ok_or_else(|| WardenError::malformed(path, format!("invalid umask {text:?}")))
}

/// Decides from the first uid map line whether the sandbox maps its root
/// to a non-root host uid.
///
/// An empty map means no mapping was written and yields `false`.
///
/// # Errors
///
/// Returns [`WardenError::Malformed`] if the first line does not start
/// with two numbers.
pub fn parse_uid_map(raw: &str, path: &Path) -> Result<bool> {
    let Some(line) = raw.lines().find(|l| !l.trim().is_empty()) else {
        return Ok(false);
    };
    let mut numbers = line.split_whitespace().map(str::parse::<u32>);
    match (numbers.next(), numbers.next()) {
        (Some(Ok(inside)), Some(Ok(outside))) => Ok(inside != 0 || outside != 0),
        _ => Err(WardenError::malformed(path, format!("invalid uid map line {line:?}"))),
    }
}

/// Reads `path` if it exists.
fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(WardenError::io(path, e)),
    }
}

/// Reconstructs sandbox policy from a procfs.
#[derive(Debug, Clone)]
pub struct SandboxInspector<'a> {
    proc: &'a ProcFs,
    paths: &'a RunPaths,
}

impl<'a> SandboxInspector<'a> {
    /// Creates an inspector reading `proc` and the run layout `paths`.
    #[must_use]
    pub const fn new(proc: &'a ProcFs, paths: &'a RunPaths) -> Self {
        Self { proc, paths }
    }

    fn run_file(&self, pid: i32, file: &Path) -> PathBuf {
        RunPaths::under(&self.proc.root_dir(pid), file)
    }

    /// Builds the record for a join of `pid`.
    ///
    /// When `replicate_policy` is false (root callers), only the umask is
    /// captured and every other facet stays disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the status file cannot be read or if any
    /// existing facet file is malformed.
    pub fn inspect(
        &self,
        pid: i32,
        command: CommandLine,
        replicate_policy: bool,
    ) -> Result<SandboxRecord> {
        let mut record = SandboxRecord::unrestricted(pid, self.proc.root_dir(pid), command);
        record.umask = self.umask(pid)?;
        if !replicate_policy {
            tracing::debug!(pid, "root caller, sandbox policy not replicated");
            return Ok(record);
        }

        let status_path = self.proc.status_path(pid);
        let facets = parse_status(&self.proc.status(pid)?, &status_path)?;
        record.caps = facets.caps;
        record.seccomp = facets.seccomp;
        record.cpus = self.cpus(pid)?;
        record.cgroup = self.cgroup(pid)?;
        record.no_groups = self.run_file(pid, &self.paths.groups_cfg()).exists();
        record.user_namespace = self.user_namespace(pid)?;

        tracing::info!(
            pid,
            caps = ?record.caps.map(|c| format!("{c:016x}")),
            seccomp = record.seccomp,
            cgroup = ?record.cgroup,
            cpus = ?record.cpus,
            no_groups = record.no_groups,
            user_namespace = record.user_namespace,
            "sandbox policy recovered"
        );
        Ok(record)
    }

    fn cpus(&self, pid: i32) -> Result<Option<u64>> {
        let file = self.run_file(pid, &self.paths.cpu_cfg());
        if file.exists() {
            cgroup::load_cpu(&file).map(Some)
        } else {
            Ok(None)
        }
    }

    fn cgroup(&self, pid: i32) -> Result<Option<PathBuf>> {
        let file = self.run_file(pid, &self.paths.cgroup_cfg());
        if file.exists() {
            cgroup::load_cgroup(&file).map(Some)
        } else {
            Ok(None)
        }
    }

    fn umask(&self, pid: i32) -> Result<Option<u32>> {
        let file = self.run_file(pid, &self.paths.umask_file());
        read_optional(&file)?
            .map(|raw| parse_umask(&raw, &file))
            .transpose()
    }

    fn user_namespace(&self, pid: i32) -> Result<bool> {
        if !self.proc.user_namespaces_available() {
            return Ok(false);
        }
        let file = self.proc.uid_map_path(pid);
        let Some(raw) = read_optional(&file)? else {
            return Ok(false);
        };
        let remapped = parse_uid_map(&raw, &file)?;
        if remapped {
            tracing::debug!(pid, "sandbox maps root away, joining its user namespace");
        }
        Ok(remapped)
    }
}
