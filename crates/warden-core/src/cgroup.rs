//! Cgroup membership and CPU affinity of a running sandbox.
//!
//! A sandbox records its placement in two run files: the cgroup `tasks`
//! (or `cgroup.procs`) file it was attached to, and a hexadecimal CPU
//! mask. Joining processes load both and apply them to themselves.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use nix::sched::{CpuSet, sched_setaffinity};
use nix::unistd::Pid;
use warden_common::constants::CGROUP_ROOT;
use warden_common::error::{Result, WardenError};

const MEMBERSHIP_FILES: [&str; 2] = ["tasks", "cgroup.procs"];

fn read_first_line(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path).map_err(|e| WardenError::io(path, e))?;
    Ok(raw.lines().next().unwrap_or_default().trim().to_owned())
}

/// Parses a cgroup run file into the membership file it names.
///
/// # Errors
///
/// Returns [`WardenError::Malformed`] unless the file names an absolute
/// `tasks` or `cgroup.procs` file below `/sys/fs/cgroup` with no `..`
/// components.
pub fn load_cgroup(path: &Path) -> Result<PathBuf> {
    let line = read_first_line(path)?;
    let target = PathBuf::from(&line);
    let escapes = target.components().any(|c| c == Component::ParentDir);
    let membership = target
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| MEMBERSHIP_FILES.contains(&n));
    if !target.starts_with(CGROUP_ROOT) || escapes || !membership {
        return Err(WardenError::malformed(
            path,
            format!("invalid cgroup membership file {line:?}"),
        ));
    }
    tracing::debug!(cgroup = %target.display(), "cgroup configuration loaded");
    Ok(target)
}

/// Adds the calling process to the cgroup whose membership file is `tasks`.
///
/// # Errors
///
/// Returns an error if the membership file cannot be written.
pub fn set_cgroup(tasks: &Path) -> Result<()> {
    let pid = std::process::id();
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(tasks)
        .map_err(|e| WardenError::io(tasks, e))?;
    writeln!(file, "{pid}").map_err(|e| WardenError::io(tasks, e))?;
    tracing::info!(pid, cgroup = %tasks.display(), "joined sandbox cgroup");
    Ok(())
}

/// Parses a CPU run file holding a hexadecimal affinity mask.
///
/// # Errors
///
/// Returns [`WardenError::Malformed`] if the mask is not hexadecimal or
/// selects no CPU.
pub fn load_cpu(path: &Path) -> Result<u64> {
    let line = read_first_line(path)?;
    let digits = line.trim_start_matches("0x");
    let mask = u64::from_str_radix(digits, 16)
        .map_err(|e| WardenError::malformed(path, format!("invalid CPU mask {line:?}: {e}")))?;
    if mask == 0 {
        return Err(WardenError::malformed(path, "CPU mask selects no CPU"));
    }
    tracing::debug!(mask = format_args!("{mask:x}"), "CPU configuration loaded");
    Ok(mask)
}

/// CPU numbers selected by `mask`.
#[must_use]
pub fn cpus_in(mask: u64) -> Vec<usize> {
    (0..64).filter(|cpu| mask & (1_u64 << cpu) != 0).collect()
}

/// Pins the calling process to the CPUs selected by `mask`.
///
/// # Errors
///
/// Returns an error if the CPU set cannot be built or applied.
pub fn set_cpu_affinity(mask: u64) -> Result<()> {
    let mut set = CpuSet::new();
    for cpu in cpus_in(mask) {
        set.set(cpu)
            .map_err(|e| WardenError::syscall(format!("selecting CPU {cpu}"), e))?;
    }
    sched_setaffinity(Pid::from_raw(0), &set)
        .map_err(|e| WardenError::syscall("sched_setaffinity", e))?;
    tracing::debug!(mask = format_args!("{mask:x}"), "CPU affinity set");
    Ok(())
}
