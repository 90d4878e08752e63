//! Linux capability bounding-set management.
//!
//! A joined command inherits the bounding set the target sandbox runs
//! with. Capabilities outside the recorded mask are dropped one by one;
//! a dropped bounding capability can never be regained by the process or
//! anything it executes.

use std::path::Path;

use nix::errno::Errno;
use warden_common::error::{Result, WardenError};

const CAP_LAST_CAP_FILE: &str = "/proc/sys/kernel/cap_last_cap";

/// Highest capability number assumed when the kernel does not report one.
const FALLBACK_LAST_CAP: u32 = 63;

/// Linux capability identifiers used directly by warden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Bypass file read, write, and execute permission checks.
    DacOverride,
    /// Bypass file read and directory search permission checks.
    DacReadSearch,
}

impl Capability {
    /// Kernel capability number.
    #[must_use]
    pub const fn number(self) -> u32 {
        match self {
            Self::DacOverride => 1,
            Self::DacReadSearch => 2,
        }
    }
}

/// Reads the highest capability number supported by the running kernel.
pub fn last_cap() -> u32 {
    read_last_cap(Path::new(CAP_LAST_CAP_FILE)).unwrap_or(FALLBACK_LAST_CAP)
}

fn read_last_cap(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .map(|n: u32| n.min(FALLBACK_LAST_CAP))
}

/// Capabilities in `0..=last` that are absent from `mask`.
#[must_use]
pub fn dropped_by(mask: u64, last: u32) -> Vec<u32> {
    (0..=last.min(FALLBACK_LAST_CAP))
        .filter(|cap| mask & (1_u64 << cap) == 0)
        .collect()
}

/// Installs `mask` as the capability bounding set of the calling process.
///
/// # Errors
///
/// Returns an error if the kernel refuses to drop a capability it knows.
pub fn caps_set(mask: u64) -> Result<()> {
    let dropped = dropped_by(mask, last_cap());
    for cap in &dropped {
        drop_bounding(*cap)?;
    }
    tracing::debug!(mask = format_args!("{mask:016x}"), dropped = dropped.len(), "capability bounding set applied");
    Ok(())
}

/// Drops the discretionary-access-control override capabilities.
///
/// Without them a root child can no longer read or write arbitrary
/// root-owned files it stumbles upon inside the sandbox.
///
/// # Errors
///
/// Returns an error if the kernel refuses either drop.
pub fn caps_drop_dac_override() -> Result<()> {
    drop_bounding(Capability::DacOverride.number())?;
    drop_bounding(Capability::DacReadSearch.number())?;
    tracing::debug!("DAC override capabilities dropped");
    Ok(())
}

fn drop_bounding(cap: u32) -> Result<()> {
    // SAFETY: PR_CAPBSET_DROP takes a capability number and touches no
    // caller memory.
    let rc = unsafe { libc::prctl(libc::PR_CAPBSET_DROP, libc::c_ulong::from(cap), 0, 0, 0) };
    if rc == 0 {
        return Ok(());
    }
    match Errno::last() {
        // Capability unknown to this kernel: nothing to drop.
        Errno::EINVAL => Ok(()),
        errno => Err(WardenError::syscall(format!("dropping capability {cap}"), errno)),
    }
}
