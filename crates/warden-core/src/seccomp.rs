//! Reinstatement of precompiled seccomp programs.
//!
//! A sandbox stores its compiled BPF programs as raw arrays of
//! `struct sock_filter` in its run directory. Joining processes load the
//! same programs so they run under the same syscall policy.
//!
//! Filter loading is compiled in with the `seccomp` feature; without it
//! [`AVAILABLE`] is false and callers skip this facility.

use std::path::Path;

use warden_common::error::{Result, WardenError};

/// Whether seccomp support is compiled in.
pub const AVAILABLE: bool = cfg!(feature = "seccomp");

/// Size in bytes of one encoded `struct sock_filter`.
pub const INSTRUCTION_SIZE: usize = 8;

/// Kernel limit on the number of instructions in one program.
pub const MAX_INSTRUCTIONS: usize = 4096;

/// One classic BPF instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Opcode.
    pub code: u16,
    /// Jump offset when the condition holds.
    pub jt: u8,
    /// Jump offset when the condition fails.
    pub jf: u8,
    /// Generic operand.
    pub k: u32,
}

/// Decodes a native-endian `sock_filter` array.
///
/// # Errors
///
/// Returns [`WardenError::Malformed`] for empty, truncated, or oversized
/// programs.
pub fn decode_program(bytes: &[u8], path: &Path) -> Result<Vec<Instruction>> {
    if bytes.is_empty() || bytes.len() % INSTRUCTION_SIZE != 0 {
        return Err(WardenError::malformed(
            path,
            format!("{} bytes is not a whole number of BPF instructions", bytes.len()),
        ));
    }
    let count = bytes.len() / INSTRUCTION_SIZE;
    if count > MAX_INSTRUCTIONS {
        return Err(WardenError::malformed(
            path,
            format!("{count} instructions exceed the kernel limit of {MAX_INSTRUCTIONS}"),
        ));
    }
    Ok(bytes
        .chunks_exact(INSTRUCTION_SIZE)
        .map(|raw| Instruction {
            code: u16::from_ne_bytes([raw[0], raw[1]]),
            jt: raw[2],
            jf: raw[3],
            k: u32::from_ne_bytes([raw[4], raw[5], raw[6], raw[7]]),
        })
        .collect())
}

/// Reads the protocol list a sandbox was started with.
///
/// Returns `None` when the file is missing or blank, which means no
/// protocol filter is active.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn protocol_filter_load(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let list = raw.trim();
            Ok((!list.is_empty()).then(|| list.to_owned()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(WardenError::io(path, e)),
    }
}

/// Loads a compiled seccomp program from `path` and attaches it to the
/// calling thread.
///
/// # Errors
///
/// Returns an error if the file cannot be read, does not hold a valid
/// program, or the kernel rejects it.
#[cfg(feature = "seccomp")]
pub fn seccomp_load(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path).map_err(|e| WardenError::io(path, e))?;
    let program = decode_program(&bytes, path)?;
    let mut filters: Vec<libc::sock_filter> = program
        .iter()
        .map(|i| libc::sock_filter {
            code: i.code,
            jt: i.jt,
            jf: i.jf,
            k: i.k,
        })
        .collect();
    let len = u16::try_from(filters.len()).map_err(|_| {
        WardenError::malformed(path, "program length does not fit in sock_fprog")
    })?;
    let fprog = libc::sock_fprog {
        len,
        filter: filters.as_mut_ptr(),
    };

    // SAFETY: fprog points at `filters`, which outlives the call; the
    // kernel copies the program before returning.
    let rc = unsafe {
        libc::prctl(
            libc::PR_SET_SECCOMP,
            libc::c_ulong::from(libc::SECCOMP_MODE_FILTER),
            &raw const fprog,
            0,
            0,
        )
    };
    if rc != 0 {
        return Err(WardenError::syscall(
            format!("installing seccomp filter {}", path.display()),
            nix::errno::Errno::last(),
        ));
    }
    tracing::debug!(path = %path.display(), instructions = len, "seccomp filter installed");
    Ok(())
}

/// Seccomp support is not compiled in; nothing is loaded.
///
/// # Errors
///
/// Never fails.
#[cfg(not(feature = "seccomp"))]
pub fn seccomp_load(path: &Path) -> Result<()> {
    tracing::debug!(path = %path.display(), "seccomp support not compiled in");
    Ok(())
}
