//! Effective-identity scoping for a setuid-root binary.
//!
//! The process normally runs with its effective uid/gid equal to the
//! caller's real ids. Privileged work happens inside an [`Elevated`] scope,
//! which switches the effective ids to root on creation and back to the
//! caller's ids when it is restored or dropped.
//!
//! Only one scope may be outstanding at a time. The guard is `!Send`, so
//! it cannot leave the thread that created it.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::unistd::{Gid, Uid, getgid, getuid, setegid, seteuid};
use warden_common::diag;
use warden_common::error::{Result, WardenError};

static ELEVATED: AtomicBool = AtomicBool::new(false);

/// Switches the effective ids to the caller's real ids.
///
/// Called once at startup so that nothing runs as root outside a scope.
///
/// # Errors
///
/// Returns an error if `setegid(2)` or `seteuid(2)` fails.
pub fn drop_to_user() -> Result<()> {
    lower()
}

/// Runs `f` inside an elevated scope and restores the caller's identity
/// afterwards, whether `f` succeeded or not.
///
/// # Errors
///
/// Returns the error from elevation, from `f`, or from restoring.
pub fn with_root<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    let scope = Elevated::acquire()?;
    let outcome = f();
    scope.restore()?;
    outcome
}

/// Guard holding the root identity.
#[derive(Debug)]
#[must_use = "dropping the scope immediately restores the caller's identity"]
pub struct Elevated {
    _not_send: PhantomData<*const ()>,
}

impl Elevated {
    /// Raises the effective uid and gid to 0.
    ///
    /// # Errors
    ///
    /// Returns an error if a scope is already outstanding or if the kernel
    /// refuses the identity switch. Callers must treat this as fatal.
    pub fn acquire() -> Result<Self> {
        if ELEVATED.swap(true, Ordering::SeqCst) {
            return Err(WardenError::Privilege {
                message: "root identity is already held".into(),
            });
        }
        if let Err(e) = raise() {
            // seteuid may have succeeded before setegid failed.
            if let Err(rollback) = lower() {
                diag::warning(format!("cannot restore identity after failed elevation: {rollback}"));
            }
            ELEVATED.store(false, Ordering::SeqCst);
            return Err(e);
        }
        tracing::trace!("effective identity raised to root");
        Ok(Self {
            _not_send: PhantomData,
        })
    }

    /// Ends the scope, returning to the caller's identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity could not be lowered.
    pub fn restore(self) -> Result<()> {
        std::mem::forget(self);
        ELEVATED.store(false, Ordering::SeqCst);
        lower()?;
        tracing::trace!("effective identity restored");
        Ok(())
    }

    /// Ends the scope without switching back.
    ///
    /// Used only after the real, effective and saved ids have all been set
    /// to the caller's ids, which makes a restore meaningless.
    pub fn relinquish(self) {
        std::mem::forget(self);
        ELEVATED.store(false, Ordering::SeqCst);
    }
}

impl Drop for Elevated {
    #[allow(clippy::print_stderr)]
    fn drop(&mut self) {
        ELEVATED.store(false, Ordering::SeqCst);
        if let Err(e) = lower() {
            // Continuing as root past a scope boundary is never acceptable.
            eprintln!("Error: {e}");
            std::process::abort();
        }
    }
}

fn raise() -> Result<()> {
    seteuid(Uid::from_raw(0)).map_err(|e| WardenError::syscall("seteuid(0)", e))?;
    setegid(Gid::from_raw(0)).map_err(|e| WardenError::syscall("setegid(0)", e))?;
    Ok(())
}

fn lower() -> Result<()> {
    let gid = getgid();
    let uid = getuid();
    setegid(gid).map_err(|e| WardenError::syscall(format!("setegid({gid})"), e))?;
    seteuid(uid).map_err(|e| WardenError::syscall(format!("seteuid({uid})"), e))?;
    Ok(())
}
