//! Filesystem mutations used to build a private `/dev`.
//!
//! [`DevFs`] is the seam between the build sequence and the kernel:
//! [`KernelDevFs`] performs real mounts and `mknod(2)` calls, while tests
//! substitute a recording implementation.

use std::fs::Permissions;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use nix::mount::{MsFlags, mount};
use nix::sys::stat::{Mode, SFlag, makedev, mknod};
use warden_common::diag;
use warden_common::error::{Result, WardenError};

/// Mutating operations issued while building a private `/dev`.
pub trait DevFs {
    /// Bind-mounts `source` on `target`, recursively when asked.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    fn bind(&self, source: &Path, target: &Path, recursive: bool) -> Result<()>;

    /// Remounts an existing bind mount read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the remount fails.
    fn remount_readonly(&self, target: &Path) -> Result<()>;

    /// Mounts a `tmpfs` with the given options on `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    fn mount_tmpfs(&self, target: &Path, options: &str) -> Result<()>;

    /// Mounts a `devpts` instance with the given options on `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    fn mount_devpts(&self, target: &Path, options: &str) -> Result<()>;

    /// Creates a root-owned character device node with exactly `mode`.
    ///
    /// # Errors
    ///
    /// Returns an error if the node cannot be created or does not carry
    /// the requested owner, mode, and device number afterwards.
    fn mknod_char(&self, path: &Path, mode: u32, major: u64, minor: u64) -> Result<()>;

    /// Creates a directory (if missing) and sets its mode and owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or adjusted.
    fn mkdir_attr(&self, path: &Path, mode: u32, uid: u32, gid: u32) -> Result<()>;

    /// Creates an empty file and sets its mode and owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or adjusted.
    fn create_file_attr(&self, path: &Path, mode: u32, uid: u32, gid: u32) -> Result<()>;

    /// Creates a root-owned symbolic link `link` pointing at `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be created.
    fn symlink(&self, target: &Path, link: &Path) -> Result<()>;
}

/// [`DevFs`] backed by real system calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelDevFs;

fn set_attr(path: &Path, mode: u32, uid: u32, gid: u32) -> Result<()> {
    std::fs::set_permissions(path, Permissions::from_mode(mode))
        .map_err(|e| WardenError::io(path, e))?;
    std::os::unix::fs::chown(path, Some(uid), Some(gid)).map_err(|e| WardenError::io(path, e))
}

impl DevFs for KernelDevFs {
    fn bind(&self, source: &Path, target: &Path, recursive: bool) -> Result<()> {
        let mut flags = MsFlags::MS_BIND;
        if recursive {
            flags |= MsFlags::MS_REC;
        }
        mount(Some(source), target, None::<&str>, flags, None::<&str>).map_err(|e| {
            WardenError::syscall(
                format!("bind-mounting {} on {}", source.display(), target.display()),
                e,
            )
        })
    }

    fn remount_readonly(&self, target: &Path) -> Result<()> {
        mount(
            None::<&str>,
            target,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
            None::<&str>,
        )
        .map_err(|e| WardenError::syscall(format!("remounting {} read-only", target.display()), e))
    }

    fn mount_tmpfs(&self, target: &Path, options: &str) -> Result<()> {
        mount(
            Some("tmpfs"),
            target,
            Some("tmpfs"),
            MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME | MsFlags::MS_REC,
            Some(options),
        )
        .map_err(|e| WardenError::syscall(format!("mounting tmpfs on {}", target.display()), e))
    }

    fn mount_devpts(&self, target: &Path, options: &str) -> Result<()> {
        mount(
            Some("devpts"),
            target,
            Some("devpts"),
            MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
            Some(options),
        )
        .map_err(|e| WardenError::syscall(format!("mounting devpts on {}", target.display()), e))
    }

    fn mknod_char(&self, path: &Path, mode: u32, major: u64, minor: u64) -> Result<()> {
        let dev = makedev(major, minor);
        mknod(path, SFlag::S_IFCHR, Mode::from_bits_truncate(mode), dev)
            .map_err(|e| WardenError::syscall(format!("creating device {}", path.display()), e))?;
        // mknod honours the umask; force the exact mode.
        std::fs::set_permissions(path, Permissions::from_mode(mode))
            .map_err(|e| WardenError::io(path, e))?;
        verify_node(path, mode, dev)
    }

    fn mkdir_attr(&self, path: &Path, mode: u32, uid: u32, gid: u32) -> Result<()> {
        match std::fs::create_dir(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(WardenError::io(path, e)),
        }
        set_attr(path, mode, uid, gid)
    }

    fn create_file_attr(&self, path: &Path, mode: u32, uid: u32, gid: u32) -> Result<()> {
        let _file = std::fs::File::create(path).map_err(|e| WardenError::io(path, e))?;
        set_attr(path, mode, uid, gid)
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        std::os::unix::fs::symlink(target, link).map_err(|e| WardenError::io(link, e))?;
        if let Err(e) = std::os::unix::fs::lchown(link, Some(0), Some(0)) {
            diag::warning(format!("cannot set ownership of {}: {e}", link.display()));
        }
        Ok(())
    }
}

/// Checks that `path` is a character device owned by root with exactly
/// `mode` and device number `dev`. The owning group is not checked.
///
/// # Errors
///
/// Returns [`WardenError::Integrity`] describing the first mismatch.
pub fn verify_node(path: &Path, mode: u32, dev: u64) -> Result<()> {
    use std::os::unix::fs::FileTypeExt;

    let meta = std::fs::symlink_metadata(path).map_err(|e| WardenError::io(path, e))?;
    let found = NodeStat {
        char_device: meta.file_type().is_char_device(),
        uid: meta.uid(),
        mode: meta.mode() & 0o7777,
        rdev: meta.rdev(),
    };
    match found.mismatch(mode, dev) {
        None => Ok(()),
        Some(message) => Err(WardenError::Integrity {
            path: path.to_path_buf(),
            message,
        }),
    }
}

/// The attributes [`verify_node`] compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeStat {
    char_device: bool,
    uid: u32,
    mode: u32,
    rdev: u64,
}

impl NodeStat {
    fn mismatch(self, mode: u32, dev: u64) -> Option<String> {
        if !self.char_device {
            Some("not a character device".into())
        } else if self.uid != 0 {
            Some(format!("owned by uid {}", self.uid))
        } else if self.mode != mode {
            Some(format!("mode {:o}, expected {mode:o}", self.mode))
        } else if self.rdev != dev {
            Some(format!("device {:#x}, expected {dev:#x}", self.rdev))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::FileTypeExt;

    fn host_null_is_standard() -> bool {
        std::fs::symlink_metadata("/dev/null").is_ok_and(|m| {
            m.file_type().is_char_device() && m.uid() == 0 && m.rdev() == makedev(1, 3)
        })
    }

    #[test]
    fn verify_accepts_matching_node() {
        if !host_null_is_standard() {
            return;
        }
        let mode = std::fs::metadata("/dev/null").expect("stat").mode() & 0o7777;
        verify_node(Path::new("/dev/null"), mode, makedev(1, 3)).expect("matches");
    }

    #[test]
    fn verify_rejects_wrong_device_number() {
        if !host_null_is_standard() {
            return;
        }
        let mode = std::fs::metadata("/dev/null").expect("stat").mode() & 0o7777;
        assert!(matches!(
            verify_node(Path::new("/dev/null"), mode, makedev(1, 5)),
            Err(WardenError::Integrity { .. })
        ));
    }

    #[test]
    fn root_owned_node_passes_whatever_its_group() {
        // /dev/tty nodes are commonly group tty.
        let node = NodeStat {
            char_device: true,
            uid: 0,
            mode: 0o666,
            rdev: makedev(5, 0),
        };
        assert_eq!(node.mismatch(0o666, makedev(5, 0)), None);
        let foreign = NodeStat { uid: 1000, ..node };
        assert_eq!(foreign.mismatch(0o666, makedev(5, 0)), Some("owned by uid 1000".into()));
        let loose = NodeStat { mode: 0o644, ..node };
        assert!(loose.mismatch(0o666, makedev(5, 0)).is_some());
    }

    #[test]
    fn verify_rejects_regular_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("zero");
        std::fs::write(&file, b"").expect("write");
        assert!(matches!(
            verify_node(&file, 0o666, makedev(1, 5)),
            Err(WardenError::Integrity { .. })
        ));
    }
}
