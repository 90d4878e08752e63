//! Read-only view of a `/proc` tree.
//!
//! Every lookup is relative to a configurable mount point so the same
//! code reads the live `/proc` and fixture trees in tests.

use std::path::{Path, PathBuf};

use warden_common::error::{Result, WardenError};

/// Default mount point of procfs.
pub const PROC_ROOT: &str = "/proc";

/// Handle on a mounted procfs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new(PROC_ROOT)
    }
}

impl ProcFs {
    /// Uses the procfs mounted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Mount point of this procfs.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `/proc/<pid>`.
    #[must_use]
    pub fn pid_dir(&self, pid: i32) -> PathBuf {
        self.root.join(pid.to_string())
    }

    /// `/proc/<pid>/root`, the process's view of `/`.
    #[must_use]
    pub fn root_dir(&self, pid: i32) -> PathBuf {
        self.pid_dir(pid).join("root")
    }

    /// `/proc/<pid>/status`.
    #[must_use]
    pub fn status_path(&self, pid: i32) -> PathBuf {
        self.pid_dir(pid).join("status")
    }

    /// `/proc/<pid>/uid_map`.
    #[must_use]
    pub fn uid_map_path(&self, pid: i32) -> PathBuf {
        self.pid_dir(pid).join("uid_map")
    }

    fn read_pid_file(&self, pid: i32, name: &str) -> Result<String> {
        let path = self.pid_dir(pid).join(name);
        std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => WardenError::NotFound {
                kind: "process",
                id: pid.to_string(),
            },
            _ => WardenError::io(path, e),
        })
    }

    /// Command name of `pid`.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::NotFound`] if the process does not exist.
    pub fn comm(&self, pid: i32) -> Result<String> {
        Ok(self.read_pid_file(pid, "comm")?.trim_end().to_owned())
    }

    /// Content of `/proc/<pid>/status`.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::NotFound`] if the process does not exist.
    pub fn status(&self, pid: i32) -> Result<String> {
        self.read_pid_file(pid, "status")
    }

    fn status_number(&self, pid: i32, key: &str) -> Result<u64> {
        let status = self.status(pid)?;
        let path = self.status_path(pid);
        let value = status_field(&status, key)
            .ok_or_else(|| WardenError::malformed(&path, format!("no {key} line")))?;
        value
            .split_whitespace()
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| WardenError::malformed(&path, format!("invalid {key} value {value:?}")))
    }

    /// Parent pid of `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process does not exist or its status is malformed.
    pub fn ppid(&self, pid: i32) -> Result<i32> {
        let ppid = self.status_number(pid, "PPid")?;
        i32::try_from(ppid)
            .map_err(|_| WardenError::malformed(self.status_path(pid), "PPid out of range"))
    }

    /// Real uid of `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process does not exist or its status is malformed.
    pub fn uid(&self, pid: i32) -> Result<u32> {
        let uid = self.status_number(pid, "Uid")?;
        u32::try_from(uid).map_err(|_| WardenError::malformed(self.status_path(pid), "Uid out of range"))
    }

    /// Pids whose parent is `pid`, in ascending order.
    ///
    /// Processes that vanish while scanning are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the procfs root cannot be listed.
    pub fn children(&self, pid: i32) -> Result<Vec<i32>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| WardenError::io(&self.root, e))?;
        let mut children: Vec<i32> = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse::<i32>().ok()))
            .filter(|candidate| self.ppid(*candidate).is_ok_and(|ppid| ppid == pid))
            .collect();
        children.sort_unstable();
        Ok(children)
    }

    /// Whether the kernel exposes user namespaces and id maps.
    #[must_use]
    pub fn user_namespaces_available(&self) -> bool {
        let this = self.root.join("self");
        this.join("ns").join("user").exists()
            && this.join("uid_map").exists()
            && this.join("gid_map").exists()
    }
}

/// Value of a `Key:` line in a status file, without the key.
#[must_use]
pub fn status_field<'a>(status: &'a str, key: &str) -> Option<&'a str> {
    status.lines().find_map(|line| {
        line.strip_prefix(key)
            .and_then(|rest| rest.strip_prefix(':'))
            .map(str::trim)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_process(root: &Path, pid: i32, comm: &str, ppid: i32, uid: u32) {
        let dir = root.join(pid.to_string());
        std::fs::create_dir_all(&dir).expect("pid dir");
        std::fs::write(dir.join("comm"), format!("{comm}\n")).expect("comm");
        std::fs::write(
            dir.join("status"),
            format!("Name:\t{comm}\nPPid:\t{ppid}\nUid:\t{uid}\t{uid}\t{uid}\t{uid}\n"),
        )
        .expect("status");
    }

    #[test]
    fn reads_comm_ppid_and_uid() {
        let dir = tempfile::tempdir().expect("tempdir");
        add_process(dir.path(), 10, "warden", 1, 1000);
        let proc = ProcFs::new(dir.path());
        assert_eq!(proc.comm(10).expect("comm"), "warden");
        assert_eq!(proc.ppid(10).expect("ppid"), 1);
        assert_eq!(proc.uid(10).expect("uid"), 1000);
    }

    #[test]
    fn missing_process_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let proc = ProcFs::new(dir.path());
        assert!(matches!(proc.comm(99), Err(WardenError::NotFound { .. })));
    }

    #[test]
    fn children_are_sorted_and_filtered() {
        let dir = tempfile::tempdir().expect("tempdir");
        add_process(dir.path(), 10, "warden", 1, 0);
        add_process(dir.path(), 31, "bash", 10, 0);
        add_process(dir.path(), 12, "bash", 10, 0);
        add_process(dir.path(), 40, "other", 2, 0);
        std::fs::create_dir(dir.path().join("self")).expect("self");
        let proc = ProcFs::new(dir.path());
        assert_eq!(proc.children(10).expect("children"), vec![12, 31]);
    }

    #[test]
    fn status_field_requires_exact_key() {
        let status = "CapInh:\t0\nCapBnd:\t000001ffffffffff\nSeccomp:\t2\n";
        assert_eq!(status_field(status, "CapBnd"), Some("000001ffffffffff"));
        assert_eq!(status_field(status, "Seccomp"), Some("2"));
        assert_eq!(status_field(status, "Cap"), None);
    }

    #[test]
    fn user_namespace_support_needs_all_three_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let this = dir.path().join("self");
        std::fs::create_dir_all(this.join("ns")).expect("ns");
        std::fs::write(this.join("ns").join("user"), b"").expect("user");
        std::fs::write(this.join("uid_map"), b"").expect("uid_map");
        let proc = ProcFs::new(dir.path());
        assert!(!proc.user_namespaces_available());
        std::fs::write(this.join("gid_map"), b"").expect("gid_map");
        assert!(proc.user_namespaces_available());
    }
}
