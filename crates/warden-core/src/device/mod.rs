//! Private `/dev` construction for a new sandbox.
//!
//! The host device tree is saved aside, a `tmpfs` is mounted over `/dev`,
//! and only a fixed set of nodes is recreated. The audio-server shared
//! memory directory, the syslog socket, and optional passthrough devices
//! are carried over from the saved tree when they apply. Finally the saved
//! tree is sealed so it is unreachable from inside the sandbox.
//!
//! The builder expects to run as root inside the sandbox's own mount
//! namespace. It does not manage privileges itself.

pub mod fs;
pub mod table;

use std::path::{Path, PathBuf};

use nix::unistd::Group;
use warden_common::config::RunPaths;
use warden_common::constants::DEV_DIR;
use warden_common::diag;
use warden_common::error::Result;

use crate::fslog::FsLog;

pub use fs::{DevFs, KernelDevFs};
pub use table::{DevOptions, DeviceEntry, DeviceTable};

/// A character device recreated in every private `/dev`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceNode {
    /// Name below `/dev`.
    pub name: &'static str,
    /// Device major number.
    pub major: u64,
    /// Device minor number.
    pub minor: u64,
}

/// Mode of every recreated device node.
pub const NODE_MODE: u32 = 0o666;

/// The fixed minimal device set.
pub const MINIMAL_NODES: [DeviceNode; 6] = [
    DeviceNode { name: "zero", major: 1, minor: 5 },
    DeviceNode { name: "null", major: 1, minor: 3 },
    DeviceNode { name: "full", major: 1, minor: 7 },
    DeviceNode { name: "random", major: 1, minor: 8 },
    DeviceNode { name: "urandom", major: 1, minor: 9 },
    DeviceNode { name: "tty", major: 5, minor: 0 },
];

/// Pseudo-terminal multiplexer inside `/dev/pts`.
pub const PTMX_NODE: DeviceNode = DeviceNode { name: "ptmx", major: 5, minor: 2 };

const SHM_MODE: u32 = 0o1777;
const JACK_PREFIX: &str = "jack";

/// Locations touched while building a private `/dev`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevLayout {
    /// The device directory being replaced.
    pub dev: PathBuf,
    /// Where the host device tree is saved.
    pub saved_dev: PathBuf,
    /// Where the host `/dev/log` socket is saved.
    pub saved_devlog: PathBuf,
    /// Read-only placeholder mounted over the saved tree.
    pub ro_dir: PathBuf,
    /// Group owning pseudo-terminals.
    pub tty_gid: u32,
}

impl DevLayout {
    /// Layout for the real `/dev` of a sandbox using `paths`.
    #[must_use]
    pub fn from_run_paths(paths: &RunPaths) -> Self {
        Self {
            dev: PathBuf::from(DEV_DIR),
            saved_dev: paths.dev_dir(),
            saved_devlog: paths.devlog_file(),
            ro_dir: paths.ro_dir(),
            tty_gid: tty_group_id(),
        }
    }
}

/// Group id of `tty`, or 0 when the group does not exist.
pub fn tty_group_id() -> u32 {
    match Group::from_name("tty") {
        Ok(Some(group)) => group.gid.as_raw(),
        _ => {
            tracing::debug!("tty group not found, using gid 0");
            0
        }
    }
}

/// Builds a private `/dev`.
pub struct DevBuilder<'a, F: DevFs> {
    fs: &'a F,
    layout: &'a DevLayout,
    options: &'a DevOptions,
    table: &'a DeviceTable,
    log: &'a mut FsLog,
}

impl<'a, F: DevFs> DevBuilder<'a, F> {
    /// Creates a builder over the given filesystem seam and configuration.
    pub fn new(
        fs: &'a F,
        layout: &'a DevLayout,
        options: &'a DevOptions,
        table: &'a DeviceTable,
        log: &'a mut FsLog,
    ) -> Self {
        Self {
            fs,
            layout,
            options,
            table,
            log,
        }
    }

    /// Runs the whole build sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if any required mount or node creation fails.
    /// Optional paths degrade with a warning instead.
    pub fn build(mut self) -> Result<()> {
        tracing::info!(dev = %self.layout.dev.display(), "building private /dev");
        self.save_host_dev()?;
        let have_devlog = self.save_devlog()?;

        self.fs.mount_tmpfs(&self.layout.dev, "mode=755,gid=0")?;
        self.log.log2("tmpfs", &self.layout.dev);

        self.create_minimal_nodes()?;
        self.create_pts()?;
        if have_devlog {
            self.restore_devlog()?;
        }
        self.process_dev_shm()?;
        self.mount_device_entries()?;
        self.seal_saved_dev()?;
        tracing::info!("private /dev ready");
        Ok(())
    }

    /// Creates every missing ancestor of `path`, outermost first.
    fn ensure_parent(&self, path: &Path) -> Result<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        let missing: Vec<&Path> = parent
            .ancestors()
            .take_while(|dir| !dir.as_os_str().is_empty() && !dir.exists())
            .collect();
        for dir in missing.into_iter().rev() {
            self.fs.mkdir_attr(dir, 0o755, 0, 0)?;
        }
        Ok(())
    }

    fn save_host_dev(&self) -> Result<()> {
        let saved = &self.layout.saved_dev;
        self.ensure_parent(saved)?;
        self.fs.mkdir_attr(saved, 0o755, 0, 0)?;
        self.fs.bind(&self.layout.dev, saved, true)?;
        tracing::debug!(saved = %saved.display(), "host /dev saved");
        Ok(())
    }

    /// Returns whether a copy of `/dev/log` is available for restoring.
    fn save_devlog(&self) -> Result<bool> {
        let devlog = self.layout.dev.join("log");
        if !devlog.exists() {
            diag::warning(format!("{} not found, syslog will not be available", devlog.display()));
            return Ok(false);
        }
        let saved = &self.layout.saved_devlog;
        let placeholder = self
            .ensure_parent(saved)
            .and_then(|()| self.fs.create_file_attr(saved, 0o644, 0, 0));
        if let Err(e) = placeholder {
            diag::warning(format!("cannot save /dev/log: {e}"));
            return Ok(false);
        }
        self.fs.bind(&devlog, saved, true)?;
        Ok(true)
    }

    fn create_minimal_nodes(&mut self) -> Result<()> {
        for node in &MINIMAL_NODES {
            let path = self.layout.dev.join(node.name);
            self.fs.mknod_char(&path, NODE_MODE, node.major, node.minor)?;
            self.log.log2("mknod", &path);
        }
        Ok(())
    }

    fn create_pts(&mut self) -> Result<()> {
        let pts = self.layout.dev.join("pts");
        self.fs.mkdir_attr(&pts, 0o755, 0, 0)?;
        self.log.log2("mkdir", &pts);

        let ptmx = pts.join(PTMX_NODE.name);
        self.fs.mknod_char(&ptmx, NODE_MODE, PTMX_NODE.major, PTMX_NODE.minor)?;
        self.log.log2("mknod", &ptmx);

        let options = format!(
            "newinstance,gid={},mode=620,ptmxmode=0666",
            self.layout.tty_gid
        );
        self.fs.mount_devpts(&pts, &options)?;
        self.log.log2("clone", &pts);

        let link = self.layout.dev.join(PTMX_NODE.name);
        self.fs.symlink(&ptmx, &link)?;
        self.log.log2("create", &link);
        Ok(())
    }

    fn restore_devlog(&mut self) -> Result<()> {
        let devlog = self.layout.dev.join("log");
        self.fs.create_file_attr(&devlog, 0o644, 0, 0)?;
        self.fs.bind(&self.layout.saved_devlog, &devlog, true)?;
        self.log.log2("clone", &devlog);
        Ok(())
    }

    fn jack_socket_present(&self) -> bool {
        std::fs::read_dir(self.layout.saved_dev.join("shm")).is_ok_and(|entries| {
            entries
                .filter_map(std::result::Result::ok)
                .any(|e| e.file_name().to_string_lossy().starts_with(JACK_PREFIX))
        })
    }

    fn process_dev_shm(&mut self) -> Result<()> {
        let shm = self.layout.dev.join("shm");
        self.fs.mkdir_attr(&shm, SHM_MODE, 0, 0)?;

        if self.jack_socket_present() || self.options.keep_dev_shm {
            let saved_shm = self.layout.saved_dev.join("shm");
            match self.fs.bind(&saved_shm, &shm, false) {
                Ok(()) => {
                    self.log.log2("clone", &shm);
                    return Ok(());
                }
                Err(e) => {
                    diag::warning(format!("cannot mount the old /dev/shm in private-dev: {e}"));
                }
            }
        }
        self.log.log2("mkdir", &shm);
        self.log.log2("create", &shm);
        Ok(())
    }

    fn mount_device_entries(&mut self) -> Result<()> {
        for entry in self.table.iter() {
            let source = entry.source_path(&self.layout.saved_dev);
            if !source.exists() || !entry.enabled(self.options) {
                continue;
            }
            let meta = match std::fs::metadata(&source) {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::debug!(source = %source.display(), error = %e, "skipping device entry");
                    continue;
                }
            };
            let target = self.layout.dev.join(&entry.name);
            self.create_stub(&target, &meta)?;
            self.fs.bind(&source, &target, true)?;
            self.log.log2("whitelist", &target);
        }
        Ok(())
    }

    fn create_stub(&self, target: &Path, meta: &std::fs::Metadata) -> Result<()> {
        use std::os::unix::fs::MetadataExt;

        self.ensure_parent(target)?;
        let mode = meta.mode() & 0o7777;
        if meta.is_dir() {
            self.fs.mkdir_attr(target, mode, meta.uid(), meta.gid())
        } else {
            self.fs.create_file_attr(target, mode, meta.uid(), meta.gid())
        }
    }

    fn seal_saved_dev(&mut self) -> Result<()> {
        self.ensure_parent(&self.layout.ro_dir)?;
        self.fs.mkdir_attr(&self.layout.ro_dir, 0o500, 0, 0)?;
        self.fs.bind(&self.layout.ro_dir, &self.layout.saved_dev, false)?;
        self.fs.remount_readonly(&self.layout.saved_dev)?;
        self.log.log2("blacklist", &self.layout.saved_dev);
        Ok(())
    }
}
