//! Global configuration model for the warden tool.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, WardenError};

/// Root configuration for the warden tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Directory holding a sandbox's run-time state.
    pub run_dir: PathBuf,
    /// Shell used to run join commands; `None` execs commands directly.
    pub shell: Option<PathBuf>,
    /// `comm` of the sandbox manager process.
    pub manager_name: String,
    /// Always preserve the host `/dev/shm` in a private `/dev`.
    pub keep_dev_shm: bool,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            run_dir: PathBuf::from(constants::DEFAULT_RUN_DIR),
            shell: Some(PathBuf::from(constants::DEFAULT_SHELL)),
            manager_name: constants::BIN_NAME.to_owned(),
            keep_dev_shm: false,
        }
    }
}

impl WardenConfig {
    /// Loads the configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| WardenError::io(path, e))?;
        let config: Self = serde_json::from_str(&raw)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Loads an explicitly requested file, or the default file when present.
    ///
    /// A missing default file yields [`WardenConfig::default`]; a missing
    /// explicit file is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if a file that should be read cannot be parsed.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let default = Path::new(constants::DEFAULT_CONFIG_FILE);
        if default.exists() {
            Self::load(default)
        } else {
            Ok(Self::default())
        }
    }

    /// Returns the run-file layout rooted at [`WardenConfig::run_dir`].
    #[must_use]
    pub fn run_paths(&self) -> RunPaths {
        RunPaths::new(&self.run_dir)
    }
}

/// Well-known run-time files of a sandbox, relative to its root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    run_dir: PathBuf,
}

impl RunPaths {
    /// Creates the layout for the given run directory.
    #[must_use]
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    /// The run directory itself.
    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn mnt(&self, name: &str) -> PathBuf {
        self.run_dir.join("mnt").join(name)
    }

    /// Saved copy of the host `/dev`.
    #[must_use]
    pub fn dev_dir(&self) -> PathBuf {
        self.run_dir.join("dev")
    }

    /// Saved copy of the host `/dev/log` socket.
    #[must_use]
    pub fn devlog_file(&self) -> PathBuf {
        self.mnt("devlog")
    }

    /// Read-only placeholder used to seal saved trees.
    #[must_use]
    pub fn ro_dir(&self) -> PathBuf {
        self.run_dir.join("warden.ro.dir")
    }

    /// Marker file requesting supplementary-group suppression.
    #[must_use]
    pub fn groups_cfg(&self) -> PathBuf {
        self.mnt("groups")
    }

    /// CPU affinity mask file.
    #[must_use]
    pub fn cpu_cfg(&self) -> PathBuf {
        self.mnt("cpu")
    }

    /// Cgroup membership file.
    #[must_use]
    pub fn cgroup_cfg(&self) -> PathBuf {
        self.mnt("cgroup")
    }

    /// Umask file.
    #[must_use]
    pub fn umask_file(&self) -> PathBuf {
        self.mnt("umask")
    }

    /// Protocol list installed by the sandbox.
    #[must_use]
    pub fn protocol_cfg(&self) -> PathBuf {
        self.mnt("protocol")
    }

    /// Compiled seccomp program.
    #[must_use]
    pub fn seccomp_cfg(&self) -> PathBuf {
        self.mnt("seccomp")
    }

    /// Compiled protocol seccomp program.
    #[must_use]
    pub fn seccomp_protocol(&self) -> PathBuf {
        self.mnt("seccomp.protocol")
    }

    /// Filesystem audit log.
    #[must_use]
    pub fn fslogger_file(&self) -> PathBuf {
        self.mnt("fslogger")
    }

    /// Re-roots a run file below another directory, e.g. `/proc/<pid>/root`.
    #[must_use]
    pub fn under(root: &Path, file: &Path) -> PathBuf {
        root.join(file.strip_prefix("/").unwrap_or(file))
    }
}

impl Default for RunPaths {
    fn default() -> Self {
        Self::new(constants::DEFAULT_RUN_DIR)
    }
}
