//! Optional device passthrough entries.
//!
//! Each [`DeviceEntry`] names a device (or device directory) that may be
//! carried from the host's saved `/dev` into the private one, guarded by a
//! predicate over the sandbox's [`DevOptions`]. The standard table ships
//! empty; new passthrough devices are added by pushing entries, without
//! touching the build sequence.

use std::path::{Path, PathBuf};

/// Sandbox-creation switches consulted while building a private `/dev`.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevOptions {
    /// Keep the host `/dev/shm` even when no audio server socket is found.
    pub keep_dev_shm: bool,
    /// Sound devices are disabled.
    pub no_sound: bool,
    /// Video capture devices are disabled.
    pub no_video: bool,
    /// 3D acceleration devices are disabled.
    pub no_3d: bool,
    /// U2F security keys are disabled.
    pub no_u2f: bool,
}

/// Decides whether an entry is materialized for the given options.
pub type DevicePredicate = fn(&DevOptions) -> bool;

/// One optional passthrough device.
#[derive(Debug, Clone)]
pub struct DeviceEntry {
    /// Path relative to `/dev`, e.g. `snd` or `dri/card0`.
    pub name: PathBuf,
    /// Materialization predicate.
    pub predicate: DevicePredicate,
}

impl DeviceEntry {
    /// An entry restored from the saved host `/dev`.
    #[must_use]
    pub fn saved(name: impl Into<PathBuf>, predicate: DevicePredicate) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }

    /// The same relative path inside the saved copy of the host `/dev`.
    #[must_use]
    pub fn source_path(&self, saved_dev: &Path) -> PathBuf {
        saved_dev.join(&self.name)
    }

    /// Whether the entry applies under `options`.
    #[must_use]
    pub fn enabled(&self, options: &DevOptions) -> bool {
        (self.predicate)(options)
    }
}

/// Ordered list of passthrough entries.
#[derive(Debug, Clone, Default)]
pub struct DeviceTable {
    entries: Vec<DeviceEntry>,
}

impl DeviceTable {
    /// The table used for new sandboxes. No passthrough device is enabled
    /// by default.
    #[must_use]
    pub fn standard() -> Self {
        Self::default()
    }

    /// Appends an entry; entries are processed in insertion order.
    pub fn push(&mut self, entry: DeviceEntry) {
        self.entries.push(entry);
    }

    /// Iterates over entries in order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceEntry> {
        self.entries.iter()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<DeviceEntry> for DeviceTable {
    fn from_iter<I: IntoIterator<Item = DeviceEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
