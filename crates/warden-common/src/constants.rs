//! System-wide constants and default paths.

/// Application name used in diagnostics and the exec'd environment.
pub const APP_NAME: &str = "warden";

/// Binary name for the CLI, also the `comm` of a sandbox manager process.
pub const BIN_NAME: &str = "warden";

/// Default run-time state directory.
pub const DEFAULT_RUN_DIR: &str = "/run/warden";

/// Default configuration file, read only when present.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/warden/warden.json";

/// Default shell used to run join commands.
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Cgroups hierarchy mount point; cgroup run-files must point below it.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Mount point of the private device tree.
pub const DEV_DIR: &str = "/dev";

/// Conventional pid of the sandbox's init, as seen from inside its pid namespace.
pub const SANDBOX_INIT_PID: i32 = 1;
