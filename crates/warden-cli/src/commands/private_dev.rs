//! `warden private-dev`: Run a command with a private `/dev`.

use clap::Args;
use warden_common::config::WardenConfig;
use warden_common::types::CommandLine;
use warden_core::device::{DevBuilder, DevLayout, DevOptions, DeviceTable, KernelDevFs};
use warden_core::fslog::FsLog;
use warden_core::namespace;
use warden_core::privilege::with_root;
use warden_runtime::launch::{self, Caller};

/// Arguments for the `private-dev` command.
#[allow(clippy::struct_excessive_bools)]
#[derive(Args, Debug)]
pub struct PrivateDevArgs {
    /// Keep the host /dev/shm.
    #[arg(long)]
    pub keep_dev_shm: bool,

    /// Disable sound devices.
    #[arg(long)]
    pub nosound: bool,

    /// Disable video capture devices.
    #[arg(long)]
    pub novideo: bool,

    /// Disable 3D acceleration devices.
    #[arg(long)]
    pub no3d: bool,

    /// Disable U2F security keys.
    #[arg(long)]
    pub nou2f: bool,

    /// Command to run; the configured shell when omitted.
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

impl PrivateDevArgs {
    /// Device options from the flags and the configuration.
    #[must_use]
    pub const fn options(&self, config: &WardenConfig) -> DevOptions {
        DevOptions {
            keep_dev_shm: self.keep_dev_shm || config.keep_dev_shm,
            no_sound: self.nosound,
            no_video: self.novideo,
            no_3d: self.no3d,
            no_u2f: self.nou2f,
        }
    }
}

/// Executes the `private-dev` command. Only returns on failure.
///
/// # Errors
///
/// Returns an error if the device tree cannot be built, privileges cannot
/// be dropped, or the command cannot be executed.
pub fn execute(args: PrivateDevArgs, config: WardenConfig) -> anyhow::Result<i32> {
    let caller = Caller::current()?;
    let paths = config.run_paths();
    let options = args.options(&config);

    with_root(|| {
        namespace::enter_private_mount_namespace()?;
        let layout = DevLayout::from_run_paths(&paths);
        let table = DeviceTable::standard();
        let mut log = FsLog::new();
        let built = DevBuilder::new(&KernelDevFs, &layout, &options, &table, &mut log).build();
        log.flush(&paths.fslogger_file());
        built
    })?;

    let shell = config.shell.as_deref();
    let env = launch::env_defaults(shell, &caller);
    let _ = launch::enter_working_dir(None, &caller.home)?;
    launch::drop_privs(&caller, false)?;
    let cmd = launch::build_command(shell, &CommandLine::new(args.command), &env)?;
    Err(launch::exec_command(cmd).into())
}
