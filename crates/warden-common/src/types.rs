//! Domain primitive types used across the warden workspace.

use std::fmt;
use std::path::PathBuf;

use nix::sched::CloneFlags;

/// A kernel namespace type that can be joined through `/proc/<pid>/ns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// System V IPC and POSIX message queues.
    Ipc,
    /// Network stack.
    Net,
    /// Process id space.
    Pid,
    /// Hostname and domain name.
    Uts,
    /// Mount table.
    Mnt,
    /// User and group id mappings.
    User,
}

impl Namespace {
    /// Entry name under `/proc/<pid>/ns`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Ipc => "ipc",
            Self::Net => "net",
            Self::Pid => "pid",
            Self::Uts => "uts",
            Self::Mnt => "mnt",
            Self::User => "user",
        }
    }

    /// `setns(2)` namespace type flag.
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Net => CloneFlags::CLONE_NEWNET,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::Mnt => CloneFlags::CLONE_NEWNS,
            Self::User => CloneFlags::CLONE_NEWUSER,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proc_name())
    }
}

/// Which of the target's namespaces a join enters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinMode {
    /// IPC, network, PID, UTS and mount namespaces.
    #[default]
    Full,
    /// Only the network namespace; no chroot into the sandbox root.
    NetworkOnly,
    /// Only the mount namespace.
    FilesystemOnly,
}

impl JoinMode {
    /// Namespaces entered by this mode, in join order.
    ///
    /// The full join enters the mount namespace last so that a failure on
    /// any earlier namespace leaves the caller's filesystem view intact.
    #[must_use]
    pub const fn namespaces(self) -> &'static [Namespace] {
        match self {
            Self::Full => &[
                Namespace::Ipc,
                Namespace::Net,
                Namespace::Pid,
                Namespace::Uts,
                Namespace::Mnt,
            ],
            Self::NetworkOnly => &[Namespace::Net],
            Self::FilesystemOnly => &[Namespace::Mnt],
        }
    }

    /// Whether the child changes root into the target's filesystem.
    #[must_use]
    pub const fn chroots(self) -> bool {
        !matches!(self, Self::NetworkOnly)
    }
}

/// Command tokens to run inside a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine {
    argv: Vec<String>,
}

impl CommandLine {
    /// Wraps already-extracted command tokens.
    #[must_use]
    pub const fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    /// The raw tokens.
    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// True when no command was given and a shell should run interactively.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }

    /// Tokens joined into one shell-quoted string.
    #[must_use]
    pub fn joined(&self) -> String {
        self.argv
            .iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Title shown for the session; the unquoted command text.
    #[must_use]
    pub fn window_title(&self) -> String {
        self.argv.join(" ")
    }
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+%@".contains(c));
    if plain {
        arg.to_owned()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Security context of a running sandbox, recovered for one join.
///
/// Built once by the inspector and only borrowed afterwards; nothing
/// downstream mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxRecord {
    /// Pid of the sandboxed process being joined.
    pub pid: i32,
    /// Root directory of the sandbox, `/proc/<pid>/root`.
    pub root: PathBuf,
    /// Capability bounding set to reapply, when the target has one to replicate.
    pub caps: Option<u64>,
    /// Target runs under a filter-mode seccomp policy.
    pub seccomp: bool,
    /// Cgroup membership file to join.
    pub cgroup: Option<PathBuf>,
    /// CPU affinity mask.
    pub cpus: Option<u64>,
    /// Umask of the sandbox.
    pub umask: Option<u32>,
    /// Drop supplementary groups before exec.
    pub no_groups: bool,
    /// Target maps its root to a non-zero host uid; join its user namespace.
    pub user_namespace: bool,
    /// Command to execute.
    pub command: CommandLine,
}

impl SandboxRecord {
    /// A record with no replicated policy facets, as used for root callers.
    #[must_use]
    pub fn unrestricted(pid: i32, root: PathBuf, command: CommandLine) -> Self {
        Self {
            pid,
            root,
            caps: None,
            seccomp: false,
            cgroup: None,
            cpus: None,
            umask: None,
            no_groups: false,
            user_namespace: false,
            command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_join_enters_mount_namespace_last() {
        let order = JoinMode::Full.namespaces();
        assert_eq!(
            order,
            &[
                Namespace::Ipc,
                Namespace::Net,
                Namespace::Pid,
                Namespace::Uts,
                Namespace::Mnt
            ]
        );
        assert!(!order.contains(&Namespace::User));
    }

    #[test]
    fn partial_modes_enter_a_single_namespace() {
        assert_eq!(JoinMode::NetworkOnly.namespaces(), &[Namespace::Net]);
        assert_eq!(JoinMode::FilesystemOnly.namespaces(), &[Namespace::Mnt]);
        assert!(!JoinMode::NetworkOnly.chroots());
        assert!(JoinMode::FilesystemOnly.chroots());
    }

    #[test]
    fn namespace_flags_match_proc_names() {
        assert_eq!(Namespace::Mnt.proc_name(), "mnt");
        assert_eq!(Namespace::Mnt.clone_flag(), CloneFlags::CLONE_NEWNS);
        assert_eq!(Namespace::User.to_string(), "user");
    }

    #[test]
    fn command_line_quotes_only_when_needed() {
        let cmd = CommandLine::new(vec![
            "echo".into(),
            "hello world".into(),
            "it's".into(),
            "--flag=x".into(),
        ]);
        assert_eq!(cmd.joined(), r"echo 'hello world' 'it'\''s' --flag=x");
        assert_eq!(cmd.window_title(), "echo hello world it's --flag=x");
    }

    #[test]
    fn empty_argument_is_quoted() {
        let cmd = CommandLine::new(vec!["printf".into(), String::new()]);
        assert_eq!(cmd.joined(), "printf ''");
    }
}
