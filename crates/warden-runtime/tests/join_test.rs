//! Integration tests for the join front half over a fabricated `/proc`.
//!
//! Covered:
//! 1. Manager pid substitution and sandbox validation
//! 2. Owner authorization, before anything is forked
//! 3. Policy recovery from status and run files
//! 4. Malformed run files abort the join

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::{Gid, Pid, Uid};
use warden_common::config::{RunPaths, WardenConfig};
use warden_common::error::WardenError;
use warden_common::types::{CommandLine, JoinMode};
use warden_runtime::inspect::SandboxInspector;
use warden_runtime::join::{JoinRequest, Joiner};
use warden_runtime::launch::Caller;
use warden_runtime::procfs::ProcFs;
use warden_runtime::target;

const MANAGER: i32 = 400;
const SANDBOXED: i32 = 401;

struct FakeProc {
    dir: tempfile::TempDir,
    paths: RunPaths,
}

impl FakeProc {
    fn new() -> Self {
        let fake = Self {
            dir: tempfile::tempdir().expect("tempdir"),
            paths: RunPaths::new("/run/warden"),
        };
        fake.process(1, "systemd", 0, 0, "");
        fake.process(MANAGER, "warden", 1, 1000, "");
        fake.process(
            SANDBOXED,
            "bash",
            MANAGER,
            1000,
            "CapBnd:\t0000000000003000\nSeccomp:\t2\n",
        );
        fake
    }

    fn proc(&self) -> ProcFs {
        ProcFs::new(self.dir.path())
    }

    fn process(&self, pid: i32, comm: &str, ppid: i32, uid: u32, extra: &str) {
        let dir = self.dir.path().join(pid.to_string());
        std::fs::create_dir_all(dir.join("root")).unwrap();
        std::fs::write(dir.join("comm"), format!("{comm}\n")).unwrap();
        std::fs::write(
            dir.join("status"),
            format!("Name:\t{comm}\nPPid:\t{ppid}\nUid:\t{uid}\t{uid}\t{uid}\t{uid}\n{extra}"),
        )
        .unwrap();
    }

    fn run_file(&self, pid: i32, file: &Path, content: &str) {
        let root = self.dir.path().join(pid.to_string()).join("root");
        let path = RunPaths::under(&root, file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn enable_user_namespaces(&self, uid_map: &str) {
        let this = self.dir.path().join("self");
        std::fs::create_dir_all(this.join("ns")).unwrap();
        std::fs::write(this.join("ns").join("user"), "").unwrap();
        std::fs::write(this.join("uid_map"), "").unwrap();
        std::fs::write(this.join("gid_map"), "").unwrap();
        let target = self.dir.path().join(SANDBOXED.to_string()).join("uid_map");
        std::fs::write(target, uid_map).unwrap();
    }
}

// ── Target resolution ────────────────────────────────────────────────

#[test]
fn join_resolves_manager_to_sandboxed_child() {
    let fake = FakeProc::new();
    let proc = fake.proc();
    let pid = target::switch_to_child(&proc, MANAGER, "warden").unwrap();
    assert_eq!(pid, SANDBOXED);
    target::validate(&proc, pid, "warden").unwrap();
}

#[test]
fn join_rejects_process_outside_any_sandbox() {
    let fake = FakeProc::new();
    fake.process(500, "vim", 1, 1000, "");
    let proc = fake.proc();
    let pid = target::switch_to_child(&proc, 500, "warden").unwrap();
    assert!(matches!(
        target::validate(&proc, pid, "warden"),
        Err(WardenError::InvalidTarget { pid: 500, .. })
    ));
}

#[test]
fn join_refuses_sandbox_of_another_user() {
    let fake = FakeProc::new();
    let proc = fake.proc();
    assert!(matches!(
        target::authorize(&proc, SANDBOXED, Uid::from_raw(1001)),
        Err(WardenError::PermissionDenied { .. })
    ));
    target::authorize(&proc, SANDBOXED, Uid::from_raw(1000)).unwrap();
}

fn caller(uid: u32) -> Caller {
    Caller {
        uid: Uid::from_raw(uid),
        gid: Gid::from_raw(uid),
        name: "alice".into(),
        home: PathBuf::from("/home/alice"),
    }
}

#[test]
fn joiner_resolves_manager_pid_for_its_owner() {
    let fake = FakeProc::new();
    let config = WardenConfig::default();
    let joiner = Joiner::new(&config, caller(1000)).with_proc(fake.proc());
    assert_eq!(joiner.resolve(MANAGER).unwrap(), SANDBOXED);
    assert_eq!(joiner.resolve(SANDBOXED).unwrap(), SANDBOXED);
}

#[test]
fn join_by_another_user_is_denied_without_forking() {
    let fake = FakeProc::new();
    let config = WardenConfig::default();
    let joiner = Joiner::new(&config, caller(1001)).with_proc(fake.proc());
    let request = JoinRequest {
        pid: MANAGER,
        mode: JoinMode::Full,
        command: CommandLine::new(vec!["id".into()]),
        ..JoinRequest::default()
    };

    assert!(matches!(
        joiner.join(&request),
        Err(WardenError::PermissionDenied { .. })
    ));
    // Nothing in this test binary forks, so any child would be ours.
    assert_eq!(
        waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)),
        Err(Errno::ECHILD)
    );
}

// ── Policy recovery ──────────────────────────────────────────────────

#[test]
fn inspection_recovers_every_facet() {
    let fake = FakeProc::new();
    let paths = fake.paths.clone();
    fake.run_file(SANDBOXED, &paths.cpu_cfg(), "3\n");
    fake.run_file(
        SANDBOXED,
        &paths.cgroup_cfg(),
        "/sys/fs/cgroup/warden/tasks\n",
    );
    fake.run_file(SANDBOXED, &paths.umask_file(), "027\n");
    fake.run_file(SANDBOXED, &paths.groups_cfg(), "");
    fake.enable_user_namespaces("         0       1000          1\n");

    let proc = fake.proc();
    let command = CommandLine::new(vec!["id".to_owned()]);
    let record = SandboxInspector::new(&proc, &paths)
        .inspect(SANDBOXED, command.clone(), true)
        .unwrap();

    assert_eq!(record.pid, SANDBOXED);
    assert_eq!(record.root, proc.root_dir(SANDBOXED));
    assert_eq!(record.caps, Some(0x3000));
    assert!(record.seccomp);
    assert_eq!(record.cpus, Some(3));
    assert_eq!(
        record.cgroup,
        Some(PathBuf::from("/sys/fs/cgroup/warden/tasks"))
    );
    assert_eq!(record.umask, Some(0o27));
    assert!(record.no_groups);
    assert!(record.user_namespace);
    assert_eq!(record.command, command);
}

#[test]
fn inspection_without_run_files_disables_facets() {
    let fake = FakeProc::new();
    let proc = fake.proc();
    let record = SandboxInspector::new(&proc, &fake.paths)
        .inspect(SANDBOXED, CommandLine::default(), true)
        .unwrap();
    assert_eq!(record.cpus, None);
    assert_eq!(record.cgroup, None);
    assert_eq!(record.umask, None);
    assert!(!record.no_groups);
    assert!(!record.user_namespace);
}

#[test]
fn root_callers_only_capture_umask() {
    let fake = FakeProc::new();
    let paths = fake.paths.clone();
    fake.run_file(SANDBOXED, &paths.cpu_cfg(), "ff\n");
    fake.run_file(SANDBOXED, &paths.umask_file(), "077\n");
    let proc = fake.proc();
    let record = SandboxInspector::new(&proc, &paths)
        .inspect(SANDBOXED, CommandLine::default(), false)
        .unwrap();
    assert_eq!(record.caps, None);
    assert!(!record.seccomp);
    assert_eq!(record.cpus, None);
    assert_eq!(record.umask, Some(0o77));
}

#[test]
fn malformed_run_files_abort_inspection() {
    let fake = FakeProc::new();
    let paths = fake.paths.clone();
    fake.run_file(
        SANDBOXED,
        &paths.cgroup_cfg(),
        "/sys/fs/cgroup/../../etc/passwd\n",
    );
    let proc = fake.proc();
    assert!(matches!(
        SandboxInspector::new(&proc, &paths).inspect(SANDBOXED, CommandLine::default(), true),
        Err(WardenError::Malformed { .. })
    ));
}

#[test]
fn garbage_uid_map_aborts_inspection() {
    let fake = FakeProc::new();
    fake.enable_user_namespaces("not a map\n");
    let proc = fake.proc();
    assert!(matches!(
        SandboxInspector::new(&proc, &fake.paths).inspect(SANDBOXED, CommandLine::default(), true),
        Err(WardenError::Malformed { .. })
    ));
}
