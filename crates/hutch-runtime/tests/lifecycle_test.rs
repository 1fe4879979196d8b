//! Integration tests for complete container runs.
//!
//! Failure paths run against scratch directories laid out like a cgroup v2
//! hierarchy, so they never touch the host. Scratch directories are not
//! cgroupfs: `rmdir(2)` refuses them while interface files remain, which
//! shows up as a single cgroup cleanup warning. Runs that need namespaces,
//! `chroot`, and real limits use the host hierarchy and skip themselves
//! when the test process is not root, the host has no cgroup v2, or the
//! kernel refuses the namespaces.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::print_stderr
)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use hutch_common::config::BootstrapConfig;
use hutch_common::constants::CGROUP_V2_PATH;
use hutch_common::error::{
    CleanupWarning, IsolationError, ProvisionError, ResourceStep, RunError, StageError,
};
use hutch_common::spec::{ContainerSpec, NamespaceConfig};
use hutch_common::types::{ExitStatus, RunState, Stage};
use hutch_core::cgroup::ResourceLimiter;
use hutch_core::privilege::is_privileged;
use hutch_runtime::interrupt::Interrupt;
use hutch_runtime::lifecycle::{ContainerLifecycleManager, RunReport};
use hutch_runtime::provision::{Bootstrapper, RootFilesystemProvisioner};

/// Runs on the host hierarchy move the whole test process between
/// cgroups, so they take turns.
static HOST_CGROUPS: Mutex<()> = Mutex::new(());

/// Bootstrapper that counts calls and writes a sentinel.
struct FakeBootstrap(Arc<AtomicUsize>);

impl Bootstrapper for FakeBootstrap {
    fn name(&self) -> &str {
        "fake"
    }

    fn bootstrap(&self, root: &Path) -> Result<(), ProvisionError> {
        let _ = self.0.fetch_add(1, Ordering::SeqCst);
        std::fs::create_dir_all(root.join("bin")).expect("mkdir");
        std::fs::write(root.join("bin/sh"), b"").expect("write");
        Ok(())
    }
}

fn provisioner(calls: &Arc<AtomicUsize>) -> RootFilesystemProvisioner {
    RootFilesystemProvisioner::new(Box::new(FakeBootstrap(Arc::clone(calls))), "bin/sh")
}

fn manager(spec: ContainerSpec, cgroups: &Path) -> ContainerLifecycleManager {
    let calls = Arc::new(AtomicUsize::new(0));
    ContainerLifecycleManager::new(spec, provisioner(&calls))
        .with_limiter(ResourceLimiter::new(cgroups))
        .check_privilege(false)
}

fn states(manager: &ContainerLifecycleManager) -> Vec<RunState> {
    manager.transitions().iter().map(|t| t.state).collect()
}

/// Marks `dir` as a cgroup v2 root with both controllers delegated.
fn scratch_hierarchy(dir: &Path) {
    std::fs::write(dir.join("cgroup.controllers"), "cpu io memory\n").expect("write");
    std::fs::write(dir.join("cgroup.subtree_control"), "cpu memory\n").expect("write");
}

/// Writes the interface files the kernel would create in a new cgroup.
fn scratch_cgroup(path: &Path) {
    std::fs::create_dir_all(path).expect("mkdir");
    for (file, content) in [
        ("cgroup.controllers", "cpu memory\n"),
        ("cgroup.procs", ""),
        ("memory.max", "max\n"),
        ("cpu.max", "max 100000\n"),
    ] {
        std::fs::write(path.join(file), content).expect("write");
    }
}

/// Asserts that teardown tried to remove the scratch cgroup at `path`.
fn assert_cgroup_release_attempted(warnings: &[CleanupWarning], path: &Path) {
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert_eq!(warnings[0].resource, "cgroup");
    assert_eq!(warnings[0].path, path);
}

/// Whether this process can run real containers on the host hierarchy.
fn host_can_run() -> bool {
    if !is_privileged() {
        eprintln!("skipping: needs root");
        return false;
    }
    if !Path::new(CGROUP_V2_PATH).join("cgroup.controllers").is_file() {
        eprintln!("skipping: {CGROUP_V2_PATH} is not a cgroup v2 hierarchy");
        return false;
    }
    true
}

/// Runs `spec` on the host hierarchy, or returns `None` when this
/// environment cannot create the namespaces.
fn run_on_host(spec: ContainerSpec, interrupt: Interrupt) -> Option<(RunReport, RunState)> {
    let _turn = HOST_CGROUPS.lock().unwrap_or_else(PoisonError::into_inner);
    let cgroup = spec.cgroup_path().to_path_buf();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut manager = ContainerLifecycleManager::new(spec, provisioner(&calls))
        .with_interrupt(interrupt);

    match manager.run() {
        Ok(report) => {
            assert!(!cgroup.exists(), "cgroup must be removed");
            Some((report, manager.state()))
        }
        Err(RunError {
            source: StageError::Isolation(IsolationError::NamespaceRequestFailed { .. }),
            ..
        }) => {
            eprintln!("skipping: namespaces unavailable");
            None
        }
        Err(e) => panic!("run failed: {e}"),
    }
}

/// Runs `payload` with `/` as the container root.
fn run_on_host_root(payload: &[&str], namespaces: NamespaceConfig) -> Option<RunReport> {
    if !host_can_run() {
        return None;
    }
    let spec = ContainerSpec::builder("/")
        .hostname("box1")
        .namespaces(namespaces)
        .payload(payload.iter().copied())
        .build()
        .expect("spec");
    let (report, state) = run_on_host(spec, Interrupt::new())?;
    assert_eq!(state, RunState::CleanedUp);
    Some(report)
}

// ── Failure paths ────────────────────────────────────────────────────

#[test]
fn isolation_failure_still_cleans_up() {
    let root = tempfile::tempdir().expect("tempdir");
    let cgroups = tempfile::tempdir().expect("tempdir");
    scratch_hierarchy(cgroups.path());
    let spec = ContainerSpec::builder(root.path())
        .cgroup_parent(cgroups.path())
        .namespaces(NamespaceConfig::none())
        .payload(["/nonexistent/binary"])
        .build()
        .expect("spec");
    let cgroup = spec.cgroup_path().to_path_buf();
    scratch_cgroup(&cgroup);
    let mut manager = manager(spec, cgroups.path());

    let err = manager.run().unwrap_err();
    assert_eq!(err.stage, Stage::Isolating);
    assert!(matches!(
        err.source,
        StageError::Isolation(
            IsolationError::RootSwitchFailed { .. } | IsolationError::ExecFailed { .. }
        )
    ));
    assert_cgroup_release_attempted(&err.warnings, &cgroup);
    assert_eq!(
        states(&manager),
        [
            RunState::Provisioning,
            RunState::LimitApplied,
            RunState::Isolating,
            RunState::Failed(Stage::Isolating),
            RunState::CleanedUp,
        ]
    );
}

#[test]
fn memory_limit_failure_spawns_nothing() {
    let root = tempfile::tempdir().expect("tempdir");
    let cgroups = tempfile::tempdir().expect("tempdir");
    scratch_hierarchy(cgroups.path());
    let cgroup = cgroups.path().join("box");
    scratch_cgroup(&cgroup);
    std::fs::remove_file(cgroup.join("memory.max")).expect("rm");
    let spec = ContainerSpec::builder(root.path())
        .cgroup_parent(cgroups.path())
        .cgroup_path(&cgroup)
        .payload(["/bin/true"])
        .build()
        .expect("spec");
    let mut manager = manager(spec, cgroups.path());

    let err = manager.run().unwrap_err();
    assert_eq!(err.stage, Stage::LimitApplied);
    match &err.source {
        StageError::Resource(e) => assert_eq!(e.step, ResourceStep::Memory),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!cgroup.join("memory.max").exists(), "control file must not be created");
    assert_cgroup_release_attempted(&err.warnings, &cgroup);
    assert!(!states(&manager).contains(&RunState::Isolating));
    assert_eq!(manager.state(), RunState::CleanedUp);
}

#[test]
fn plain_directory_hierarchy_runs_nothing() {
    let root = tempfile::tempdir().expect("tempdir");
    let cgroups = tempfile::tempdir().expect("tempdir");
    let keep = cgroups.path().join("notes.txt");
    std::fs::write(&keep, "keep me").expect("write");
    let spec = ContainerSpec::builder(root.path())
        .cgroup_parent(cgroups.path())
        .payload(["/bin/true"])
        .build()
        .expect("spec");
    let cgroup = spec.cgroup_path().to_path_buf();
    let mut manager = manager(spec, cgroups.path());

    let err = manager.run().unwrap_err();
    assert_eq!(err.stage, Stage::LimitApplied);
    match &err.source {
        StageError::Resource(e) => assert_eq!(e.step, ResourceStep::Create),
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.warnings.is_empty(), "{:?}", err.warnings);
    assert!(!cgroup.exists());
    assert!(keep.is_file());
    assert!(!states(&manager).contains(&RunState::Isolating));
}

#[test]
fn failing_bootstrap_tool_creates_no_cgroup() {
    let base = tempfile::tempdir().expect("tempdir");
    let cgroups = tempfile::tempdir().expect("tempdir");
    scratch_hierarchy(cgroups.path());
    let spec = ContainerSpec::builder(base.path().join("rootfs"))
        .cgroup_parent(cgroups.path())
        .build()
        .expect("spec");
    let cgroup = spec.cgroup_path().to_path_buf();
    let bootstrap = BootstrapConfig {
        tool: "false".into(),
        ..BootstrapConfig::default()
    };
    let mut manager =
        ContainerLifecycleManager::new(spec, RootFilesystemProvisioner::from_config(&bootstrap))
            .with_limiter(ResourceLimiter::new(cgroups.path()))
            .check_privilege(false);

    let err = manager.run().unwrap_err();
    assert_eq!(err.stage, Stage::Provisioning);
    match &err.source {
        StageError::Provision(ProvisionError::ToolFailed { tool, .. }) => assert_eq!(tool, "false"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!cgroup.exists());
    assert_eq!(manager.state(), RunState::CleanedUp);
}

#[test]
fn provisioning_runs_bootstrap_once_across_runs() {
    let base = tempfile::tempdir().expect("tempdir");
    let root = base.path().join("rootfs");
    let cgroups = tempfile::tempdir().expect("tempdir");
    scratch_hierarchy(cgroups.path());
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let spec = ContainerSpec::builder(&root)
            .cgroup_parent(cgroups.path())
            .namespaces(NamespaceConfig::none())
            .payload(["/nonexistent/binary"])
            .build()
            .expect("spec");
        scratch_cgroup(spec.cgroup_path());
        let mut manager = ContainerLifecycleManager::new(spec, provisioner(&calls))
            .with_limiter(ResourceLimiter::new(cgroups.path()))
            .check_privilege(false);
        let err = manager.run().unwrap_err();
        assert_eq!(err.stage, Stage::Isolating);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(root.join("proc").is_dir());
}

#[test]
fn unprivileged_caller_is_stopped_before_side_effects() {
    if is_privileged() {
        return;
    }
    let base = tempfile::tempdir().expect("tempdir");
    let cgroups = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    let spec = ContainerSpec::builder(base.path().join("rootfs"))
        .cgroup_parent(cgroups.path())
        .build()
        .expect("spec");
    let mut manager = ContainerLifecycleManager::new(spec, provisioner(&calls))
        .with_limiter(ResourceLimiter::new(cgroups.path()));

    let err = manager.run().unwrap_err();
    assert_eq!(err.stage, Stage::Preflight);
    assert!(matches!(err.source, StageError::PermissionDenied { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!base.path().join("rootfs").exists());
}

// ── Privileged runs ──────────────────────────────────────────────────

#[test]
fn payload_is_pid_one_in_new_pid_namespace() {
    let Some(report) = run_on_host_root(
        &["/bin/sh", "-c", "test $$ -eq 1"],
        NamespaceConfig::default(),
    ) else {
        return;
    };
    assert_eq!(report.exit, ExitStatus::Code(0));
    assert!(report.payload_error().is_none());
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
}

#[test]
fn payload_without_pid_namespace_is_not_pid_one() {
    let Some(report) = run_on_host_root(&["/bin/sh", "-c", "test $$ -ne 1"], NamespaceConfig::none())
    else {
        return;
    };
    assert!(report.exit.success());
}

#[test]
fn hostname_is_set_in_uts_namespace() {
    let namespaces = NamespaceConfig {
        pid: false,
        mount: false,
        uts: true,
    };
    let Some(report) = run_on_host_root(
        &["/bin/sh", "-c", "test \"$(cat /proc/sys/kernel/hostname)\" = box1"],
        namespaces,
    ) else {
        return;
    };
    assert!(report.exit.success());
}

#[test]
fn nonzero_exit_is_a_completed_run() {
    let Some(report) = run_on_host_root(&["/bin/sh", "-c", "exit 3"], NamespaceConfig::none())
    else {
        return;
    };
    assert_eq!(report.exit, ExitStatus::Code(3));
    assert_eq!(report.payload_error().map(|e| e.status), Some(ExitStatus::Code(3)));
    let last = report.transitions.last().map(|t| t.state);
    assert_eq!(last, Some(RunState::CleanedUp));
    assert!(report.transitions.iter().any(|t| t.state == RunState::Exited));
}

#[test]
fn payload_sees_its_limits() {
    let Some(report) = run_on_host_root(
        &[
            "/bin/sh",
            "-c",
            "cg=$(sed -n 's/^0:://p' /proc/self/cgroup); \
             test \"$cg\" != / && \
             test \"$(cat /sys/fs/cgroup$cg/memory.max)\" = 104857600 && \
             test \"$(cat /sys/fs/cgroup$cg/cpu.max)\" = '50000 100000'",
        ],
        NamespaceConfig::none(),
    ) else {
        return;
    };
    assert_eq!(report.exit, ExitStatus::Code(0));
}

#[test]
fn interrupt_while_running_kills_payload_and_cleans_up() {
    if !host_can_run() {
        return;
    }
    let spec = ContainerSpec::builder("/")
        .namespaces(NamespaceConfig::none())
        .payload(["/bin/sleep", "30"])
        .build()
        .expect("spec");
    let interrupt = Interrupt::new();
    let trigger = interrupt.clone();
    let signaller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(500));
        trigger.trigger();
    });

    let outcome = run_on_host(spec, interrupt);
    signaller.join().expect("join");
    let Some((report, state)) = outcome else {
        return;
    };
    assert_eq!(report.exit, ExitStatus::Signaled(9));
    assert!(report.interrupted);
    assert_eq!(state, RunState::CleanedUp);
    assert!(report.transitions.iter().any(|t| t.state == RunState::Running));
}
