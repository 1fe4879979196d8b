//! `hutch run`: Run a payload in a new container.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Args;
use hutch_common::config::HutchConfig;
use hutch_common::constants::INTERRUPTED_EXIT;
use hutch_common::spec::ContainerSpec;
use hutch_common::types::parse_size;
use hutch_core::cgroup::ResourceLimiter;
use hutch_runtime::interrupt::Interrupt;
use hutch_runtime::lifecycle::{ContainerLifecycleManager, RunReport};
use hutch_runtime::provision::RootFilesystemProvisioner;

use crate::output;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Container root filesystem (absolute path).
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Hostname inside the container.
    #[arg(long)]
    pub hostname: Option<String>,

    /// Memory ceiling, e.g. `100M`, `1GiB`, or plain bytes.
    #[arg(short, long)]
    pub memory: Option<String>,

    /// CPU time in microseconds allowed per 100ms period.
    #[arg(long)]
    pub cpu_quota: Option<u64>,

    /// Exact cgroup directory instead of `<cgroup root>/hutch-<id>`. Must
    /// lie inside the cgroup root.
    #[arg(long)]
    pub cgroup_path: Option<PathBuf>,

    /// Do not create a PID namespace.
    #[arg(long)]
    pub no_pid: bool,

    /// Do not create a mount namespace.
    #[arg(long)]
    pub no_mount: bool,

    /// Do not create a UTS namespace.
    #[arg(long)]
    pub no_uts: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    pub json: bool,

    /// Payload command and arguments. Defaults to `/bin/bash`.
    #[arg(last = true)]
    pub payload: Vec<String>,
}

/// Executes the `run` command.
///
/// The process exits with the payload's exit code, `128 + signal` if it
/// was killed, or 130 if a termination signal interrupted the run.
///
/// # Errors
///
/// Returns an error if the arguments are invalid or a stage before the
/// payload's exit failed.
pub fn execute(args: RunArgs, config: HutchConfig) -> anyhow::Result<ExitCode> {
    let json = args.json;
    let (spec, config) = build_spec(args, config)?;
    tracing::debug!(
        id = %spec.id(),
        cgroup = %spec.cgroup_path().display(),
        memory = %output::format_bytes(spec.memory_bytes()),
        cpu_cores = spec.cpu().cores(),
        "container spec"
    );

    let interrupt = Interrupt::new();
    interrupt
        .install()
        .context("failed to install termination signal handler")?;

    let provisioner = RootFilesystemProvisioner::from_config(&config.bootstrap);
    let mut manager = ContainerLifecycleManager::new(spec, provisioner)
        .with_limiter(ResourceLimiter::new(config.cgroup_root.clone()))
        .with_interrupt(interrupt);

    match manager.run() {
        Ok(report) => finish(&report, json),
        Err(err) if err.is_interrupted() => {
            tracing::warn!(stage = %err.stage, "run interrupted");
            Ok(exit_code(INTERRUPTED_EXIT))
        }
        Err(err) => Err(err.into()),
    }
}

/// Applies the flags on top of `config` and validates the result.
fn build_spec(args: RunArgs, mut config: HutchConfig) -> anyhow::Result<(ContainerSpec, HutchConfig)> {
    if let Some(root) = args.root {
        config.rootfs = root;
    }
    if let Some(hostname) = args.hostname {
        config.hostname = hostname;
    }
    if let Some(memory) = args.memory {
        config.memory_bytes = parse_size(&memory)?;
    }
    if let Some(quota) = args.cpu_quota {
        config.cpu_quota_us = quota;
    }
    config.namespaces.pid &= !args.no_pid;
    config.namespaces.mount &= !args.no_mount;
    config.namespaces.uts &= !args.no_uts;

    let mut builder = config.spec_builder();
    if let Some(path) = args.cgroup_path {
        builder = builder.cgroup_path(path);
    }
    if !args.payload.is_empty() {
        builder = builder.payload(args.payload);
    }
    let spec = builder.build().context("invalid container settings")?;
    Ok((spec, config))
}

fn finish(report: &RunReport, json: bool) -> anyhow::Result<ExitCode> {
    if json {
        output::print_json(report)?;
    }
    for warning in &report.warnings {
        tracing::warn!(%warning, "cleanup incomplete");
    }
    if let Some(err) = report.payload_error() {
        tracing::info!(id = %report.id, "{err}");
    }
    if report.interrupted {
        return Ok(exit_code(INTERRUPTED_EXIT));
    }
    Ok(exit_code(report.exit.code()))
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(exit_byte(code))
}

/// Codes outside `0..=255` collapse to 1.
fn exit_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
