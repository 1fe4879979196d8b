//! `hutch check`: Report whether this host can run containers.

use std::path::Path;
use std::process::ExitCode;

use clap::Args;
use hutch_common::config::HutchConfig;
use hutch_core::privilege::is_privileged;
use hutch_runtime::provision::RootFilesystemProvisioner;

use crate::output::{self, Check};

/// Arguments for the `check` command.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Print the results as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `check` command. Exits non-zero if a required check fails.
///
/// # Errors
///
/// Returns an error if the results cannot be written.
pub fn execute(args: &CheckArgs, config: &HutchConfig) -> anyhow::Result<ExitCode> {
    let checks = run_checks(config);
    if args.json {
        output::print_json(&checks)?;
    } else {
        output::print_checks(&checks);
    }
    let ready = checks.iter().all(|c| c.ok || !c.required);
    Ok(if ready { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn run_checks(config: &HutchConfig) -> Vec<Check> {
    let provisioner = RootFilesystemProvisioner::from_config(&config.bootstrap);
    let rootfs_ready = provisioner.is_provisioned(&config.rootfs);
    let tool = which::which(&config.bootstrap.tool);

    vec![
        Check::required(
            "privilege",
            is_privileged(),
            "effective uid 0".to_string(),
        ),
        Check::required(
            "cgroup v2",
            config.cgroup_root.join("cgroup.controllers").is_file(),
            config.cgroup_root.display().to_string(),
        ),
        Check::required(
            "controllers",
            missing_controllers(&config.cgroup_root).is_empty(),
            format!("missing: {:?}", missing_controllers(&config.cgroup_root)),
        ),
        Check::optional(
            "root filesystem",
            rootfs_ready,
            config.rootfs.display().to_string(),
        ),
        Check::required(
            "bootstrap tool",
            rootfs_ready || tool.is_ok(),
            tool.map_or_else(
                |_| format!("{} not on PATH", config.bootstrap.tool),
                |path| path.display().to_string(),
            ),
        ),
    ]
}

/// Controllers hutch needs that the hierarchy does not offer.
fn missing_controllers(cgroup_root: &Path) -> Vec<&'static str> {
    let available =
        std::fs::read_to_string(cgroup_root.join("cgroup.controllers")).unwrap_or_default();
    ["memory", "cpu"]
        .into_iter()
        .filter(|c| !available.split_whitespace().any(|a| a == *c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controllers_read_from_hierarchy() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("cgroup.controllers"), "cpuset cpu io\n").expect("write");
        assert_eq!(missing_controllers(dir.path()), ["memory"]);
    }

    #[test]
    fn scratch_hierarchy_is_not_cgroup_v2() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = HutchConfig {
            cgroup_root: dir.path().to_path_buf(),
            rootfs: dir.path().join("rootfs"),
            ..HutchConfig::default()
        };
        let checks = run_checks(&config);
        let cgroup = checks.iter().find(|c| c.name == "cgroup v2").expect("check");
        assert!(!cgroup.ok);
        assert!(checks.iter().any(|c| c.name == "root filesystem" && !c.required));
    }
}
