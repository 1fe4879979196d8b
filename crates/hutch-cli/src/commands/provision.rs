//! `hutch provision`: Make sure a root filesystem exists.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use hutch_common::config::HutchConfig;
use hutch_runtime::provision::RootFilesystemProvisioner;

/// Arguments for the `provision` command.
#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Root filesystem to populate. Defaults to the configured one.
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Distribution release passed to the bootstrap tool.
    #[arg(long)]
    pub release: Option<String>,
}

/// Executes the `provision` command.
///
/// # Errors
///
/// Returns an error if the root is relative or bootstrapping fails.
pub fn execute(args: &ProvisionArgs, config: &HutchConfig) -> anyhow::Result<()> {
    let root = args.root.as_ref().unwrap_or(&config.rootfs);
    anyhow::ensure!(
        root.is_absolute(),
        "root path must be absolute: {}",
        root.display()
    );

    let mut bootstrap = config.bootstrap.clone();
    if let Some(release) = &args.release {
        bootstrap.release.clone_from(release);
    }
    RootFilesystemProvisioner::from_config(&bootstrap)
        .ensure(root)
        .with_context(|| format!("provisioning {} failed", root.display()))?;
    tracing::info!(root = %root.display(), "root filesystem ready");
    Ok(())
}
