//! Root filesystem provisioning.
//!
//! A root is considered usable once a sentinel path (by default `bin/sh`)
//! exists inside it. Populating an empty root is delegated to an external
//! bootstrap tool; hutch never interprets what the tool writes.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use hutch_common::config::BootstrapConfig;
use hutch_common::error::ProvisionError;

/// Something that can populate an empty root directory.
pub trait Bootstrapper: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Populates `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool is missing or reports failure.
    fn bootstrap(&self, root: &Path) -> Result<(), ProvisionError>;
}

/// Runs `debootstrap` (or a compatible tool) as an opaque step.
#[derive(Debug, Clone)]
pub struct Debootstrap {
    config: BootstrapConfig,
}

impl Debootstrap {
    /// Creates a bootstrapper from the given settings.
    #[must_use]
    pub const fn new(config: BootstrapConfig) -> Self {
        Self { config }
    }

    /// Arguments passed to the tool for `root`.
    #[must_use]
    pub fn args(&self, root: &Path) -> Vec<OsString> {
        let mut args = vec![
            OsString::from(format!("--variant={}", self.config.variant)),
            OsString::from(&self.config.release),
            root.as_os_str().to_os_string(),
        ];
        if let Some(mirror) = &self.config.mirror {
            args.push(OsString::from(mirror));
        }
        args
    }
}

impl Bootstrapper for Debootstrap {
    fn name(&self) -> &str {
        &self.config.tool
    }

    fn bootstrap(&self, root: &Path) -> Result<(), ProvisionError> {
        let tool = which::which(&self.config.tool).map_err(|_| ProvisionError::ToolMissing {
            tool: self.config.tool.clone(),
        })?;
        tracing::info!(
            tool = %tool.display(),
            release = %self.config.release,
            root = %root.display(),
            "bootstrapping root filesystem"
        );

        let status = Command::new(&tool)
            .args(self.args(root))
            .status()
            .map_err(|e| ProvisionError::Io {
                path: tool.clone(),
                source: e,
            })?;
        if !status.success() {
            return Err(ProvisionError::ToolFailed {
                tool: self.config.tool.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

/// Ensures a container root filesystem exists before a run.
pub struct RootFilesystemProvisioner {
    bootstrapper: Box<dyn Bootstrapper>,
    sentinel: PathBuf,
}

impl RootFilesystemProvisioner {
    /// Creates a provisioner using `bootstrapper` and the given sentinel,
    /// relative to the root.
    #[must_use]
    pub fn new(bootstrapper: Box<dyn Bootstrapper>, sentinel: impl Into<PathBuf>) -> Self {
        Self {
            bootstrapper,
            sentinel: sentinel.into(),
        }
    }

    /// Creates a provisioner backed by [`Debootstrap`].
    #[must_use]
    pub fn from_config(config: &BootstrapConfig) -> Self {
        Self::new(
            Box::new(Debootstrap::new(config.clone())),
            config.sentinel.clone(),
        )
    }

    /// Returns whether `root` already holds a usable filesystem.
    #[must_use]
    pub fn is_provisioned(&self, root: &Path) -> bool {
        root.join(&self.sentinel).symlink_metadata().is_ok()
    }

    /// Makes sure `root` is usable, bootstrapping it if needed, and that
    /// `root/proc` exists as a mount point.
    ///
    /// Idempotent: an already provisioned root is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the bootstrap tool is missing or fails, if the
    /// root is still unusable afterwards, or if directories cannot be
    /// created. A root left behind by a failed bootstrap is not trusted.
    pub fn ensure(&self, root: &Path) -> Result<(), ProvisionError> {
        if self.is_provisioned(root) {
            tracing::info!(root = %root.display(), "root filesystem already present");
        } else {
            create_dir(root)?;
            self.bootstrapper.bootstrap(root)?;
            if !self.is_provisioned(root) {
                return Err(ProvisionError::Incomplete {
                    sentinel: root.join(&self.sentinel),
                });
            }
            tracing::info!(
                root = %root.display(),
                tool = self.bootstrapper.name(),
                "root filesystem provisioned"
            );
        }
        create_dir(&root.join("proc"))
    }
}

impl std::fmt::Debug for RootFilesystemProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootFilesystemProvisioner")
            .field("bootstrapper", &self.bootstrapper.name())
            .field("sentinel", &self.sentinel)
            .finish()
    }
}

fn create_dir(path: &Path) -> Result<(), ProvisionError> {
    std::fs::create_dir_all(path).map_err(|e| ProvisionError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Writes the sentinel (or not) and counts invocations.
    struct FakeBootstrap {
        calls: Arc<AtomicUsize>,
        writes_sentinel: bool,
        fails: bool,
    }

    impl Bootstrapper for FakeBootstrap {
        fn name(&self) -> &str {
            "fake"
        }

        fn bootstrap(&self, root: &Path) -> Result<(), ProvisionError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fails {
                return Err(ProvisionError::ToolFailed {
                    tool: "fake".into(),
                    status: "exit status: 1".into(),
                });
            }
            if self.writes_sentinel {
                std::fs::create_dir_all(root.join("bin")).expect("mkdir");
                std::fs::write(root.join("bin/sh"), b"").expect("write");
            }
            Ok(())
        }
    }

    fn provisioner(writes_sentinel: bool, fails: bool) -> (RootFilesystemProvisioner, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let fake = FakeBootstrap {
            calls: Arc::clone(&calls),
            writes_sentinel,
            fails,
        };
        (RootFilesystemProvisioner::new(Box::new(fake), "bin/sh"), calls)
    }

    #[test]
    fn second_ensure_does_not_bootstrap_again() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("rootfs");
        let (provisioner, calls) = provisioner(true, false);

        provisioner.ensure(&root).expect("first");
        provisioner.ensure(&root).expect("second");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(root.join("proc").is_dir());
    }

    #[test]
    fn populated_root_is_never_bootstrapped() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("bin")).expect("mkdir");
        std::fs::write(dir.path().join("bin/sh"), b"").expect("write");
        let (provisioner, calls) = provisioner(true, false);

        provisioner.ensure(dir.path()).expect("ensure");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn tool_failure_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (provisioner, _) = provisioner(false, true);
        let err = provisioner.ensure(&dir.path().join("rootfs")).unwrap_err();
        assert!(matches!(err, ProvisionError::ToolFailed { .. }));
    }

    #[test]
    fn missing_sentinel_after_bootstrap_is_incomplete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (provisioner, _) = provisioner(false, false);
        let err = provisioner.ensure(&dir.path().join("rootfs")).unwrap_err();
        assert!(matches!(err, ProvisionError::Incomplete { .. }));
    }

    #[test]
    fn missing_tool_is_reported() {
        let config = BootstrapConfig {
            tool: "hutch-no-such-bootstrap-tool".into(),
            ..BootstrapConfig::default()
        };
        let err = Debootstrap::new(config)
            .bootstrap(Path::new("/tmp/unused"))
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ToolMissing { .. }));
    }

    #[test]
    fn debootstrap_arguments() {
        let args = Debootstrap::new(BootstrapConfig::default()).args(Path::new("/tmp/t1"));
        assert_eq!(
            args,
            [
                "--variant=minbase",
                "buster",
                "/tmp/t1",
                "http://deb.debian.org/debian/"
            ]
        );

        let no_mirror = BootstrapConfig {
            mirror: None,
            ..BootstrapConfig::default()
        };
        assert_eq!(Debootstrap::new(no_mirror).args(Path::new("/r")).len(), 3);
    }
}
