//! Privilege precondition for container runs.
//!
//! Creating namespaces, calling `chroot(2)`, and writing cgroup controller
//! files all need superuser-equivalent capabilities. The check runs before
//! any other action so an unprivileged caller fails without side effects.

use hutch_common::error::StageError;
use nix::unistd::geteuid;

/// Returns whether the effective user is root.
#[must_use]
pub fn is_privileged() -> bool {
    geteuid().is_root()
}

/// Fails unless the effective user is root.
///
/// # Errors
///
/// Returns [`StageError::PermissionDenied`] naming the effective uid.
pub fn ensure_privileged() -> Result<(), StageError> {
    let euid = geteuid();
    if euid.is_root() {
        tracing::debug!("running with effective uid 0");
        Ok(())
    } else {
        Err(StageError::PermissionDenied {
            message: format!(
                "effective uid {euid} cannot create namespaces, chroot, or write cgroups; run as root"
            ),
        })
    }
}
