//! Root filesystem switching.
//!
//! Confines path resolution of the calling process to the container root.
//! The working directory is reset to `/` afterwards, otherwise it would keep
//! pointing outside the new root.

use std::path::Path;

use nix::unistd::{chdir, chroot};

/// Switches the root filesystem to `new_root` and changes into `/`.
///
/// Child-side: must run after the mount namespace is active so later mounts
/// stay inside the container.
///
/// # Errors
///
/// Returns the errno of `chroot(2)` or `chdir(2)`.
pub fn change_root(new_root: &Path) -> nix::Result<()> {
    chroot(new_root)?;
    chdir("/")
}
