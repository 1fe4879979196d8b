//! Mount namespace setup.
//!
//! A new mount namespace starts as a copy of the host's, including shared
//! propagation. Until the tree is made private, mounts made by the container
//! would still show up on the host.

use nix::mount::{MsFlags, mount};

/// Makes every mount in the calling process's namespace recursively private.
///
/// Child-side: call only inside the new mount namespace, before any mount.
///
/// # Errors
///
/// Returns the `mount(2)` errno.
pub fn make_mounts_private() -> nix::Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
}
