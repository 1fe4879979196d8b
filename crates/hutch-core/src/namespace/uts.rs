//! UTS namespace isolation.
//!
//! Allows the container to have its own hostname.

use nix::unistd::sethostname;

/// Sets the hostname inside the UTS namespace.
///
/// Child-side: outside a new UTS namespace this would rename the host.
///
/// # Errors
///
/// Returns the `sethostname(2)` errno.
pub fn set_hostname(hostname: &str) -> nix::Result<()> {
    sethostname(hostname)
}
