//! Process-information filesystem mount and teardown.
//!
//! The container gets a fresh `proc` mounted by its PID 1, so it only sees
//! its own process tree. The mount lives in the container's mount namespace
//! and normally disappears with it; the host-side helpers here detect and
//! detach any such mount that is still visible to the controller.

use std::io;
use std::path::{Path, PathBuf};

use nix::mount::{MntFlags, MsFlags, mount, umount2};

/// Mounts a `proc` filesystem at `target`.
///
/// Child-side: the mount reflects the PID namespace of the caller, so this
/// has to run in the container's PID 1.
///
/// # Errors
///
/// Returns the `mount(2)` errno.
pub fn mount_proc(target: &Path) -> nix::Result<()> {
    mount(
        Some("proc"),
        target,
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None::<&str>,
    )
}

/// Lazily detaches the filesystem mounted at `target`.
///
/// # Errors
///
/// Returns the `umount2(2)` error.
pub fn unmount_detach(target: &Path) -> io::Result<()> {
    umount2(target, MntFlags::MNT_DETACH).map_err(io::Error::from)?;
    tracing::info!(path = %target.display(), "filesystem detached");
    Ok(())
}

/// Returns whether `path` is a mount point in the calling process's mount
/// namespace.
///
/// # Errors
///
/// Returns an error if `/proc/self/mountinfo` cannot be read.
pub fn is_mounted(path: &Path) -> io::Result<bool> {
    let mountinfo = std::fs::read_to_string("/proc/self/mountinfo")?;
    let wanted = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    Ok(mount_points(&mountinfo).iter().any(|p| *p == wanted))
}

/// Extracts the mount points from `/proc/<pid>/mountinfo` content.
#[must_use]
pub fn mount_points(mountinfo: &str) -> Vec<PathBuf> {
    mountinfo
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(|field| PathBuf::from(unescape_octal(field)))
        .collect()
}

/// Undoes the kernel's `\NNN` escaping of spaces, tabs, newlines and
/// backslashes in mountinfo paths.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..=i + 3].iter().all(|d| (b'0'..=b'7').contains(d))
        {
            let code = bytes[i + 1..=i + 3]
                .iter()
                .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
            if let Ok(b) = u8::try_from(code) {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
