//! Memory resource control via cgroups v2.
//!
//! Manages the `memory.max` control file.

use std::io;
use std::path::Path;

use hutch_common::error::{ResourceError, ResourceStep};

use super::write_control;

/// Sets the hard memory limit for a cgroup.
///
/// # Errors
///
/// Returns an error if `memory.max` is missing or cannot be written.
pub fn set_memory_max(cgroup_path: &Path, bytes: u64) -> Result<(), ResourceError> {
    let file = cgroup_path.join("memory.max");
    write_control(&file, &bytes.to_string()).map_err(|e| ResourceError {
        step: ResourceStep::Memory,
        path: file,
        source: e,
    })?;
    tracing::debug!(bytes, "memory max limit set");
    Ok(())
}

/// Reads `memory.max` back. `None` means the literal `max` (unlimited).
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds neither a byte
/// count nor `max`.
pub fn read_memory_max(cgroup_path: &Path) -> io::Result<Option<u64>> {
    let content = std::fs::read_to_string(cgroup_path.join("memory.max"))?;
    parse_limit(content.trim())
}

/// Parses a cgroup limit value: a decimal count or `max`.
pub(crate) fn parse_limit(value: &str) -> io::Result<Option<u64>> {
    if value == "max" {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, format!("bad limit {value:?}")))
}
