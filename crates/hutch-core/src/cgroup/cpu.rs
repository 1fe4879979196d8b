//! CPU resource control via cgroups v2.
//!
//! Manages the `cpu.max` control file.

use std::io;
use std::path::Path;

use hutch_common::error::{ResourceError, ResourceStep};

use super::memory::parse_limit;
use super::write_control;

/// Sets the CPU bandwidth limit (max microseconds per period).
///
/// Writes `quota_us period_us` to `cpu.max`, where `quota_us` is the
/// maximum CPU time allowed per `period_us` window.
///
/// # Errors
///
/// Returns an error if `cpu.max` is missing or cannot be written.
pub fn set_cpu_max(cgroup_path: &Path, quota_us: u64, period_us: u64) -> Result<(), ResourceError> {
    let file = cgroup_path.join("cpu.max");
    let value = format!("{quota_us} {period_us}");
    write_control(&file, &value).map_err(|e| ResourceError {
        step: ResourceStep::Cpu,
        path: file,
        source: e,
    })?;
    tracing::debug!(quota_us, period_us, "CPU max quota set");
    Ok(())
}

/// Reads `cpu.max` back as `(quota, period)`. A `None` quota means `max`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is malformed.
pub fn read_cpu_max(cgroup_path: &Path) -> io::Result<(Option<u64>, u64)> {
    let content = std::fs::read_to_string(cgroup_path.join("cpu.max"))?;
    let mut fields = content.split_whitespace();
    let (Some(quota), Some(period), None) = (fields.next(), fields.next(), fields.next()) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad cpu.max {:?}", content.trim()),
        ));
    };
    let period = parse_limit(period)?.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "cpu.max period cannot be max")
    })?;
    Ok((parse_limit(quota)?, period))
}
