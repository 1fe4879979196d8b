//! Domain primitive types used across the hutch workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SpecError;

/// Unique identifier for a container run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// CPU bandwidth limit as written to `cpu.max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuQuota {
    /// Microseconds of CPU time allowed per period.
    pub quota_us: u64,
    /// Length of the accounting period in microseconds.
    pub period_us: u64,
}

impl CpuQuota {
    /// Creates a quota using the standard 100ms period.
    #[must_use]
    pub const fn new(quota_us: u64) -> Self {
        Self {
            quota_us,
            period_us: crate::constants::CPU_PERIOD_US,
        }
    }

    /// Returns the quota as a fraction of one core.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn cores(&self) -> f64 {
        self.quota_us as f64 / self.period_us as f64
    }
}

impl Default for CpuQuota {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_CPU_QUOTA_US)
    }
}

impl fmt::Display for CpuQuota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.quota_us, self.period_us)
    }
}

/// How a payload process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Normal exit with the given code.
    Code(i32),
    /// Terminated by the given signal number.
    Signaled(i32),
}

impl ExitStatus {
    /// Returns whether the process exited with code 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self, Self::Code(0))
    }

    /// Returns the shell-style exit code (`128 + signal` for signals).
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Code(code) => *code,
            Self::Signaled(signal) => 128 + *signal,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signaled(signal) => write!(f, "killed by signal {signal}"),
        }
    }
}

/// Lifecycle stage that a run can fail in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Privilege check before any side effect.
    Preflight,
    /// Root filesystem provisioning.
    Provisioning,
    /// Cgroup creation and limit configuration.
    LimitApplied,
    /// Namespace construction and payload start.
    Isolating,
    /// Waiting on the payload.
    Running,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preflight => write!(f, "preflight"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::LimitApplied => write!(f, "resource limits"),
            Self::Isolating => write!(f, "isolation"),
            Self::Running => write!(f, "supervision"),
        }
    }
}

/// Lifecycle state of a container run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Nothing has happened yet.
    Idle,
    /// Ensuring the root filesystem exists.
    Provisioning,
    /// The cgroup exists and carries the configured limits.
    LimitApplied,
    /// Spawning the isolated child.
    Isolating,
    /// The payload is executing.
    Running,
    /// The payload exited and its status is recorded.
    Exited,
    /// Teardown has been attempted. Final.
    CleanedUp,
    /// The run failed in the given stage; cleanup follows.
    Failed(Stage),
}

impl RunState {
    /// Returns whether cleanup is the only remaining transition.
    #[must_use]
    pub const fn awaits_cleanup(&self) -> bool {
        matches!(self, Self::Exited | Self::Failed(_))
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::LimitApplied => write!(f, "limit-applied"),
            Self::Isolating => write!(f, "isolating"),
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
            Self::CleanedUp => write!(f, "cleaned-up"),
            Self::Failed(stage) => write!(f, "failed({stage})"),
        }
    }
}

/// Parses sizes like `100M`, `128MiB`, `1G`, or `1048576` into bytes.
///
/// Single-letter suffixes follow the cgroup convention and are binary.
///
/// # Errors
///
/// Returns an error if the number or suffix is not recognised, or the
/// result overflows.
#[allow(clippy::option_if_let_else)]
pub fn parse_size(input: &str) -> Result<u64, SpecError> {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    let s = input.trim();
    let (num_str, multiplier) = if let Some(n) = s.strip_suffix("GiB") {
        (n, GIB)
    } else if let Some(n) = s.strip_suffix("GB") {
        (n, 1_000_000_000)
    } else if let Some(n) = s.strip_suffix("MiB") {
        (n, MIB)
    } else if let Some(n) = s.strip_suffix("MB") {
        (n, 1_000_000)
    } else if let Some(n) = s.strip_suffix("KiB") {
        (n, KIB)
    } else if let Some(n) = s.strip_suffix("KB") {
        (n, 1000)
    } else if let Some(n) = s.strip_suffix(['G', 'g']) {
        (n, GIB)
    } else if let Some(n) = s.strip_suffix(['M', 'm']) {
        (n, MIB)
    } else if let Some(n) = s.strip_suffix(['K', 'k']) {
        (n, KIB)
    } else {
        (s, 1)
    };
    num_str
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| SpecError::InvalidSize {
            input: input.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_cgroup_style_suffix() {
        assert_eq!(parse_size("100M").unwrap(), 100 * 1024 * 1024);
        assert_eq!(parse_size("2G").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("64k").unwrap(), 64 * 1024);
    }

    #[test]
    fn parse_size_mib() {
        assert_eq!(parse_size("128MiB").unwrap(), 128 * 1024 * 1024);
    }

    #[test]
    fn parse_size_decimal_units() {
        assert_eq!(parse_size("100MB").unwrap(), 100_000_000);
    }

    #[test]
    fn parse_size_plain_bytes() {
        assert_eq!(parse_size("1048576").unwrap(), 1_048_576);
    }

    #[test]
    fn parse_size_invalid() {
        assert!(parse_size("abc").is_err());
        assert!(parse_size("12X").is_err());
        assert!(parse_size("99999999999999G").is_err());
    }

    #[test]
    fn cpu_quota_uses_fixed_period() {
        let quota = CpuQuota::new(50_000);
        assert_eq!(quota.period_us, 100_000);
        assert_eq!(quota.to_string(), "50000 100000");
        assert!((quota.cores() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn exit_status_codes() {
        assert!(ExitStatus::Code(0).success());
        assert!(!ExitStatus::Code(1).success());
        assert_eq!(ExitStatus::Signaled(9).code(), 137);
        assert_eq!(ExitStatus::Code(3).to_string(), "exit code 3");
    }

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(ContainerId::generate(), ContainerId::generate());
    }

    #[test]
    fn run_state_display() {
        assert_eq!(RunState::Failed(Stage::Isolating).to_string(), "failed(isolation)");
        assert!(RunState::Exited.awaits_cleanup());
        assert!(!RunState::CleanedUp.awaits_cleanup());
    }
}
