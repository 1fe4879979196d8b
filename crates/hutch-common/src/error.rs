//! Error types for the hutch workspace.
//!
//! Each lifecycle stage has its own error enum. [`RunError`] wraps the one
//! that ended a run together with the stage it came from and any cleanup
//! warnings gathered afterwards, so teardown problems never hide the
//! original failure.

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::types::{ExitStatus, Stage};

/// A [`ContainerSpec`](crate::spec::ContainerSpec) failed validation.
#[derive(Debug, Error)]
pub enum SpecError {
    /// The root filesystem path is relative.
    #[error("root path must be absolute: {}", path.display())]
    RelativeRoot {
        /// Offending path.
        path: PathBuf,
    },

    /// A numeric limit is zero.
    #[error("{field} must be positive")]
    NonPositive {
        /// Name of the limit.
        field: &'static str,
    },

    /// No payload command was given.
    #[error("payload command is empty")]
    EmptyPayload,

    /// A payload argument cannot be passed to `execvp(3)`.
    #[error("payload argument contains a NUL byte: {arg:?}")]
    NulInPayload {
        /// Offending argument.
        arg: String,
    },

    /// The hostname is unusable.
    #[error("invalid hostname {hostname:?}: {reason}")]
    InvalidHostname {
        /// Offending hostname.
        hostname: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The cgroup directory does not lie inside the cgroup root.
    #[error("cgroup path {} is not inside {}", path.display(), parent.display())]
    CgroupOutsideRoot {
        /// Requested cgroup directory.
        path: PathBuf,
        /// Cgroup root it must live under.
        parent: PathBuf,
    },

    /// A size string such as `100M` could not be parsed.
    #[error("invalid size: {input:?}")]
    InvalidSize {
        /// Offending input.
        input: String,
    },
}

/// The configuration file could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Configuration file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The file is not valid configuration JSON.
    #[error("invalid configuration in {}: {source}", path.display())]
    Parse {
        /// Configuration file path.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },
}

/// Populating the root filesystem failed.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The bootstrap tool is not installed.
    #[error("bootstrap tool {tool:?} not found on PATH")]
    ToolMissing {
        /// Tool name.
        tool: String,
    },

    /// The bootstrap tool ran but reported failure.
    #[error("bootstrap tool {tool:?} failed: {status}")]
    ToolFailed {
        /// Tool name.
        tool: String,
        /// Exit status as reported by the OS.
        status: String,
    },

    /// The bootstrap tool succeeded but the root is still not usable.
    #[error("root filesystem incomplete: {} is missing", sentinel.display())]
    Incomplete {
        /// Path that was expected to exist.
        sentinel: PathBuf,
    },

    /// A filesystem operation failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// Cgroup configuration step, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStep {
    /// Creating the cgroup directory.
    Create,
    /// Enabling controllers in the parent's `cgroup.subtree_control`.
    Controllers,
    /// Writing the controller pid to `cgroup.procs`.
    Register,
    /// Writing `memory.max`.
    Memory,
    /// Writing `cpu.max`.
    Cpu,
}

impl fmt::Display for ResourceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Controllers => write!(f, "controllers"),
            Self::Register => write!(f, "register"),
            Self::Memory => write!(f, "memory"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

/// A cgroup configuration step failed.
///
/// These are one-shot privileged writes; a failure means missing privilege
/// or an unsupported kernel feature and is never retried.
#[derive(Debug, Error)]
#[error("cgroup {step} step failed at {}: {source}", path.display())]
pub struct ResourceError {
    /// Step that failed.
    pub step: ResourceStep,
    /// File or directory being written.
    pub path: PathBuf,
    /// Underlying I/O error.
    pub source: io::Error,
}

/// Which side of the spawn observed an isolation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The controller, before or while spawning.
    Parent,
    /// The cloned child, before `exec`.
    Child,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parent => write!(f, "parent"),
            Self::Child => write!(f, "child"),
        }
    }
}

/// Building the isolated environment or starting the payload failed.
///
/// Child-side failures are reported to the controller through a
/// close-on-exec pipe before the child exits. If that report is lost, the
/// child's only signal is its exit status (125 for setup, 127 for `exec`),
/// which shares the exit-status channel with the payload's own failures:
/// such a run is indistinguishable from a payload that exited 125 or 127.
#[derive(Debug, Error)]
pub enum IsolationError {
    /// New PID, mount, or UTS namespaces could not be created, or the
    /// mount tree could not be made private inside the new namespace.
    #[error("namespace request failed ({side} side): {source}")]
    NamespaceRequestFailed {
        /// Where the failure was observed.
        side: Side,
        /// Underlying OS error.
        source: io::Error,
    },

    /// `chroot(2)` or `chdir(2)` into the new root failed.
    #[error("root switch to {} failed: {source}", root.display())]
    RootSwitchFailed {
        /// Requested root.
        root: PathBuf,
        /// Underlying OS error.
        source: io::Error,
    },

    /// Mounting the process-information filesystem failed.
    #[error("mount at {} failed: {source}", target.display())]
    MountFailed {
        /// Mount point inside the container.
        target: PathBuf,
        /// Underlying OS error.
        source: io::Error,
    },

    /// `sethostname(2)` failed.
    #[error("setting hostname {hostname:?} failed: {source}")]
    HostnameFailed {
        /// Requested hostname.
        hostname: String,
        /// Underlying OS error.
        source: io::Error,
    },

    /// The payload could not be executed.
    #[error("exec of {program:?} failed: {source}")]
    ExecFailed {
        /// Payload program.
        program: String,
        /// Underlying OS error.
        source: io::Error,
    },

    /// The controller could not prepare the spawn (pipe, stack).
    #[error("spawn failed: {source}")]
    SpawnFailed {
        /// Underlying OS error.
        source: io::Error,
    },

    /// A payload argument cannot be converted for `execvp(3)`.
    #[error("invalid payload argument: {arg:?}")]
    InvalidCommand {
        /// Offending argument.
        arg: String,
    },

    /// Waiting for the payload failed.
    #[error("waiting for pid {pid} failed: {source}")]
    WaitFailed {
        /// Payload pid.
        pid: i32,
        /// Underlying OS error.
        source: io::Error,
    },
}

impl IsolationError {
    /// Returns which side of the spawn observed this failure.
    #[must_use]
    pub const fn side(&self) -> Side {
        match self {
            Self::NamespaceRequestFailed { side, .. } => *side,
            Self::RootSwitchFailed { .. }
            | Self::MountFailed { .. }
            | Self::HostnameFailed { .. }
            | Self::ExecFailed { .. } => Side::Child,
            Self::SpawnFailed { .. } | Self::InvalidCommand { .. } | Self::WaitFailed { .. } => {
                Side::Parent
            }
        }
    }
}

/// The payload ran and exited unsuccessfully.
///
/// Informational: the run itself completed and was cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("payload exited abnormally: {status}")]
pub struct PayloadExitError {
    /// Observed exit status.
    pub status: ExitStatus,
}

/// A best-effort teardown step failed. Never escalated to an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("cleanup of {resource} at {} failed: {message}", path.display())]
pub struct CleanupWarning {
    /// Kind of resource being released (`mount`, `cgroup`).
    pub resource: &'static str,
    /// Path of the resource.
    pub path: PathBuf,
    /// Description of the failure.
    pub message: String,
}

/// Cause of a failed run.
#[derive(Debug, Error)]
pub enum StageError {
    /// The controller lacks the required privilege.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the missing privilege.
        message: String,
    },

    /// Root filesystem provisioning failed.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Cgroup configuration failed.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Isolation or payload start failed.
    #[error(transparent)]
    Isolation(#[from] IsolationError),

    /// A termination signal arrived before the payload was running.
    #[error("interrupted by a termination signal")]
    Interrupted,

    /// The manager was asked to run a second time.
    #[error("this container run has already been attempted")]
    AlreadyRun,
}

/// A container run that ended in a `Failed` state.
///
/// Cleanup has already been attempted when this is returned; its warnings
/// are attached but do not replace `source`.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct RunError {
    /// Stage the run was in when it failed.
    pub stage: Stage,
    /// What went wrong.
    pub source: StageError,
    /// Non-fatal teardown failures observed afterwards.
    pub warnings: Vec<CleanupWarning>,
}

impl RunError {
    /// Returns whether the run was cut short by a termination signal.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self.source, StageError::Interrupted)
    }
}
