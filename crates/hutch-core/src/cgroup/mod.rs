//! Cgroups v2 resource management.
//!
//! [`ResourceLimiter`] creates one cgroup per container run, moves the
//! controller into it, and writes the memory and CPU limits. The payload
//! inherits membership when it is cloned, which is why the controller
//! registers itself: a process that does not exist yet cannot be added.
//!
//! Releasing a [`CgroupHandle`] moves the controller back to the cgroup it
//! started in and removes the directory. The kernel refuses to remove a
//! cgroup that still has members, so the move has to come first.

pub mod cpu;
pub mod memory;

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use hutch_common::constants::CGROUP_V2_PATH;
use hutch_common::error::{CleanupWarning, ResourceError, ResourceStep};
use hutch_common::spec::ContainerSpec;

/// Interface file present in every cgroup v2 directory, root included.
const CONTROLLERS_FILE: &str = "cgroup.controllers";

/// Controllers hutch configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Controller {
    /// The `memory` controller (`memory.max`).
    Memory,
    /// The `cpu` controller (`cpu.max`).
    Cpu,
}

impl Controller {
    /// Name as used in `cgroup.controllers` and `cgroup.subtree_control`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Creates and configures cgroups under a cgroup v2 hierarchy.
#[derive(Debug, Clone)]
pub struct ResourceLimiter {
    hierarchy: PathBuf,
}

impl ResourceLimiter {
    /// Creates a limiter for the hierarchy mounted at `hierarchy`.
    #[must_use]
    pub fn new(hierarchy: impl Into<PathBuf>) -> Self {
        Self {
            hierarchy: hierarchy.into(),
        }
    }

    /// Mount point of the hierarchy.
    #[must_use]
    pub fn hierarchy(&self) -> &Path {
        &self.hierarchy
    }

    /// Creates the cgroup for `spec`, registers the calling process, and
    /// writes the limits.
    ///
    /// If a step after directory creation fails, the partial cgroup is
    /// released before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first failing step. Nothing is retried.
    pub fn configure(&self, spec: &ContainerSpec) -> Result<CgroupHandle, ResourceError> {
        let mut handle = self.create(spec)?;
        if let Err(e) = handle.apply(spec) {
            for warning in handle.release() {
                tracing::warn!(%warning, "releasing partially configured cgroup");
            }
            return Err(e);
        }
        Ok(handle)
    }

    /// Creates the cgroup directory for `spec`. An existing cgroup is
    /// reused.
    ///
    /// The hierarchy must be a mounted cgroup v2 tree and the cgroup must
    /// lie strictly inside it. A new directory that the kernel does not
    /// populate with `cgroup.controllers` is not a cgroup; it is removed
    /// again and the call fails.
    ///
    /// The controller's current cgroup is recorded first so
    /// [`CgroupHandle::release`] can move it back.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceStep::Create`] error if the hierarchy is not
    /// cgroup v2, the path lies outside it, or the directory cannot be
    /// created as a cgroup.
    pub fn create(&self, spec: &ContainerSpec) -> Result<CgroupHandle, ResourceError> {
        let path = spec.cgroup_path().to_path_buf();
        let create_error = |path: PathBuf, source| ResourceError {
            step: ResourceStep::Create,
            path,
            source,
        };

        let marker = self.hierarchy.join(CONTROLLERS_FILE);
        if !marker.is_file() {
            return Err(create_error(
                marker,
                io::Error::new(io::ErrorKind::Unsupported, "not a cgroup v2 hierarchy"),
            ));
        }
        if !is_inside(&self.hierarchy, &path) {
            return Err(create_error(
                path,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("outside the cgroup hierarchy {}", self.hierarchy.display()),
                ),
            ));
        }

        let origin = current_cgroup(&self.hierarchy).filter(|origin| *origin != path);
        let existed = path.is_dir();
        std::fs::create_dir_all(&path).map_err(|e| create_error(path.clone(), e))?;
        if !path.join(CONTROLLERS_FILE).is_file() {
            if !existed {
                let _ = std::fs::remove_dir(&path);
            }
            return Err(create_error(
                path,
                io::Error::new(io::ErrorKind::Unsupported, "directory is not a cgroup"),
            ));
        }
        tracing::info!(path = %path.display(), reused = existed, "cgroup created");

        Ok(CgroupHandle {
            path,
            controllers: Vec::new(),
            origin,
        })
    }
}

impl Default for ResourceLimiter {
    fn default() -> Self {
        Self::new(CGROUP_V2_PATH)
    }
}

/// A cgroup created for one container run.
///
/// Owned by the run that created it and consumed by [`release`](Self::release).
#[derive(Debug)]
pub struct CgroupHandle {
    path: PathBuf,
    controllers: Vec<Controller>,
    origin: Option<PathBuf>,
}

impl CgroupHandle {
    /// Path to this cgroup's directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Controllers whose limits have been written.
    #[must_use]
    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    /// Enables the controllers, registers the calling process, and writes
    /// the memory and CPU limits, in that order.
    ///
    /// # Errors
    ///
    /// Returns the first failing step.
    pub fn apply(&mut self, spec: &ContainerSpec) -> Result<(), ResourceError> {
        self.enable_controllers()?;
        self.add_process(std::process::id())?;

        memory::set_memory_max(&self.path, spec.memory_bytes())?;
        self.controllers.push(Controller::Memory);

        let cpu = spec.cpu();
        cpu::set_cpu_max(&self.path, cpu.quota_us, cpu.period_us)?;
        self.controllers.push(Controller::Cpu);

        tracing::info!(
            path = %self.path.display(),
            memory_bytes = spec.memory_bytes(),
            cpu = %cpu,
            "cgroup limits applied"
        );
        Ok(())
    }

    /// Adds a process to this cgroup by writing its PID.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `cgroup.procs` fails.
    pub fn add_process(&self, pid: u32) -> Result<(), ResourceError> {
        let procs_path = self.path.join("cgroup.procs");
        write_control(&procs_path, &pid.to_string()).map_err(|e| ResourceError {
            step: ResourceStep::Register,
            path: procs_path,
            source: e,
        })?;
        tracing::debug!(pid, "added process to cgroup");
        Ok(())
    }

    /// Turns on the memory and cpu controllers for the parent's children
    /// if the parent has not enabled them yet.
    fn enable_controllers(&self) -> Result<(), ResourceError> {
        let Some(parent) = self.path.parent() else {
            return Ok(());
        };
        let control = parent.join("cgroup.subtree_control");
        let step_error = |e| ResourceError {
            step: ResourceStep::Controllers,
            path: control.clone(),
            source: e,
        };
        let enabled = std::fs::read_to_string(&control).map_err(step_error)?;
        let missing: Vec<String> = [Controller::Memory, Controller::Cpu]
            .iter()
            .filter(|c| !enabled.split_whitespace().any(|name| name == c.name()))
            .map(|c| format!("+{c}"))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        write_control(&control, &missing.join(" ")).map_err(step_error)?;
        tracing::debug!(path = %control.display(), enabled = ?missing, "controllers enabled");
        Ok(())
    }

    /// Moves the controller back to its original cgroup and removes this
    /// one. A directory that is already gone is not an error.
    ///
    /// Every step is attempted; failures come back as warnings.
    #[must_use]
    pub fn release(self) -> Vec<CleanupWarning> {
        let mut warnings = Vec::new();

        if let Some(origin) = &self.origin {
            let procs = origin.join("cgroup.procs");
            if procs.is_file() {
                if let Err(e) = write_control(&procs, &std::process::id().to_string()) {
                    warnings.push(CleanupWarning {
                        resource: "cgroup",
                        path: procs,
                        message: format!("moving controller back failed: {e}"),
                    });
                }
            }
        }

        match remove_cgroup_dir(&self.path) {
            Ok(()) => tracing::info!(path = %self.path.display(), "cgroup destroyed"),
            Err(e) => warnings.push(CleanupWarning {
                resource: "cgroup",
                path: self.path.clone(),
                message: e.to_string(),
            }),
        }
        warnings
    }
}

/// Removes a cgroup directory with `rmdir(2)`. One that is already gone
/// counts as removed.
///
/// On cgroupfs the interface files do not keep a cgroup busy, so a
/// directory that still holds other files is left in place and reported.
fn remove_cgroup_dir(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Writes `value` to an existing control file.
///
/// Unlike [`std::fs::write`] this never creates the file: a missing
/// control file means the controller is unavailable.
pub(crate) fn write_control(path: &Path, value: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
    file.write_all(value.as_bytes())
}

/// Returns whether `path` names a directory strictly below `hierarchy`
/// without climbing out through `..`.
fn is_inside(hierarchy: &Path, path: &Path) -> bool {
    path.strip_prefix(hierarchy).is_ok_and(|rel| {
        rel.components().next().is_some()
            && rel.components().all(|c| matches!(c, Component::Normal(_)))
    })
}

/// Resolves the calling process's cgroup from `/proc/self/cgroup`.
fn current_cgroup(hierarchy: &Path) -> Option<PathBuf> {
    let content = std::fs::read_to_string("/proc/self/cgroup")
        .inspect_err(|e| tracing::debug!(error = %e, "cannot read /proc/self/cgroup"))
        .ok()?;
    parse_unified_cgroup(&content).map(|rel| hierarchy.join(rel.trim_start_matches('/')))
}

/// Extracts the cgroup v2 path from `/proc/<pid>/cgroup` content.
fn parse_unified_cgroup(content: &str) -> Option<&str> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("0::"))
        .map(str::trim)
}
