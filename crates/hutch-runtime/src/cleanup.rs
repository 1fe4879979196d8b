//! Teardown of the resources a run created.
//!
//! Resources are recorded as soon as they exist and released in reverse
//! order: mounts first, then the cgroup. Every step is attempted even if an
//! earlier one failed. Failures become [`CleanupWarning`]s.
//!
//! A [`Teardown`] dropped before [`Teardown::release`] ran releases on
//! drop, so a panic between recording and cleanup still frees everything.

use std::path::PathBuf;

use hutch_common::error::CleanupWarning;
use hutch_core::cgroup::CgroupHandle;
use hutch_core::filesystem::mount::{is_mounted, unmount_detach};

/// Ledger of resources awaiting release.
#[derive(Debug, Default)]
pub struct Teardown {
    mounts: Vec<PathBuf>,
    cgroup: Option<CgroupHandle>,
    done: bool,
}

impl Teardown {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the run's cgroup.
    pub fn track_cgroup(&mut self, handle: CgroupHandle) {
        tracing::debug!(path = %handle.path().display(), "tracking cgroup");
        self.cgroup = Some(handle);
    }

    /// Records mount points the run introduced.
    pub fn track_mounts(&mut self, mounts: impl IntoIterator<Item = PathBuf>) {
        self.mounts.extend(mounts);
    }

    /// Recorded mount points, in creation order.
    #[must_use]
    pub fn mounts(&self) -> &[PathBuf] {
        &self.mounts
    }

    /// Returns whether a cgroup is recorded.
    #[must_use]
    pub const fn has_cgroup(&self) -> bool {
        self.cgroup.is_some()
    }

    /// Returns whether [`Teardown::release`] has run.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// Releases everything recorded. Later calls do nothing.
    pub fn release(&mut self) -> Vec<CleanupWarning> {
        if self.done {
            return Vec::new();
        }
        self.done = true;

        let mut warnings = Vec::new();
        for mount in self.mounts.drain(..).rev() {
            if let Some(warning) = release_mount(mount) {
                warnings.push(warning);
            }
        }
        if let Some(cgroup) = self.cgroup.take() {
            warnings.extend(cgroup.release());
        }

        for warning in &warnings {
            tracing::warn!(
                resource = warning.resource,
                path = %warning.path.display(),
                message = %warning.message,
                "cleanup step failed"
            );
        }
        warnings
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if !self.done {
            tracing::warn!("teardown dropped before release, releasing now");
            let _ = self.release();
        }
    }
}

/// Detaches `path` if it is still mounted in this namespace.
fn release_mount(path: PathBuf) -> Option<CleanupWarning> {
    match is_mounted(&path) {
        Ok(false) => {
            tracing::debug!(path = %path.display(), "not mounted, nothing to detach");
            None
        }
        Ok(true) => unmount_detach(&path).err().map(|e| CleanupWarning {
            resource: "mount",
            path,
            message: e.to_string(),
        }),
        Err(e) => Some(CleanupWarning {
            resource: "mount",
            path,
            message: format!("reading mount table failed: {e}"),
        }),
    }
}
