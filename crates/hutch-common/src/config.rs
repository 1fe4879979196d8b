//! Runtime configuration model.
//!
//! Loaded from an optional JSON file; every field has a default so a
//! partial file only overrides what it names. CLI flags are applied on top
//! of the loaded values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::ConfigError;
use crate::spec::{ContainerSpecBuilder, NamespaceConfig};
use crate::types::CpuQuota;

/// Root configuration for hutch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HutchConfig {
    /// Mount point of the cgroup v2 hierarchy.
    pub cgroup_root: PathBuf,
    /// Default container root filesystem.
    pub rootfs: PathBuf,
    /// Default hostname inside the container.
    pub hostname: String,
    /// Default memory ceiling in bytes.
    pub memory_bytes: u64,
    /// Default CPU quota in microseconds per 100ms period.
    pub cpu_quota_us: u64,
    /// Namespaces created for each run.
    pub namespaces: NamespaceConfig,
    /// How empty root filesystems get populated.
    pub bootstrap: BootstrapConfig,
}

impl Default for HutchConfig {
    fn default() -> Self {
        Self {
            cgroup_root: PathBuf::from(constants::CGROUP_V2_PATH),
            rootfs: PathBuf::from(constants::DEFAULT_ROOTFS_DIR),
            hostname: constants::DEFAULT_HOSTNAME.to_string(),
            memory_bytes: constants::DEFAULT_MEMORY_BYTES,
            cpu_quota_us: constants::DEFAULT_CPU_QUOTA_US,
            namespaces: NamespaceConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl HutchConfig {
    /// Loads the configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Loads `path` if given, otherwise returns the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the given file cannot be read or parsed.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    /// Returns a spec builder pre-filled with these defaults.
    #[must_use]
    pub fn spec_builder(&self) -> ContainerSpecBuilder {
        ContainerSpecBuilder::new(self.rootfs.clone())
            .hostname(self.hostname.clone())
            .memory_bytes(self.memory_bytes)
            .cpu(CpuQuota::new(self.cpu_quota_us))
            .cgroup_parent(self.cgroup_root.clone())
            .namespaces(self.namespaces)
    }
}

/// Settings for the external root filesystem bootstrap tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Tool name or path (looked up on `PATH`).
    pub tool: String,
    /// Distribution variant (`--variant=`).
    pub variant: String,
    /// Distribution release name.
    pub release: String,
    /// Package mirror URL, if any.
    pub mirror: Option<String>,
    /// Path relative to the root whose presence marks it as usable.
    pub sentinel: PathBuf,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            tool: constants::DEFAULT_BOOTSTRAP_TOOL.to_string(),
            variant: constants::DEFAULT_BOOTSTRAP_VARIANT.to_string(),
            release: constants::DEFAULT_BOOTSTRAP_RELEASE.to_string(),
            mirror: Some(constants::DEFAULT_BOOTSTRAP_MIRROR.to_string()),
            sentinel: PathBuf::from(constants::DEFAULT_SENTINEL),
        }
    }
}
