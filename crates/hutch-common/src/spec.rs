//! Immutable description of one container run.
//!
//! A [`ContainerSpec`] is passed explicitly to every component; nothing in
//! the workspace reads container settings from global state, so runs with
//! distinct specs never interfere.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{CGROUP_NAME_PREFIX, CGROUP_V2_PATH, MAX_HOSTNAME_LEN};
use crate::error::SpecError;
use crate::types::{ContainerId, CpuQuota};

/// Which namespaces the payload gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    /// Isolate the PID namespace (payload becomes PID 1).
    pub pid: bool,
    /// Isolate the mount namespace.
    pub mount: bool,
    /// Isolate the UTS namespace (hostname).
    pub uts: bool,
}

impl NamespaceConfig {
    /// No isolation at all: the payload only gets the root switch.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            pid: false,
            mount: false,
            uts: false,
        }
    }
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            pid: true,
            mount: true,
            uts: true,
        }
    }
}

/// Validated configuration of a single container run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSpec {
    id: ContainerId,
    root: PathBuf,
    hostname: String,
    memory_bytes: u64,
    cpu: CpuQuota,
    payload: Vec<String>,
    cgroup_path: PathBuf,
    namespaces: NamespaceConfig,
}

impl ContainerSpec {
    /// Starts building a spec rooted at `root`.
    #[must_use]
    pub fn builder(root: impl Into<PathBuf>) -> ContainerSpecBuilder {
        ContainerSpecBuilder::new(root)
    }

    /// Identifier of this run.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Absolute path of the container root filesystem.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hostname inside the UTS namespace.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Memory ceiling in bytes.
    #[must_use]
    pub const fn memory_bytes(&self) -> u64 {
        self.memory_bytes
    }

    /// CPU bandwidth limit.
    #[must_use]
    pub const fn cpu(&self) -> CpuQuota {
        self.cpu
    }

    /// Payload program followed by its arguments. Never empty.
    #[must_use]
    pub fn payload(&self) -> &[String] {
        &self.payload
    }

    /// Absolute path of the cgroup directory for this run.
    #[must_use]
    pub fn cgroup_path(&self) -> &Path {
        &self.cgroup_path
    }

    /// Requested namespaces.
    #[must_use]
    pub const fn namespaces(&self) -> NamespaceConfig {
        self.namespaces
    }

    /// Mount point of the process-information filesystem, seen from the host.
    #[must_use]
    pub fn proc_mount_point(&self) -> PathBuf {
        self.root.join("proc")
    }
}

/// Builder for [`ContainerSpec`].
#[derive(Debug)]
pub struct ContainerSpecBuilder {
    id: Option<ContainerId>,
    root: PathBuf,
    hostname: String,
    memory_bytes: u64,
    cpu: CpuQuota,
    payload: Vec<String>,
    cgroup_path: Option<PathBuf>,
    cgroup_parent: PathBuf,
    namespaces: NamespaceConfig,
}

impl ContainerSpecBuilder {
    /// Creates a builder with default limits, hostname, and payload.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            id: None,
            root: root.into(),
            hostname: crate::constants::DEFAULT_HOSTNAME.to_string(),
            memory_bytes: crate::constants::DEFAULT_MEMORY_BYTES,
            cpu: CpuQuota::default(),
            payload: vec![crate::constants::DEFAULT_PAYLOAD.to_string()],
            cgroup_path: None,
            cgroup_parent: PathBuf::from(CGROUP_V2_PATH),
            namespaces: NamespaceConfig::default(),
        }
    }

    /// Uses a fixed identifier instead of a generated one.
    #[must_use]
    pub fn id(mut self, id: ContainerId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the hostname inside the container.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Sets the memory ceiling in bytes.
    #[must_use]
    pub const fn memory_bytes(mut self, bytes: u64) -> Self {
        self.memory_bytes = bytes;
        self
    }

    /// Sets the CPU bandwidth limit.
    #[must_use]
    pub const fn cpu(mut self, cpu: CpuQuota) -> Self {
        self.cpu = cpu;
        self
    }

    /// Sets the payload program and arguments.
    #[must_use]
    pub fn payload<I, S>(mut self, payload: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.payload = payload.into_iter().map(Into::into).collect();
        self
    }

    /// Uses an explicit cgroup directory. It must lie inside the
    /// [`cgroup_parent`](Self::cgroup_parent).
    #[must_use]
    pub fn cgroup_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cgroup_path = Some(path.into());
        self
    }

    /// Sets the cgroup root. The generated cgroup directory is placed
    /// directly under it; an explicit one must lie somewhere inside it.
    #[must_use]
    pub fn cgroup_parent(mut self, parent: impl Into<PathBuf>) -> Self {
        self.cgroup_parent = parent.into();
        self
    }

    /// Sets which namespaces to create.
    #[must_use]
    pub const fn namespaces(mut self, namespaces: NamespaceConfig) -> Self {
        self.namespaces = namespaces;
        self
    }

    /// Validates the settings and returns the spec.
    ///
    /// # Errors
    ///
    /// Returns an error if the root is relative, a limit is zero, the
    /// payload is empty or contains NUL bytes, the hostname is invalid, or
    /// an explicit cgroup path leaves the cgroup root.
    pub fn build(self) -> Result<ContainerSpec, SpecError> {
        if !self.root.is_absolute() {
            return Err(SpecError::RelativeRoot { path: self.root });
        }
        if self.memory_bytes == 0 {
            return Err(SpecError::NonPositive {
                field: "memory limit",
            });
        }
        if self.cpu.quota_us == 0 {
            return Err(SpecError::NonPositive { field: "CPU quota" });
        }
        if self.cpu.period_us == 0 {
            return Err(SpecError::NonPositive { field: "CPU period" });
        }
        if self.payload.is_empty() || self.payload[0].is_empty() {
            return Err(SpecError::EmptyPayload);
        }
        if let Some(arg) = self.payload.iter().find(|a| a.contains('\0')) {
            return Err(SpecError::NulInPayload { arg: arg.clone() });
        }
        validate_hostname(&self.hostname)?;

        if let Some(path) = &self.cgroup_path {
            if !is_below(&self.cgroup_parent, path) {
                return Err(SpecError::CgroupOutsideRoot {
                    path: path.clone(),
                    parent: self.cgroup_parent,
                });
            }
        }

        let id = self.id.unwrap_or_else(ContainerId::generate);
        let cgroup_path = self.cgroup_path.unwrap_or_else(|| {
            self.cgroup_parent
                .join(format!("{CGROUP_NAME_PREFIX}-{id}"))
        });

        Ok(ContainerSpec {
            id,
            root: self.root,
            hostname: self.hostname,
            memory_bytes: self.memory_bytes,
            cpu: self.cpu,
            payload: self.payload,
            cgroup_path,
            namespaces: self.namespaces,
        })
    }
}

/// `path` is a strict descendant of `parent` reached without `..`.
fn is_below(parent: &Path, path: &Path) -> bool {
    path.strip_prefix(parent).is_ok_and(|rel| {
        rel.components().next().is_some()
            && rel.components().all(|c| matches!(c, Component::Normal(_)))
    })
}

fn validate_hostname(hostname: &str) -> Result<(), SpecError> {
    let reason = if hostname.is_empty() {
        Some("must not be empty")
    } else if hostname.len() > MAX_HOSTNAME_LEN {
        Some("longer than 64 bytes")
    } else if !hostname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        Some("only letters, digits, '-' and '.' are allowed")
    } else {
        None
    };
    reason.map_or(Ok(()), |reason| {
        Err(SpecError::InvalidHostname {
            hostname: hostname.to_string(),
            reason,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_with_defaults() {
        let spec = ContainerSpec::builder("/tmp/t1").build().unwrap();
        assert_eq!(spec.root(), Path::new("/tmp/t1"));
        assert_eq!(spec.hostname(), "hutch");
        assert_eq!(spec.payload(), ["/bin/bash"]);
        assert_eq!(spec.proc_mount_point(), Path::new("/tmp/t1/proc"));
        assert_eq!(spec.namespaces(), NamespaceConfig::default());
    }

    #[test]
    fn generated_cgroup_path_uses_id() {
        let spec = ContainerSpec::builder("/tmp/t1")
            .id(ContainerId::new("abc"))
            .build()
            .unwrap();
        assert_eq!(spec.cgroup_path(), Path::new("/sys/fs/cgroup/hutch-abc"));

        let spec = ContainerSpec::builder("/tmp/t1")
            .id(ContainerId::new("abc"))
            .cgroup_parent("/tmp/cg")
            .build()
            .unwrap();
        assert_eq!(spec.cgroup_path(), Path::new("/tmp/cg/hutch-abc"));
    }

    #[test]
    fn explicit_cgroup_path_wins() {
        let spec = ContainerSpec::builder("/tmp/t1")
            .cgroup_path("/sys/fs/cgroup/work/mycontainer")
            .build()
            .unwrap();
        assert_eq!(spec.cgroup_path(), Path::new("/sys/fs/cgroup/work/mycontainer"));
    }

    #[test]
    fn cgroup_path_outside_root_is_rejected() {
        for path in ["/home/user/data", "/sys/fs/cgroup", "/sys/fs/cgroup/../../../home"] {
            let err = ContainerSpec::builder("/tmp/t1")
                .cgroup_path(path)
                .build()
                .unwrap_err();
            assert!(matches!(err, SpecError::CgroupOutsideRoot { .. }), "{path}: {err}");
        }
    }

    #[test]
    fn relative_root_is_rejected() {
        let err = ContainerSpec::builder("rootfs").build().unwrap_err();
        assert!(matches!(err, SpecError::RelativeRoot { .. }));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let err = ContainerSpec::builder("/tmp/t1")
            .memory_bytes(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, SpecError::NonPositive { field: "memory limit" }));

        let err = ContainerSpec::builder("/tmp/t1")
            .cpu(CpuQuota::new(0))
            .build()
            .unwrap_err();
        assert!(matches!(err, SpecError::NonPositive { field: "CPU quota" }));
    }

    #[test]
    fn empty_payload_is_rejected() {
        let err = ContainerSpec::builder("/tmp/t1")
            .payload(Vec::<String>::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, SpecError::EmptyPayload));
    }

    #[test]
    fn nul_in_payload_is_rejected() {
        let err = ContainerSpec::builder("/tmp/t1")
            .payload(["/bin/echo", "a\0b"])
            .build()
            .unwrap_err();
        assert!(matches!(err, SpecError::NulInPayload { .. }));
    }

    #[test]
    fn bad_hostnames_are_rejected() {
        let long = "x".repeat(65);
        for name in ["", "has space", long.as_str()] {
            let err = ContainerSpec::builder("/tmp/t1")
                .hostname(name)
                .build()
                .unwrap_err();
            assert!(matches!(err, SpecError::InvalidHostname { .. }), "{name:?}");
        }
    }

    #[test]
    fn scenario_spec_is_valid() {
        let spec = ContainerSpec::builder("/tmp/t1")
            .hostname("boxA")
            .memory_bytes(100_000_000)
            .cpu(CpuQuota::new(50_000))
            .payload(["/bin/true"])
            .build()
            .unwrap();
        assert_eq!(spec.memory_bytes(), 100_000_000);
        assert_eq!(spec.cpu().to_string(), "50000 100000");
    }
}
