//! System-wide constants and default paths.

/// Cgroups v2 unified hierarchy mount point.
pub const CGROUP_V2_PATH: &str = "/sys/fs/cgroup";

/// Prefix for cgroups created by hutch (`<prefix>-<container id>`).
pub const CGROUP_NAME_PREFIX: &str = "hutch";

/// CPU bandwidth period written to `cpu.max`, in microseconds.
pub const CPU_PERIOD_US: u64 = 100_000;

/// Default container root filesystem location.
pub const DEFAULT_ROOTFS_DIR: &str = "/tmp/hutch/rootfs";

/// Default hostname inside the UTS namespace.
pub const DEFAULT_HOSTNAME: &str = "hutch";

/// Default memory ceiling (100 MiB).
pub const DEFAULT_MEMORY_BYTES: u64 = 100 * 1024 * 1024;

/// Default CPU quota per period (half of one core).
pub const DEFAULT_CPU_QUOTA_US: u64 = 50_000;

/// Default payload when none is given.
pub const DEFAULT_PAYLOAD: &str = "/bin/bash";

/// Path, relative to the root filesystem, whose presence marks a usable root.
pub const DEFAULT_SENTINEL: &str = "bin/sh";

/// Bootstrap tool used to populate an empty root filesystem.
pub const DEFAULT_BOOTSTRAP_TOOL: &str = "debootstrap";

/// Distribution variant passed to the bootstrap tool.
pub const DEFAULT_BOOTSTRAP_VARIANT: &str = "minbase";

/// Distribution release passed to the bootstrap tool.
pub const DEFAULT_BOOTSTRAP_RELEASE: &str = "buster";

/// Package mirror passed to the bootstrap tool.
pub const DEFAULT_BOOTSTRAP_MIRROR: &str = "http://deb.debian.org/debian/";

/// Longest hostname accepted by `sethostname(2)`.
pub const MAX_HOSTNAME_LEN: usize = 64;

/// Exit status of a child that failed before reaching `exec`.
pub const CHILD_SETUP_FAILED_EXIT: i32 = 125;

/// Exit status of a child whose `exec` of the payload failed.
pub const CHILD_EXEC_FAILED_EXIT: i32 = 127;

/// Exit status of the CLI after an interrupted run.
pub const INTERRUPTED_EXIT: i32 = 130;
