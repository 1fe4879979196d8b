//! Linux namespace selection for container isolation.
//!
//! A [`NamespaceSet`] turns the requested [`NamespaceConfig`] into a single
//! set of `clone(2)` flags. All requested namespaces are created by one
//! syscall, so activation is all-or-nothing: there is no state in which the
//! payload runs with only some of them.

pub mod mount;
pub mod uts;

use std::fmt;

use hutch_common::spec::NamespaceConfig;
use nix::sched::CloneFlags;

/// A namespace kind hutch can isolate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    /// Process IDs.
    Pid,
    /// Mount table.
    Mount,
    /// Hostname and domain name.
    Uts,
}

impl NamespaceKind {
    /// The `clone(2)` flag creating this namespace.
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Mount => CloneFlags::CLONE_NEWNS,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pid => write!(f, "pid"),
            Self::Mount => write!(f, "mount"),
            Self::Uts => write!(f, "uts"),
        }
    }
}

/// Whether the namespaces of a set exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Requested but not created.
    Requested,
    /// Created by a successful clone.
    Entered,
}

/// Namespaces requested for one run and their activation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceSet {
    kinds: Vec<NamespaceKind>,
    activation: Activation,
}

impl NamespaceSet {
    /// Builds the set requested by `config`.
    #[must_use]
    pub fn new(config: NamespaceConfig) -> Self {
        let kinds = [
            (config.pid, NamespaceKind::Pid),
            (config.mount, NamespaceKind::Mount),
            (config.uts, NamespaceKind::Uts),
        ]
        .into_iter()
        .filter_map(|(wanted, kind)| wanted.then_some(kind))
        .collect();
        Self {
            kinds,
            activation: Activation::Requested,
        }
    }

    /// Requested namespace kinds.
    #[must_use]
    pub fn kinds(&self) -> &[NamespaceKind] {
        &self.kinds
    }

    /// Returns whether `kind` is requested.
    #[must_use]
    pub fn contains(&self, kind: NamespaceKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Combined `clone(2)` flags for every requested namespace.
    #[must_use]
    pub fn clone_flags(&self) -> CloneFlags {
        self.kinds
            .iter()
            .fold(CloneFlags::empty(), |flags, kind| flags | kind.clone_flag())
    }

    /// A fresh `/proc` is only mounted when it can be both scoped to the new
    /// PID namespace and confined to the new mount namespace.
    #[must_use]
    pub fn mounts_proc(&self) -> bool {
        self.contains(NamespaceKind::Pid) && self.contains(NamespaceKind::Mount)
    }

    /// Current activation state.
    #[must_use]
    pub const fn activation(&self) -> Activation {
        self.activation
    }

    /// Records that the clone creating these namespaces succeeded.
    pub fn mark_entered(&mut self) {
        self.activation = Activation::Entered;
        tracing::debug!(namespaces = %self, "namespaces entered");
    }
}

impl fmt::Display for NamespaceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kinds.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<String> = self.kinds.iter().map(ToString::to_string).collect();
        write!(f, "{}", names.join(","))
    }
}
