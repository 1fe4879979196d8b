//! # hutch-core
//!
//! Low-level Linux isolation primitives for the hutch runtime.
//!
//! This crate provides safe wrappers over:
//! - **Privilege**: the superuser precondition checked before any run.
//! - **Cgroups v2**: memory and CPU limiting through the unified hierarchy.
//! - **Namespaces**: PID, mount, and UTS namespace selection and setup.
//! - **Filesystem**: root switching and the process-information mount.
//!
//! Functions documented as child-side run inside a freshly cloned process
//! before `exec`; they make raw syscalls only and never log or allocate.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod filesystem;
pub mod namespace;
pub mod privilege;
