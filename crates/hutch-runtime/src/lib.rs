//! Container run lifecycle for hutch.
//!
//! [`ContainerLifecycleManager`](lifecycle::ContainerLifecycleManager) ties
//! the pieces together: a provisioned root filesystem, a cgroup with memory
//! and CPU limits, a payload cloned into new namespaces, and a teardown that
//! runs on every exit path.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod cleanup;
pub mod interrupt;
pub mod isolate;
pub mod lifecycle;
pub mod process;
pub mod provision;
