//! Filesystem management for container isolation.
//!
//! Provides the root switch (`chroot` plus working-directory reset) and the
//! process-information mount together with its host-side teardown.

pub mod mount;
pub mod root;
