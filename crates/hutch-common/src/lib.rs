//! # hutch-common
//!
//! Shared types, the container specification, error definitions,
//! configuration models, and constants used across the hutch workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and carries no Linux-specific code, so every other crate
//! can share its vocabulary.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod spec;
pub mod types;
