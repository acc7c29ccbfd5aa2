//! # vmjail-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the vmjail workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and holds the machine and jailer configuration that the
//! launcher and the rootfs provisioning steps read and rewrite.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
