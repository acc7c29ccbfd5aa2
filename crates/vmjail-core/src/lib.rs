//! # vmjail-core
//!
//! Low-level Linux primitives used to expose boot artifacts inside a jail.
//!
//! This crate provides safe abstractions over:
//! - **Filesystem**: hard links with ownership transfer, bind mounts,
//!   read-only remounts, and forced unmounts.
//! - **Namespaces**: joining another process's mount namespace from a
//!   dedicated thread and restoring the thread afterwards.
//!
//! Every syscall goes through the [`host::HostOps`] trait so callers can
//! substitute a fake host in tests.

#![cfg_attr(
    test,
    allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)
)]

pub mod filesystem;
pub mod host;
pub mod namespace;
