//! # vmjail-runtime
//!
//! Launch side of the jail: the jailer command builder, named handler
//! pipelines, and the rootfs provisioning strategies that plug into them.
//!
//! ## Architecture
//!
//! - [`command`]: immutable builder for the jailer command line and the
//!   cancellable process it describes.
//! - [`handler`]: ordered, uniquely named handler lists.
//! - [`strategy`]: link and bind mount provisioning of boot artifacts.
//! - [`jail`]: ties configuration, command and strategy together.

#![cfg_attr(
    test,
    allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)
)]

pub mod command;
pub mod handler;
pub mod jail;
pub mod strategy;
