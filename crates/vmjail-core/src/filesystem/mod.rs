//! Filesystem operations for jail provisioning.
//!
//! Hard links move artifacts into the jail before the VMM starts; bind
//! mounts expose them inside the jail's mount namespace afterwards.

pub mod link;
pub mod mount;
