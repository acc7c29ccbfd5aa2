//! Linux namespace management for jail provisioning.
//!
//! Namespace membership is a property of a thread, not of a process.
//! Everything here is built so that a foreign namespace is only ever
//! joined by a dedicated thread that is restored before it exits.

pub mod mount;
