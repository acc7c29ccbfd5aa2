//! Bind mount utilities for exposing artifacts inside the jail.
//!
//! All functions act on the mount namespace of the calling thread. To
//! affect a jailed process, call them after joining its namespace via
//! [`crate::namespace::mount`].

use std::fs::OpenOptions;
use std::path::Path;

use nix::mount::{MntFlags, MsFlags, mount, umount2};
use vmjail_common::error::{JailError, Result};

/// Creates an empty file at `path` to serve as a bind mount target.
///
/// An existing file is left untouched.
///
/// # Errors
///
/// Returns an error if the file cannot be created.
pub fn create_placeholder(path: &Path) -> Result<()> {
    let _file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| JailError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(())
}

/// Bind mounts `source` on `target`.
///
/// # Errors
///
/// Returns [`JailError::Mount`] if the `mount(2)` syscall fails.
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .map_err(|e| JailError::Mount {
        from: source.to_path_buf(),
        target: target.to_path_buf(),
        source: e.into(),
    })?;
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        "bind mount created"
    );
    Ok(())
}

/// Remounts an existing bind mount read-only.
///
/// # Errors
///
/// Returns [`JailError::Remount`] if the `mount(2)` syscall fails.
pub fn remount_read_only(target: &Path) -> Result<()> {
    mount(
        None::<&str>,
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
        None::<&str>,
    )
    .map_err(|e| JailError::Remount {
        path: target.to_path_buf(),
        source: e.into(),
    })?;
    tracing::debug!(target = %target.display(), "bind mount remounted read-only");
    Ok(())
}

/// Forcibly unmounts `target`.
///
/// # Errors
///
/// Returns [`JailError::Unmount`] if `umount2(2)` fails, including when
/// `target` is not a mount point.
pub fn force_unmount(target: &Path) -> Result<()> {
    umount2(target, MntFlags::MNT_FORCE).map_err(|e| JailError::Unmount {
        path: target.to_path_buf(),
        source: e.into(),
    })?;
    tracing::debug!(target = %target.display(), "unmounted");
    Ok(())
}
