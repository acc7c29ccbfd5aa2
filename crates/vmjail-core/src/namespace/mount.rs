//! Mount namespace entry.
//!
//! Joining the mount namespace of an already-jailed process lets the
//! parent populate the jail's view of the filesystem after the jail's root
//! has been established. `setns(2)` only affects the calling thread, so
//! the work runs on a dedicated thread ([`run_in_mount_namespace`]) and the
//! [`MountNamespaceGuard`] cannot leave that thread.

use std::fs::File;
use std::marker::PhantomData;
use std::os::fd::OwnedFd;
use std::path::Path;

use nix::sched::{CloneFlags, setns, unshare};
use vmjail_common::error::{JailError, Result};

use crate::host::{HostOps, SavedNamespace};

/// Procfs handle of the calling thread's mount namespace.
const OWN_MOUNT_NS: &str = "/proc/thread-self/ns/mnt";

fn mount_ns_path(pid: u32) -> String {
    format!("/proc/{pid}/ns/mnt")
}

/// Moves the calling thread into the mount namespace of `pid`.
///
/// The thread first stops sharing its filesystem attributes with the rest
/// of the process, which `setns(CLONE_NEWNS)` requires in a multithreaded
/// program.
///
/// # Errors
///
/// Returns [`JailError::Namespace`] if the process is gone, the caller
/// lacks `CAP_SYS_ADMIN`, or the kernel refuses the switch.
pub fn join_mount_namespace(pid: u32) -> Result<SavedNamespace> {
    let own = File::open(OWN_MOUNT_NS).map_err(|e| JailError::Io {
        path: OWN_MOUNT_NS.into(),
        source: e,
    })?;
    let target = File::open(mount_ns_path(pid))
        .map_err(|e| JailError::Namespace { pid, source: e })?;

    unshare(CloneFlags::CLONE_FS).map_err(|e| JailError::Namespace {
        pid,
        source: e.into(),
    })?;
    setns(&target, CloneFlags::CLONE_NEWNS).map_err(|e| JailError::Namespace {
        pid,
        source: e.into(),
    })?;

    tracing::debug!(pid, "joined mount namespace");
    Ok(SavedNamespace::from_fd(OwnedFd::from(own)))
}

/// Moves the calling thread back into a namespace saved by
/// [`join_mount_namespace`].
///
/// # Errors
///
/// Returns [`JailError::NamespaceRestore`] if `setns(2)` fails.
pub fn rejoin_mount_namespace(saved: SavedNamespace) -> Result<()> {
    let Some(fd) = saved.into_fd() else {
        return Ok(());
    };
    setns(&fd, CloneFlags::CLONE_NEWNS)
        .map_err(|e| JailError::NamespaceRestore { source: e.into() })?;
    tracing::debug!("restored own mount namespace");
    Ok(())
}

/// Enters mount namespaces on behalf of a jail owned by `uid:gid`.
pub struct NamespaceMounter<'h> {
    host: &'h dyn HostOps,
    uid: u32,
    gid: u32,
}

impl<'h> NamespaceMounter<'h> {
    /// Creates a mounter that chowns every mount target to `uid:gid`.
    #[must_use]
    pub fn new(host: &'h dyn HostOps, uid: u32, gid: u32) -> Self {
        Self { host, uid, gid }
    }

    /// Joins the mount namespace of `pid` on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be joined; the thread is
    /// then still in its own namespace.
    pub fn enter(&self, pid: u32) -> Result<MountNamespaceGuard<'h>> {
        let saved = self.host.enter_mount_namespace(pid)?;
        Ok(MountNamespaceGuard {
            host: self.host,
            uid: self.uid,
            gid: self.gid,
            pid,
            saved: Some(saved),
            _thread_bound: PhantomData,
        })
    }
}

/// Proof that the current thread is inside a foreign mount namespace.
///
/// Dropping the guard restores the thread's namespace; [`release`]
/// does the same and reports failures. The guard is `!Send`.
///
/// [`release`]: MountNamespaceGuard::release
pub struct MountNamespaceGuard<'h> {
    host: &'h dyn HostOps,
    uid: u32,
    gid: u32,
    pid: u32,
    saved: Option<SavedNamespace>,
    _thread_bound: PhantomData<*const ()>,
}

impl MountNamespaceGuard<'_> {
    /// Pid whose namespace the thread joined.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Bind mounts `src` on `target` inside the joined namespace.
    ///
    /// The target is created if absent and handed to the jail owner. With
    /// `read_only` the mount is remounted read-only afterwards.
    ///
    /// # Errors
    ///
    /// Returns the first failing step; earlier steps are not undone.
    pub fn mount(&self, src: &Path, target: &Path, read_only: bool) -> Result<()> {
        self.host.create_placeholder(target)?;
        self.host.bind_mount(src, target)?;
        self.host.chown(target, self.uid, self.gid)?;
        if read_only {
            self.host.remount_read_only(target)?;
        }
        tracing::info!(
            pid = self.pid,
            src = %src.display(),
            target = %target.display(),
            read_only,
            "artifact mounted into jail"
        );
        Ok(())
    }

    /// Returns the thread to its own mount namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread could not rejoin its namespace.
    pub fn release(mut self) -> Result<()> {
        self.restore()
    }

    fn restore(&mut self) -> Result<()> {
        match self.saved.take() {
            Some(saved) => self.host.restore_mount_namespace(saved),
            None => Ok(()),
        }
    }
}

impl Drop for MountNamespaceGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            tracing::warn!(pid = self.pid, error = %e, "failed to restore mount namespace on drop");
        }
    }
}

/// Runs `work` on a fresh thread that has joined the mount namespace of
/// `pid`, then restores and joins that thread.
///
/// The thread is never reused: it exits once `work` returns, so no other
/// code can observe it in the foreign namespace.
///
/// # Errors
///
/// Returns the error from entering the namespace, from `work`, or from
/// restoring the namespace, in that order of precedence.
pub fn run_in_mount_namespace<T, F>(
    host: &dyn HostOps,
    pid: u32,
    uid: u32,
    gid: u32,
    work: F,
) -> Result<T>
where
    T: Send,
    F: FnOnce(&MountNamespaceGuard<'_>) -> Result<T> + Send,
{
    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name(format!("mntns-{pid}"))
            .spawn_scoped(scope, move || {
                let guard = NamespaceMounter::new(host, uid, gid).enter(pid)?;
                let outcome = work(&guard);
                let restored = guard.release();
                let value = outcome?;
                restored?;
                Ok(value)
            })
            .map_err(|e| JailError::Namespace { pid, source: e })?;

        handle
            .join()
            .unwrap_or(Err(JailError::NamespaceWorker { pid }))
    })
}
