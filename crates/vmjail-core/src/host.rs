//! Host syscall seam.
//!
//! Provisioning code never calls the kernel directly. It goes through
//! [`HostOps`], which [`LinuxHost`] implements with real syscalls and
//! which tests replace to inject failures.

use std::os::fd::OwnedFd;
use std::path::Path;

use vmjail_common::error::Result;

use crate::filesystem::{link, mount};
use crate::namespace;

/// Handle to the mount namespace a thread belonged to before joining
/// another one.
#[derive(Debug)]
pub struct SavedNamespace {
    fd: Option<OwnedFd>,
}

impl SavedNamespace {
    /// Wraps an open `/proc/.../ns/mnt` descriptor.
    #[must_use]
    pub const fn from_fd(fd: OwnedFd) -> Self {
        Self { fd: Some(fd) }
    }

    /// A handle not backed by any descriptor, for hosts that do not
    /// really switch namespaces.
    #[must_use]
    pub const fn detached() -> Self {
        Self { fd: None }
    }

    /// Takes the underlying descriptor, if any.
    pub fn into_fd(self) -> Option<OwnedFd> {
        self.fd
    }
}

/// Privileged operations needed to place artifacts inside a jail.
pub trait HostOps: Send + Sync {
    /// Creates `dst` as a hard link to `src`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be created.
    fn hard_link(&self, src: &Path, dst: &Path) -> Result<()>;

    /// Changes ownership of `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if ownership cannot be changed.
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()>;

    /// Creates an empty mount target at `path` unless it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    fn create_placeholder(&self, path: &Path) -> Result<()>;

    /// Bind mounts `src` on `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    fn bind_mount(&self, src: &Path, target: &Path) -> Result<()>;

    /// Remounts the bind mount at `target` read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the remount fails.
    fn remount_read_only(&self, target: &Path) -> Result<()>;

    /// Forcibly unmounts `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount fails.
    fn force_unmount(&self, target: &Path) -> Result<()>;

    /// Moves the calling thread into the mount namespace of `pid` and
    /// returns a handle to the namespace it left.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be opened or joined.
    fn enter_mount_namespace(&self, pid: u32) -> Result<SavedNamespace>;

    /// Moves the calling thread back into a saved namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot rejoin the namespace.
    fn restore_mount_namespace(&self, saved: SavedNamespace) -> Result<()>;
}

/// [`HostOps`] backed by real Linux syscalls.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxHost;

impl HostOps for LinuxHost {
    fn hard_link(&self, src: &Path, dst: &Path) -> Result<()> {
        link::hard_link(src, dst)
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        link::chown(path, uid, gid)
    }

    fn create_placeholder(&self, path: &Path) -> Result<()> {
        mount::create_placeholder(path)
    }

    fn bind_mount(&self, src: &Path, target: &Path) -> Result<()> {
        mount::bind_mount(src, target)
    }

    fn remount_read_only(&self, target: &Path) -> Result<()> {
        mount::remount_read_only(target)
    }

    fn force_unmount(&self, target: &Path) -> Result<()> {
        mount::force_unmount(target)
    }

    fn enter_mount_namespace(&self, pid: u32) -> Result<SavedNamespace> {
        namespace::mount::join_mount_namespace(pid)
    }

    fn restore_mount_namespace(&self, saved: SavedNamespace) -> Result<()> {
        namespace::mount::rejoin_mount_namespace(saved)
    }
}

/// In-memory [`HostOps`] that records every call and fails on demand.
#[cfg(any(test, feature = "testing"))]
pub mod fake {
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use vmjail_common::error::{JailError, Result};

    use super::{HostOps, SavedNamespace};

    /// Operation names understood by [`FakeHost::fail_on`].
    pub const OPS: [&str; 8] = [
        "link",
        "chown",
        "placeholder",
        "bind",
        "remount_ro",
        "unmount",
        "enter",
        "restore",
    ];

    /// Records calls as strings like `"bind /img/vmlinux -> /jail/vmlinux"`.
    #[derive(Debug, Default)]
    pub struct FakeHost {
        events: Mutex<Vec<String>>,
        failures: Mutex<Vec<(String, PathBuf)>>,
    }

    impl FakeHost {
        /// Creates a host on which every operation succeeds.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes `op` fail whenever it targets `path`. For `enter` the
        /// path is the decimal pid; `restore` uses an empty path.
        #[must_use]
        pub fn fail_on(self, op: &str, path: impl Into<PathBuf>) -> Self {
            debug_assert!(OPS.contains(&op), "unknown fake op {op}");
            if let Ok(mut failures) = self.failures.lock() {
                failures.push((op.to_string(), path.into()));
            }
            self
        }

        /// Returns every recorded call in order.
        pub fn events(&self) -> Vec<String> {
            self.events.lock().map(|e| e.clone()).unwrap_or_default()
        }

        fn record(&self, op: &str, path: &Path, event: String) -> Result<()> {
            if let Ok(mut events) = self.events.lock() {
                events.push(event);
            }
            let should_fail = self
                .failures
                .lock()
                .map(|f| f.iter().any(|(o, p)| o == op && p == path))
                .unwrap_or(false);
            if should_fail {
                return Err(JailError::Io {
                    path: path.to_path_buf(),
                    source: std::io::Error::other(format!("injected {op} failure")),
                });
            }
            Ok(())
        }
    }

    impl HostOps for FakeHost {
        fn hard_link(&self, src: &Path, dst: &Path) -> Result<()> {
            self.record(
                "link",
                src,
                format!("link {} -> {}", src.display(), dst.display()),
            )
        }

        fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
            self.record("chown", path, format!("chown {} {uid}:{gid}", path.display()))
        }

        fn create_placeholder(&self, path: &Path) -> Result<()> {
            self.record("placeholder", path, format!("placeholder {}", path.display()))
        }

        fn bind_mount(&self, src: &Path, target: &Path) -> Result<()> {
            self.record(
                "bind",
                target,
                format!("bind {} -> {}", src.display(), target.display()),
            )
        }

        fn remount_read_only(&self, target: &Path) -> Result<()> {
            self.record("remount_ro", target, format!("remount_ro {}", target.display()))
        }

        fn force_unmount(&self, target: &Path) -> Result<()> {
            self.record("unmount", target, format!("unmount {}", target.display()))
        }

        fn enter_mount_namespace(&self, pid: u32) -> Result<SavedNamespace> {
            self.record("enter", Path::new(&pid.to_string()), format!("enter {pid}"))?;
            Ok(SavedNamespace::detached())
        }

        fn restore_mount_namespace(&self, _saved: SavedNamespace) -> Result<()> {
            self.record("restore", Path::new(""), "restore".to_string())
        }
    }
}
