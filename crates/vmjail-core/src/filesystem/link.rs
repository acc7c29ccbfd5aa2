//! Hard links into the jail root.
//!
//! A hard link is only possible when the artifact and the jail live on the
//! same filesystem; a cross-device link surfaces as [`JailError::Link`].

use std::path::Path;

use nix::unistd::{Gid, Uid};
use vmjail_common::error::{JailError, Result};

/// Creates `dst` as an additional directory entry for `src`.
///
/// # Errors
///
/// Returns [`JailError::Link`] if `link(2)` fails, e.g. because `dst`
/// already exists or the paths are on different devices.
pub fn hard_link(src: &Path, dst: &Path) -> Result<()> {
    std::fs::hard_link(src, dst).map_err(|e| JailError::Link {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    tracing::debug!(src = %src.display(), dst = %dst.display(), "hard link created");
    Ok(())
}

/// Changes the owner of `path` to the given UID and GID.
///
/// # Errors
///
/// Returns [`JailError::Chown`] if `chown(2)` fails.
pub fn chown(path: &Path, uid: u32, gid: u32) -> Result<()> {
    nix::unistd::chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))).map_err(|e| {
        JailError::Chown {
            path: path.to_path_buf(),
            source: e.into(),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;

    use super::*;

    #[test]
    fn hard_link_shares_inode_with_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("vmlinux");
        let dst = dir.path().join("linked");
        std::fs::write(&src, b"kernel").unwrap();

        hard_link(&src, &dst).unwrap();

        let src_meta = std::fs::metadata(&src).unwrap();
        let dst_meta = std::fs::metadata(&dst).unwrap();
        assert_eq!(src_meta.ino(), dst_meta.ino());
        assert_eq!(src_meta.nlink(), 2);
    }

    #[test]
    fn hard_link_onto_existing_entry_fails_with_paths() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("disk.img");
        let dst = dir.path().join("taken");
        std::fs::write(&src, b"disk").unwrap();
        std::fs::write(&dst, b"other").unwrap();

        let err = hard_link(&src, &dst).unwrap_err();
        assert!(matches!(err, JailError::Link { .. }));
        assert!(err.to_string().contains("taken"));
    }

    #[test]
    fn chown_to_current_owner_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"").unwrap();

        let uid = nix::unistd::getuid().as_raw();
        let gid = nix::unistd::getgid().as_raw();
        chown(&path, uid, gid).unwrap();
    }

    #[test]
    fn chown_of_missing_path_reports_it() {
        let err = chown(Path::new("/nonexistent/vmjail/file"), 0, 0).unwrap_err();
        assert!(matches!(err, JailError::Chown { .. }));
        assert!(err.to_string().contains("/nonexistent/vmjail/file"));
    }
}
