//! Machine and jailer configuration models.
//!
//! [`MachineConfig`] is owned by the caller. The launcher reads its
//! [`JailerConfig`], and the provisioning steps produce a rewritten copy in
//! which every boot artifact is addressed the way the jailed process sees it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{
    API_SOCKET_NAME, DEFAULT_JAILER_BASE_DIR, PRODUCT_NAME, ROOT_DRIVE_ID, ROOTFS_FOLDER_NAME,
};
use crate::error::{JailError, Result};
use crate::types::{JailId, SeccompLevel, StrategyKind};

/// A block device attached to the VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drive {
    /// Identifier of the drive within the VM.
    pub drive_id: String,
    /// Backing file on the host, or inside the jail once provisioned.
    pub path_on_host: PathBuf,
    /// Whether this drive holds the guest's root filesystem.
    #[serde(default)]
    pub is_root_device: bool,
    /// Whether the guest sees the drive read-only.
    #[serde(default)]
    pub is_read_only: bool,
}

/// Settings handed to the jailer binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JailerConfig {
    /// Unique VM identification string.
    pub id: JailId,
    /// UID the jailer switches to before exec-ing the target binary.
    pub uid: Option<u32>,
    /// GID the jailer switches to before exec-ing the target binary.
    pub gid: Option<u32>,
    /// NUMA node the process is assigned to.
    pub numa_node: Option<u32>,
    /// Path to the VMM binary exec-ed by the jailer.
    pub exec_file: PathBuf,
    /// Folder where chroot jails are built; `/srv/jailer` when unset.
    #[serde(default)]
    pub chroot_base_dir: Option<PathBuf>,
    /// Network namespace handle the jailer joins.
    #[serde(default)]
    pub netns: Option<PathBuf>,
    /// Detach with `setsid()` and redirect stdio to `/dev/null`.
    #[serde(default)]
    pub daemonize: bool,
    /// Syscall filtering level.
    #[serde(default)]
    pub seccomp_level: SeccompLevel,
    /// How boot artifacts reach the jail root.
    #[serde(default)]
    pub strategy: StrategyKind,
}

impl JailerConfig {
    /// Returns the configured base directory or the default one.
    #[must_use]
    pub fn chroot_base_dir(&self) -> PathBuf {
        self.chroot_base_dir
            .clone()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_JAILER_BASE_DIR))
    }

    /// Directory the jailer creates for this VM: `<base>/firecracker/<id>`.
    #[must_use]
    pub fn jail_dir(&self) -> PathBuf {
        self.chroot_base_dir()
            .join(PRODUCT_NAME)
            .join(self.id.as_str())
    }

    /// Root filesystem of the jail: `<base>/firecracker/<id>/root`.
    #[must_use]
    pub fn root_dir(&self) -> PathBuf {
        self.jail_dir().join(ROOTFS_FOLDER_NAME)
    }

    /// API socket path inside the jail directory.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.jail_dir().join(API_SOCKET_NAME)
    }

    /// Returns the target UID.
    ///
    /// # Errors
    ///
    /// Returns [`JailError::MissingField`] if the UID was never set.
    pub fn required_uid(&self) -> Result<u32> {
        self.uid.ok_or(JailError::MissingField { field: "uid" })
    }

    /// Returns the target GID.
    ///
    /// # Errors
    ///
    /// Returns [`JailError::MissingField`] if the GID was never set.
    pub fn required_gid(&self) -> Result<u32> {
        self.gid.ok_or(JailError::MissingField { field: "gid" })
    }

    /// Returns the NUMA node.
    ///
    /// # Errors
    ///
    /// Returns [`JailError::MissingField`] if the node was never set.
    pub fn required_numa_node(&self) -> Result<u32> {
        self.numa_node
            .ok_or(JailError::MissingField { field: "numa_node" })
    }
}

/// Configuration of one VM as seen by the launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// API socket of the VMM.
    #[serde(default)]
    pub socket_path: PathBuf,
    /// Kernel image; a host path until provisioned.
    pub kernel_image_path: PathBuf,
    /// Attached block devices in configuration order.
    #[serde(default)]
    pub drives: Vec<Drive>,
    /// Jailer settings; `None` runs the VMM unjailed.
    #[serde(default)]
    pub jailer: Option<JailerConfig>,
}

impl MachineConfig {
    /// Loads a machine configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| JailError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Returns the jailer settings.
    ///
    /// # Errors
    ///
    /// Returns an error if no jailer section is configured.
    pub fn jailer(&self) -> Result<&JailerConfig> {
        self.jailer.as_ref().ok_or_else(|| JailError::Config {
            message: "machine has no jailer configuration".into(),
        })
    }

    /// Returns a copy whose kernel and drive paths are reduced to file
    /// names, i.e. relative to the jail root.
    ///
    /// # Errors
    ///
    /// Returns an error if an artifact path has no file name component.
    pub fn rebased_to_jail(&self) -> Result<Self> {
        let mut rebased = self.clone();
        rebased.kernel_image_path = artifact_file_name(&self.kernel_image_path)?;
        for drive in &mut rebased.drives {
            drive.path_on_host = artifact_file_name(&drive.path_on_host)?;
        }
        Ok(rebased)
    }
}

/// Returns the final component of an artifact path.
///
/// # Errors
///
/// Returns an error if the path ends in `..` or is a bare root.
pub fn artifact_file_name(path: &Path) -> Result<PathBuf> {
    path.file_name()
        .map(PathBuf::from)
        .ok_or_else(|| JailError::Config {
            message: format!("artifact path {} has no file name", path.display()),
        })
}

/// Assembles the drive list with the root device placed last.
///
/// Additional drives receive sequential identifiers starting at `"0"`,
/// the root device is named `root_drive`.
#[derive(Debug, Clone)]
pub struct DrivesBuilder {
    root: Drive,
    drives: Vec<Drive>,
}

impl DrivesBuilder {
    /// Starts a drive list around the given root filesystem image.
    #[must_use]
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root: Drive {
                drive_id: ROOT_DRIVE_ID.to_string(),
                path_on_host: root_path.into(),
                is_root_device: true,
                is_read_only: false,
            },
            drives: Vec::new(),
        }
    }

    /// Replaces the root drive's path and read-only flag.
    #[must_use]
    pub fn with_root_drive(mut self, path: impl Into<PathBuf>, read_only: bool) -> Self {
        self.root.path_on_host = path.into();
        self.root.is_read_only = read_only;
        self
    }

    /// Appends a non-root drive.
    #[must_use]
    pub fn add_drive(mut self, path: impl Into<PathBuf>, read_only: bool) -> Self {
        let drive_id = self.drives.len().to_string();
        self.drives.push(Drive {
            drive_id,
            path_on_host: path.into(),
            is_root_device: false,
            is_read_only: read_only,
        });
        self
    }

    /// Returns the drives, root device last.
    #[must_use]
    pub fn build(self) -> Vec<Drive> {
        let mut drives = self.drives;
        drives.push(self.root);
        drives
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jailer(base: Option<&str>) -> JailerConfig {
        JailerConfig {
            id: JailId::new("test-id").unwrap(),
            uid: Some(123),
            gid: Some(100),
            numa_node: Some(0),
            exec_file: PathBuf::from("/usr/local/bin/firecracker"),
            chroot_base_dir: base.map(PathBuf::from),
            netns: None,
            daemonize: false,
            seccomp_level: SeccompLevel::default(),
            strategy: StrategyKind::default(),
        }
    }

    #[test]
    fn root_dir_uses_default_base() {
        assert_eq!(
            jailer(None).root_dir(),
            PathBuf::from("/srv/jailer/firecracker/test-id/root")
        );
    }

    #[test]
    fn root_dir_honors_custom_base() {
        let cfg = jailer(Some("/tmp"));
        assert_eq!(cfg.root_dir(), PathBuf::from("/tmp/firecracker/test-id/root"));
        assert_eq!(
            cfg.socket_path(),
            PathBuf::from("/tmp/firecracker/test-id/api.socket")
        );
    }

    #[test]
    fn empty_base_dir_falls_back_to_default() {
        let cfg = jailer(Some(""));
        assert_eq!(cfg.chroot_base_dir(), PathBuf::from("/srv/jailer"));
    }

    #[test]
    fn missing_ids_are_reported_by_name() {
        let mut cfg = jailer(None);
        cfg.gid = None;
        assert_eq!(cfg.required_uid().unwrap(), 123);
        let err = cfg.required_gid().unwrap_err();
        assert!(matches!(err, JailError::MissingField { field: "gid" }));
    }

    #[test]
    fn rebased_to_jail_keeps_only_file_names() {
        let cfg = MachineConfig {
            socket_path: PathBuf::new(),
            kernel_image_path: PathBuf::from("/img/vmlinux"),
            drives: DrivesBuilder::new("/data/rootfs.ext4")
                .add_drive("/data/disk.img", true)
                .build(),
            jailer: None,
        };
        let rebased = cfg.rebased_to_jail().unwrap();
        assert_eq!(rebased.kernel_image_path, PathBuf::from("vmlinux"));
        assert_eq!(rebased.drives[0].path_on_host, PathBuf::from("disk.img"));
        assert_eq!(rebased.drives[1].path_on_host, PathBuf::from("rootfs.ext4"));
        assert_eq!(cfg.kernel_image_path, PathBuf::from("/img/vmlinux"));
    }

    #[test]
    fn artifact_without_file_name_is_rejected() {
        assert!(artifact_file_name(Path::new("/")).is_err());
        assert!(artifact_file_name(Path::new("/img/..")).is_err());
    }

    #[test]
    fn drives_builder_places_root_last() {
        let drives = DrivesBuilder::new("/path/to/rootfs")
            .add_drive("/first/path/drive.img", true)
            .add_drive("/second/path/drive.img", false)
            .build();
        assert_eq!(drives.len(), 3);
        assert_eq!(drives[0].drive_id, "0");
        assert!(drives[0].is_read_only);
        assert_eq!(drives[1].drive_id, "1");
        assert_eq!(drives[2].drive_id, ROOT_DRIVE_ID);
        assert!(drives[2].is_root_device);
    }

    #[test]
    fn machine_config_loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vm.json");
        std::fs::write(
            &path,
            r#"{
                "kernel_image_path": "/img/vmlinux",
                "drives": [{"drive_id": "root_drive", "path_on_host": "/data/root.ext4", "is_root_device": true}],
                "jailer": {
                    "id": "vm-1",
                    "uid": 123,
                    "gid": 100,
                    "numa_node": 0,
                    "exec_file": "/usr/bin/firecracker",
                    "seccomp_level": "basic",
                    "strategy": "bind_mount"
                }
            }"#,
        )
        .unwrap();

        let cfg = MachineConfig::from_json_file(&path).unwrap();
        let jailer = cfg.jailer().unwrap();
        assert_eq!(jailer.id.as_str(), "vm-1");
        assert_eq!(jailer.seccomp_level, SeccompLevel::Basic);
        assert_eq!(jailer.strategy, StrategyKind::BindMount);
        assert!(!cfg.drives[0].is_read_only);
    }

    #[test]
    fn missing_config_file_reports_path() {
        let err = MachineConfig::from_json_file(Path::new("/nonexistent/vm.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/vm.json"));
    }
}
