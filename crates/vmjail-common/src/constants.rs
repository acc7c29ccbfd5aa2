//! System-wide constants and default paths.

/// Default base directory under which chroot jails are built.
pub const DEFAULT_JAILER_BASE_DIR: &str = "/srv/jailer";

/// Default name of the jailer binary, resolved through `PATH`.
pub const DEFAULT_JAILER_BIN: &str = "jailer";

/// Product directory created by the jailer below the base directory.
pub const PRODUCT_NAME: &str = "firecracker";

/// Name of the jail's root filesystem folder.
pub const ROOTFS_FOLDER_NAME: &str = "root";

/// File name of the API socket created inside the jail directory.
pub const API_SOCKET_NAME: &str = "api.socket";

/// Maximum length of a jail identifier.
pub const MAX_JAIL_ID_LEN: usize = 64;

/// Drive identifier given to the root device by [`crate::config::DrivesBuilder`].
pub const ROOT_DRIVE_ID: &str = "root_drive";

/// Init handler that creates the machine; the provisioning anchor.
pub const CREATE_MACHINE_HANDLER: &str = "fcinit.CreateMachine";

/// Init handler injected by the link strategy.
pub const LINK_FILES_HANDLER: &str = "fcinit.LinkFilesToRootFS";

/// Init handler injected by the bind-mount strategy.
pub const MOUNT_FILES_HANDLER: &str = "fcinit.MountToRootFS";

/// Finish handler injected by the bind-mount strategy.
pub const UNMOUNT_DRIVES_HANDLER: &str = "finish.umountDrive";

/// Application name used in CLI output.
pub const APP_NAME: &str = "vmjail";
