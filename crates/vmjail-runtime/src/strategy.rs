//! Rootfs provisioning strategies.
//!
//! A strategy decides how the kernel image and drives become visible inside
//! the jail and injects the matching handlers next to
//! `fcinit.CreateMachine`:
//!
//! - [`LinkStrategy`] hard links every artifact into the jail root.
//! - [`BindMountStrategy`] bind mounts every artifact inside the mount
//!   namespace of the started jailer, and unmounts them on finish.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use vmjail_common::config::{JailerConfig, MachineConfig, artifact_file_name};
use vmjail_common::constants::{
    CREATE_MACHINE_HANDLER, LINK_FILES_HANDLER, MOUNT_FILES_HANDLER, UNMOUNT_DRIVES_HANDLER,
};
use vmjail_common::error::{JailError, Result, UnmountFailure};
use vmjail_common::types::StrategyKind;
use vmjail_core::host::{HostOps, LinuxHost};
use vmjail_core::namespace::mount::run_in_mount_namespace;

use crate::handler::{Handler, Handlers};

/// One artifact to expose: host path and its place inside the jail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    /// Artifact on the host.
    pub source: PathBuf,
    /// Location inside the jail root.
    pub target: PathBuf,
    /// Whether the jail sees the artifact read-only.
    pub read_only: bool,
}

/// Kernel first, then drives in configuration order. The kernel keeps the
/// file name of `kernel_image_path`.
fn artifact_records(
    jail_root: &Path,
    kernel_image_path: &Path,
    config: &MachineConfig,
) -> Result<Vec<MountRecord>> {
    let mut records = Vec::with_capacity(config.drives.len() + 1);
    records.push(MountRecord {
        source: config.kernel_image_path.clone(),
        target: jail_root.join(artifact_file_name(kernel_image_path)?),
        read_only: true,
    });
    for drive in &config.drives {
        records.push(MountRecord {
            source: drive.path_on_host.clone(),
            target: jail_root.join(artifact_file_name(&drive.path_on_host)?),
            read_only: drive.is_read_only,
        });
    }
    Ok(records)
}

fn rebase(config: &MachineConfig, kernel_image_path: &Path) -> Result<MachineConfig> {
    let mut rebased = config.rebased_to_jail()?;
    rebased.kernel_image_path = artifact_file_name(kernel_image_path)?;
    Ok(rebased)
}

fn owner(config: &MachineConfig) -> Result<(u32, u32)> {
    let jailer = config.jailer()?;
    Ok((jailer.required_uid()?, jailer.required_gid()?))
}

/// Hard links artifacts into the jail root before the VMM starts.
#[derive(Clone)]
pub struct LinkStrategy {
    jail_root: PathBuf,
    kernel_image_path: PathBuf,
    host: Arc<dyn HostOps>,
}

impl LinkStrategy {
    /// Creates a link strategy for the given jail root and kernel image.
    pub fn new(jail_root: impl Into<PathBuf>, kernel_image_path: impl Into<PathBuf>) -> Self {
        Self {
            jail_root: jail_root.into(),
            kernel_image_path: kernel_image_path.into(),
            host: Arc::new(LinuxHost),
        }
    }

    /// Links the kernel and every drive into the jail root, hands them to
    /// the jail owner, and returns the configuration rewritten to
    /// jail-relative paths.
    ///
    /// # Errors
    ///
    /// Stops at the first failing link or ownership change. Artifacts
    /// linked before the failure stay in place.
    pub fn link_artifacts(&self, config: &MachineConfig) -> Result<MachineConfig> {
        let (uid, gid) = owner(config)?;
        for record in artifact_records(&self.jail_root, &self.kernel_image_path, config)? {
            self.host.hard_link(&record.source, &record.target)?;
            self.host.chown(&record.target, uid, gid)?;
            tracing::info!(
                src = %record.source.display(),
                dst = %record.target.display(),
                "artifact linked into jail"
            );
        }
        rebase(config, &self.kernel_image_path)
    }

    fn handler(&self) -> Handler {
        let strategy = self.clone();
        Handler::new(LINK_FILES_HANDLER, move |machine| {
            machine.config = strategy.link_artifacts(&machine.config)?;
            Ok(())
        })
    }
}

/// Bind mounts artifacts into the started jailer's mount namespace.
#[derive(Clone)]
pub struct BindMountStrategy {
    jail_root: PathBuf,
    kernel_image_path: PathBuf,
    host: Arc<dyn HostOps>,
}

impl BindMountStrategy {
    /// Creates a bind mount strategy for the given jail root and kernel
    /// image.
    pub fn new(jail_root: impl Into<PathBuf>, kernel_image_path: impl Into<PathBuf>) -> Self {
        Self {
            jail_root: jail_root.into(),
            kernel_image_path: kernel_image_path.into(),
            host: Arc::new(LinuxHost),
        }
    }

    /// Mounts the kernel (read-only) and every drive inside the mount
    /// namespace of `pid`, then returns the configuration rewritten to
    /// jail-relative paths.
    ///
    /// # Errors
    ///
    /// Returns [`JailError::ProcessNotStarted`] without a pid, otherwise
    /// the first namespace or mount failure. The calling thread is never
    /// moved; the work happens on a dedicated thread.
    pub fn mount_artifacts(&self, config: &MachineConfig, pid: Option<u32>) -> Result<MachineConfig> {
        let pid = pid.ok_or_else(|| JailError::ProcessNotStarted {
            handler: MOUNT_FILES_HANDLER.to_string(),
        })?;
        let (uid, gid) = owner(config)?;
        let records = artifact_records(&self.jail_root, &self.kernel_image_path, config)?;

        run_in_mount_namespace(self.host.as_ref(), pid, uid, gid, |guard| {
            for record in &records {
                guard.mount(&record.source, &record.target, record.read_only)?;
            }
            Ok(())
        })?;
        rebase(config, &self.kernel_image_path)
    }

    /// Force-unmounts the kernel and every drive from the jail root.
    ///
    /// Every artifact is attempted even when earlier ones fail.
    ///
    /// # Errors
    ///
    /// Returns [`JailError::Teardown`] listing each artifact that failed.
    pub fn unmount_artifacts(&self, config: &MachineConfig) -> Result<()> {
        let artifacts = std::iter::once(&config.kernel_image_path)
            .chain(config.drives.iter().map(|d| &d.path_on_host));

        let mut failures = Vec::new();
        for artifact in artifacts {
            let target = match artifact_file_name(artifact) {
                Ok(name) => self.jail_root.join(name),
                Err(e) => {
                    failures.push(UnmountFailure {
                        path: artifact.clone(),
                        source: e,
                    });
                    continue;
                }
            };
            if let Err(e) = self.host.force_unmount(&target) {
                tracing::warn!(target = %target.display(), error = %e, "unmount failed");
                failures.push(UnmountFailure {
                    path: target,
                    source: e,
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(JailError::Teardown { failures })
        }
    }

    fn mount_handler(&self) -> Handler {
        let strategy = self.clone();
        Handler::new(MOUNT_FILES_HANDLER, move |machine| {
            machine.config = strategy.mount_artifacts(&machine.config, machine.pid)?;
            Ok(())
        })
    }

    fn unmount_handler(&self) -> Handler {
        let strategy = self.clone();
        Handler::new(UNMOUNT_DRIVES_HANDLER, move |machine| {
            strategy.unmount_artifacts(&machine.config)
        })
    }
}

/// The provisioning strategy selected for a jail.
#[derive(Clone)]
pub enum RootfsStrategy {
    /// Hard link artifacts.
    Link(LinkStrategy),
    /// Bind mount artifacts.
    BindMount(BindMountStrategy),
}

impl RootfsStrategy {
    /// Selects the strategy named in the jailer configuration.
    pub fn from_config(jailer: &JailerConfig, kernel_image_path: impl Into<PathBuf>) -> Self {
        let root = jailer.root_dir();
        match jailer.strategy {
            StrategyKind::Link => Self::Link(LinkStrategy::new(root, kernel_image_path)),
            StrategyKind::BindMount => {
                Self::BindMount(BindMountStrategy::new(root, kernel_image_path))
            }
        }
    }

    /// Replaces the host the strategy performs syscalls on.
    #[must_use]
    pub fn with_host(self, host: Arc<dyn HostOps>) -> Self {
        match self {
            Self::Link(mut s) => {
                s.host = host;
                Self::Link(s)
            }
            Self::BindMount(mut s) => {
                s.host = host;
                Self::BindMount(s)
            }
        }
    }

    /// Which strategy this is.
    #[must_use]
    pub const fn kind(&self) -> StrategyKind {
        match self {
            Self::Link(_) => StrategyKind::Link,
            Self::BindMount(_) => StrategyKind::BindMount,
        }
    }

    /// Root directory of the jail the strategy provisions.
    #[must_use]
    pub fn jail_root(&self) -> &Path {
        match self {
            Self::Link(s) => &s.jail_root,
            Self::BindMount(s) => &s.jail_root,
        }
    }

    /// Injects the strategy's handlers.
    ///
    /// The link strategy adds `fcinit.LinkFilesToRootFS` after
    /// `fcinit.CreateMachine`. The bind mount strategy adds
    /// `fcinit.MountToRootFS` there and swaps or appends
    /// `finish.umountDrive` in the finish list.
    ///
    /// # Errors
    ///
    /// Returns [`JailError::MissingHandler`] without touching either list
    /// if `fcinit.CreateMachine` is absent.
    pub fn adapt_handlers(&self, handlers: &mut Handlers) -> Result<()> {
        if !handlers.init.has(CREATE_MACHINE_HANDLER) {
            return Err(JailError::MissingHandler {
                name: CREATE_MACHINE_HANDLER.to_string(),
            });
        }
        match self {
            Self::Link(s) => handlers.init.append_after(CREATE_MACHINE_HANDLER, s.handler())?,
            Self::BindMount(s) => {
                handlers
                    .init
                    .append_after(CREATE_MACHINE_HANDLER, s.mount_handler())?;
                handlers.finish.swap_or_append(s.unmount_handler());
            }
        }
        tracing::debug!(strategy = %self.kind(), "handlers adapted");
        Ok(())
    }
}

impl fmt::Debug for LinkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkStrategy")
            .field("jail_root", &self.jail_root)
            .field("kernel_image_path", &self.kernel_image_path)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for BindMountStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindMountStrategy")
            .field("jail_root", &self.jail_root)
            .field("kernel_image_path", &self.kernel_image_path)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for RootfsStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link(s) => s.fmt(f),
            Self::BindMount(s) => s.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;

    use vmjail_common::config::{Drive, DrivesBuilder};
    use vmjail_common::types::{JailId, SeccompLevel};
    use vmjail_core::host::fake::FakeHost;

    use super::*;
    use crate::handler::{HandlerList, Machine};

    const ROOT: &str = "/srv/jailer/firecracker/test-id/root";

    fn jailer(uid: u32, gid: u32, strategy: StrategyKind) -> JailerConfig {
        JailerConfig {
            id: JailId::new("test-id").unwrap(),
            uid: Some(uid),
            gid: Some(gid),
            numa_node: Some(0),
            exec_file: PathBuf::from("/usr/local/bin/firecracker"),
            chroot_base_dir: None,
            netns: None,
            daemonize: false,
            seccomp_level: SeccompLevel::Disabled,
            strategy,
        }
    }

    fn machine_config(kernel: &Path, disk: &Path, strategy: StrategyKind) -> MachineConfig {
        MachineConfig {
            socket_path: PathBuf::new(),
            kernel_image_path: kernel.to_path_buf(),
            drives: vec![Drive {
                drive_id: "1".into(),
                path_on_host: disk.to_path_buf(),
                is_root_device: true,
                is_read_only: false,
            }],
            jailer: Some(jailer(123, 100, strategy)),
        }
    }

    fn handlers_with_anchor() -> Handlers {
        let mut init = HandlerList::new();
        init.append(Handler::new("fcinit.StartVMM", |_| Ok(())));
        init.append(Handler::new(CREATE_MACHINE_HANDLER, |_| Ok(())));
        init.append(Handler::new("fcinit.CreateBootSource", |_| Ok(())));
        Handlers {
            init,
            finish: HandlerList::new(),
        }
    }

    fn fake_link(host: &Arc<FakeHost>) -> RootfsStrategy {
        RootfsStrategy::Link(LinkStrategy::new(ROOT, "/img/vmlinux"))
            .with_host(Arc::clone(host) as Arc<dyn HostOps>)
    }

    fn fake_bind(host: &Arc<FakeHost>) -> RootfsStrategy {
        RootfsStrategy::BindMount(BindMountStrategy::new(ROOT, "/img/vmlinux"))
            .with_host(Arc::clone(host) as Arc<dyn HostOps>)
    }

    #[test]
    fn link_strategy_links_into_real_jail_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("srv/jailer/firecracker/test-id/root");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(dir.path().join("img")).unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        let kernel = dir.path().join("img/vmlinux");
        let disk = dir.path().join("data/disk.img");
        std::fs::write(&kernel, b"kernel").unwrap();
        std::fs::write(&disk, b"disk").unwrap();

        let mut config = machine_config(&kernel, &disk, StrategyKind::Link);
        if let Some(jailer) = config.jailer.as_mut() {
            jailer.uid = Some(nix::unistd::getuid().as_raw());
            jailer.gid = Some(nix::unistd::getgid().as_raw());
        }

        let mut handlers = handlers_with_anchor();
        RootfsStrategy::Link(LinkStrategy::new(&root, &kernel))
            .adapt_handlers(&mut handlers)
            .unwrap();
        let mut machine = Machine::new(config);
        handlers.init.run(&mut machine).unwrap();

        assert_eq!(machine.config.kernel_image_path, PathBuf::from("vmlinux"));
        assert_eq!(machine.config.drives[0].path_on_host, PathBuf::from("disk.img"));
        let ino = |p: &Path| std::fs::metadata(p).unwrap().ino();
        assert_eq!(ino(&root.join("vmlinux")), ino(&kernel));
        assert_eq!(ino(&root.join("disk.img")), ino(&disk));
    }

    #[test]
    fn link_strategy_inserts_after_create_machine() {
        let host = Arc::new(FakeHost::new());
        let mut handlers = handlers_with_anchor();
        fake_link(&host).adapt_handlers(&mut handlers).unwrap();
        assert_eq!(
            handlers.init.names(),
            vec![
                "fcinit.StartVMM",
                CREATE_MACHINE_HANDLER,
                LINK_FILES_HANDLER,
                "fcinit.CreateBootSource",
            ]
        );
        assert!(handlers.finish.is_empty());
    }

    #[test]
    fn link_failure_on_kernel_stops_before_drives() {
        let host = Arc::new(FakeHost::new().fail_on("link", "/img/vmlinux"));
        let config = machine_config(
            Path::new("/img/vmlinux"),
            Path::new("/data/disk.img"),
            StrategyKind::Link,
        );
        let RootfsStrategy::Link(strategy) = fake_link(&host) else {
            unreachable!()
        };

        assert!(strategy.link_artifacts(&config).is_err());
        assert_eq!(
            host.events(),
            vec![format!("link /img/vmlinux -> {ROOT}/vmlinux")]
        );
    }

    #[test]
    fn chown_failure_aborts_link_step() {
        let host = Arc::new(FakeHost::new().fail_on("chown", format!("{ROOT}/vmlinux")));
        let config = machine_config(
            Path::new("/img/vmlinux"),
            Path::new("/data/disk.img"),
            StrategyKind::Link,
        );
        let mut handlers = handlers_with_anchor();
        fake_link(&host).adapt_handlers(&mut handlers).unwrap();
        let mut machine = Machine::new(config.clone());

        let err = handlers.init.run(&mut machine).unwrap_err();
        assert!(matches!(err, JailError::Handler { ref name, .. } if name == LINK_FILES_HANDLER));
        assert_eq!(machine.config, config);
        assert!(!host.events().iter().any(|e| e.contains("disk.img")));
    }

    #[test]
    fn link_requires_owner_ids() {
        let host = Arc::new(FakeHost::new());
        let mut config = machine_config(
            Path::new("/img/vmlinux"),
            Path::new("/data/disk.img"),
            StrategyKind::Link,
        );
        if let Some(jailer) = config.jailer.as_mut() {
            jailer.uid = None;
        }
        let RootfsStrategy::Link(strategy) = fake_link(&host) else {
            unreachable!()
        };
        let err = strategy.link_artifacts(&config).unwrap_err();
        assert!(matches!(err, JailError::MissingField { field: "uid" }));
        assert!(host.events().is_empty());
    }

    #[test]
    fn missing_anchor_leaves_handlers_untouched() {
        let host = Arc::new(FakeHost::new());
        for strategy in [fake_link(&host), fake_bind(&host)] {
            let mut handlers = Handlers::default();
            handlers.init.append(Handler::new("fcinit.StartVMM", |_| Ok(())));
            handlers.finish.append(Handler::new("finish.cleanup", |_| Ok(())));

            let err = strategy.adapt_handlers(&mut handlers).unwrap_err();
            assert!(
                matches!(err, JailError::MissingHandler { ref name } if name == CREATE_MACHINE_HANDLER)
            );
            assert_eq!(handlers.init.names(), vec!["fcinit.StartVMM"]);
            assert_eq!(handlers.finish.names(), vec!["finish.cleanup"]);
        }
    }

    #[test]
    fn bind_strategy_injects_mount_and_unmount_once() {
        let host = Arc::new(FakeHost::new());
        let strategy = fake_bind(&host);
        let mut handlers = handlers_with_anchor();
        strategy.adapt_handlers(&mut handlers).unwrap();
        strategy.adapt_handlers(&mut handlers).unwrap();

        assert_eq!(
            handlers.init.names(),
            vec![
                "fcinit.StartVMM",
                CREATE_MACHINE_HANDLER,
                MOUNT_FILES_HANDLER,
                "fcinit.CreateBootSource",
            ]
        );
        assert_eq!(handlers.finish.names(), vec![UNMOUNT_DRIVES_HANDLER]);
    }

    #[test]
    fn bind_mount_requires_started_process() {
        let host = Arc::new(FakeHost::new());
        let RootfsStrategy::BindMount(strategy) = fake_bind(&host) else {
            unreachable!()
        };
        let config = machine_config(
            Path::new("/img/vmlinux"),
            Path::new("/data/disk.img"),
            StrategyKind::BindMount,
        );
        let err = strategy.mount_artifacts(&config, None).unwrap_err();
        assert!(matches!(err, JailError::ProcessNotStarted { .. }));
        assert!(host.events().is_empty());
    }

    #[test]
    fn bind_mount_enters_namespace_and_rewrites_paths() {
        let host = Arc::new(FakeHost::new());
        let mut handlers = handlers_with_anchor();
        fake_bind(&host).adapt_handlers(&mut handlers).unwrap();

        let mut config = machine_config(
            Path::new("/img/vmlinux"),
            Path::new("/data/disk.img"),
            StrategyKind::BindMount,
        );
        config.drives = DrivesBuilder::new("/data/disk.img")
            .add_drive("/data/extra.img", true)
            .build();
        let mut machine = Machine::new(config);
        machine.pid = Some(4242);
        handlers.init.run(&mut machine).unwrap();

        assert_eq!(
            host.events(),
            vec![
                "enter 4242".to_string(),
                format!("placeholder {ROOT}/vmlinux"),
                format!("bind /img/vmlinux -> {ROOT}/vmlinux"),
                format!("chown {ROOT}/vmlinux 123:100"),
                format!("remount_ro {ROOT}/vmlinux"),
                format!("placeholder {ROOT}/extra.img"),
                format!("bind /data/extra.img -> {ROOT}/extra.img"),
                format!("chown {ROOT}/extra.img 123:100"),
                format!("remount_ro {ROOT}/extra.img"),
                format!("placeholder {ROOT}/disk.img"),
                format!("bind /data/disk.img -> {ROOT}/disk.img"),
                format!("chown {ROOT}/disk.img 123:100"),
                "restore".to_string(),
            ]
        );
        assert_eq!(machine.config.kernel_image_path, PathBuf::from("vmlinux"));
        assert_eq!(machine.config.drives[0].path_on_host, PathBuf::from("extra.img"));
        assert_eq!(machine.config.drives[1].path_on_host, PathBuf::from("disk.img"));
    }

    #[test]
    fn failed_drive_mount_keeps_config_and_restores_namespace() {
        let host = Arc::new(FakeHost::new().fail_on("bind", format!("{ROOT}/disk.img")));
        let RootfsStrategy::BindMount(strategy) = fake_bind(&host) else {
            unreachable!()
        };
        let config = machine_config(
            Path::new("/img/vmlinux"),
            Path::new("/data/disk.img"),
            StrategyKind::BindMount,
        );

        let err = strategy.mount_artifacts(&config, Some(7)).unwrap_err();
        assert!(err.to_string().contains("disk.img"));
        assert_eq!(host.events().last().map(String::as_str), Some("restore"));
    }

    #[test]
    fn teardown_continues_past_failures_and_reports_only_them() {
        let host = Arc::new(FakeHost::new().fail_on("unmount", format!("{ROOT}/vmlinux")));
        let RootfsStrategy::BindMount(strategy) = fake_bind(&host) else {
            unreachable!()
        };
        let config = machine_config(
            Path::new("/img/vmlinux"),
            Path::new("/data/disk.img"),
            StrategyKind::BindMount,
        )
        .rebased_to_jail()
        .unwrap();

        let err = strategy.unmount_artifacts(&config).unwrap_err();
        assert_eq!(
            host.events(),
            vec![
                format!("unmount {ROOT}/vmlinux"),
                format!("unmount {ROOT}/disk.img"),
            ]
        );
        let JailError::Teardown { failures } = &err else {
            panic!("expected teardown error, got {err}");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, PathBuf::from(format!("{ROOT}/vmlinux")));
        let msg = err.to_string();
        assert!(msg.contains("vmlinux"));
        assert!(!msg.contains("disk.img"));
    }

    #[test]
    fn teardown_succeeds_when_every_unmount_does() {
        let host = Arc::new(FakeHost::new());
        let mut handlers = handlers_with_anchor();
        fake_bind(&host).adapt_handlers(&mut handlers).unwrap();
        let config = machine_config(
            Path::new("/img/vmlinux"),
            Path::new("/data/disk.img"),
            StrategyKind::BindMount,
        );

        handlers.finish.run(&mut Machine::new(config)).unwrap();
        assert_eq!(host.events().len(), 2);
    }

    #[test]
    fn from_config_derives_root_and_kind() {
        let strategy = RootfsStrategy::from_config(
            &jailer(1, 1, StrategyKind::BindMount),
            "/img/vmlinux",
        );
        assert_eq!(strategy.kind(), StrategyKind::BindMount);
        assert_eq!(strategy.jail_root(), Path::new(ROOT));
    }
}
