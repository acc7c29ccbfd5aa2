//! Jailed launch preparation.
//!
//! [`jail`] turns a machine configuration into a jailer process descriptor
//! and adapts the caller's handler lists with the configured rootfs
//! strategy. Nothing is started here.

use std::sync::Arc;

use vmjail_common::config::MachineConfig;
use vmjail_common::error::Result;
use vmjail_core::host::{HostOps, LinuxHost};

use crate::command::{JailerCommandBuilder, JailerProcess, ProcessLifetime, Redirect};
use crate::handler::Handlers;
use crate::strategy::RootfsStrategy;

/// Everything needed to start a jailed machine.
#[derive(Debug)]
pub struct JailedLaunch {
    /// Configuration with the API socket moved into the jail.
    pub config: MachineConfig,
    /// Jailer process, not yet started.
    pub process: JailerProcess,
    /// Strategy whose handlers were injected.
    pub strategy: RootfsStrategy,
}

/// Renders the jailer command builder for `config`.
///
/// Streams default to the parent's stdout and stderr.
///
/// # Errors
///
/// Returns an error if the jailer section, uid, gid or NUMA node is
/// missing.
pub fn command_builder(config: &MachineConfig) -> Result<JailerCommandBuilder> {
    let jailer = config.jailer()?;
    let mut builder = JailerCommandBuilder::new()
        .with_id(jailer.id.as_str())
        .with_uid(jailer.required_uid()?)
        .with_gid(jailer.required_gid()?)
        .with_numa_node(jailer.required_numa_node()?)
        .with_exec_file(&jailer.exec_file)
        .with_seccomp_level(jailer.seccomp_level)
        .with_daemonize(jailer.daemonize)
        .with_stdout(Redirect::Inherit)
        .with_stderr(Redirect::Inherit);
    if let Some(base) = &jailer.chroot_base_dir {
        builder = builder.with_chroot_base_dir(base);
    }
    if let Some(netns) = &jailer.netns {
        builder = builder.with_netns(netns);
    }
    Ok(builder)
}

/// Prepares a jailed launch on the real host.
///
/// # Errors
///
/// See [`jail_with_host`].
pub fn jail(
    config: &MachineConfig,
    handlers: &mut Handlers,
    lifetime: ProcessLifetime,
) -> Result<JailedLaunch> {
    jail_with_host(config, handlers, lifetime, Arc::new(LinuxHost))
}

/// Prepares a jailed launch whose provisioning runs against `host`.
///
/// Required fields are checked before the handler lists are touched.
///
/// # Errors
///
/// Returns [`vmjail_common::error::JailError::MissingField`] for an absent
/// uid, gid or NUMA node, and
/// [`vmjail_common::error::JailError::MissingHandler`] if the init list
/// lacks `fcinit.CreateMachine`. Neither list is modified on error.
pub fn jail_with_host(
    config: &MachineConfig,
    handlers: &mut Handlers,
    lifetime: ProcessLifetime,
    host: Arc<dyn HostOps>,
) -> Result<JailedLaunch> {
    let builder = command_builder(config)?;
    let jailer = config.jailer()?;
    let strategy =
        RootfsStrategy::from_config(jailer, config.kernel_image_path.clone()).with_host(host);
    strategy.adapt_handlers(handlers)?;

    let mut jailed = config.clone();
    jailed.socket_path = jailer.socket_path();
    let process = builder.build(lifetime);

    tracing::info!(
        id = %jailer.id,
        root = %strategy.jail_root().display(),
        strategy = %strategy.kind(),
        socket = %jailed.socket_path.display(),
        "jail prepared"
    );
    Ok(JailedLaunch {
        config: jailed,
        process,
        strategy,
    })
}
