//! `vmjail render`: print the jailer command line.

use std::path::{Path, PathBuf};

use clap::Args;
use vmjail_common::config::MachineConfig;
use vmjail_runtime::command::ProcessLifetime;
use vmjail_runtime::jail::command_builder;

use crate::output;

/// Arguments for the `render` command.
#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Path to the JSON machine configuration.
    #[arg(long, short)]
    pub config: PathBuf,

    /// Jailer binary to invoke instead of `jailer`.
    #[arg(long, env = "VMJAIL_JAILER_BIN")]
    pub jailer_bin: Option<PathBuf>,
}

/// Renders the command line that would start the jailer for `config`.
///
/// # Errors
///
/// Returns an error if a field the command line needs is missing.
pub fn render_command_line(config: &MachineConfig, bin: Option<&Path>) -> anyhow::Result<String> {
    let mut builder = command_builder(config)?;
    if let Some(bin) = bin {
        builder = builder.with_bin(bin);
    }
    Ok(builder.build(ProcessLifetime::unbounded()).command_line())
}

/// Executes the `render` command.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or rendered.
pub fn execute(args: &RenderArgs) -> anyhow::Result<()> {
    let config = MachineConfig::from_json_file(&args.config)?;
    tracing::debug!(config = %args.config.display(), "rendering jailer command");
    let line = render_command_line(&config, args.jailer_bin.as_deref())?;
    output::emit([line])
}
