//! `vmjail check`: validate a machine configuration for a jailed launch.

use std::path::{Path, PathBuf};

use clap::Args;
use vmjail_common::config::MachineConfig;
use vmjail_common::constants::DEFAULT_JAILER_BIN;
use vmjail_common::error::JailError;

use crate::output;

/// Arguments for the `check` command.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Path to the JSON machine configuration.
    #[arg(long, short)]
    pub config: PathBuf,

    /// Jailer binary to look up instead of `jailer`.
    #[arg(long, env = "VMJAIL_JAILER_BIN")]
    pub jailer_bin: Option<PathBuf>,
}

/// Outcome of checking one configuration.
#[derive(Debug)]
pub struct CheckReport {
    /// Report rows, already formatted.
    pub lines: Vec<String>,
    /// Required fields that are not set.
    pub missing: Vec<&'static str>,
}

/// Checks `config` and describes the jail it would produce.
///
/// `resolved` is where the jailer binary was found, if anywhere.
///
/// # Errors
///
/// Returns an error if the configuration has no jailer section.
pub fn check_config(
    config: &MachineConfig,
    bin: &Path,
    resolved: Option<&Path>,
) -> anyhow::Result<CheckReport> {
    let jailer = config.jailer()?;

    let missing = [
        jailer.required_uid(),
        jailer.required_gid(),
        jailer.required_numa_node(),
    ]
    .into_iter()
    .filter_map(|r| match r {
        Err(JailError::MissingField { field }) => Some(field),
        _ => None,
    })
    .collect::<Vec<_>>();

    let jailer_status = resolved.map_or_else(
        || format!("{} (not found)", bin.display()),
        |p| p.display().to_string(),
    );
    let lines = vec![
        output::field("id", &jailer.id),
        output::field("strategy", jailer.strategy),
        output::field("root", jailer.root_dir().display()),
        output::field("api socket", jailer.socket_path().display()),
        output::field("drives", config.drives.len()),
        output::field("jailer", jailer_status),
    ];
    Ok(CheckReport { lines, missing })
}

/// Executes the `check` command.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or a required
/// field is missing.
pub fn execute(args: &CheckArgs) -> anyhow::Result<()> {
    let config = MachineConfig::from_json_file(&args.config)?;
    let bin = args
        .jailer_bin
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_JAILER_BIN));
    let resolved = which::which(&bin).ok();
    if resolved.is_none() {
        tracing::warn!(bin = %bin.display(), "jailer binary not found on PATH");
    }

    let report = check_config(&config, &bin, resolved.as_deref())?;
    output::emit(
        std::iter::once(format!("Jail for {}", args.config.display())).chain(report.lines),
    )?;
    if !report.missing.is_empty() {
        anyhow::bail!("missing required field(s): {}", report.missing.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use vmjail_common::config::JailerConfig;
    use vmjail_common::types::{JailId, SeccompLevel, StrategyKind};

    use super::*;

    fn config(uid: Option<u32>, numa_node: Option<u32>) -> MachineConfig {
        MachineConfig {
            socket_path: PathBuf::new(),
            kernel_image_path: PathBuf::from("/img/vmlinux"),
            drives: Vec::new(),
            jailer: Some(JailerConfig {
                id: JailId::new("vm-1").unwrap(),
                uid,
                gid: Some(100),
                numa_node,
                exec_file: PathBuf::from("/usr/local/bin/firecracker"),
                chroot_base_dir: Some(PathBuf::from("/var/jail")),
                netns: None,
                daemonize: false,
                seccomp_level: SeccompLevel::Disabled,
                strategy: StrategyKind::BindMount,
            }),
        }
    }

    #[test]
    fn complete_config_reports_layout() {
        let report = check_config(
            &config(Some(1), Some(0)),
            Path::new("jailer"),
            Some(Path::new("/usr/bin/jailer")),
        )
        .unwrap();
        assert!(report.missing.is_empty());
        assert!(report.lines.iter().any(|l| l.ends_with("/var/jail/firecracker/vm-1/root")));
        assert!(report.lines.iter().any(|l| l.ends_with("bind_mount")));
        assert!(report.lines.iter().any(|l| l.ends_with("/usr/bin/jailer")));
    }

    #[test]
    fn missing_fields_are_collected() {
        let report = check_config(&config(None, None), Path::new("jailer"), None).unwrap();
        assert_eq!(report.missing, vec!["uid", "numa_node"]);
        assert!(report.lines.iter().any(|l| l.ends_with("jailer (not found)")));
    }

    #[test]
    fn config_without_jailer_is_rejected() {
        let mut cfg = config(Some(1), Some(0));
        cfg.jailer = None;
        assert!(check_config(&cfg, Path::new("jailer"), None).is_err());
    }
}
