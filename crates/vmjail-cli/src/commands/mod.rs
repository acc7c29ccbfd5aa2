//! CLI command definitions and dispatch.

pub mod check;
pub mod render;

use clap::{Parser, Subcommand};

/// vmjail: jailed launches for virtual machine monitors.
#[derive(Parser, Debug)]
#[command(name = "vmjail", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the jailer command line for a machine configuration.
    Render(render::RenderArgs),
    /// Check a machine configuration and report where the jail will live.
    Check(check::CheckArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Render(args) => render::execute(&args),
        Command::Check(args) => check::execute(&args),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn config_flag_is_required() {
        assert!(Cli::try_parse_from(["vmjail", "render"]).is_err());
        let cli = Cli::try_parse_from(["vmjail", "check", "--config", "vm.json"]).unwrap();
        assert!(matches!(cli.command, Command::Check(_)));
    }
}
