//! Formatted output helpers for CLI commands.

use std::io::Write;

/// Width of the label column in key/value listings.
const LABEL_WIDTH: usize = 14;

/// Formats one `label: value` row with an aligned value column.
#[must_use]
pub fn field(label: &str, value: impl std::fmt::Display) -> String {
    format!("  {:<width$} {value}", format!("{label}:"), width = LABEL_WIDTH)
}

/// Writes lines to stdout, ignoring a closed pipe.
///
/// # Errors
///
/// Returns an error for any write failure other than a broken pipe.
pub fn emit<I, S>(lines: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = std::io::stdout().lock();
    for line in lines {
        match writeln!(out, "{}", line.as_ref()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
