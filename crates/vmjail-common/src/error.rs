//! Unified error types for the vmjail workspace.
//!
//! Every variant that stems from a filesystem or namespace operation keeps
//! the offending path (or PID) and the underlying OS error, so an operator
//! can tell a missing artifact from a permission problem or a process that
//! already exited.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum JailError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A jailer field that must be set before rendering a command is absent.
    #[error("jailer configuration is missing required field `{field}`")]
    MissingField {
        /// Name of the absent field.
        field: &'static str,
    },

    /// An anchor handler required for insertion is not in the list.
    #[error("{name} is missing from the handler list")]
    MissingHandler {
        /// Name of the missing handler.
        name: String,
    },

    /// A provisioning step needs the launched process but none is known.
    #[error("{handler} requires a started process, but no pid is known")]
    ProcessNotStarted {
        /// Handler that needed the pid.
        handler: String,
    },

    /// Creating a hard link into the jail failed.
    #[error("failed to link {} to {}: {source}", .from.display(), .to.display())]
    Link {
        /// Host path of the artifact.
        from: PathBuf,
        /// Destination inside the jail.
        to: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Changing ownership of a jailed artifact failed.
    #[error("failed to change ownership of {}: {source}", .path.display())]
    Chown {
        /// Path whose owner could not be changed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A bind mount failed.
    #[error("failed to bind mount {} on {}: {source}", .from.display(), .target.display())]
    Mount {
        /// Host path being exposed.
        from: PathBuf,
        /// Mount point inside the jail.
        target: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Remounting a bind mount read-only failed.
    #[error("failed to remount {} read-only: {source}", .path.display())]
    Remount {
        /// Mount point that stayed writable.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A forced unmount failed.
    #[error("failed to unmount {}: {source}", .path.display())]
    Unmount {
        /// Mount point that could not be detached.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Joining another process's mount namespace failed.
    #[error("failed to enter mount namespace of pid {pid}: {source}")]
    Namespace {
        /// Process whose namespace was targeted.
        pid: u32,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Switching the calling thread back to its own mount namespace failed.
    #[error("failed to restore the thread's mount namespace: {source}")]
    NamespaceRestore {
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The worker thread running inside a mount namespace panicked.
    #[error("mount namespace worker for pid {pid} panicked")]
    NamespaceWorker {
        /// Process whose namespace the worker had joined.
        pid: u32,
    },

    /// The lifetime of a process ended before the process was started.
    #[error("lifetime of {} was cancelled before start", .bin.display())]
    Cancelled {
        /// Binary that was not started.
        bin: PathBuf,
    },

    /// Waiting on or signalling a started process failed.
    #[error("process {}: {source}", render_pid(.pid.as_ref()))]
    Process {
        /// Pid of the process, if it had not been reaped yet.
        pid: Option<u32>,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A named handler in a pipeline failed.
    #[error("handler {name} failed: {source}")]
    Handler {
        /// Name of the failing handler.
        name: String,
        /// Error returned by the handler.
        source: Box<JailError>,
    },

    /// One or more artifacts could not be unmounted during teardown.
    #[error("teardown failed for {} artifact(s): {}", .failures.len(), render_failures(.failures))]
    Teardown {
        /// Every artifact that failed, in the order visited.
        failures: Vec<UnmountFailure>,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// A single artifact that could not be unmounted.
#[derive(Debug)]
pub struct UnmountFailure {
    /// Mount point inside the jail.
    pub path: PathBuf,
    /// Error reported for this mount point.
    pub source: JailError,
}

impl fmt::Display for UnmountFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.source)
    }
}

fn render_pid(pid: Option<&u32>) -> String {
    pid.map_or_else(|| "(reaped)".to_string(), |p| p.to_string())
}

fn render_failures(failures: &[UnmountFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, JailError>;
