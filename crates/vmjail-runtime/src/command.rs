//! Jailer command construction.
//!
//! [`JailerCommandBuilder`] is a value type: every `with_*` method returns
//! an updated copy, so a partially configured builder can be reused as a
//! template. [`JailerCommandBuilder::build`] produces a [`JailerProcess`],
//! a description of the process that has not been started yet.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use vmjail_common::constants::DEFAULT_JAILER_BIN;
use vmjail_common::error::{JailError, Result};
use vmjail_common::types::SeccompLevel;

/// Where one of the child's standard streams goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// Share the parent's stream.
    Inherit,
    /// Connect to `/dev/null`.
    Null,
    /// Create a pipe, taken with [`RunningJailer::take_stdout`] and friends.
    Piped,
    /// Read from (stdin) or append to (stdout, stderr) a file.
    File(PathBuf),
}

impl Redirect {
    fn open(&self, for_input: bool) -> Result<Stdio> {
        Ok(match self {
            Self::Inherit => Stdio::inherit(),
            Self::Null => Stdio::null(),
            Self::Piped => Stdio::piped(),
            Self::File(path) => {
                let mut options = OpenOptions::new();
                if for_input {
                    let _ = options.read(true);
                } else {
                    let _ = options.create(true).append(true);
                }
                let file = options.open(path).map_err(|e| JailError::Io {
                    path: path.clone(),
                    source: e,
                })?;
                Stdio::from(file)
            }
        })
    }
}

/// Creates a linked cancellation handle and lifetime.
#[must_use]
pub fn process_lifetime() -> (LifetimeHandle, ProcessLifetime) {
    let (tx, rx) = watch::channel(false);
    (LifetimeHandle { tx }, ProcessLifetime { rx })
}

/// Cancels the [`ProcessLifetime`] it was created with.
#[derive(Debug)]
pub struct LifetimeHandle {
    tx: watch::Sender<bool>,
}

impl LifetimeHandle {
    /// Ends the lifetime. A running jailer bound to it is killed.
    pub fn cancel(&self) {
        let _ = self.tx.send_replace(true);
    }
}

/// Lifetime a jailer process is bound to.
///
/// Dropping the [`LifetimeHandle`] without cancelling leaves the lifetime
/// open for good.
#[derive(Debug, Clone)]
pub struct ProcessLifetime {
    rx: watch::Receiver<bool>,
}

impl ProcessLifetime {
    /// A lifetime that is never cancelled.
    #[must_use]
    pub fn unbounded() -> Self {
        process_lifetime().1
    }

    /// Returns whether the lifetime has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the lifetime is cancelled.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Builds the command line of the jailer binary.
#[derive(Debug, Clone, Default)]
pub struct JailerCommandBuilder {
    bin: Option<PathBuf>,
    id: String,
    uid: u32,
    gid: u32,
    exec_file: PathBuf,
    node: u32,

    chroot_base_dir: Option<PathBuf>,
    netns: Option<PathBuf>,
    daemonize: bool,
    seccomp_level: SeccompLevel,

    stdin: Option<Redirect>,
    stdout: Option<Redirect>,
    stderr: Option<Redirect>,
}

fn flag(name: &str, value: impl ToString) -> [String; 2] {
    [name.to_string(), value.to_string()]
}

fn path_flag(name: &str, path: &Path) -> [String; 2] {
    [name.to_string(), path.to_string_lossy().into_owned()]
}

fn non_empty(path: Option<&PathBuf>) -> Option<&PathBuf> {
    path.filter(|p| !p.as_os_str().is_empty())
}

impl JailerCommandBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Full argument vector in a fixed order: id, uid, gid, exec file,
    /// node, optional chroot base dir, optional netns, seccomp level, and
    /// the optional `--daemonize` switch.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(17);
        args.extend(self.id());
        args.extend(self.uid());
        args.extend(self.gid());
        args.extend(self.exec_file());
        args.extend(self.numa_node());
        if let Some(pair) = self.chroot_base_dir() {
            args.extend(pair);
        }
        if let Some(pair) = self.netns() {
            args.extend(pair);
        }
        args.extend(self.seccomp_level());
        if self.daemonize {
            args.push("--daemonize".to_string());
        }
        args
    }

    /// Binary to execute; `jailer` unless overridden.
    #[must_use]
    pub fn bin(&self) -> PathBuf {
        self.bin
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_JAILER_BIN))
    }

    /// Overrides the jailer binary.
    #[must_use]
    pub fn with_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.bin = Some(bin.into());
        self
    }

    /// `--id` flag.
    #[must_use]
    pub fn id(&self) -> [String; 2] {
        flag("--id", &self.id)
    }

    /// Sets the VM identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// `--uid` flag.
    #[must_use]
    pub fn uid(&self) -> [String; 2] {
        flag("--uid", self.uid)
    }

    /// Sets the UID the jailer switches to.
    #[must_use]
    pub const fn with_uid(mut self, uid: u32) -> Self {
        self.uid = uid;
        self
    }

    /// `--gid` flag.
    #[must_use]
    pub fn gid(&self) -> [String; 2] {
        flag("--gid", self.gid)
    }

    /// Sets the GID the jailer switches to.
    #[must_use]
    pub const fn with_gid(mut self, gid: u32) -> Self {
        self.gid = gid;
        self
    }

    /// `--exec-file` flag.
    #[must_use]
    pub fn exec_file(&self) -> [String; 2] {
        path_flag("--exec-file", &self.exec_file)
    }

    /// Sets the VMM binary the jailer execs.
    #[must_use]
    pub fn with_exec_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.exec_file = path.into();
        self
    }

    /// `--node` flag.
    #[must_use]
    pub fn numa_node(&self) -> [String; 2] {
        flag("--node", self.node)
    }

    /// Sets the NUMA node the process is assigned to.
    #[must_use]
    pub const fn with_numa_node(mut self, node: u32) -> Self {
        self.node = node;
        self
    }

    /// `--chroot-base-dir` flag, if a non-empty directory is set.
    #[must_use]
    pub fn chroot_base_dir(&self) -> Option<[String; 2]> {
        non_empty(self.chroot_base_dir.as_ref()).map(|p| path_flag("--chroot-base-dir", p))
    }

    /// Sets where chroot jails are built.
    #[must_use]
    pub fn with_chroot_base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.chroot_base_dir = Some(path.into());
        self
    }

    /// `--netns` flag, if a non-empty path is set.
    #[must_use]
    pub fn netns(&self) -> Option<[String; 2]> {
        non_empty(self.netns.as_ref()).map(|p| path_flag("--netns", p))
    }

    /// Sets the network namespace handle to join.
    #[must_use]
    pub fn with_netns(mut self, path: impl Into<PathBuf>) -> Self {
        self.netns = Some(path.into());
        self
    }

    /// Sets whether the jailer daemonizes.
    #[must_use]
    pub const fn with_daemonize(mut self, daemonize: bool) -> Self {
        self.daemonize = daemonize;
        self
    }

    /// `--seccomp-level` flag.
    #[must_use]
    pub fn seccomp_level(&self) -> [String; 2] {
        flag("--seccomp-level", self.seccomp_level)
    }

    /// Sets the syscall filtering level.
    #[must_use]
    pub const fn with_seccomp_level(mut self, level: SeccompLevel) -> Self {
        self.seccomp_level = level;
        self
    }

    /// Configured stdin redirect.
    #[must_use]
    pub const fn stdin(&self) -> Option<&Redirect> {
        self.stdin.as_ref()
    }

    /// Redirects the child's stdin.
    #[must_use]
    pub fn with_stdin(mut self, stdin: Redirect) -> Self {
        self.stdin = Some(stdin);
        self
    }

    /// Configured stdout redirect.
    #[must_use]
    pub const fn stdout(&self) -> Option<&Redirect> {
        self.stdout.as_ref()
    }

    /// Redirects the child's stdout.
    #[must_use]
    pub fn with_stdout(mut self, stdout: Redirect) -> Self {
        self.stdout = Some(stdout);
        self
    }

    /// Configured stderr redirect.
    #[must_use]
    pub const fn stderr(&self) -> Option<&Redirect> {
        self.stderr.as_ref()
    }

    /// Redirects the child's stderr.
    #[must_use]
    pub fn with_stderr(mut self, stderr: Redirect) -> Self {
        self.stderr = Some(stderr);
        self
    }

    /// Describes the jailer process bound to `lifetime`. Nothing is
    /// opened or started here.
    #[must_use]
    pub fn build(&self, lifetime: ProcessLifetime) -> JailerProcess {
        let process = JailerProcess {
            bin: self.bin(),
            args: self.args(),
            stdin: self.stdin.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            lifetime,
        };
        tracing::debug!(bin = %process.bin.display(), args = ?process.args, "jailer command built");
        process
    }
}

/// A jailer process that has not been started.
#[derive(Debug, Clone)]
pub struct JailerProcess {
    bin: PathBuf,
    args: Vec<String>,
    stdin: Option<Redirect>,
    stdout: Option<Redirect>,
    stderr: Option<Redirect>,
    lifetime: ProcessLifetime,
}

impl JailerProcess {
    /// Binary that will be executed.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.bin
    }

    /// Arguments passed to the binary.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Stdin redirect, if one was set.
    #[must_use]
    pub const fn stdin(&self) -> Option<&Redirect> {
        self.stdin.as_ref()
    }

    /// Stdout redirect, if one was set.
    #[must_use]
    pub const fn stdout(&self) -> Option<&Redirect> {
        self.stdout.as_ref()
    }

    /// Stderr redirect, if one was set.
    #[must_use]
    pub const fn stderr(&self) -> Option<&Redirect> {
        self.stderr.as_ref()
    }

    /// Lifetime the process is bound to.
    #[must_use]
    pub const fn lifetime(&self) -> &ProcessLifetime {
        &self.lifetime
    }

    /// Renders the command line for logs and dry runs.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.bin.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Starts the process. Must be called inside a Tokio runtime.
    ///
    /// The child is handed to a supervisor task that kills it as soon as
    /// the lifetime is cancelled, whether or not anyone waits on it.
    /// Streams without a redirect keep Tokio's defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the lifetime is already cancelled, a redirect
    /// file cannot be opened, or the binary cannot be executed.
    pub fn spawn(self) -> Result<RunningJailer> {
        if self.lifetime.is_cancelled() {
            return Err(JailError::Cancelled { bin: self.bin });
        }

        let mut command = Command::new(&self.bin);
        let _ = command.args(&self.args).kill_on_drop(true);
        if let Some(stdin) = &self.stdin {
            let _ = command.stdin(stdin.open(true)?);
        }
        if let Some(stdout) = &self.stdout {
            let _ = command.stdout(stdout.open(false)?);
        }
        if let Some(stderr) = &self.stderr {
            let _ = command.stderr(stderr.open(false)?);
        }

        let mut child = command.spawn().map_err(|e| JailError::Io {
            path: self.bin.clone(),
            source: e,
        })?;
        let pid = child.id();
        tracing::info!(pid, cmd = %self.command_line(), "jailer started");

        let (kill_tx, kill_rx) = oneshot::channel();
        Ok(RunningJailer {
            pid,
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            kill: Some(kill_tx),
            supervisor: Some(tokio::spawn(supervise(child, self.lifetime, kill_rx))),
            status: None,
        })
    }
}

/// Owns the child until it exits, killing it when the lifetime is
/// cancelled or the [`RunningJailer`] asks for it (or is dropped).
async fn supervise(
    mut child: Child,
    mut lifetime: ProcessLifetime,
    kill: oneshot::Receiver<()>,
) -> Result<ExitStatus> {
    let pid = child.id();
    tokio::select! {
        status = child.wait() => return status.map_err(|source| JailError::Process { pid, source }),
        () = lifetime.cancelled() => tracing::info!(pid, "lifetime cancelled, killing jailer"),
        _ = kill => tracing::info!(pid, "kill requested, killing jailer"),
    }

    child
        .kill()
        .await
        .map_err(|source| JailError::Process { pid, source })?;
    child
        .wait()
        .await
        .map_err(|source| JailError::Process { pid, source })
}

/// A started jailer process.
///
/// Dropping it kills the process.
#[derive(Debug)]
pub struct RunningJailer {
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    kill: Option<oneshot::Sender<()>>,
    supervisor: Option<JoinHandle<Result<ExitStatus>>>,
    status: Option<ExitStatus>,
}

impl RunningJailer {
    /// Pid the process was started with.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Takes the write end of a piped stdin.
    pub const fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Takes the read end of a piped stdout.
    pub const fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Takes the read end of a piped stderr.
    pub const fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Waits for the process to exit, including exits caused by a
    /// cancelled lifetime. Later calls return the same status.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting on or killing the process failed, or
    /// if an earlier call already reported that failure.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let Some(supervisor) = self.supervisor.as_mut() else {
            return Err(JailError::Process {
                pid: self.pid,
                source: std::io::Error::other("exit status was already lost"),
            });
        };
        let joined = supervisor.await;
        self.supervisor = None;

        let status = joined.map_err(|e| JailError::Process {
            pid: self.pid,
            source: std::io::Error::other(e),
        })??;
        self.status = Some(status);
        Ok(status)
    }

    /// Kills the process and returns its exit status.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be killed or reaped.
    pub async fn kill(&mut self) -> Result<ExitStatus> {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
        self.wait().await
    }
}
