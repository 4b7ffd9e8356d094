//! Subprocess abstraction used by every stage of a run.
//!
//! Everything runtests starts (the build, interpreter probes, pytest, the MPI
//! launcher, the convenience shell) is described as a [`Command`] and handed
//! to a [`ProcessRunner`]. The orchestrator never touches
//! `tokio::process` directly, which keeps it testable with a recording fake.
//!
//! ```text
//!   Builder ──┐
//!   Invoker ──┼──► Command ──► ProcessRunner::run(cmd, Output) ──► ExecResult
//!   FanOut  ──┘                      │
//!                                    └── LocalRunner (tokio::process)
//! ```
//!
//! # Output handling
//!
//! | [`Output`] | stdout/stderr | Used for |
//! |------------|---------------|----------|
//! | `Inherit` | the terminal | pytest, launcher, shell |
//! | `Capture` | returned in [`ExecResult`] | interpreter probes, version queries |
//! | `Log` | appended to a file, with heartbeat | the build |

pub mod local;

#[cfg(test)]
pub(crate) mod testing;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

pub use local::LocalRunner;

/// Result type for process operations.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Errors that prevent a command from running to completion.
///
/// A command that runs but exits non-zero is NOT an error; its exit code is
/// reported in [`ExecResult`].
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The program could not be started (not found, not executable, ...).
    #[error("Failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on a started child failed.
    #[error("Failed to wait for '{program}': {source}")]
    WaitFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The log file for `Output::Log` could not be opened.
    #[error("Failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A command to execute.
///
/// Built with a fluent API, mirroring how the command line reads.
///
/// # Example
///
/// ```
/// use runtests::process::Command;
///
/// let cmd = Command::new("python")
///     .arg("-m")
///     .arg("pytest")
///     .args(["-x", "tests/test_io.py::test_read"])
///     .env("PYTHONPATH", "/tmp/site")
///     .working_dir("/tmp/build/test");
///
/// assert_eq!(cmd.program, "python");
/// assert_eq!(cmd.args.len(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The program/executable to run.
    pub program: String,

    /// Arguments to pass to the program.
    pub args: Vec<String>,

    /// Working directory; `None` inherits the orchestrator's.
    pub working_dir: Option<PathBuf>,

    /// Environment overrides, applied on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl Command {
    /// Creates a new command with the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// Creates a command from an argv vector (`argv[0]` is the program).
    ///
    /// Returns `None` for an empty vector.
    pub fn from_argv<I, S>(argv: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut iter = argv.into_iter().map(Into::into);
        let program = iter.next()?;
        Some(Self::new(program).args(iter))
    }

    /// Adds a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable. Later values win over earlier ones.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Adds several environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Looks up the last value set for `key`.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Program followed by arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Renders the command as a shell-escaped string, for logging.
    ///
    /// ```
    /// use runtests::process::Command;
    /// let cmd = Command::new("echo").arg("hello world");
    /// assert_eq!(cmd.to_shell_string(), "echo 'hello world'");
    /// ```
    pub fn to_shell_string(&self) -> String {
        shell_words::join(self.argv())
    }
}

/// Where a child's stdout and stderr go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Share the orchestrator's terminal.
    Inherit,
    /// Collect into the returned [`ExecResult`].
    Capture,
    /// Write both streams to `path`. While the child runs, a progress line
    /// is logged at most once per `heartbeat`, and only if the file grew.
    Log { path: PathBuf, heartbeat: Duration },
}

impl Output {
    /// Log output to `path` with the default one minute heartbeat.
    pub fn log(path: impl AsRef<Path>) -> Self {
        Self::Log {
            path: path.as_ref().to_path_buf(),
            heartbeat: Duration::from_secs(60),
        }
    }
}

/// Result of running a command.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit code; `-1` if the child was killed by a signal.
    pub exit_code: i32,

    /// Captured standard output (empty unless `Output::Capture`).
    pub stdout: String,

    /// Captured standard error (empty unless `Output::Capture`).
    pub stderr: String,

    /// Wall-clock time the command took.
    pub duration: Duration,
}

impl ExecResult {
    /// Returns `true` if the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs commands to completion.
///
/// Implementations must be shareable across tasks.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs `cmd`, routing its output according to `output`, and waits for
    /// it to exit.
    ///
    /// # Errors
    ///
    /// Fails only when the process cannot be started or waited on.
    async fn run(&self, cmd: &Command, output: &Output) -> ProcessResult<ExecResult>;
}
