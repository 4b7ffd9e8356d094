//! Local child-process runner built on `tokio::process`.
//!
//! Children inherit the orchestrator's environment; [`Command::env`] entries
//! are applied on top. Signals delivered to the terminal reach the child as
//! usual, so Ctrl-C stops the whole process tree without extra handling.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Command, ExecResult, Output, ProcessError, ProcessResult, ProcessRunner};

/// How often a logged child is polled for exit and log growth.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Runs commands as children of the current process.
#[derive(Debug, Clone, Default)]
pub struct LocalRunner;

impl LocalRunner {
    /// Creates a new local runner.
    pub fn new() -> Self {
        Self
    }

    fn prepare(cmd: &Command) -> tokio::process::Command {
        let mut process = tokio::process::Command::new(&cmd.program);
        process.args(&cmd.args);

        for (key, value) in &cmd.env {
            process.env(key, value);
        }

        if let Some(dir) = &cmd.working_dir {
            process.current_dir(dir);
        }

        process
    }

    async fn run_logged(
        cmd: &Command,
        path: &std::path::Path,
        heartbeat: Duration,
    ) -> ProcessResult<ExecResult> {
        let start = Instant::now();

        let log_err = |source| ProcessError::LogFile {
            path: path.to_path_buf(),
            source,
        };
        let log = std::fs::File::create(path).map_err(log_err)?;
        let log_stderr = log.try_clone().map_err(log_err)?;

        let mut process = Self::prepare(cmd);
        process.stdout(Stdio::from(log));
        process.stderr(Stdio::from(log_stderr));

        let mut child = process.spawn().map_err(|source| ProcessError::SpawnFailed {
            program: cmd.program.clone(),
            source,
        })?;

        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        let mut last_blip = Instant::now();
        let mut last_size = log_size(path).await;

        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break status.map_err(|source| ProcessError::WaitFailed {
                        program: cmd.program.clone(),
                        source,
                    })?;
                }
                _ = ticker.tick() => {
                    if last_blip.elapsed() > heartbeat {
                        let size = log_size(path).await;
                        if size > last_size {
                            info!("    ... build in progress");
                            last_blip = Instant::now();
                            last_size = size;
                        }
                    }
                }
            }
        };

        Ok(ExecResult {
            exit_code: status.code().unwrap_or(-1),
            stdout: String::new(),
            stderr: String::new(),
            duration: start.elapsed(),
        })
    }
}

async fn log_size(path: &std::path::Path) -> u64 {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .unwrap_or(0)
}

#[async_trait]
impl ProcessRunner for LocalRunner {
    async fn run(&self, cmd: &Command, output: &Output) -> ProcessResult<ExecResult> {
        debug!("Running: {}", cmd.to_shell_string());

        let start = Instant::now();
        let spawn_err = |source| ProcessError::SpawnFailed {
            program: cmd.program.clone(),
            source,
        };

        match output {
            Output::Inherit => {
                let mut process = Self::prepare(cmd);
                process.stdin(Stdio::inherit());
                process.stdout(Stdio::inherit());
                process.stderr(Stdio::inherit());

                let status = process.status().await.map_err(spawn_err)?;

                Ok(ExecResult {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: start.elapsed(),
                })
            }
            Output::Capture => {
                let mut process = Self::prepare(cmd);
                process.stdin(Stdio::null());
                process.stdout(Stdio::piped());
                process.stderr(Stdio::piped());

                let output = process.output().await.map_err(spawn_err)?;

                Ok(ExecResult {
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    duration: start.elapsed(),
                })
            }
            Output::Log { path, heartbeat } => Self::run_logged(cmd, path, *heartbeat).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_capture_stdout_and_exit_code() {
        let runner = LocalRunner::new();
        let cmd = Command::new("sh").arg("-c").arg("echo hello; exit 3");

        let result = runner.run(&cmd, &Output::Capture).await.unwrap();

        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout.trim(), "hello");
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_env_and_working_dir_applied() {
        let dir = TempDir::new().unwrap();
        let runner = LocalRunner::new();
        let cmd = Command::new("sh")
            .arg("-c")
            .arg("echo $RUNTESTS_PROBE; pwd")
            .env("RUNTESTS_PROBE", "probe-value")
            .working_dir(dir.path());

        let result = runner.run(&cmd, &Output::Capture).await.unwrap();
        let lines: Vec<&str> = result.stdout.lines().collect();

        assert_eq!(lines[0], "probe-value");
        let reported = std::fs::canonicalize(lines[1]).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn test_log_output_written_to_file() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("build.log");
        let runner = LocalRunner::new();
        let cmd = Command::new("sh")
            .arg("-c")
            .arg("echo to-stdout; echo to-stderr 1>&2");

        let result = runner.run(&cmd, &Output::log(&log)).await.unwrap();

        assert!(result.success());
        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("to-stdout"));
        assert!(content.contains("to-stderr"));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let runner = LocalRunner::new();
        let cmd = Command::new("runtests-definitely-not-a-program");

        let err = runner.run(&cmd, &Output::Capture).await.unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));
    }
}
