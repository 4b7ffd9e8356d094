//! Sequencing of a complete run.
//!
//! # Architecture
//!
//! ```text
//!   InvocationSpec
//!        │
//!        │ FanOut::resolve()          (configuration errors stop here)
//!        ▼
//!      Mode ──────────────────────────────────────────────┐
//!        │                                                │
//!        │ purge build/test, InstallRoot::create()        │
//!        ▼                                                │
//!   InstallRoot ──► Builder::build_and_install() ──► site dir
//!        │                                                │
//!        │ TestEnvironment::prepare()                     │
//!        ▼                                                ▼
//!   TestEnvironment ──────────────► Mode::command(TestInvoker)
//!                                                         │
//!                                               ProcessRunner::run()
//!                                                         │
//!                                                         ▼
//!                                                     RunResult ──► BenchmarkReport
//! ```
//!
//! # Execution Flow
//!
//! 1. **Mode**: resolve serial / single-rank / multi-rank before anything runs
//! 2. **Directories**: purge the test directory (and the build directory
//!    with `--clean-build`), create a fresh install root
//! 3. **Build**: build and install into the install root, unless skipped
//! 4. **Run**: pytest, the launcher, or the convenience shell, in the test
//!    directory with the prepared environment
//! 5. **Benchmarks**: merge per-rank timings into reports
//!
//! The install root lives exactly as long as [`Orchestrator::run`], so every
//! process of the run imports from the same tree and nothing outlives it.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::bench::{BenchError, BenchHeader, BenchmarkReport, read_raw};
use crate::build::{BuildError, Builder};
use crate::bundled::{BundledError, extract_plugins};
use crate::environment::{InheritedEnv, TestEnvironment};
use crate::fanout::{FanOut, Mode, RuntimeProbe};
use crate::install::InstallRoot;
use crate::invocation::{ConfigError, InvocationSpec};
use crate::invoker::{RunResult, TestInvoker};
use crate::process::{Command, ProcessError, ProcessRunner};

/// Variable telling the plugin where to put raw benchmark records.
pub const BENCH_RAW_VAR: &str = "RUNTESTS_BENCH_RAW";

/// Anything that stops a run before a test result exists.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Bundled(#[from] BundledError),

    #[error(transparent)]
    Bench(#[from] BenchError),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Drives one invocation from build to exit code.
pub struct Orchestrator<'a, R, P> {
    runner: &'a R,
    probe: &'a P,
    inherited: InheritedEnv,
}

impl<'a, R: ProcessRunner, P: RuntimeProbe> Orchestrator<'a, R, P> {
    /// Creates an orchestrator that inherits the current process environment.
    pub fn new(runner: &'a R, probe: &'a P) -> Self {
        Self {
            runner,
            probe,
            inherited: InheritedEnv::capture(),
        }
    }

    pub fn with_inherited_env(mut self, inherited: InheritedEnv) -> Self {
        self.inherited = inherited;
        self
    }

    /// Runs the invocation.
    ///
    /// # Errors
    ///
    /// Configuration and build errors, and failures to start processes. A
    /// failing test run is not an error; its exit code is in the
    /// [`RunResult`].
    pub async fn run(&self, spec: &InvocationSpec) -> Result<RunResult, RunError> {
        let runs_tests = !spec.build.only && !spec.shell;
        let mode = if runs_tests {
            let mode = FanOut::new(spec, self.probe).resolve().await?;
            debug!("Mode: {:?}", mode);
            Some(mode)
        } else {
            None
        };

        if spec.build.clean {
            info!("Removing {}", spec.build_dir.display());
            remove_dir_if_exists(&spec.build_dir)?;
        }
        remove_dir_if_exists(&spec.test_dir)?;
        std::fs::create_dir_all(&spec.test_dir).map_err(|source| RunError::Io {
            path: spec.test_dir.clone(),
            source,
        })?;

        let install = InstallRoot::create().map_err(|source| RunError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        extract_plugins(&install.plugins_dir())?;

        let site_dir = if spec.build.skip {
            info!("Skipping build, testing the installed {}", spec.package);
            None
        } else {
            let builder = Builder::new(spec, self.runner, &self.inherited);
            Some(builder.build_and_install(&install).await?)
        };

        if spec.build.only {
            return Ok(RunResult {
                exit_code: 0,
                output: None,
            });
        }

        let env = TestEnvironment::prepare(
            &install,
            site_dir.as_deref(),
            self.inherited.pythonpath.as_deref(),
            &spec.test_dir,
        );
        let invoker = TestInvoker::new(spec, site_dir.as_deref());

        let Some(mode) = mode else {
            let cmd = self.shell_command(spec, &env);
            info!("Starting {} in {}", cmd.program, env.working_dir.display());
            return Ok(invoker.run(self.runner, &cmd).await?);
        };

        let mut cmd = mode.command(&invoker, &env);
        if spec.bench() {
            cmd = cmd.env(BENCH_RAW_VAR, install.bench_raw_dir().display().to_string());
        }

        info!("Running {}", cmd.to_shell_string());
        let result = invoker.run(self.runner, &cmd).await?;

        if result.success() {
            info!("{}", console::style("Tests passed").green());
        } else {
            error!(
                "{}",
                console::style(format!("Tests failed (exit code {})", result.exit_code)).red()
            );
        }

        if let Some(dir) = &spec.bench_dir {
            self.report_benchmarks(spec, &install, &mode, dir).await?;
        }

        Ok(result)
    }

    fn shell_command(&self, spec: &InvocationSpec, env: &TestEnvironment) -> Command {
        let shell = self.inherited.shell.as_deref().unwrap_or("sh");
        Command::new(shell)
            .args(spec.pytest_args.iter().cloned())
            .envs(env.vars.clone())
            .working_dir(&env.working_dir)
    }

    async fn report_benchmarks(
        &self,
        spec: &InvocationSpec,
        install: &InstallRoot,
        mode: &Mode,
        dir: &Path,
    ) -> Result<(), RunError> {
        let records = read_raw(&install.bench_raw_dir())?;
        if records.is_empty() {
            warn!("No benchmark results were recorded");
            return Ok(());
        }

        let header =
            BenchHeader::gather(self.runner, &spec.python, &spec.root, mode.world_size()).await;
        let written = BenchmarkReport::collect(header, records).write(dir)?;
        info!(
            "Wrote {} benchmark report(s) to {}",
            written.len(),
            dir.display()
        );
        Ok(())
    }
}

fn remove_dir_if_exists(dir: &Path) -> Result<(), RunError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RunError::Io {
            path: dir.to_path_buf(),
            source,
        }),
    }
}
