//! The invocation spec: everything a run needs, fixed up front.
//!
//! [`RunArgs`] is the raw command-line surface. [`InvocationSpec::resolve`]
//! merges it with the project [`Config`], validates it, and produces an
//! immutable [`InvocationSpec`]. All configuration errors are detected here
//! or in [`crate::fanout`], before any build or test process is spawned.

use std::path::{Path, PathBuf};

use clap::Args;

use crate::config::{Config, expand_path};

/// Errors in the requested configuration. Always fatal, always reported
/// before anything is spawned.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No package name on the command line or in `runtests.toml`.
    #[error("no package name given; pass --package or set [project] package in runtests.toml")]
    MissingPackage,

    /// `--bench` without anywhere to put the results.
    #[error("benchmark mode requires an output directory; pass --bench-dir or set [bench] output_dir")]
    BenchWithoutDir,

    /// `--bench-dir` without `--bench`.
    #[error("please specify '--bench' on the command-line to run benchmarks")]
    BenchDirWithoutBench,

    /// Rank count of zero.
    #[error("the number of ranks must be at least 1")]
    ZeroRanks,

    /// `runtests.toml` disables MPI but `--single` asks for a one-rank run.
    #[error("--single requires MPI, but [mpi] enabled = false in runtests.toml")]
    SingleRankDisabled,

    /// The launcher template could not be split into words.
    #[error("invalid launcher template '{template}': {reason}")]
    InvalidLauncher { template: String, reason: String },

    /// Multi-rank execution was requested but cannot happen.
    #[error("multi-rank mode requested but the distributed runtime is unavailable: {reason}")]
    RuntimeUnavailable { reason: String },
}

/// Command-line options for a test run.
#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Project root containing setup.py [default: current directory]
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Importable name of the package under test
    #[arg(long)]
    pub package: Option<String>,

    /// Python interpreter to build and test with
    #[arg(long)]
    pub python: Option<String>,

    /// Do not build the project (use the system installed version)
    #[arg(long)]
    pub no_build: bool,

    /// Just build, do not run any tests
    #[arg(long, conflicts_with = "no_build")]
    pub build_only: bool,

    /// Purge the build directory before building
    #[arg(long)]
    pub clean_build: bool,

    /// Number of parallel build jobs
    #[arg(long, default_value_t = 0)]
    pub parallel: usize,

    /// Compile with debugging information (may need --clean-build)
    #[arg(long)]
    pub enable_debug: bool,

    /// Show build output rather than writing build.log
    #[arg(long)]
    pub show_build_log: bool,

    /// Start a shell with the installed package on the import path
    #[arg(long)]
    pub shell: bool,

    /// Drop into the debugger on failure (disables output capturing)
    #[arg(long)]
    pub pdb: bool,

    /// Only run tests that use the `benchmark` fixture
    #[arg(long)]
    pub bench: bool,

    /// Directory to write benchmark results to
    #[arg(long)]
    pub bench_dir: Option<PathBuf>,

    /// Run as a single MPI rank, without a launcher
    #[arg(long, conflicts_with_all = ["no_mpi", "mpirun", "np", "xterm"])]
    pub single: bool,

    /// Run without MPI even if it is available
    #[arg(long, conflicts_with_all = ["mpirun", "np", "xterm"])]
    pub no_mpi: bool,

    /// MPI launcher template, e.g. "mpirun -n {np}"
    #[arg(long)]
    pub mpirun: Option<String>,

    /// Number of MPI ranks
    #[arg(long)]
    pub np: Option<usize>,

    /// Run every rank in its own `xterm -hold -e`
    #[arg(long)]
    pub xterm: bool,

    /// Tests to run (files, directories or node ids)
    pub tests: Vec<String>,

    /// Arguments passed verbatim to pytest (after `--`)
    #[arg(last = true)]
    pub pytest_args: Vec<String>,
}

/// How the user asked tests to be distributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeRequest {
    /// Multi-rank if the runtime is available, plain pytest otherwise.
    Auto,
    /// Plain pytest, no MPI.
    Serial,
    /// One rank, no launcher.
    SingleRank,
    /// Explicitly requested launcher fan-out.
    MultiRank,
}

/// Build step options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub skip: bool,
    pub only: bool,
    pub clean: bool,
    pub parallel: usize,
    pub debug: bool,
    pub show_log: bool,
}

/// Launcher settings for multi-rank runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherSpec {
    pub template: String,
    pub np: usize,
    pub xterm: bool,
    pub env: Vec<(String, String)>,
}

/// Immutable description of one orchestrator run.
#[derive(Debug, Clone)]
pub struct InvocationSpec {
    /// Absolute project root.
    pub root: PathBuf,
    pub package: String,
    pub python: String,
    pub project_files: Vec<PathBuf>,
    pub extra_path: Vec<PathBuf>,
    /// Absolute build directory.
    pub build_dir: PathBuf,
    /// Working directory of test processes, inside the build directory.
    pub test_dir: PathBuf,
    pub selections: Vec<String>,
    pub pytest_args: Vec<String>,
    pub build: BuildOptions,
    pub mode: ModeRequest,
    pub launcher: LauncherSpec,
    pub debugger: bool,
    /// Benchmark output directory; `Some` means benchmark mode.
    pub bench_dir: Option<PathBuf>,
    pub shell: bool,
}

impl InvocationSpec {
    /// Merges command-line arguments over the project config.
    ///
    /// `cwd` resolves a missing `--root` and relative paths.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] that can be detected without probing the system.
    pub fn resolve(args: &RunArgs, config: &Config, cwd: &Path) -> Result<Self, ConfigError> {
        let root = match &args.root {
            Some(r) => absolutize(cwd, &expand_path(r)),
            None => cwd.to_path_buf(),
        };

        let package = args
            .package
            .clone()
            .or_else(|| config.project.package.clone())
            .ok_or(ConfigError::MissingPackage)?;

        let bench_dir = match (args.bench, &args.bench_dir) {
            (false, Some(_)) => return Err(ConfigError::BenchDirWithoutBench),
            (false, None) => None,
            (true, Some(dir)) => Some(absolutize(&root, &expand_path(dir))),
            (true, None) => match &config.bench.output_dir {
                Some(dir) => Some(absolutize(&root, &expand_path(dir))),
                None => return Err(ConfigError::BenchWithoutDir),
            },
        };

        let mode = if args.no_mpi {
            ModeRequest::Serial
        } else if args.single {
            if config.mpi.enabled == Some(false) {
                return Err(ConfigError::SingleRankDisabled);
            }
            ModeRequest::SingleRank
        } else if args.mpirun.is_some() || args.np.is_some() || args.xterm {
            ModeRequest::MultiRank
        } else {
            match config.mpi.enabled {
                Some(true) => ModeRequest::MultiRank,
                Some(false) => ModeRequest::Serial,
                None => ModeRequest::Auto,
            }
        };

        let np = args.np.unwrap_or(config.mpi.np);
        if np == 0 && !matches!(mode, ModeRequest::Serial | ModeRequest::SingleRank) {
            return Err(ConfigError::ZeroRanks);
        }

        let build_dir = absolutize(&root, &expand_path(&config.project.build_dir));
        let test_dir = build_dir.join("test");

        Ok(Self {
            package,
            python: args
                .python
                .clone()
                .unwrap_or_else(|| config.project.python.clone()),
            project_files: config.project.project_files.clone(),
            extra_path: config
                .project
                .extra_path
                .iter()
                .map(|p| expand_path(p))
                .collect(),
            build_dir,
            test_dir,
            selections: args.tests.clone(),
            pytest_args: args.pytest_args.clone(),
            build: BuildOptions {
                skip: args.no_build,
                only: args.build_only,
                clean: args.clean_build,
                parallel: args.parallel,
                debug: args.enable_debug,
                show_log: args.show_build_log,
            },
            mode,
            launcher: LauncherSpec {
                template: args
                    .mpirun
                    .clone()
                    .unwrap_or_else(|| config.mpi.launcher.clone()),
                np,
                xterm: args.xterm,
                env: config
                    .mpi
                    .env
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            },
            debugger: args.pdb,
            bench_dir,
            shell: args.shell,
            root,
        })
    }

    /// Whether benchmark mode is on.
    pub fn bench(&self) -> bool {
        self.bench_dir.is_some()
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
