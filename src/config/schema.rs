//! Configuration schema for `runtests.toml`.
//!
//! ```text
//! Config (root)
//! ├── ProjectConfig   - package name, interpreter, build paths
//! ├── MpiConfig       - launcher template, rank count, launcher env
//! └── BenchConfig     - benchmark output directory
//! ```
//!
//! Every section is optional; a project without `runtests.toml` runs with
//! [`Config::default`] plus whatever the command line provides.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
///
/// # Example
///
/// ```
/// use runtests::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [project]
///     package = "nbodykit"
///
///     [mpi]
///     launcher = "srun -n {np}"
///     np = 2
/// "#).unwrap();
///
/// assert_eq!(config.project.package.as_deref(), Some("nbodykit"));
/// assert_eq!(config.mpi.np, 2);
/// assert_eq!(config.project.python, "python");
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,

    #[serde(default)]
    pub mpi: MpiConfig,

    #[serde(default)]
    pub bench: BenchConfig,
}

/// The Python project under test.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `package` | None (must come from the CLI) |
/// | `python` | `python` |
/// | `project_files` | empty (`setup.py` is always required) |
/// | `extra_path` | the usual ccache / f90cache directories |
/// | `build_dir` | `build` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectConfig {
    /// Importable name of the package being tested.
    pub package: Option<String>,

    /// Python interpreter used for the build, probes and pytest.
    #[serde(default = "default_python")]
    pub python: String,

    /// Files that must exist at the project root besides `setup.py`.
    #[serde(default)]
    pub project_files: Vec<PathBuf>,

    /// Directories prepended to `PATH` while building, so compiler caches
    /// are picked up when installed.
    #[serde(default = "default_extra_path")]
    pub extra_path: Vec<PathBuf>,

    /// Build directory, relative to the project root.
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            package: None,
            python: default_python(),
            project_files: Vec::new(),
            extra_path: default_extra_path(),
            build_dir: default_build_dir(),
        }
    }
}

fn default_python() -> String {
    "python".to_string()
}

fn default_extra_path() -> Vec<PathBuf> {
    [
        "/usr/lib/ccache",
        "/usr/lib/f90cache",
        "/usr/local/lib/ccache",
        "/usr/local/lib/f90cache",
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect()
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build")
}

/// Distributed execution settings.
///
/// ```toml
/// [mpi]
/// enabled = true              # omit to auto-detect
/// launcher = "mpiexec -n {np}"
/// np = 4
///
/// [mpi.env]
/// OMPI_MCA_btl = "self,vader"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MpiConfig {
    /// `Some(true)` requires multi-rank mode, `Some(false)` forbids it,
    /// `None` uses it when the runtime is available.
    pub enabled: Option<bool>,

    /// Launcher template; `{np}` is replaced with the rank count.
    #[serde(default = "default_launcher")]
    pub launcher: String,

    /// Number of ranks to launch.
    #[serde(default = "default_np")]
    pub np: usize,

    /// Extra environment for the launcher, merged over the built-in
    /// Open MPI oversubscription settings.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for MpiConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            launcher: default_launcher(),
            np: default_np(),
            env: BTreeMap::new(),
        }
    }
}

fn default_launcher() -> String {
    "mpirun -n {np}".to_string()
}

fn default_np() -> usize {
    4
}

/// Benchmark settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BenchConfig {
    /// Where benchmark JSON files are written, relative to the project
    /// root. Used when `--bench` is given without `--bench-dir`.
    pub output_dir: Option<PathBuf>,
}
