//! Building the package and installing it into the install root.
//!
//! # Build Process
//!
//! 1. Check the root really is a source tree (`setup.py` plus any
//!    configured marker files)
//! 2. Ask the interpreter where `platlib`/`purelib` live under the prefix
//! 3. Run `python setup.py build [...] install --prefix=<prefix>` with
//!    compiler caches on `PATH` and the site dirs on `PYTHONPATH`
//! 4. Find the site directory that actually contains the package
//!
//! Any failure is fatal for the run. There is no fallback to a partial
//! install or to the source tree.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{error, info};

use crate::environment::{InheritedEnv, prepend_path_list};
use crate::install::InstallRoot;
use crate::invocation::InvocationSpec;
use crate::process::{Command, Output, ProcessError, ProcessRunner};

/// Lazily compiled regex for setuptools imports.
static SETUPTOOLS_PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

/// Name of the build log, written at the project root.
pub const BUILD_LOG: &str = "build.log";

/// Prints the `platlib` and `purelib` directories for the prefix in argv[1].
const SITE_QUERY: &str = "import os, sys, sysconfig
prefix = sys.argv[1]
scheme = 'posix_prefix' if os.name == 'posix' else 'nt'
for key in ('platlib', 'purelib'):
    print(sysconfig.get_path(key, scheme, vars={'base': prefix, 'platbase': prefix}))";

/// Errors that abort the run before any test starts.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// A required project file is missing from the root.
    #[error(
        "{} not found; to build the project, run runtests in a git checkout or unpacked source",
        .missing.display()
    )]
    NotASourceTree { missing: PathBuf },

    /// File system error while preparing the build.
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The interpreter could not report its install layout.
    #[error("failed to query site directories from '{python}': {detail}")]
    SiteQuery { python: String, detail: String },

    /// The build or a probe could not be started.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// The setuptools detection pattern did not compile.
    #[error("Failed to compile setuptools pattern: {0}")]
    Pattern(regex::Error),

    /// The build command exited non-zero.
    #[error("Build failed! (exit code {code})")]
    Failed { code: i32 },

    /// The build succeeded but the package is not where it should be.
    #[error("Package {package} not properly installed (searched {})", display_paths(.searched))]
    PackageNotInstalled {
        package: String,
        searched: Vec<PathBuf>,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Returns `true` when a `setup.py` imports setuptools.
///
/// setuptools needs extra install flags to produce a plain site-packages
/// layout instead of an egg.
pub fn uses_setuptools(setup_py: &str) -> Result<bool, BuildError> {
    Ok(setuptools_pattern()?.is_match(setup_py))
}

fn setuptools_pattern() -> Result<&'static Regex, BuildError> {
    let result = SETUPTOOLS_PATTERN
        .get_or_init(|| Regex::new(r"(from\s+setuptools)|(import\s+setuptools)"));

    match result {
        Ok(regex) => Ok(regex),
        Err(e) => Err(BuildError::Pattern(e.clone())),
    }
}

/// Site directories under an install prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteLayout {
    /// Platform-specific site directory (compiled extensions).
    pub platlib: PathBuf,
    /// Pure-Python site directory.
    pub purelib: PathBuf,
}

impl SiteLayout {
    /// Parses the two lines printed by the site query.
    pub fn parse(output: &str) -> Option<Self> {
        let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
        let platlib = PathBuf::from(lines.next()?);
        let purelib = PathBuf::from(lines.next()?);
        Some(Self { platlib, purelib })
    }

    /// Distinct site directories, platform-specific first.
    pub fn candidates(&self) -> Vec<&Path> {
        let mut dirs = vec![self.platlib.as_path()];
        if self.purelib != self.platlib {
            dirs.push(self.purelib.as_path());
        }
        dirs
    }
}

/// Builds the project into an install root.
pub struct Builder<'a, R> {
    spec: &'a InvocationSpec,
    runner: &'a R,
    inherited: &'a InheritedEnv,
}

impl<'a, R: ProcessRunner> Builder<'a, R> {
    pub fn new(spec: &'a InvocationSpec, runner: &'a R, inherited: &'a InheritedEnv) -> Self {
        Self {
            spec,
            runner,
            inherited,
        }
    }

    /// Checks that `setup.py` and every configured project file exist.
    pub fn check_source_tree(&self) -> Result<(), BuildError> {
        let required = std::iter::once(PathBuf::from("setup.py"))
            .chain(self.spec.project_files.iter().cloned());

        for file in required {
            let path = self.spec.root.join(&file);
            if !path.exists() {
                return Err(BuildError::NotASourceTree { missing: path });
            }
        }
        Ok(())
    }

    /// Asks the interpreter for the site directories under `prefix`.
    pub async fn site_layout(&self, prefix: &Path) -> Result<SiteLayout, BuildError> {
        let cmd = Command::new(&self.spec.python)
            .arg("-c")
            .arg(SITE_QUERY)
            .arg(prefix.display().to_string());

        let result = self.runner.run(&cmd, &Output::Capture).await?;
        if !result.success() {
            return Err(BuildError::SiteQuery {
                python: self.spec.python.clone(),
                detail: result.stderr.trim().to_string(),
            });
        }

        SiteLayout::parse(&result.stdout).ok_or_else(|| BuildError::SiteQuery {
            python: self.spec.python.clone(),
            detail: format!("unexpected output: {:?}", result.stdout),
        })
    }

    /// The `setup.py` command line installing into `prefix`.
    pub fn build_command(&self, prefix: &Path, setuptools: bool) -> Command {
        let options = &self.spec.build;
        let mut cmd = Command::new(&self.spec.python).arg("setup.py").arg("build");

        if options.parallel > 1 {
            cmd = cmd.arg("-j").arg(options.parallel.to_string());
        }
        if options.debug {
            cmd = cmd.arg("--debug");
        }

        cmd = cmd
            .arg("install")
            .arg(format!("--prefix={}", prefix.display()));

        if setuptools {
            cmd = cmd
                .arg("--single-version-externally-managed")
                .arg(format!(
                    "--record={}",
                    prefix.join("install_log.txt").display()
                ));
        }

        cmd.working_dir(&self.spec.root)
    }

    /// Environment for the build: compiler caches first on `PATH`, the
    /// target site directories first on `PYTHONPATH`.
    pub fn build_env(&self, layout: &SiteLayout) -> Vec<(String, String)> {
        let sites: Vec<PathBuf> = layout
            .candidates()
            .into_iter()
            .map(Path::to_path_buf)
            .collect();

        vec![
            (
                "PATH".to_string(),
                prepend_path_list(&self.spec.extra_path, self.inherited.path.as_deref()),
            ),
            (
                "PYTHONPATH".to_string(),
                prepend_path_list(&sites, self.inherited.pythonpath.as_deref()),
            ),
        ]
    }

    /// Builds and installs into `install`, returning the site directory
    /// containing the package.
    ///
    /// # Errors
    ///
    /// Any [`BuildError`]; the caller must abort the run.
    pub async fn build_and_install(&self, install: &InstallRoot) -> Result<PathBuf, BuildError> {
        self.check_source_tree()?;

        let setup_py_path = self.spec.root.join("setup.py");
        let setup_py = std::fs::read_to_string(&setup_py_path).map_err(|source| BuildError::Io {
            path: setup_py_path.clone(),
            source,
        })?;

        let prefix = install.prefix();
        let layout = self.site_layout(&prefix).await?;

        // setup.py refuses to install into a site dir whose parent is missing
        for dir in layout.candidates() {
            if let Some(parent) = dir.parent() {
                std::fs::create_dir_all(parent).map_err(|source| BuildError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let cmd = self
            .build_command(&prefix, uses_setuptools(&setup_py)?)
            .envs(self.build_env(&layout));

        let log_path = self.spec.root.join(BUILD_LOG);
        let result = if self.spec.build.show_log {
            self.runner.run(&cmd, &Output::Inherit).await?
        } else {
            let spinner = indicatif::ProgressBar::new_spinner();
            spinner.set_message(format!("Building, see {}...", BUILD_LOG));
            spinner.enable_steady_tick(Duration::from_millis(120));
            let result = self.runner.run(&cmd, &Output::log(&log_path)).await;
            spinner.finish_and_clear();
            result?
        };

        if !result.success() {
            if !self.spec.build.show_log
                && let Ok(log) = std::fs::read_to_string(&log_path)
            {
                eprintln!("{}", log);
            }
            error!("{}", console::style("Build failed!").red().bold());
            return Err(BuildError::Failed {
                code: result.exit_code,
            });
        }

        info!("{}", console::style("Build OK").green());

        let package = &self.spec.package;
        for dir in layout.candidates() {
            if dir.join(package).exists() || dir.join(format!("{}.py", package)).exists() {
                return Ok(dir.to_path_buf());
            }
        }

        Err(BuildError::PackageNotInstalled {
            package: package.clone(),
            searched: layout
                .candidates()
                .into_iter()
                .map(Path::to_path_buf)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::invocation::RunArgs;
    use crate::process::testing::{RecordingRunner, exited};
    use tempfile::TempDir;

    fn spec_for(root: &Path) -> InvocationSpec {
        let args = RunArgs {
            package: Some("mypkg".to_string()),
            ..Default::default()
        };
        InvocationSpec::resolve(&args, &Config::default(), root).unwrap()
    }

    fn source_tree(setup_py: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("setup.py"), setup_py).unwrap();
        dir
    }

    /// Simulates the interpreter: answers the site query and "installs" the
    /// package when setup.py runs.
    fn fake_python(install_package: bool, build_code: i32) -> RecordingRunner {
        RecordingRunner::new(move |cmd| {
            if cmd.args.first().map(String::as_str) == Some("-c") {
                let prefix = cmd.args.last().unwrap();
                let site = format!("{}/lib/python3.11/site-packages", prefix);
                return exited(0, &format!("{}\n{}\n", site, site));
            }
            if install_package {
                let site = cmd.env_value("PYTHONPATH").unwrap().split(':').next().unwrap();
                std::fs::create_dir_all(Path::new(site).join("mypkg")).unwrap();
            }
            exited(build_code, "")
        })
    }

    #[test]
    fn test_uses_setuptools() {
        assert!(uses_setuptools("from setuptools import setup\n").unwrap());
        assert!(uses_setuptools("import  setuptools").unwrap());
        assert!(!uses_setuptools("from distutils.core import setup").unwrap());
        // the compiled pattern is reused
        assert!(std::ptr::eq(
            setuptools_pattern().unwrap(),
            setuptools_pattern().unwrap()
        ));
    }

    #[test]
    fn test_site_layout_parse() {
        let layout = SiteLayout::parse("/p/lib64/site\n/p/lib/site\n").unwrap();
        assert_eq!(layout.platlib, PathBuf::from("/p/lib64/site"));
        assert_eq!(layout.candidates().len(), 2);

        let same = SiteLayout::parse("/p/lib/site\n/p/lib/site\n").unwrap();
        assert_eq!(same.candidates().len(), 1);

        assert!(SiteLayout::parse("only-one-line\n").is_none());
    }

    #[test]
    fn test_build_command_plain() {
        let dir = source_tree("");
        let spec = spec_for(dir.path());
        let runner = RecordingRunner::exiting(0);
        let inherited = InheritedEnv::default();
        let builder = Builder::new(&spec, &runner, &inherited);

        let cmd = builder.build_command(Path::new("/tmp/prefix"), false);
        assert_eq!(
            cmd.args,
            vec!["setup.py", "build", "install", "--prefix=/tmp/prefix"]
        );
        assert_eq!(cmd.working_dir.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_build_command_parallel_debug_setuptools() {
        let dir = source_tree("");
        let mut spec = spec_for(dir.path());
        spec.build.parallel = 8;
        spec.build.debug = true;
        let runner = RecordingRunner::exiting(0);
        let inherited = InheritedEnv::default();
        let builder = Builder::new(&spec, &runner, &inherited);

        let cmd = builder.build_command(Path::new("/tmp/prefix"), true);
        assert_eq!(
            cmd.args,
            vec![
                "setup.py",
                "build",
                "-j",
                "8",
                "--debug",
                "install",
                "--prefix=/tmp/prefix",
                "--single-version-externally-managed",
                "--record=/tmp/prefix/install_log.txt",
            ]
        );
    }

    #[test]
    fn test_parallel_one_is_not_passed() {
        let dir = source_tree("");
        let mut spec = spec_for(dir.path());
        spec.build.parallel = 1;
        let runner = RecordingRunner::exiting(0);
        let inherited = InheritedEnv::default();
        let builder = Builder::new(&spec, &runner, &inherited);

        let cmd = builder.build_command(Path::new("/p"), false);
        assert!(!cmd.args.contains(&"-j".to_string()));
    }

    #[test]
    fn test_build_env_prepends() {
        let dir = source_tree("");
        let spec = spec_for(dir.path());
        let runner = RecordingRunner::exiting(0);
        let inherited = InheritedEnv {
            path: Some("/usr/bin".into()),
            pythonpath: Some("/opt/py".into()),
            shell: None,
        };
        let builder = Builder::new(&spec, &runner, &inherited);
        let layout = SiteLayout::parse("/p/a\n/p/b\n").unwrap();

        let env = builder.build_env(&layout);
        assert_eq!(env[0].0, "PATH");
        assert!(env[0].1.starts_with("/usr/lib/ccache:"));
        assert!(env[0].1.ends_with(":/usr/bin"));
        assert_eq!(env[1], ("PYTHONPATH".to_string(), "/p/a:/p/b:/opt/py".to_string()));
    }

    #[test]
    fn test_missing_setup_py() {
        let dir = TempDir::new().unwrap();
        let spec = spec_for(dir.path());
        let runner = RecordingRunner::exiting(0);
        let inherited = InheritedEnv::default();
        let builder = Builder::new(&spec, &runner, &inherited);

        let err = builder.check_source_tree().unwrap_err();
        assert!(matches!(err, BuildError::NotASourceTree { .. }));
    }

    #[test]
    fn test_missing_project_file() {
        let dir = source_tree("");
        let mut spec = spec_for(dir.path());
        spec.project_files = vec![PathBuf::from("LICENSE")];
        let runner = RecordingRunner::exiting(0);
        let inherited = InheritedEnv::default();
        let builder = Builder::new(&spec, &runner, &inherited);

        match builder.check_source_tree() {
            Err(BuildError::NotASourceTree { missing }) => {
                assert!(missing.ends_with("LICENSE"));
            }
            other => panic!("expected NotASourceTree, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_build_and_install_finds_package() {
        let dir = source_tree("from setuptools import setup\nsetup()\n");
        let spec = spec_for(dir.path());
        let runner = fake_python(true, 0);
        let inherited = InheritedEnv::default();
        let install = InstallRoot::create().unwrap();

        let site = Builder::new(&spec, &runner, &inherited)
            .build_and_install(&install)
            .await
            .unwrap();

        assert!(site.starts_with(install.prefix()));
        assert!(site.join("mypkg").is_dir());

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        let (build_cmd, output) = &calls[1];
        assert!(
            build_cmd
                .args
                .contains(&"--single-version-externally-managed".to_string())
        );
        assert_eq!(output, &Output::log(dir.path().join(BUILD_LOG)));
    }

    #[tokio::test]
    async fn test_build_failure_is_fatal() {
        let dir = source_tree("");
        let spec = spec_for(dir.path());
        let runner = fake_python(false, 1);
        let inherited = InheritedEnv::default();
        let install = InstallRoot::create().unwrap();

        let err = Builder::new(&spec, &runner, &inherited)
            .build_and_install(&install)
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Failed { code: 1 }));
    }

    #[tokio::test]
    async fn test_package_not_installed() {
        let dir = source_tree("");
        let spec = spec_for(dir.path());
        let runner = fake_python(false, 0);
        let inherited = InheritedEnv::default();
        let install = InstallRoot::create().unwrap();

        let err = Builder::new(&spec, &runner, &inherited)
            .build_and_install(&install)
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::PackageNotInstalled { .. }));
    }

    #[tokio::test]
    async fn test_show_build_log_inherits_output() {
        let dir = source_tree("");
        let mut spec = spec_for(dir.path());
        spec.build.show_log = true;
        let runner = fake_python(true, 0);
        let inherited = InheritedEnv::default();
        let install = InstallRoot::create().unwrap();

        Builder::new(&spec, &runner, &inherited)
            .build_and_install(&install)
            .await
            .unwrap();

        assert_eq!(runner.calls()[1].1, Output::Inherit);
    }
}
