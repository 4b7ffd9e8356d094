//! Environment for test subprocesses.
//!
//! Tests must import the package from the install root, never from the
//! source tree. [`TestEnvironment::prepare`] computes the variables that make
//! that happen; it is a pure function of its inputs, with no side effects.
//! The working directory is the purged test directory, so a stray module
//! in the source checkout cannot shadow the installed one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::install::InstallRoot;

/// Variable naming the install root, for plugins and curious tests.
pub const INSTALL_ROOT_VAR: &str = "RUNTESTS_INSTALL_ROOT";

/// Platform separator for path lists such as `PYTHONPATH`.
#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: &str = ";";
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: &str = ":";

/// The parts of the orchestrator's own environment that runs build upon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InheritedEnv {
    pub path: Option<String>,
    pub pythonpath: Option<String>,
    pub shell: Option<String>,
}

impl InheritedEnv {
    /// Reads `PATH`, `PYTHONPATH` and `SHELL` from the current process.
    pub fn capture() -> Self {
        Self {
            path: std::env::var("PATH").ok(),
            pythonpath: std::env::var("PYTHONPATH").ok(),
            shell: std::env::var("SHELL").ok(),
        }
    }
}

/// Environment overrides and working directory for a test process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestEnvironment {
    /// Variables set on top of the inherited environment.
    pub vars: BTreeMap<String, String>,

    /// Working directory of the test process.
    pub working_dir: PathBuf,
}

impl TestEnvironment {
    /// Computes the environment for processes importing from `install`.
    ///
    /// # Arguments
    ///
    /// * `install` - Install root of this run
    /// * `site_dir` - Site directory holding the package, `None` when the
    ///   build was skipped and the system installation is used
    /// * `inherited_pythonpath` - The orchestrator's own `PYTHONPATH`, kept
    ///   at the end of the new one
    /// * `working_dir` - Directory tests run from
    pub fn prepare(
        install: &InstallRoot,
        site_dir: Option<&Path>,
        inherited_pythonpath: Option<&str>,
        working_dir: &Path,
    ) -> Self {
        Self::from_paths(
            install.path(),
            &install.plugins_dir(),
            site_dir,
            inherited_pythonpath,
            working_dir,
        )
    }

    fn from_paths(
        install_root: &Path,
        plugins_dir: &Path,
        site_dir: Option<&Path>,
        inherited_pythonpath: Option<&str>,
        working_dir: &Path,
    ) -> Self {
        let mut entries: Vec<String> = Vec::new();
        if let Some(site) = site_dir {
            entries.push(site.display().to_string());
        }
        entries.push(plugins_dir.display().to_string());
        if let Some(existing) = inherited_pythonpath.filter(|p| !p.is_empty()) {
            entries.push(existing.to_string());
        }

        let mut vars = BTreeMap::new();
        vars.insert("PYTHONPATH".to_string(), entries.join(PATH_LIST_SEPARATOR));
        vars.insert(
            INSTALL_ROOT_VAR.to_string(),
            install_root.display().to_string(),
        );

        Self {
            vars,
            working_dir: working_dir.to_path_buf(),
        }
    }

    /// The computed `PYTHONPATH`.
    pub fn pythonpath(&self) -> &str {
        self.vars.get("PYTHONPATH").map(String::as_str).unwrap_or("")
    }
}

/// Prepends `dirs` to a path-list variable's current value.
pub fn prepend_path_list(dirs: &[PathBuf], current: Option<&str>) -> String {
    dirs.iter()
        .map(|d| d.display().to_string())
        .chain(current.filter(|c| !c.is_empty()).map(str::to_string))
        .collect::<Vec<_>>()
        .join(PATH_LIST_SEPARATOR)
}
