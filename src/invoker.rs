//! Running pytest against the installed package.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::bundled::PLUGIN_MODULE;
use crate::environment::TestEnvironment;
use crate::invocation::InvocationSpec;
use crate::process::{Command, Output, ProcessResult, ProcessRunner};

/// Outcome of the test phase, consumed once by the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Exit code of pytest, the launcher or the shell; `-1` if it was
    /// killed by a signal.
    pub exit_code: i32,

    /// Captured output, when the runner captured any.
    pub output: Option<String>,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Builds and runs the pytest command line.
pub struct TestInvoker<'a> {
    spec: &'a InvocationSpec,
    site_dir: Option<&'a Path>,
}

impl<'a> TestInvoker<'a> {
    /// `site_dir` is where the package was installed, `None` with `--no-build`.
    pub fn new(spec: &'a InvocationSpec, site_dir: Option<&'a Path>) -> Self {
        Self { spec, site_dir }
    }

    /// Test selections as handed to pytest.
    ///
    /// Paths inside the project are rewritten to point at the installed
    /// copy, so the tests that run are the ones that were installed. In
    /// benchmark mode, or without a build, they are made absolute against
    /// the project root instead.
    pub fn selections(&self) -> Vec<String> {
        let relocate_to = self.site_dir.filter(|_| !self.spec.bench());

        if self.spec.selections.is_empty() {
            let whole = relocate_to.unwrap_or(&self.spec.root);
            return vec![whole.display().to_string()];
        }

        self.spec
            .selections
            .iter()
            .map(|sel| match relocate_to {
                Some(site) => relocate_selection(sel, &self.spec.root, site),
                None => anchor_selection(sel, &self.spec.root),
            })
            .collect()
    }

    /// The pytest command line.
    ///
    /// With `mpi` set the interpreter runs unbuffered, pytest stops at the
    /// first failure and the plugin attaches to the MPI world.
    pub fn pytest_command(&self, env: &TestEnvironment, mpi: bool) -> Command {
        let mut cmd = Command::new(&self.spec.python);
        if mpi {
            cmd = cmd.arg("-u");
        }
        cmd = cmd.args(["-m", "pytest", "-p", PLUGIN_MODULE, "--pyargs"]);

        if mpi {
            cmd = cmd.arg("-x");
        }
        if self.spec.debugger {
            cmd = cmd.args(["--pdb", "-s"]);
        }
        if self.spec.bench() {
            cmd = cmd.arg("--bench");
        }

        cmd = cmd
            .args(self.selections())
            .args(self.spec.pytest_args.iter().cloned())
            .envs(env.vars.clone())
            .working_dir(&env.working_dir);

        if mpi {
            cmd = cmd.env("RUNTESTS_MPI", "1");
        }
        cmd
    }

    /// Runs `cmd` on the terminal and returns its exit code unchanged.
    pub async fn run<R: ProcessRunner>(&self, runner: &R, cmd: &Command) -> ProcessResult<RunResult> {
        debug!("Running: {}", cmd.to_shell_string());
        let result = runner.run(cmd, &Output::Inherit).await?;

        let output = if result.stdout.is_empty() && result.stderr.is_empty() {
            None
        } else {
            Some(format!("{}{}", result.stdout, result.stderr))
        };

        Ok(RunResult {
            exit_code: result.exit_code,
            output,
        })
    }
}

/// Rewrites a selection relative to `root` into the same path under `site`,
/// keeping any `::node` suffix.
///
/// Absolute paths outside `root` are left alone.
pub fn relocate_selection(selection: &str, root: &Path, site: &Path) -> String {
    let (path, node) = split_node(selection);
    let path = Path::new(path);

    let relative = if path.is_absolute() {
        match path.strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => return selection.to_string(),
        }
    } else {
        path.to_path_buf()
    };

    format!("{}{}", site.join(relative).display(), node)
}

fn anchor_selection(selection: &str, root: &Path) -> String {
    let (path, node) = split_node(selection);
    let anchored: PathBuf = root.join(path);
    format!("{}{}", anchored.display(), node)
}

fn split_node(selection: &str) -> (&str, &str) {
    match selection.find("::") {
        Some(idx) => selection.split_at(idx),
        None => (selection, ""),
    }
}
