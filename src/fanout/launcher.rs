//! MPI launcher command lines.

use crate::invocation::{ConfigError, LauncherSpec};
use crate::process::Command;

/// Open MPI settings that let every test run on a laptop with fewer cores
/// than ranks.
pub const OMPI_ENV: &[(&str, &str)] = &[
    ("OMPI_MCA_rmaps_base_oversubscribe", "1"),
    ("OMPI_MCA_rmaps_base_no_oversubscribe", "0"),
    ("OMPI_MCA_mpi_yield_when_idle", "1"),
];

/// Placeholder substituted with the rank count.
const NP_PLACEHOLDER: &str = "{np}";

/// A launcher such as `mpirun -n 4`, ready to wrap a per-rank command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    argv: Vec<String>,
    np: usize,
    xterm: bool,
    env: Vec<(String, String)>,
}

impl Launcher {
    /// Parses a template like `"mpirun -n {np}"`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ZeroRanks`] for `np == 0` and
    /// [`ConfigError::InvalidLauncher`] when the template does not split
    /// into at least one word.
    pub fn from_template(template: &str, np: usize, xterm: bool) -> Result<Self, ConfigError> {
        if np == 0 {
            return Err(ConfigError::ZeroRanks);
        }

        let words = shell_words::split(template).map_err(|e| ConfigError::InvalidLauncher {
            template: template.to_string(),
            reason: e.to_string(),
        })?;
        if words.is_empty() {
            return Err(ConfigError::InvalidLauncher {
                template: template.to_string(),
                reason: "empty command".to_string(),
            });
        }

        let np_str = np.to_string();
        let argv = words
            .into_iter()
            .map(|w| w.replace(NP_PLACEHOLDER, &np_str))
            .collect();

        Ok(Self {
            argv,
            np,
            xterm,
            env: Vec::new(),
        })
    }

    /// Builds a launcher from the resolved invocation settings.
    pub fn from_spec(spec: &LauncherSpec) -> Result<Self, ConfigError> {
        Ok(Self::from_template(&spec.template, spec.np, spec.xterm)?.with_env(spec.env.clone()))
    }

    /// Extra environment for the launcher, applied after [`OMPI_ENV`].
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// The launcher executable, e.g. `mpirun`.
    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn np(&self) -> usize {
        self.np
    }

    /// Wraps a per-rank command: `<launcher> [xterm -hold -e] <inner argv>`.
    ///
    /// The inner command's environment and working directory carry over to
    /// the launcher, which passes them on to every rank.
    pub fn wrap(&self, inner: &Command) -> Command {
        let mut cmd = Command::new(&self.argv[0]).args(self.argv[1..].iter().cloned());
        if self.xterm {
            cmd = cmd.args(["xterm", "-hold", "-e"]);
        }
        cmd = cmd
            .args(inner.argv())
            .envs(inner.env.iter().cloned())
            .envs(OMPI_ENV.iter().copied())
            .envs(self.env.iter().cloned());

        match &inner.working_dir {
            Some(dir) => cmd.working_dir(dir),
            None => cmd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template() {
        let launcher = Launcher::from_template("mpirun -n {np}", 4, false).unwrap();
        let cmd = launcher.wrap(&Command::new("python").arg("-m").arg("pytest"));
        assert_eq!(cmd.argv(), vec!["mpirun", "-n", "4", "python", "-m", "pytest"]);
        assert_eq!(launcher.program(), "mpirun");
    }

    #[test]
    fn test_placeholder_inside_word() {
        let launcher = Launcher::from_template("srun --ntasks={np}", 3, false).unwrap();
        let cmd = launcher.wrap(&Command::new("x"));
        assert_eq!(cmd.args[0], "--ntasks=3");
    }

    #[test]
    fn test_xterm_wrapping() {
        let launcher = Launcher::from_template("mpirun -n {np}", 2, true).unwrap();
        let cmd = launcher.wrap(&Command::new("python"));
        assert_eq!(
            cmd.argv(),
            vec!["mpirun", "-n", "2", "xterm", "-hold", "-e", "python"]
        );
    }

    #[test]
    fn test_env_and_working_dir_carry_over() {
        let launcher = Launcher::from_template("mpirun -n {np}", 2, false)
            .unwrap()
            .with_env(vec![("OMPI_MCA_mpi_yield_when_idle".into(), "0".into())]);
        let inner = Command::new("python")
            .env("PYTHONPATH", "/site")
            .working_dir("/w");

        let cmd = launcher.wrap(&inner);
        assert_eq!(cmd.env_value("PYTHONPATH"), Some("/site"));
        assert_eq!(cmd.env_value("OMPI_MCA_rmaps_base_oversubscribe"), Some("1"));
        assert_eq!(cmd.env_value("OMPI_MCA_mpi_yield_when_idle"), Some("0"));
        assert_eq!(cmd.working_dir.as_deref(), Some(std::path::Path::new("/w")));
    }

    #[test]
    fn test_zero_ranks() {
        assert!(matches!(
            Launcher::from_template("mpirun -n {np}", 0, false),
            Err(ConfigError::ZeroRanks)
        ));
    }

    #[test]
    fn test_bad_templates() {
        assert!(matches!(
            Launcher::from_template("", 2, false),
            Err(ConfigError::InvalidLauncher { .. })
        ));
        assert!(matches!(
            Launcher::from_template("mpirun 'unterminated", 2, false),
            Err(ConfigError::InvalidLauncher { .. })
        ));
    }
}
