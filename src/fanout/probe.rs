//! Detecting whether the distributed runtime can be used.

use async_trait::async_trait;
use tracing::debug;

use super::launcher::Launcher;
use crate::process::{Command, Output, ProcessRunner};

/// Whether multi-rank runs are possible on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    /// Unavailable, with a human readable reason.
    Unavailable(String),
}

/// Checks for a usable launcher and MPI bindings.
#[async_trait]
pub trait RuntimeProbe: Send + Sync {
    async fn check(&self, launcher: &Launcher, python: &str) -> Availability;
}

/// Probes the real system: the launcher must be on `PATH` and the
/// interpreter must be able to import `mpi4py`.
pub struct SystemProbe<'a, R> {
    runner: &'a R,
}

impl<'a, R: ProcessRunner> SystemProbe<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl<R: ProcessRunner> RuntimeProbe for SystemProbe<'_, R> {
    async fn check(&self, launcher: &Launcher, python: &str) -> Availability {
        if let Err(e) = which::which(launcher.program()) {
            return Availability::Unavailable(format!(
                "launcher '{}' not found: {}",
                launcher.program(),
                e
            ));
        }

        let cmd = Command::new(python).args(["-c", "import mpi4py"]);
        match self.runner.run(&cmd, &Output::Capture).await {
            Ok(result) if result.success() => Availability::Available,
            Ok(result) => {
                debug!("mpi4py import failed: {}", result.stderr.trim());
                Availability::Unavailable(format!("'{}' cannot import mpi4py", python))
            }
            Err(e) => Availability::Unavailable(e.to_string()),
        }
    }
}

/// A probe with a fixed answer.
#[cfg(test)]
pub(crate) struct FixedProbe(pub Availability);

#[cfg(test)]
#[async_trait]
impl RuntimeProbe for FixedProbe {
    async fn check(&self, _launcher: &Launcher, _python: &str) -> Availability {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::RecordingRunner;

    #[tokio::test]
    async fn test_missing_launcher() {
        let runner = RecordingRunner::exiting(0);
        let launcher =
            Launcher::from_template("definitely-not-a-launcher-xyz -n {np}", 2, false).unwrap();

        let result = SystemProbe::new(&runner).check(&launcher, "python").await;
        assert!(matches!(result, Availability::Unavailable(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_import_failure() {
        let runner = RecordingRunner::exiting(1);
        let launcher = Launcher::from_template("sh", 2, false).unwrap();

        let result = SystemProbe::new(&runner).check(&launcher, "python3").await;
        assert_eq!(
            result,
            Availability::Unavailable("'python3' cannot import mpi4py".into())
        );
        assert_eq!(runner.commands()[0].args, vec!["-c", "import mpi4py"]);
    }

    #[tokio::test]
    async fn test_available() {
        let runner = RecordingRunner::exiting(0);
        let launcher = Launcher::from_template("sh", 2, false).unwrap();

        let result = SystemProbe::new(&runner).check(&launcher, "python").await;
        assert_eq!(result, Availability::Available);
    }
}
