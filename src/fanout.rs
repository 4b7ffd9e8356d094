//! Deciding how tests are distributed across processes.
//!
//! | Request | Runtime available | Mode |
//! |---------|-------------------|------|
//! | `--no-mpi` / `enabled = false` | any | Serial |
//! | `--single` | any | SingleRank |
//! | `--mpirun` / `--np` / `--xterm` / `enabled = true` | yes | MultiRank |
//! | `--mpirun` / `--np` / `--xterm` / `enabled = true` | no | error |
//! | nothing | yes | MultiRank |
//! | nothing | no | Serial |
//!
//! Every rank runs pytest with `-x` and the bundled plugin aborts the whole
//! world on the first failing rank, so the launcher's exit status is the
//! run's status. Ranks are not aggregated individually.

pub mod launcher;
pub mod probe;

use tracing::info;

pub use launcher::Launcher;
pub use probe::{Availability, RuntimeProbe, SystemProbe};

use crate::environment::TestEnvironment;
use crate::invocation::{ConfigError, InvocationSpec, ModeRequest};
use crate::invoker::TestInvoker;
use crate::process::Command;

/// Resolved distribution mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Plain pytest.
    Serial,
    /// One MPI rank without a launcher.
    SingleRank,
    /// One pytest per rank under a launcher.
    MultiRank(Launcher),
}

impl Mode {
    /// Number of ranks the tests see.
    pub fn world_size(&self) -> usize {
        match self {
            Mode::Serial | Mode::SingleRank => 1,
            Mode::MultiRank(launcher) => launcher.np(),
        }
    }

    /// The command that runs the tests in this mode.
    pub fn command(&self, invoker: &TestInvoker<'_>, env: &TestEnvironment) -> Command {
        match self {
            Mode::Serial => invoker.pytest_command(env, false),
            Mode::SingleRank => invoker.pytest_command(env, true),
            Mode::MultiRank(launcher) => launcher.wrap(&invoker.pytest_command(env, true)),
        }
    }
}

/// Resolves the requested mode against what the system offers.
pub struct FanOut<'a, P> {
    spec: &'a InvocationSpec,
    probe: &'a P,
}

impl<'a, P: RuntimeProbe> FanOut<'a, P> {
    pub fn new(spec: &'a InvocationSpec, probe: &'a P) -> Self {
        Self { spec, probe }
    }

    /// # Errors
    ///
    /// [`ConfigError::RuntimeUnavailable`] when multi-rank execution was
    /// explicitly requested but cannot happen, and any launcher template
    /// error. There is no silent fallback to serial mode in that case.
    pub async fn resolve(&self) -> Result<Mode, ConfigError> {
        match self.spec.mode {
            ModeRequest::Serial => Ok(Mode::Serial),
            ModeRequest::SingleRank => Ok(Mode::SingleRank),
            ModeRequest::MultiRank => {
                let launcher = Launcher::from_spec(&self.spec.launcher)?;
                match self.probe.check(&launcher, &self.spec.python).await {
                    Availability::Available => Ok(Mode::MultiRank(launcher)),
                    Availability::Unavailable(reason) => {
                        Err(ConfigError::RuntimeUnavailable { reason })
                    }
                }
            }
            ModeRequest::Auto => {
                let launcher = Launcher::from_spec(&self.spec.launcher)?;
                match self.probe.check(&launcher, &self.spec.python).await {
                    Availability::Available => Ok(Mode::MultiRank(launcher)),
                    Availability::Unavailable(reason) => {
                        info!("Running without MPI ({})", reason);
                        Ok(Mode::Serial)
                    }
                }
            }
        }
    }
}
