//! Table-driven communicator-size parametrization.
//!
//! ```
//! use runtests::comm::{CaseOutcome, CommCache, LocalWorld, MpiTestTable};
//!
//! let mut table = MpiTestTable::new();
//! table.register("test_sum", [2, 1, 8]);
//!
//! let reports = LocalWorld::run(2, |world| {
//!     let cache = CommCache::new(world);
//!     table.run_all(&cache, |_name, comm| {
//!         let total: usize = comm
//!             .allgather(comm.rank().to_string())
//!             .iter()
//!             .map(|v| v.parse::<usize>().unwrap())
//!             .sum();
//!         anyhow::ensure!(total == (0..comm.size()).sum::<usize>());
//!         Ok(())
//!     })
//! });
//!
//! // sizes run in ascending order; size 8 does not fit in the world
//! let rank0 = &reports[0];
//! assert_eq!(rank0[0].case_id(), "test_sum[1]");
//! assert!(matches!(rank0[2].outcome, CaseOutcome::Skipped(_)));
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::collective::panic_message;
use super::{CommCache, Communicator};

/// How a case ended on one rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseOutcome {
    Passed,
    Failed(String),
    Skipped(String),
    /// This rank is not part of the case's communicator.
    Idle,
}

/// A test run with one communicator per listed size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpiTest {
    name: String,
    sizes: Vec<usize>,
}

impl MpiTest {
    /// Sizes are sorted and deduplicated.
    pub fn new(name: impl Into<String>, sizes: impl IntoIterator<Item = usize>) -> Self {
        let mut sizes: Vec<usize> = sizes.into_iter().collect();
        sizes.sort_unstable();
        sizes.dedup();
        Self {
            name: name.into(),
            sizes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Runs the case for `size` on this rank. Collective over the world.
    ///
    /// All ranks must be running the same test; the body runs only on the
    /// ranks of the `size` communicator and every rank leaves through a
    /// world barrier, whether the body failed or not. A panic in the body
    /// (a failed `assert!`) is reported as [`CaseOutcome::Failed`].
    pub fn run<F>(&self, cache: &CommCache, size: usize, body: F) -> CaseOutcome
    where
        F: FnOnce(&dyn Communicator) -> anyhow::Result<()>,
    {
        let world = cache.world();

        let names = world.allgather(self.name.clone());
        if names.iter().any(|n| *n != self.name) {
            return CaseOutcome::Failed(format!("function calls mismatched: {:?}", names));
        }

        let (comm, color) = match cache.create_comm(size) {
            Ok(pair) => pair,
            Err(_) => {
                return CaseOutcome::Skipped(format!(
                    "Test skipped because world is too small. Include the test with mpirun -n {}",
                    size
                ));
            }
        };

        let outcome = if color == 0 {
            match panic::catch_unwind(AssertUnwindSafe(|| body(comm.as_ref()))) {
                Ok(Ok(())) => CaseOutcome::Passed,
                Ok(Err(e)) => CaseOutcome::Failed(format!("{:#}", e)),
                Err(payload) => CaseOutcome::Failed(panic_message(payload.as_ref())),
            }
        } else {
            CaseOutcome::Idle
        };

        world.barrier();
        outcome
    }
}

/// Result of one (test, size) case on one rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseReport {
    pub name: String,
    pub size: usize,
    pub outcome: CaseOutcome,
}

impl CaseReport {
    /// pytest-style id, e.g. `test_io[4]`.
    pub fn case_id(&self) -> String {
        format!("{}[{}]", self.name, self.size)
    }
}

/// Registered tests, run in registration order.
#[derive(Debug, Clone, Default)]
pub struct MpiTestTable {
    tests: Vec<MpiTest>,
}

impl MpiTestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        sizes: impl IntoIterator<Item = usize>,
    ) -> &mut Self {
        self.tests.push(MpiTest::new(name, sizes));
        self
    }

    pub fn tests(&self) -> &[MpiTest] {
        &self.tests
    }

    /// Runs every case; `body` receives the test name and the communicator.
    pub fn run_all<F>(&self, cache: &CommCache, mut body: F) -> Vec<CaseReport>
    where
        F: FnMut(&str, &dyn Communicator) -> anyhow::Result<()>,
    {
        let mut reports = Vec::new();
        for test in &self.tests {
            for &size in test.sizes() {
                let outcome = test.run(cache, size, |comm| body(test.name(), comm));
                reports.push(CaseReport {
                    name: test.name().to_string(),
                    size,
                    outcome,
                });
            }
        }
        reports
    }
}

/// What to do when no distributed world is available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingPolicy {
    #[default]
    Fail,
    /// Hand out no communicator; the test handles `None` itself.
    Ignore,
}

/// No world was available and the policy is [`MissingPolicy::Fail`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no distributed runtime available; run the tests under an MPI launcher")]
pub struct MissingWorld;

/// The value a [`CommFixture`] yields for one size.
#[derive(Clone)]
pub enum FixtureComm {
    Comm(Arc<dyn Communicator>),
    Skip(String),
}

impl std::fmt::Debug for FixtureComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FixtureComm::Comm(c) => write!(f, "Comm(rank {} of {})", c.rank(), c.size()),
            FixtureComm::Skip(reason) => f.debug_tuple("Skip").field(reason).finish(),
        }
    }
}

/// Fixture-style communicator factory, parametrized over sizes.
///
/// Unlike [`MpiTest`] it only hands out the communicator; the test body and
/// any other fixtures stay under the caller's control.
pub struct CommFixture {
    cache: Option<CommCache>,
    sizes: Vec<usize>,
    policy: MissingPolicy,
}

impl CommFixture {
    pub fn new(
        world: Option<Arc<dyn Communicator>>,
        sizes: impl IntoIterator<Item = usize>,
        policy: MissingPolicy,
    ) -> Self {
        let mut sizes: Vec<usize> = sizes.into_iter().collect();
        sizes.sort_unstable();
        sizes.dedup();
        Self {
            cache: world.map(CommCache::new),
            sizes,
            policy,
        }
    }

    /// The sizes this fixture is parametrized over.
    pub fn params(&self) -> &[usize] {
        &self.sizes
    }

    /// The communicator for `size`, after a world barrier.
    ///
    /// Ranks outside the communicator, and every rank when the world is too
    /// small, get [`FixtureComm::Skip`].
    ///
    /// # Errors
    ///
    /// [`MissingWorld`] without a world under [`MissingPolicy::Fail`]; under
    /// [`MissingPolicy::Ignore`] the fixture yields `Ok(None)` instead.
    pub fn get(&self, size: usize) -> Result<Option<FixtureComm>, MissingWorld> {
        let Some(cache) = &self.cache else {
            return match self.policy {
                MissingPolicy::Fail => Err(MissingWorld),
                MissingPolicy::Ignore => Ok(None),
            };
        };

        cache.world().barrier();

        let value = match cache.create_comm(size) {
            Ok((comm, 0)) => FixtureComm::Comm(comm),
            Ok(_) | Err(_) => FixtureComm::Skip(format!("Not using communicator {}", size)),
        };
        Ok(Some(value))
    }
}
