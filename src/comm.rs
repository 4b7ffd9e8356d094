//! Communicator-size parametrization for distributed tests.
//!
//! Test authors declare which communicator sizes a test needs; every rank of
//! the launched world runs each case, and only the ranks belonging to the
//! sub-communicator execute the body. Sizes larger than the world are
//! skipped, never failed.
//!
//! ```text
//! world (4 ranks)       create_comm(2)
//! ┌──┬──┬──┬──┐         ┌──┬──┐ ┌──┬──┐
//! │0 │1 │2 │3 │   ──►   │0 │1 │ │2 │3 │
//! └──┴──┴──┴──┘         └──┴──┘ └──┴──┘
//!                       colour 0 colour 1 (idle)
//! ```
//!
//! The [`Communicator`] trait is the only seam to the real runtime.
//! [`LocalWorld`] implements it with threads so the whole surface can be
//! exercised in-process.

pub mod cache;
pub mod collective;
pub mod local;
pub mod param;

use std::sync::Arc;

pub use cache::{CommCache, WorldTooSmall};
pub use collective::{CollectiveError, collective, rotate};
pub use local::LocalWorld;
pub use param::{CaseOutcome, CaseReport, CommFixture, FixtureComm, MissingPolicy, MissingWorld, MpiTest, MpiTestTable};

/// A group of ranks that can coordinate.
///
/// Every method except [`rank`](Communicator::rank) and
/// [`size`](Communicator::size) is collective: all ranks of the
/// communicator must call it, in the same order.
pub trait Communicator: Send + Sync {
    /// This rank's index, `0..size`.
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Exchanges one value per rank; the result is indexed by rank.
    fn allgather(&self, value: String) -> Vec<String>;

    /// Blocks until every rank has arrived.
    fn barrier(&self) {
        self.allgather(String::new());
    }

    /// Splits into sub-communicators of the ranks passing the same `color`,
    /// ordered by their rank in this communicator.
    fn split(&self, color: usize) -> Arc<dyn Communicator>;
}

/// The single-rank communicator containing only the calling rank.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfComm;

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn allgather(&self, value: String) -> Vec<String> {
        vec![value]
    }

    fn split(&self, _color: usize) -> Arc<dyn Communicator> {
        Arc::new(SelfComm)
    }
}
