//! Size-scoped communicators, created once per size.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::{Communicator, SelfComm};

/// A communicator larger than the world was requested.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("world is too small: {requested} ranks requested, {available} available")]
pub struct WorldTooSmall {
    pub requested: usize,
    pub available: usize,
}

/// Caches one communicator per requested size.
///
/// Colour 0 marks the ranks that belong to the communicator (the first
/// `size` ranks of the world); colour 1 marks the idle rest.
pub struct CommCache {
    world: Arc<dyn Communicator>,
    comms: Mutex<HashMap<usize, Arc<dyn Communicator>>>,
}

impl CommCache {
    pub fn new(world: Arc<dyn Communicator>) -> Self {
        Self {
            world,
            comms: Mutex::new(HashMap::new()),
        }
    }

    pub fn world(&self) -> &Arc<dyn Communicator> {
        &self.world
    }

    /// Returns the communicator of `size` ranks and this rank's colour.
    ///
    /// Collective over the world the first time a size is requested.
    ///
    /// # Errors
    ///
    /// [`WorldTooSmall`] when `size` exceeds the world size. Every rank gets
    /// the same answer, so callers can skip consistently.
    pub fn create_comm(&self, size: usize) -> Result<(Arc<dyn Communicator>, usize), WorldTooSmall> {
        let available = self.world.size();
        if size > available {
            return Err(WorldTooSmall {
                requested: size,
                available,
            });
        }

        let color = if self.world.rank() < size { 0 } else { 1 };

        let mut comms = self.comms.lock().unwrap_or_else(PoisonError::into_inner);
        let comm = comms
            .entry(size)
            .or_insert_with(|| {
                if size == available {
                    self.world.clone()
                } else if size == 1 {
                    Arc::new(SelfComm)
                } else {
                    self.world.split(color)
                }
            })
            .clone();

        Ok((comm, color))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalWorld;

    #[test]
    fn test_too_small() {
        let results = LocalWorld::run(2, |world| {
            let cache = CommCache::new(world);
            cache.create_comm(3).map(|_| ()).unwrap_err()
        });
        assert_eq!(
            results[1],
            WorldTooSmall {
                requested: 3,
                available: 2
            }
        );
    }

    #[test]
    fn test_sizes_and_colors() {
        let results = LocalWorld::run(4, |world| {
            let cache = CommCache::new(world);
            [1, 2, 3, 4]
                .into_iter()
                .map(|size| {
                    let (comm, color) = cache.create_comm(size).unwrap();
                    (comm.size(), color)
                })
                .collect::<Vec<_>>()
        });

        // rank 0 is in every communicator
        assert_eq!(results[0], vec![(1, 0), (2, 0), (3, 0), (4, 0)]);
        // rank 3 is only in the full world; for size 2 it is in the idle half
        assert_eq!(results[3], vec![(1, 1), (2, 1), (1, 1), (4, 0)]);
    }

    #[test]
    fn test_cached_per_size() {
        let results = LocalWorld::run(3, |world| {
            let cache = CommCache::new(world);
            let (a, _) = cache.create_comm(2).unwrap();
            let (b, _) = cache.create_comm(2).unwrap();
            Arc::ptr_eq(&a, &b)
        });
        assert!(results.into_iter().all(|same| same));
    }

    #[test]
    fn test_full_size_reuses_world() {
        let results = LocalWorld::run(2, |world| {
            let cache = CommCache::new(world.clone());
            let (comm, _) = cache.create_comm(2).unwrap();
            Arc::ptr_eq(&comm, &world)
        });
        assert_eq!(results, vec![true, true]);
    }
}
