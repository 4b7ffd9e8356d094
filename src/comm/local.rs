//! A thread-backed world for exercising communicator code in-process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use super::Communicator;

/// Rendezvous point shared by the members of one communicator.
struct Exchange {
    size: usize,
    round: Mutex<Round>,
    done: Condvar,
    /// Sub-exchanges created by `split`, keyed by (split number, colour).
    children: Mutex<HashMap<(u64, usize), Arc<Exchange>>>,
}

struct Round {
    generation: u64,
    slots: Vec<Option<String>>,
    arrived: usize,
    last: Arc<Vec<String>>,
}

impl Exchange {
    fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            size,
            round: Mutex::new(Round {
                generation: 0,
                slots: vec![None; size],
                arrived: 0,
                last: Arc::new(Vec::new()),
            }),
            done: Condvar::new(),
            children: Mutex::new(HashMap::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Round> {
        self.round.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allgather(&self, rank: usize, value: String) -> Vec<String> {
        let mut round = self.lock();
        let generation = round.generation;
        round.slots[rank] = Some(value);
        round.arrived += 1;

        if round.arrived == self.size {
            let values = round
                .slots
                .iter_mut()
                .map(|slot| slot.take().unwrap_or_default())
                .collect();
            round.last = Arc::new(values);
            round.arrived = 0;
            round.generation += 1;
            self.done.notify_all();
        } else {
            // the round cannot complete again until this rank takes part,
            // so `last` still holds our result when we wake
            while round.generation == generation {
                round = self
                    .done
                    .wait(round)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        round.last.as_ref().clone()
    }

    fn child(&self, key: (u64, usize), size: usize) -> Arc<Exchange> {
        let mut children = self
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        children
            .entry(key)
            .or_insert_with(|| Exchange::new(size))
            .clone()
    }
}

/// One rank's handle on a [`LocalWorld`] communicator.
struct LocalComm {
    rank: usize,
    exchange: Arc<Exchange>,
    splits: AtomicU64,
}

impl LocalComm {
    fn new(rank: usize, exchange: Arc<Exchange>) -> Self {
        Self {
            rank,
            exchange,
            splits: AtomicU64::new(0),
        }
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.exchange.size
    }

    fn allgather(&self, value: String) -> Vec<String> {
        self.exchange.allgather(self.rank, value)
    }

    fn split(&self, color: usize) -> Arc<dyn Communicator> {
        // every member calls split in the same order, so the counters agree
        let split_no = self.splits.fetch_add(1, Ordering::SeqCst);
        let colors = self.allgather(color.to_string());
        let mine = color.to_string();

        let members: Vec<usize> = colors
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == mine)
            .map(|(rank, _)| rank)
            .collect();
        let new_rank = members
            .iter()
            .position(|&r| r == self.rank)
            .unwrap_or_default();

        let exchange = self.exchange.child((split_no, color), members.len());
        Arc::new(LocalComm::new(new_rank, exchange))
    }
}

/// An in-process world of `n` ranks, one thread each.
pub struct LocalWorld;

impl LocalWorld {
    /// Runs `f` on `n` threads, each with its own rank of a fresh world, and
    /// returns the results in rank order.
    ///
    /// Collective calls must be matched on every rank, exactly as with a
    /// real runtime; a mismatch deadlocks.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from any rank.
    pub fn run<T, F>(n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(Arc<dyn Communicator>) -> T + Send + Sync,
    {
        let exchange = Exchange::new(n);
        let f = &f;

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..n)
                .map(|rank| {
                    let comm: Arc<dyn Communicator> =
                        Arc::new(LocalComm::new(rank, exchange.clone()));
                    scope.spawn(move || f(comm))
                })
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
    }
}
