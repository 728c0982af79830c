//! Barrier: cooperating threads increment a counter, a coordinating thread
//! spins until the expected count is reached then resets it. A spin-based
//! coordinator, not `std::sync::Barrier`.

use crate::loom::{spin_loop, AtomicUsize, Ordering::*};

/// A reusable rendezvous point for a fixed number of participant threads.
pub struct Barrier {
    expected: usize,
    arrived: AtomicUsize,
    generation: AtomicUsize,
}

impl Barrier {
    /// Creates a barrier for `expected` participants.
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            arrived: AtomicUsize::new(0),
            generation: AtomicUsize::new(0),
        }
    }

    /// Arrives at the barrier and blocks until every other participant has
    /// too. Exactly one caller per generation observes
    /// [`BarrierWaitResult::is_leader`] return `true`.
    pub fn wait(&self) -> BarrierWaitResult {
        let generation = self.generation.load(Acquire);
        let arrived = self.arrived.fetch_add(1, AcqRel) + 1;

        if arrived == self.expected {
            self.arrived.store(0, Release);
            self.generation.store(generation.wrapping_add(1), Release);
            return BarrierWaitResult { is_leader: true };
        }

        while self.generation.load(Acquire) == generation {
            spin_loop();
        }
        BarrierWaitResult { is_leader: false }
    }
}

/// Returned by [`Barrier::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    is_leader: bool,
}

impl BarrierWaitResult {
    /// Whether this call was the one that released the barrier (arbitrary
    /// among the participants, but exactly one per generation).
    pub fn is_leader(&self) -> bool {
        self.is_leader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize as StdAtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn exactly_one_leader_per_generation() {
        let barrier = Arc::new(Barrier::new(8));
        let leaders = Arc::new(StdAtomicUsize::new(0));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let barrier = barrier.clone();
                let leaders = leaders.clone();
                thread::spawn(move || {
                    let result = barrier.wait();
                    if result.is_leader() {
                        leaders.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(leaders.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn barrier_is_reusable_across_generations() {
        let barrier = Arc::new(Barrier::new(4));
        for _ in 0..5 {
            let threads: Vec<_> = (0..4)
                .map(|_| {
                    let barrier = barrier.clone();
                    thread::spawn(move || barrier.wait())
                })
                .collect();
            let leaders: usize = threads
                .into_iter()
                .map(|t| t.join().unwrap().is_leader() as usize)
                .sum();
            assert_eq!(leaders, 1);
        }
    }
}
