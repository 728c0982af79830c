//! Seqlock: an even sequence number means quiescent, odd means a writer is
//! mid-update; readers retry until they bracket the payload copy between two
//! equal, even sequence reads.

use crate::loom::{spin_loop, AtomicUsize, Ordering::*};
// Plain `core::cell::UnsafeCell`: see `spinlock`'s equivalent note. Reads
// outside the bracketing sequence check are a documented, intentional race
// resolved by the retry loop, not something loom's cell tracking models.
use core::cell::UnsafeCell;

/// A reader-optimized lock for `Copy` payloads: writers never block, and
/// readers only retry (never block) when they race a writer.
#[repr(align(64))]
pub struct Seqlock<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send + Copy> Send for Seqlock<T> {}
unsafe impl<T: Send + Copy> Sync for Seqlock<T> {}

impl<T: Copy> Seqlock<T> {
    /// Creates a seqlock with an initial, quiescent `value`.
    pub const fn new(value: T) -> Self {
        Self {
            sequence: AtomicUsize::new(0),
            value: UnsafeCell::new(value),
        }
    }

    /// Replaces the payload. Excludes concurrent writers from each other
    /// only by convention (a single writer per seqlock); concurrent readers
    /// are always safe.
    pub fn write(&self, value: T) {
        let seq = self.sequence.load(Relaxed);
        self.sequence.store(seq.wrapping_add(1), Release);
        // SAFETY: the odd sequence number published above tells readers to
        // retry rather than trust this write in progress.
        unsafe { self.value.get().write(value) };
        self.sequence.store(seq.wrapping_add(2), Release);
    }

    /// Reads a consistent snapshot of the payload, retrying if a writer was
    /// observed mid-update.
    pub fn read(&self) -> T {
        loop {
            let before = self.sequence.load(Acquire);
            if before & 1 != 0 {
                spin_loop();
                continue;
            }
            // SAFETY: a stable, even sequence number observed both before
            // and after this read guarantees no writer's half-written
            // value was exposed.
            let value = unsafe { self.value.get().read() };
            let after = self.sequence.load(Acquire);
            if before == after {
                return value;
            }
            spin_loop();
        }
    }
}
