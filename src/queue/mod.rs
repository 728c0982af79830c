//! Bounded atomic queue: two slot-layout variants sharing one index-remapped
//! ring-buffer skeleton, parameterized at compile time over producer/consumer
//! cardinality and two throughput knobs, preferring `const`/type-level
//! selection over runtime configuration objects.

mod sentinel;
mod state;

pub use sentinel::{Sentinel, SentinelQueue};
pub use state::StateQueue;

use core::fmt;

mod private {
    pub trait Sealed {}
}

/// Selects how many producers/consumers a queue's `push`/`pop` path must
/// tolerate. `Spsc` drops the CAS retry loop on the index advance in favor
/// of a plain load/store, since only one thread ever touches each side.
pub trait QueueMode: private::Sealed {
    #[doc(hidden)]
    const IS_SPSC: bool;
}

/// Many producers, many consumers.
pub struct Mpmc;
/// Exactly one producer and one consumer. Enforcing that there really is
/// only one of each is the caller's responsibility, not the type's;
/// violating it is a logic error, not memory-unsafe, since both sides still
/// only ever touch slots through atomics.
pub struct Spsc;

impl private::Sealed for Mpmc {}
impl private::Sealed for Spsc {}
impl QueueMode for Mpmc {
    const IS_SPSC: bool = false;
}
impl QueueMode for Spsc {
    const IS_SPSC: bool = true;
}

/// The element rejected by a full queue, handed back to the caller.
pub struct TryPushError<T>(pub T);

impl<T> fmt::Debug for TryPushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TryPushError(..)")
    }
}

impl<T> fmt::Display for TryPushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue is full")
    }
}

impl<T> std::error::Error for TryPushError<T> {}

/// Returned by `try_pop` when the queue has nothing to hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryPopError;

impl fmt::Display for TryPopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue is empty")
    }
}

impl std::error::Error for TryPopError {}

/// Rounds `requested` up to a power of two (minimum 2), then remaps slot
/// indices by swapping the index's low bit into a cache-line-sized stride
/// so consecutive `head`/`tail` values land on different cache lines
/// instead of thrashing the same one.
pub(crate) fn capacity_for(requested: usize) -> usize {
    requested.max(2).next_power_of_two()
}

/// Cache-line-sized slot stride used by the remap below, keeping consecutive
/// slots on separate cache lines the same way a `repr(align(64))` bucket
/// table would.
const CACHE_LINE_SLOTS: usize = 8;

#[inline]
pub(crate) fn remap_index(index: usize, capacity: usize) -> usize {
    if capacity <= CACHE_LINE_SLOTS {
        return index & (capacity - 1);
    }
    let i = index & (capacity - 1);
    let lines = capacity / CACHE_LINE_SLOTS;
    let line = i % lines;
    let slot_in_line = i / lines;
    line * CACHE_LINE_SLOTS + slot_in_line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        assert_eq!(capacity_for(5), 8);
        assert_eq!(capacity_for(8), 8);
        assert_eq!(capacity_for(1), 2);
    }

    #[test]
    fn remap_is_a_bijection_over_the_capacity() {
        let capacity = 32;
        let mut seen = vec![false; capacity];
        for i in 0..capacity {
            let r = remap_index(i, capacity);
            assert!(!seen[r], "index {i} remapped to already-used slot {r}");
            seen[r] = true;
        }
    }
}
