//! Wait-free reference counter: a 32-bit counter with the top two bits
//! reserved as a *zero* flag and a *zero-pending* flag, giving
//! `increment_if_nonzero` a wait-free way to detect "this object is already
//! gone" instead of racing a plain `fetch_add` that would resurrect it.

use crate::loom::{AtomicU32, Ordering::*};

const ZERO_FLAG: u32 = 1 << 31;
const PENDING_FLAG: u32 = 1 << 30;
const COUNT_MASK: u32 = PENDING_FLAG - 1;

/// Maximum representable live count.
pub(crate) const MAX_COUNT: u32 = COUNT_MASK;

/// A wait-free counter that can only ever go from nonzero to zero once.
/// Used for the strong reference count of an [`crate::asp::ControlBlock`].
pub(crate) struct WaitFreeCounter(AtomicU32);

impl WaitFreeCounter {
    pub(crate) fn new(initial: u32) -> Self {
        debug_assert!(initial > 0 && initial <= MAX_COUNT);
        Self(AtomicU32::new(initial))
    }

    /// Wait-free load: never retries against a competing `decrement`. If the
    /// low bits observe zero, marks the counter zero-pending (benign if it
    /// races another observer doing the same) and reports zero immediately.
    pub(crate) fn load(&self, order: crate::loom::Ordering) -> u32 {
        let raw = self.0.load(order);
        if raw & ZERO_FLAG != 0 {
            return 0;
        }
        let count = raw & COUNT_MASK;
        if count == 0 {
            // Best-effort: mark pending so a concurrent `decrement` doesn't
            // have to rediscover this from scratch. Ignoring the result is
            // fine, this is advisory bookkeeping, not the source of truth.
            let _ = self.0.compare_exchange(raw, raw | PENDING_FLAG, AcqRel, Relaxed);
            return 0;
        }
        count
    }

    /// Adds `n` to the counter unconditionally. Only valid when the caller
    /// already holds proof the counter is live (e.g. cloning a handle that
    /// is itself one of the live references), so the zero-flag check that
    /// [`Self::increment_if_nonzero`] needs is unnecessary.
    pub(crate) fn increment_known_live(&self, n: u32) {
        let prev = self.0.fetch_add(n, AcqRel);
        debug_assert!(prev & ZERO_FLAG == 0, "incremented an already-zeroed counter");
    }

    /// Attempts to add `n` to the counter, wait-free, returning `false`
    /// without modifying anything observable if the counter has already
    /// reached zero. This is what makes [`crate::asp`] loads wait-free: no
    /// retry loop is needed to decide whether an increment "took."
    pub(crate) fn increment_if_nonzero(&self, n: u32) -> bool {
        let prev = self.0.fetch_add(n, AcqRel);
        if prev & ZERO_FLAG != 0 {
            // Lost the race: the object was already disposed. Undo the
            // increment so the counter doesn't drift.
            self.0.fetch_sub(n, AcqRel);
            return false;
        }
        true
    }

    /// Subtracts `n`. Returns `true` exactly once: for the call whose
    /// subtraction first brought the counter to zero. That caller, and only
    /// that caller, must run disposal.
    pub(crate) fn decrement(&self, n: u32) -> bool {
        let prev = self.0.fetch_sub(n, AcqRel);
        debug_assert!(prev & COUNT_MASK >= n, "reference count underflow");
        if (prev & COUNT_MASK) != n {
            return false;
        }
        // This call observed the transition to zero. Try to claim it by
        // setting the zero flag; a concurrent `load` may have set the
        // pending flag first, which is fine, we just fold it in.
        loop {
            let current = self.0.load(Acquire);
            match self
                .0
                .compare_exchange(current, ZERO_FLAG, AcqRel, Acquire)
            {
                Ok(_) => return true,
                Err(observed) => {
                    if observed & ZERO_FLAG != 0 {
                        // Someone else already finalized it; since only the
                        // subtraction that hits zero can run this branch,
                        // and that's us, this should not happen.
                        return false;
                    }
                    // Only the pending flag could have changed underneath
                    // us (no other decrement could be in flight: count was
                    // already at zero with respect to live holders). Retry
                    // the CAS against the fresh value.
                }
            }
        }
    }
}
