//! Hazard-pointer reclamation engine: defers destruction of control blocks
//! until no reader holds a hazard pointer protecting them. Each thread gets
//! exactly one protected-pointer slot per [`Domain`], which is all
//! [`crate::asp::AtomicSharedPtr`] needs and keeps scanning and worst-case
//! unreclaimed memory bounded by `O(threads^2)`.

mod slot;

use crate::fence::{heavy_fence, light_fence};
use crate::loom::{AtomicBool, Ordering::*};
use slot::{RetiredPtr, SlotList};

use std::cell::RefCell;
use std::sync::OnceLock;

/// Retirement batches are reclaimed once a slot's own retire count since
/// the last cleanup reaches this many.
const AMORTIZED_THRESHOLD: u32 = 2000;

/// Deamortized mode processes this many candidates per `retire` call. A
/// tuning knob, not a correctness parameter.
const DEAMORTIZED_BATCH: usize = 2;

/// A reclamation domain: an independent hazard-slot list plus retirement
/// policy. Most programs only ever need [`Domain::global`]; a private
/// domain is useful for isolating reclamation scope (tests, or a component
/// that wants its garbage never to interleave with another's scans).
///
/// All operations take `&'static self`: slots outlive the thread that
/// claimed them for the rest of the process by design, so a `Domain` that
/// could be dropped while a thread still references one of its slots would
/// be unsound. Construct a private domain with [`Domain::leaked`].
pub struct Domain {
    slots: SlotList,
    deamortized: AtomicBool,
}

impl Domain {
    #[cfg(not(loom))]
    const fn new() -> Self {
        Self {
            slots: SlotList::new(),
            deamortized: AtomicBool::new(false),
        }
    }

    #[cfg(loom)]
    fn new() -> Self {
        Self {
            slots: SlotList::new(),
            deamortized: AtomicBool::new(false),
        }
    }

    /// Creates a private domain and leaks it for the remainder of the
    /// process, matching the same "leak on exit" lifecycle as the process
    /// singleton.
    pub fn leaked() -> &'static Domain {
        Box::leak(Box::new(Domain::new()))
    }

    /// The process-wide singleton domain used by [`crate::asp`] unless a
    /// caller opts into a private one.
    pub fn global() -> &'static Domain {
        static GLOBAL: OnceLock<Domain> = OnceLock::new();
        GLOBAL.get_or_init(Domain::new)
    }

    /// Switches this domain to round-robin deamortized reclamation, where
    /// each `retire` does a small bounded amount of sweeping work instead
    /// of a large one every `AMORTIZED_THRESHOLD` calls. Experimental: the
    /// batch size is a tuning knob, not part of the contract.
    pub fn enable_deamortized_reclamation(&self) {
        self.deamortized.store(true, Relaxed);
    }

    fn thread_slot(&'static self) -> &'static slot::HazardSlot {
        crate::loom::loom_thread_local! {
            static OWNED: OwnedSlots = OwnedSlots::new();
        }

        let domain_key = self as *const Domain as usize;
        OWNED.with(|cache| {
            if let Some(owned) = cache
                .0
                .borrow()
                .iter()
                .find(|owned| owned.domain_key == domain_key)
            {
                return owned.slot;
            }
            let slot = self.slots.acquire();
            cache.0.borrow_mut().push(OwnedSlot {
                domain_key,
                domain: self,
                slot,
            });
            slot
        })
    }

    /// Reads `src`, publishes it into this thread's slot for `self`, and
    /// re-reads `src`; loops until the published value is confirmed stable,
    /// then returns it. This is the operation that makes a subsequent
    /// increment of the pointee's reference count safe: once `protect`
    /// returns, the returned address cannot be reclaimed by any `cleanup`
    /// that starts after this call, until [`Domain::release`] is called.
    pub(crate) fn protect(&'static self, src: &crate::loom::AtomicUsize) -> usize {
        self.protect_with(|| src.load(Acquire))
    }

    /// As [`Self::protect`], but reads the candidate address through `read`
    /// instead of a plain `AtomicUsize`. Lets callers protect an
    /// `AtomicPtr<T>`-typed source (e.g. [`crate::hashmap`]'s buckets)
    /// without requiring it to already be stored as a raw `usize`.
    pub(crate) fn protect_with(&'static self, read: impl Fn() -> usize) -> usize {
        let slot = self.thread_slot();
        loop {
            let candidate = read();
            slot.publish(candidate);
            light_fence();
            let confirm = read();
            if confirm == candidate {
                return candidate;
            }
        }
    }

    /// Clears this thread's protected pointer for `self`.
    pub(crate) fn release(&'static self) {
        self.thread_slot().release();
    }

    /// Appends `addr` (the control block's address, destroyed by calling
    /// `destroy(addr)`) to this thread's retired list, running `cleanup`
    /// when the amortized threshold is reached, or a bounded sweep if
    /// deamortized mode is enabled.
    ///
    /// # Safety
    /// `destroy` must be safe to call with `addr` exactly once, no earlier
    /// than the point at which no thread can still observe a hazard pointer
    /// to it.
    pub(crate) unsafe fn retire(&'static self, addr: usize, destroy: unsafe fn(usize)) {
        let slot = self.thread_slot();
        let count = slot.push_retired(RetiredPtr { addr, destroy });

        if self.deamortized.load(Relaxed) {
            heavy_fence();
            let live = self.slots.collect_protected();
            // SAFETY: `live` was collected after the heavy fence above.
            unsafe { slot.sweep_bounded(&live, DEAMORTIZED_BATCH) };
        } else if count >= AMORTIZED_THRESHOLD {
            self.cleanup(slot);
        }
    }

    /// Forces a reclamation pass on the calling thread's retired list.
    pub fn cleanup_current_thread(&'static self) {
        let slot = self.thread_slot();
        self.cleanup(slot);
    }

    fn cleanup(&'static self, owner: &slot::HazardSlot) {
        heavy_fence();
        let live = self.slots.collect_protected();
        // SAFETY: `live` postdates the fence above, per `sweep`'s contract.
        unsafe { owner.sweep(&live) };
        owner.reset_retire_count();
    }
}

/// One domain's slot, cached per-thread alongside the domain it was
/// acquired from so it can be handed back on thread exit.
struct OwnedSlot {
    domain_key: usize,
    domain: &'static Domain,
    slot: &'static slot::HazardSlot,
}

/// Every slot a thread has acquired across every [`Domain`] it has touched.
/// Returns each one to its domain's pool on thread exit, flushing pending
/// retirements first when there are any.
struct OwnedSlots(RefCell<Vec<OwnedSlot>>);

impl OwnedSlots {
    fn new() -> Self {
        Self(RefCell::new(Vec::new()))
    }
}

impl Drop for OwnedSlots {
    fn drop(&mut self) {
        for owned in self.0.borrow().iter() {
            if owned.slot.retire_count() > 0 {
                owned.domain.cleanup(owned.slot);
            }
            owned.domain.slots.release(owned.slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize as StdAtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn retire_runs_destroy_exactly_once_when_unprotected() {
        let domain = Domain::leaked();
        let destroyed = Arc::new(StdAtomicUsize::new(0));

        struct Payload(Arc<StdAtomicUsize>);
        unsafe fn destroy(addr: usize) {
            let b = Box::from_raw(addr as *mut Payload);
            b.0.fetch_add(1, Ordering::SeqCst);
        }

        let payload = Box::into_raw(Box::new(Payload(destroyed.clone())));
        unsafe { domain.retire(payload as usize, destroy) };
        domain.cleanup_current_thread();

        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn protect_observes_concurrent_store() {
        let domain = Domain::leaked();
        let src = crate::loom::AtomicUsize::new(0);
        src.store(0xdead_beef, Ordering::Release);
        let observed = domain.protect(&src);
        assert_eq!(observed, 0xdead_beef);
        domain.release();
    }

    #[cfg(all(loom, test))]
    #[test]
    fn loom_retire_safety() {
        loom::model(|| {
            let domain = Domain::leaked();
            let src = Arc::new(crate::loom::AtomicUsize::new(0));

            struct Payload;
            unsafe fn destroy(addr: usize) {
                drop(Box::from_raw(addr as *mut Payload));
            }

            let first = Box::into_raw(Box::new(Payload)) as usize;
            src.store(first, Ordering::Release);

            let reader_src = src.clone();
            let reader = loom::thread::spawn(move || {
                let observed = domain.protect(&reader_src);
                assert_ne!(observed, 0);
                domain.release();
            });

            unsafe { domain.retire(first, destroy) };
            domain.cleanup_current_thread();

            reader.join().unwrap();
        });
    }
}
