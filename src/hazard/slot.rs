use crate::loom::{AtomicBool, AtomicPtr, AtomicUsize, Cell, Ordering::*, Racy};

/// A type-erased retired allocation: the raw address that must not be
/// touched while any hazard slot protects it, plus the destructor to run
/// once no slot does. Not intrusive; a small owned node is used instead so
/// the engine isn't coupled to any one garbage type, matching the
/// retired-bag shape used by comparable crates (e.g.
/// `aarc::smr::standard_reclaimer`'s `Batch { functions: Vec<(*mut u8, ..)> }`).
pub(crate) struct RetiredPtr {
    pub(crate) addr: usize,
    pub(crate) destroy: unsafe fn(usize),
}

/// One thread's protected-pointer slot plus its locally-owned retired list.
/// Slots are never freed; the engine's slot list only ever grows for the
/// lifetime of the process.
pub(crate) struct HazardSlot {
    /// The single address this thread currently protects, or 0.
    protected: AtomicUsize,
    /// Whether some thread currently owns this slot.
    in_use: AtomicBool,
    /// Next slot in the process-wide intrusive list.
    next: AtomicPtr<HazardSlot>,
    /// Retired allocations owned by whichever thread currently holds this
    /// slot. Only ever touched by that one thread, so a plain `Vec` behind
    /// a `Racy` cell (no atomics needed) is enough.
    retired: Racy<Vec<RetiredPtr>>,
    /// Count of `retire` calls since the last `cleanup` pass, for the
    /// amortized-threshold policy.
    retires_since_cleanup: Cell<u32>,
}

unsafe impl Sync for HazardSlot {}

impl HazardSlot {
    #[cfg(not(loom))]
    const fn new() -> Self {
        Self {
            protected: AtomicUsize::new(0),
            in_use: AtomicBool::new(true),
            next: AtomicPtr::new(core::ptr::null_mut()),
            retired: Racy::new(Vec::new()),
            retires_since_cleanup: Cell::new(0),
        }
    }

    #[cfg(loom)]
    fn new() -> Self {
        Self {
            protected: AtomicUsize::new(0),
            in_use: AtomicBool::new(true),
            next: AtomicPtr::new(core::ptr::null_mut()),
            retired: Racy::new(Vec::new()),
            retires_since_cleanup: Cell::new(0),
        }
    }

    #[inline]
    pub(crate) fn publish(&self, addr: usize) {
        self.protected.store(addr, Release);
    }

    #[inline]
    pub(crate) fn protected_load(&self, order: crate::loom::Ordering) -> usize {
        self.protected.load(order)
    }

    #[inline]
    pub(crate) fn release(&self) {
        self.protected.store(0, Release);
    }

    pub(crate) fn next(&self) -> *mut HazardSlot {
        self.next.load(Acquire)
    }

    pub(crate) fn push_retired(&self, r: RetiredPtr) -> u32 {
        // SAFETY: only the thread that owns this slot ever calls this.
        unsafe {
            self.retired.with_mut(|v| (*v).push(r));
        }
        let n = self.retires_since_cleanup.get() + 1;
        self.retires_since_cleanup.set(n);
        n
    }

    pub(crate) fn reset_retire_count(&self) {
        self.retires_since_cleanup.set(0);
    }

    pub(crate) fn retire_count(&self) -> u32 {
        self.retires_since_cleanup.get()
    }

    /// Drops every retired entry whose address is absent from `live`,
    /// keeping the rest for a later pass. Must only be called by the
    /// thread that owns this slot.
    ///
    /// # Safety
    /// `live` must have been collected after a heavy fence that postdates
    /// every publish this cleanup is meant to observe.
    pub(crate) unsafe fn sweep(&self, live: &std::collections::HashSet<usize>) {
        self.retired.with_mut(|v| {
            let v = &mut *v;
            v.retain(|r| {
                if live.contains(&r.addr) {
                    true
                } else {
                    // SAFETY: no slot protects `r.addr` per `live`'s
                    // construction, and it was pushed by this thread, so
                    // no other thread can be concurrently destroying it.
                    unsafe { (r.destroy)(r.addr) };
                    false
                }
            });
        });
    }

    /// Sweeps at most `budget` entries from the front of the retired list,
    /// for the deamortized reclamation mode. Same safety requirement as
    /// [`Self::sweep`].
    pub(crate) unsafe fn sweep_bounded(&self, live: &std::collections::HashSet<usize>, budget: usize) {
        self.retired.with_mut(|v| {
            let v = &mut *v;
            let mut scanned = 0;
            let mut i = 0;
            while i < v.len() && scanned < budget {
                scanned += 1;
                if live.contains(&v[i].addr) {
                    i += 1;
                } else {
                    let r = v.swap_remove(i);
                    // SAFETY: see `sweep`.
                    unsafe { (r.destroy)(r.addr) };
                }
            }
        });
    }
}

/// The process-wide, monotonically growing, never-freed list of hazard
/// slots underlying a [`super::Domain`].
pub(crate) struct SlotList {
    head: AtomicPtr<HazardSlot>,
}

impl SlotList {
    #[cfg(not(loom))]
    pub(crate) const fn new() -> Self {
        Self {
            head: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    #[cfg(loom)]
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// Finds a slot nobody currently owns, or allocates and publishes a new
    /// one. The returned reference is valid for the rest of the process's
    /// life: slots are leaked by design.
    pub(crate) fn acquire(&self) -> &'static HazardSlot {
        let mut cur = self.head.load(Acquire);
        while !cur.is_null() {
            // SAFETY: slots are never freed once linked.
            let slot: &'static HazardSlot = unsafe { &*cur };
            if slot
                .in_use
                .compare_exchange(false, true, AcqRel, Relaxed)
                .is_ok()
            {
                slot.reset_retire_count();
                return slot;
            }
            cur = slot.next();
        }
        self.push_new()
    }

    fn push_new(&self) -> &'static HazardSlot {
        let boxed: &'static mut HazardSlot = Box::leak(Box::new(HazardSlot::new()));
        loop {
            let head = self.head.load(Acquire);
            boxed.next.store(head, Relaxed);
            match self
                .head
                .compare_exchange(head, boxed as *mut _, AcqRel, Relaxed)
            {
                Ok(_) => return boxed,
                Err(_) => continue,
            }
        }
    }

    pub(crate) fn release(&self, slot: &HazardSlot) {
        slot.release();
        slot.in_use.store(false, Release);
    }

    /// Collects the set of currently protected addresses. Caller is
    /// responsible for issuing the heavy fence beforehand.
    pub(crate) fn collect_protected(&self) -> std::collections::HashSet<usize> {
        let mut set = std::collections::HashSet::new();
        let mut cur = self.head.load(Acquire);
        while !cur.is_null() {
            let slot = unsafe { &*cur };
            let p = slot.protected_load(Acquire);
            if p != 0 {
                set.insert(p);
            }
            cur = slot.next();
        }
        set
    }
}
