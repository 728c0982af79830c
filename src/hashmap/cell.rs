//! Reference-counted key/value cells: each cell carries a
//! [`WaitFreeCounter`](crate::counter::WaitFreeCounter).
//! Accessors prove liveness through the hazard engine instead (a protected
//! address cannot be destroyed out from under a reader), so the counter's
//! only job is deciding which of the slot and the last reader's release
//! triggers retirement.

use crate::counter::WaitFreeCounter;

pub(crate) struct KeyCell<K> {
    pub(crate) key: K,
    refcount: WaitFreeCounter,
}

impl<K> KeyCell<K> {
    pub(crate) fn new(key: K) -> Box<Self> {
        Box::new(Self {
            key,
            refcount: WaitFreeCounter::new(1),
        })
    }

    /// Returns `true` if this call brought the count to zero.
    pub(crate) fn release(&self) -> bool {
        self.refcount.decrement(1)
    }
}

pub(crate) struct ValueCell<V> {
    pub(crate) value: V,
    refcount: WaitFreeCounter,
}

impl<V> ValueCell<V> {
    pub(crate) fn new(value: V) -> Box<Self> {
        Box::new(Self {
            value,
            refcount: WaitFreeCounter::new(1),
        })
    }

    pub(crate) fn release(&self) -> bool {
        self.refcount.decrement(1)
    }
}

pub(crate) unsafe fn destroy_key<K>(addr: usize) {
    // SAFETY: caller (the hazard engine) guarantees no reader still
    // protects `addr` and that it was retired exactly once.
    unsafe { drop(Box::from_raw(addr as *mut KeyCell<K>)) };
}

pub(crate) unsafe fn destroy_value<V>(addr: usize) {
    // SAFETY: see `destroy_key`.
    unsafe { drop(Box::from_raw(addr as *mut ValueCell<V>)) };
}

/// Decrements `cell`'s refcount and, if this call zeroed it, retires it
/// through `domain` for eventual destruction via `destroy`.
///
/// # Safety
/// `addr` must be `cell`'s own address, and `destroy` must be the correct
/// monomorphization for its type.
pub(crate) unsafe fn release_and_maybe_retire(
    release: bool,
    addr: usize,
    destroy: unsafe fn(usize),
    domain: &'static crate::hazard::Domain,
) {
    if release {
        // SAFETY: forwarded from the caller's contract.
        unsafe { domain.retire(addr, destroy) };
    }
}
