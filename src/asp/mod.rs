//! Atomic Shared Pointer: a `load`-wait-free, lock-free `compare_exchange`
//! single-word pointer to a reference-counted allocation, backed by hazard
//! pointers for safe concurrent reclamation and a wait-free strong count.

mod control_block;

use crate::hazard::Domain;
use crate::loom::{AtomicUsize, Ordering};
use control_block::ControlBlockHeader;
use core::marker::PhantomData;
use core::ptr::NonNull;

/// An owned, reference-counted handle to a `T` allocated on the heap
/// alongside its control block. Cloning is wait-free; dropping the last
/// handle disposes `T` and retires the allocation through the hazard engine.
#[derive(Debug)]
pub struct Shared<T> {
    data: NonNull<T>,
    header: NonNull<ControlBlockHeader>,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send + Sync> Send for Shared<T> {}
unsafe impl<T: Send + Sync> Sync for Shared<T> {}

impl<T> Shared<T> {
    /// Allocates `value` alongside a fresh control block with one strong
    /// reference.
    pub fn new(value: T) -> Self {
        let (header, data) = control_block::allocate(value);
        Self {
            data,
            header,
            _marker: PhantomData,
        }
    }

    /// Builds a `Shared<T>` around an already-boxed value, running
    /// `disposer` on it just before the value itself drops. The resulting
    /// handle is *aliased*: it cannot be stored in an [`AtomicSharedPtr<T>`],
    /// whose load path only knows how to recompute the data pointer for a
    /// [`Shared::new`]-style in-place allocation.
    pub fn from_box_with_disposer(value: Box<T>, disposer: Box<dyn FnMut(&mut T) + Send>) -> Self {
        let (header, data) = control_block::allocate_boxed(value, disposer);
        Self {
            data,
            header,
            _marker: PhantomData,
        }
    }

    /// Creates a weak handle sharing this allocation's control block.
    pub fn downgrade(this: &Self) -> Weak<T> {
        control_block::acquire_weak(this.header);
        Weak {
            data: this.data,
            header: this.header,
            _marker: PhantomData,
        }
    }

    fn header_ref(&self) -> &ControlBlockHeader {
        // SAFETY: `self` holds a strong reference, keeping the header alive.
        unsafe { self.header.as_ref() }
    }

    /// Returns the live strong count. Advisory only: another thread may
    /// change it before the caller observes the result.
    pub fn strong_count(this: &Self) -> u32 {
        this.header_ref().strong.load(Ordering::Acquire)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        self.header_ref().strong.increment_known_live(1);
        Self {
            data: self.data,
            header: self.header,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // SAFETY: this handle owns exactly one strong reference, being
        // released exactly once here.
        unsafe { control_block::release_strong::<T>(self.header) };
    }
}

impl<T> core::ops::Deref for Shared<T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: a live strong handle guarantees the payload hasn't been
        // disposed yet.
        unsafe { self.data.as_ref() }
    }
}

/// A non-owning handle that must be [`Weak::upgrade`]d to a [`Shared<T>`]
/// before the payload can be accessed.
pub struct Weak<T> {
    data: NonNull<T>,
    header: NonNull<ControlBlockHeader>,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send + Sync> Send for Weak<T> {}
unsafe impl<T: Send + Sync> Sync for Weak<T> {}

/// Returned by [`Weak::upgrade`] when the pointee has already been disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeError {
    /// The last strong reference was dropped before this upgrade ran.
    Expired,
}

impl core::fmt::Display for UpgradeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            UpgradeError::Expired => f.write_str("upgrade failed: pointee already disposed"),
        }
    }
}

impl std::error::Error for UpgradeError {}

impl<T> Weak<T> {
    /// Attempts to promote this weak handle to a strong [`Shared<T>`],
    /// reporting absence as `None` (the "lock form" of upgrading). Wait-free:
    /// never retries against a racing `decrement`.
    pub fn upgrade(&self) -> Option<Shared<T>> {
        self.try_upgrade().ok()
    }

    /// As [`Self::upgrade`], but signals failure with [`UpgradeError::Expired`]
    /// instead of `None` (the "direct construction" failure form).
    pub fn try_upgrade(&self) -> Result<Shared<T>, UpgradeError> {
        // SAFETY: a live weak handle keeps the control block itself (though
        // not necessarily `T`) allocated.
        let header = unsafe { self.header.as_ref() };
        if header.strong.increment_if_nonzero(1) {
            Ok(Shared {
                data: self.data,
                header: self.header,
                _marker: PhantomData,
            })
        } else {
            Err(UpgradeError::Expired)
        }
    }
}

impl<T> Clone for Weak<T> {
    fn clone(&self) -> Self {
        control_block::acquire_weak(self.header);
        Self {
            data: self.data,
            header: self.header,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for Weak<T> {
    fn drop(&mut self) {
        // SAFETY: this handle owns exactly one weak reference, being
        // released exactly once here.
        unsafe { control_block::release_weak(self.header) };
    }
}

/// A pointer-width slot holding zero or one [`Shared<T>`], readable and
/// writable atomically by many threads at once. `load` is wait-free;
/// `store`/`exchange`/`compare_exchange_*` are lock-free.
///
/// Only non-aliased `Shared<T>` (i.e. ones produced by [`Shared::new`]) can
/// be stored here: the slot holds a single control-block address and
/// recomputes the data pointer from it via [`control_block::data_ptr`],
/// which assumes the in-place `Repr<T>` layout `Shared::new` produces.
pub struct AtomicSharedPtr<T> {
    slot: AtomicUsize,
    domain: &'static Domain,
    _marker: PhantomData<Shared<T>>,
}

impl<T> AtomicSharedPtr<T> {
    /// Creates a slot holding `initial`, reclaiming through the process-wide
    /// hazard domain.
    pub fn new(initial: Option<Shared<T>>) -> Self {
        Self::with_domain(initial, Domain::global())
    }

    /// As [`Self::new`], but reclaims through a private [`Domain`] instead
    /// of the process-wide one.
    pub fn with_domain(initial: Option<Shared<T>>, domain: &'static Domain) -> Self {
        let addr = match initial {
            Some(shared) => {
                let addr = shared.header.as_ptr() as usize;
                core::mem::forget(shared);
                addr
            }
            None => 0,
        };
        Self {
            slot: AtomicUsize::new(addr),
            domain,
            _marker: PhantomData,
        }
    }

    /// Reports whether this type's atomic operations are implemented
    /// without locks on the current platform. Always `true`: every op here
    /// bottoms out in a single `AtomicUsize` CAS/load.
    pub const fn is_lock_free() -> bool {
        true
    }

    fn header_at(addr: usize) -> Option<NonNull<ControlBlockHeader>> {
        NonNull::new(addr as *mut ControlBlockHeader)
    }

    fn to_shared(&self, addr: usize) -> Option<Shared<T>> {
        let header = Self::header_at(addr)?;
        Some(Shared {
            data: control_block::data_ptr::<T>(header),
            header,
            _marker: PhantomData,
        })
    }

    /// Wait-free load: protects the current pointee with a hazard pointer,
    /// increments its strong count, then releases the hazard pointer. The
    /// returned handle keeps the pointee alive independently of the slot's
    /// future mutations.
    pub fn load(&self, _order: Ordering) -> Option<Shared<T>> {
        let addr = self.domain.protect(&self.slot);
        let result = if addr == 0 {
            None
        } else {
            // SAFETY: `addr` was just hazard-protected, so the allocation
            // cannot be reclaimed until `release` below.
            let header = Self::header_at(addr).expect("protected address is non-null");
            // SAFETY: `addr` is hazard-protected for the duration of this call.
            let acquired = unsafe { header.as_ref() }.strong.increment_if_nonzero(1);
            acquired.then(|| Shared {
                data: control_block::data_ptr::<T>(header),
                header,
                _marker: PhantomData,
            })
        };
        self.domain.release();
        result
    }

    /// Unconditionally replaces the pointee, returning the previous one.
    pub fn exchange(&self, new: Option<Shared<T>>, order: Ordering) -> Option<Shared<T>> {
        let new_addr = match new {
            Some(shared) => {
                let addr = shared.header.as_ptr() as usize;
                core::mem::forget(shared);
                addr
            }
            None => 0,
        };
        let old_addr = self.slot.swap(new_addr, order);
        self.to_shared(old_addr)
    }

    /// Unconditionally replaces the pointee, dropping the previous one.
    pub fn store(&self, new: Option<Shared<T>>, order: Ordering) {
        drop(self.exchange(new, order));
    }

    /// Replaces the pointee with `new` only if the current pointee is the
    /// same allocation as `current`. On success, returns the dethroned
    /// value as an owned handle; on failure, hands `new` back to the
    /// caller untouched and reports the actual current value's address via
    /// `current_addr` for the caller to re-derive a fresh comparison value
    /// from a subsequent `load`.
    ///
    /// This does not loop internally against ABA on the raw address: two
    /// different allocations can in principle receive the same address
    /// after one is freed and another is allocated in its place. Callers
    /// wanting ABA-proof compare-and-swap should retain a [`Shared<T>`] (not
    /// just compare its address) across the whole read-modify-write and
    /// retry on failure themselves, matching this crate's bias toward a
    /// caller-driven retry loop over an internal one.
    pub fn compare_exchange_strong(
        &self,
        current: Option<&Shared<T>>,
        new: Option<Shared<T>>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Option<Shared<T>>, Option<Shared<T>>> {
        let current_addr = current.map_or(0, |s| s.header.as_ptr() as usize);
        let new_addr = new.as_ref().map_or(0, |s| s.header.as_ptr() as usize);

        match self
            .slot
            .compare_exchange(current_addr, new_addr, success, failure)
        {
            Ok(old_addr) => {
                core::mem::forget(new);
                Ok(self.to_shared(old_addr))
            }
            Err(_) => Err(new),
        }
    }

    /// As [`Self::compare_exchange_strong`], but permitted to fail
    /// spuriously even when the current value matches `current`. This
    /// implementation never does (it is backed by a single CAS, not an
    /// LL/SC pair), but callers should still loop as the weak contract
    /// requires so the behavior stays correct if that ever changes.
    pub fn compare_exchange_weak(
        &self,
        current: Option<&Shared<T>>,
        new: Option<Shared<T>>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Option<Shared<T>>, Option<Shared<T>>> {
        self.compare_exchange_strong(current, new, success, failure)
    }
}

impl<T> Drop for AtomicSharedPtr<T> {
    fn drop(&mut self) {
        let addr = *self.slot.get_mut();
        if let Some(header) = Self::header_at(addr) {
            // SAFETY: `&mut self` proves no concurrent access is possible,
            // so this is exactly one release of the strong reference the
            // slot was holding.
            unsafe { control_block::release_strong::<T>(header) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loom::Ordering::*;

    #[test]
    fn new_and_deref() {
        let s = Shared::new(42u32);
        assert_eq!(*s, 42);
    }

    #[test]
    fn boxed_disposer_runs_before_drop() {
        use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
        use std::sync::Arc;

        let disposed = Arc::new(AtomicBool::new(false));
        let flag = disposed.clone();
        let s = Shared::from_box_with_disposer(
            Box::new(10i32),
            Box::new(move |_| flag.store(true, SeqCst)),
        );
        assert_eq!(*s, 10);
        drop(s);
        assert!(disposed.load(SeqCst));
    }

    #[test]
    fn clone_keeps_alive_after_original_drops() {
        let s = Shared::new(String::from("hello"));
        let s2 = s.clone();
        drop(s);
        assert_eq!(*s2, "hello");
    }

    #[test]
    fn weak_upgrade_fails_after_last_strong_drops() {
        let s = Shared::new(7i32);
        let w = Shared::downgrade(&s);
        drop(s);
        assert!(w.upgrade().is_none());
        assert_eq!(w.try_upgrade().unwrap_err(), UpgradeError::Expired);
    }

    #[test]
    fn weak_upgrade_succeeds_while_strong_alive() {
        let s = Shared::new(7i32);
        let w = Shared::downgrade(&s);
        let upgraded = w.upgrade().expect("still alive");
        assert_eq!(*upgraded, 7);
    }

    #[test]
    fn atomic_store_then_load_round_trips() {
        let atomic = AtomicSharedPtr::new(Some(Shared::new(1u64)));
        let loaded = atomic.load(Acquire).expect("present");
        assert_eq!(*loaded, 1);
    }

    #[test]
    fn atomic_compare_exchange_replaces_on_match() {
        let original = Shared::new(String::from("a"));
        let atomic = AtomicSharedPtr::new(Some(original.clone()));
        let replacement = Shared::new(String::from("b"));
        let result = atomic.compare_exchange_strong(
            Some(&original),
            Some(replacement),
            AcqRel,
            Acquire,
        );
        let old = result.expect("matched current").expect("had a value");
        assert_eq!(*old, "a");
        let now = atomic.load(Acquire).expect("present");
        assert_eq!(*now, "b");
    }

    #[test]
    fn atomic_compare_exchange_fails_on_mismatch_and_returns_new() {
        let atomic = AtomicSharedPtr::new(Some(Shared::new(1u32)));
        let stale = Shared::new(999u32);
        let replacement = Shared::new(2u32);
        let err = atomic
            .compare_exchange_strong(Some(&stale), Some(replacement), AcqRel, Acquire)
            .unwrap_err();
        assert_eq!(*err.expect("handed back"), 2);
        assert_eq!(*atomic.load(Acquire).expect("present"), 1);
    }

    #[cfg(all(loom, test))]
    #[test]
    fn loom_concurrent_clone_and_drop() {
        loom::model(|| {
            use loom::sync::Arc;
            use loom::thread;

            let atomic = Arc::new(AtomicSharedPtr::new(Some(Shared::new(1u32))));
            let a = {
                let atomic = atomic.clone();
                thread::spawn(move || {
                    let loaded = atomic.load(Acquire);
                    drop(loaded);
                })
            };
            let b = {
                let atomic = atomic.clone();
                thread::spawn(move || {
                    atomic.store(Some(Shared::new(2u32)), Release);
                })
            };
            a.join().unwrap();
            b.join().unwrap();
        });
    }
}
