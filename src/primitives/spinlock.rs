//! Spinlock: `compare_exchange` with acquire/release, PAUSE/YIELD backoff in
//! the wait loop. The guard acquires on construction and releases on every
//! exit path via `Drop`.

use crate::loom::{spin_loop, AtomicBool, Ordering::*};
// A plain `core::cell::UnsafeCell`, not the loom-instrumented alias: access
// is always guarded by the `locked` CAS below, the same justification
// `asp::control_block::Repr` uses for its payload cell.
use core::cell::UnsafeCell;

/// A mutual-exclusion lock with no syscall involvement: contended threads
/// spin rather than parking.
pub struct Spinlock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Spinlock<T> {}
unsafe impl<T: Send> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    /// Creates an unlocked spinlock wrapping `value`.
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Spins until the lock is acquired, then returns a guard that releases
    /// it on drop (including on an early return or a panic unwinding
    /// through the critical section).
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        let mut spins: u32 = 0;
        while self
            .locked
            .compare_exchange_weak(false, true, Acquire, Relaxed)
            .is_err()
        {
            spin_loop();
            spins = spins.saturating_add(1);
            if spins > 64 {
                std::thread::yield_now();
            }
        }
        SpinlockGuard { lock: self }
    }

    /// Attempts to acquire without spinning, failing immediately if held.
    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Acquire, Relaxed)
            .ok()
            .map(|_| SpinlockGuard { lock: self })
    }
}

/// RAII guard returned by [`Spinlock::lock`]/[`Spinlock::try_lock`].
pub struct SpinlockGuard<'a, T> {
    lock: &'a Spinlock<T>,
}

impl<T> core::ops::Deref for SpinlockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard proves exclusive access.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> core::ops::DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `Deref`.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Release);
    }
}
