//! Compatibility shim so every other module can be written once and either
//! compile against the real platform primitives or, under `--cfg loom`,
//! against `loom`'s instrumented equivalents for exhaustive interleaving
//! checks. No module outside this file should `use core::sync::atomic` or
//! `std::sync` directly.

macro_rules! spread_attr {
    (
        #[$cfg:meta]
        $($i:item)*
    ) => {
        $(
            #[$cfg]
            $i
        )*
    };
}

spread_attr! {
#[cfg(not(loom))]

pub(crate) use core::sync::atomic::{
    fence, AtomicBool, AtomicIsize, AtomicPtr, AtomicU32, AtomicU64, AtomicU8, AtomicUsize,
    Ordering,
};
pub(crate) use core::cell::{Cell, UnsafeCell};
pub(crate) use std::hint::spin_loop;
pub(crate) use std::sync::{Condvar, Mutex, MutexGuard};
pub(crate) use std::thread;
}

spread_attr! {
#[cfg(loom)]

pub(crate) use loom::sync::atomic::{
    fence, AtomicBool, AtomicIsize, AtomicPtr, AtomicU32, AtomicU64, AtomicU8, AtomicUsize,
};
pub(crate) use core::sync::atomic::Ordering;
pub(crate) use loom::cell::{Cell, UnsafeCell};
pub(crate) use loom::hint::spin_loop;
pub(crate) use loom::sync::{Condvar, Mutex, MutexGuard};
pub(crate) use loom::thread;
}

/// `thread_local!` that degrades to a fresh value per access when running
/// under loom's model checker (loom's own `thread_local!` already does
/// this correctly, std's does not need it); kept as one macro so call
/// sites never branch on `cfg(loom)` themselves.
#[cfg(not(loom))]
macro_rules! loom_thread_local {
    ($($tt:tt)*) => { ::std::thread_local! { $($tt)* } };
}
#[cfg(loom)]
macro_rules! loom_thread_local {
    ($($tt:tt)*) => { ::loom::thread_local! { $($tt)* } };
}

pub(crate) use loom_thread_local;

/// A cell that can be mutated through a shared reference, abstracting over
/// `core::cell::UnsafeCell` (real) and `loom::cell::UnsafeCell` (model
/// checked), whose access APIs differ (`get()` vs. `with`/`with_mut`
/// closures that loom uses to track accesses for race detection).
pub(crate) struct Racy<T>(UnsafeCell<T>);

unsafe impl<T: Send> Send for Racy<T> {}
unsafe impl<T: Send> Sync for Racy<T> {}

impl<T> Racy<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// # Safety
    /// The caller must not create overlapping mutable/shared accesses to
    /// the returned reference's lifetime.
    #[cfg(not(loom))]
    pub(crate) unsafe fn with<R>(&self, f: impl FnOnce(*const T) -> R) -> R {
        f(self.0.get())
    }

    #[cfg(loom)]
    pub(crate) unsafe fn with<R>(&self, f: impl FnOnce(*const T) -> R) -> R {
        self.0.with(|p| f(p))
    }

    /// # Safety
    /// The caller must not create overlapping accesses to the returned
    /// pointer's lifetime.
    #[cfg(not(loom))]
    pub(crate) unsafe fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
        f(self.0.get())
    }

    #[cfg(loom)]
    pub(crate) unsafe fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
        self.0.with_mut(|p| f(p))
    }
}
