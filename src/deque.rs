//! Chase-Lev work-stealing deque: one owner thread pushes and pops from the
//! bottom, any number of thief threads steal from the top. The buffer grows
//! (never shrinks) and never blocks; `steal`'s CAS on `top` is the single
//! linearization point deciding who gets each element.

use crate::loom::{AtomicIsize, AtomicPtr, Ordering::*};
use std::fmt;
use std::sync::Mutex;

struct Buffer<T> {
    cap: usize,
    mask: isize,
    storage: Box<[std::cell::UnsafeCell<std::mem::MaybeUninit<T>>]>,
}

impl<T> Buffer<T> {
    fn new(cap: usize) -> Self {
        debug_assert!(cap.is_power_of_two());
        let storage = (0..cap)
            .map(|_| std::cell::UnsafeCell::new(std::mem::MaybeUninit::uninit()))
            .collect();
        Self {
            cap,
            mask: cap as isize - 1,
            storage,
        }
    }

    unsafe fn write(&self, index: isize, value: T) {
        let slot = &self.storage[(index & self.mask) as usize];
        unsafe { (*slot.get()).write(value) };
    }

    unsafe fn read(&self, index: isize) -> T {
        let slot = &self.storage[(index & self.mask) as usize];
        unsafe { (*slot.get()).assume_init_read() }
    }
}

/// Doubled-capacity replacement buffers are kept alive here for the
/// deque's whole lifetime rather than freed immediately: a thief may still
/// be mid-read from an old buffer when the owner swaps it out.
struct Garbage<T>(Mutex<Vec<Box<Buffer<T>>>>);

impl<T> Garbage<T> {
    fn new() -> Self {
        Self(Mutex::new(Vec::new()))
    }

    fn keep(&self, buffer: Box<Buffer<T>>) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(buffer);
    }
}

struct Inner<T> {
    top: crate::loom::AtomicIsize,
    bottom: crate::loom::AtomicIsize,
    buffer: AtomicPtr<Buffer<T>>,
    garbage: Garbage<T>,
}

unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

/// The single-owner half of a deque. Not `Clone`: `push`/`pop` are only
/// sound when exactly one thread calls them.
pub struct Worker<T> {
    inner: std::sync::Arc<Inner<T>>,
}

/// A cloneable handle that steals from the top of the deque. Any number of
/// threads may hold and use one concurrently.
pub struct Stealer<T> {
    inner: std::sync::Arc<Inner<T>>,
}

impl<T> Clone for Stealer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

unsafe impl<T: Send> Send for Worker<T> {}
unsafe impl<T: Send> Send for Stealer<T> {}
unsafe impl<T: Send> Sync for Stealer<T> {}

const DEFAULT_CAPACITY: usize = 32;

/// Creates a new empty deque, returning the owner's [`Worker`] and one
/// [`Stealer`] (clone it for more thieves).
pub fn new<T>() -> (Worker<T>, Stealer<T>) {
    with_capacity(DEFAULT_CAPACITY)
}

/// As [`new`], but with an initial buffer capacity (rounded up to a power
/// of two).
pub fn with_capacity<T>(capacity: usize) -> (Worker<T>, Stealer<T>) {
    let cap = capacity.max(2).next_power_of_two();
    let buffer = Box::into_raw(Box::new(Buffer::new(cap)));
    let inner = std::sync::Arc::new(Inner {
        top: AtomicIsize::new(0),
        bottom: AtomicIsize::new(0),
        buffer: AtomicPtr::new(buffer),
        garbage: Garbage::new(),
    });
    (
        Worker {
            inner: inner.clone(),
        },
        Stealer { inner },
    )
}

/// Returned by [`Stealer::steal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StealError {
    /// The deque had nothing to steal.
    Empty,
    /// Lost a race with another stealer or the owner's `pop`. The caller
    /// should simply try again.
    Retry,
}

impl fmt::Display for StealError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StealError::Empty => f.write_str("deque is empty"),
            StealError::Retry => f.write_str("lost a race, retry"),
        }
    }
}

impl std::error::Error for StealError {}

impl<T> Worker<T> {
    /// Pushes `value` onto the bottom of the deque, growing the buffer if
    /// it's full.
    pub fn push(&self, value: T) {
        let bottom = self.inner.bottom.load(Relaxed);
        let top = self.inner.top.load(Acquire);
        let mut buffer = self.inner.buffer.load(Relaxed);
        // SAFETY: only the owner thread ever mutates `self.inner.buffer`,
        // and this is that thread.
        let cap = unsafe { (*buffer).cap } as isize;
        if bottom - top >= cap - 1 {
            buffer = self.grow(buffer, bottom, top);
        }
        // SAFETY: `bottom` is an index only the owner writes to, and
        // capacity was just confirmed sufficient.
        unsafe { (*buffer).write(bottom, value) };
        self.inner.bottom.store(bottom + 1, Release);
    }

    fn grow(&self, old: *mut Buffer<T>, bottom: isize, top: isize) -> *mut Buffer<T> {
        // SAFETY: called only by the owner, which exclusively controls
        // `self.inner.buffer`'s pointee until it publishes the swap below.
        let old_ref = unsafe { &*old };
        let new_cap = old_ref.cap * 2;
        let new_buffer = Box::new(Buffer::new(new_cap));
        for i in top..bottom {
            // SAFETY: every index in `top..bottom` holds a live element in
            // the old buffer that hasn't been consumed yet.
            unsafe {
                let value = std::ptr::read(old_ref.storage[(i & old_ref.mask) as usize].get())
                    .assume_init();
                new_buffer.write(i, value);
            }
        }
        let new_ptr = Box::into_raw(new_buffer);
        self.inner.buffer.store(new_ptr, Release);
        // SAFETY: `old` was allocated by a prior `Box::into_raw` and is
        // being retired, not freed, so thieves mid-read of it remain sound.
        self.inner
            .garbage
            .keep(unsafe { Box::from_raw(old) });
        new_ptr
    }

    /// Pops the most recently pushed element. Racing with thieves for the
    /// very last element is resolved by a CAS on `top`.
    pub fn pop(&self) -> Option<T> {
        let bottom = self.inner.bottom.load(Relaxed) - 1;
        let buffer = self.inner.buffer.load(Relaxed);
        self.inner.bottom.store(bottom, Relaxed);
        crate::loom::fence(SeqCst);
        let top = self.inner.top.load(Relaxed);

        if top > bottom {
            // Already empty; restore bottom.
            self.inner.bottom.store(bottom + 1, Relaxed);
            return None;
        }

        // SAFETY: `bottom` still indexes a live element; ownership of the
        // read races only with `steal`'s CAS below, resolved before reuse.
        let value = unsafe { (*buffer).read(bottom) };

        if top == bottom {
            // Last element: race a thief for it.
            let won = self
                .inner
                .top
                .compare_exchange(top, top + 1, SeqCst, Relaxed)
                .is_ok();
            self.inner.bottom.store(bottom + 1, Relaxed);
            if !won {
                // A thief won; the value we just read is a duplicate read
                // of memory a thief is also reading, but only the winner's
                // copy is ever returned to a caller, so forget ours without
                // dropping it twice.
                core::mem::forget(value);
                return None;
            }
            return Some(value);
        }

        Some(value)
    }

    /// Advisory: whether the deque looked empty at some recent instant.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advisory snapshot of the number of elements currently queued.
    pub fn len(&self) -> usize {
        let bottom = self.inner.bottom.load(Relaxed);
        let top = self.inner.top.load(Relaxed);
        (bottom - top).max(0) as usize
    }

    /// Advisory snapshot of the current buffer's capacity. Owner-only: the
    /// buffer can grow concurrently with thieves, but only this method's
    /// caller ever swaps it.
    pub fn capacity(&self) -> usize {
        let buffer = self.inner.buffer.load(Relaxed);
        // SAFETY: only the owner mutates `self.inner.buffer`, and this is it.
        unsafe { (*buffer).cap }
    }
}

impl<T> Stealer<T> {
    /// Attempts to steal the oldest element. Returns [`StealError::Empty`]
    /// if there was nothing, [`StealError::Retry`] if a race was lost (the
    /// caller should try again, not treat it as terminal).
    pub fn steal(&self) -> Result<T, StealError> {
        let top = self.inner.top.load(Acquire);
        crate::loom::fence(SeqCst);
        let bottom = self.inner.bottom.load(Acquire);

        if top >= bottom {
            return Err(StealError::Empty);
        }

        let buffer = self.inner.buffer.load(Acquire);
        // SAFETY: `top` indexed a live element at the moment it was read
        // above; the owner cannot reuse this slot until the CAS below
        // either fails (so we never act on the read) or succeeds (which
        // makes us the exclusive taker).
        let value = unsafe { (*buffer).read(top) };

        match self
            .inner
            .top
            .compare_exchange(top, top + 1, SeqCst, Relaxed)
        {
            Ok(_) => Ok(value),
            Err(_) => {
                core::mem::forget(value);
                Err(StealError::Retry)
            }
        }
    }

    /// Advisory: whether the deque looked empty at some recent instant.
    pub fn is_empty(&self) -> bool {
        let top = self.inner.top.load(Acquire);
        let bottom = self.inner.bottom.load(Acquire);
        top >= bottom
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let buffer = self.buffer.load(Relaxed);
        let top = *self.top.get_mut();
        let bottom = *self.bottom.get_mut();
        // SAFETY: `&mut self` (via the `Arc`'s unique final drop) proves no
        // concurrent access remains.
        let buf = unsafe { &*buffer };
        for i in top..bottom {
            unsafe {
                std::ptr::drop_in_place(buf.storage[(i & buf.mask) as usize].get() as *mut T);
            }
        }
        unsafe { drop(Box::from_raw(buffer)) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_push_pop_lifo() {
        let (worker, _stealer) = new::<u32>();
        worker.push(1);
        worker.push(2);
        worker.push(3);
        assert_eq!(worker.pop(), Some(3));
        assert_eq!(worker.pop(), Some(2));
        assert_eq!(worker.pop(), Some(1));
        assert_eq!(worker.pop(), None);
    }

    #[test]
    fn stealer_takes_oldest() {
        let (worker, stealer) = new::<u32>();
        worker.push(1);
        worker.push(2);
        assert_eq!(stealer.steal(), Ok(1));
        assert_eq!(worker.pop(), Some(2));
    }

    #[test]
    fn growth_preserves_all_elements() {
        let (worker, stealer) = with_capacity::<u32>(2);
        for i in 0..100 {
            worker.push(i);
        }
        let mut seen = Vec::new();
        while let Some(v) = worker.pop() {
            seen.push(v);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        assert!(stealer.steal().is_err());
    }

    #[test]
    fn concurrent_steal_and_pop_converge_exactly() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use std::thread;

        let (worker, stealer) = with_capacity::<u32>(64);
        for i in 0..4000u32 {
            worker.push(i);
        }
        let taken = Arc::new(AtomicUsize::new(0));
        let thieves: Vec<_> = (0..8)
            .map(|_| {
                let stealer = stealer.clone();
                let taken = taken.clone();
                thread::spawn(move || {
                    let mut count = 0;
                    loop {
                        match stealer.steal() {
                            Ok(_) => {
                                count += 1;
                                taken.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(StealError::Retry) => continue,
                            Err(StealError::Empty) => {
                                if taken.load(Ordering::SeqCst) >= 4000 {
                                    break;
                                }
                            }
                        }
                        if count > 10_000 {
                            break;
                        }
                    }
                })
            })
            .collect();

        let mut owner_popped = 0;
        while worker.pop().is_some() {
            owner_popped += 1;
        }
        for t in thieves {
            t.join().unwrap();
        }
        assert_eq!(owner_popped + taken.load(Ordering::SeqCst), 4000);
    }
}
