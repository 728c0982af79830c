//! State-byte variant of the bounded queue: a per-slot state byte
//! (`EMPTY → STORING → STORED → LOADING → EMPTY`) plus a generically typed
//! element cell, for payloads that don't fit in a single atomic word.

use super::{capacity_for, remap_index, QueueMode, TryPopError, TryPushError};
use crate::loom::{spin_loop, AtomicU8, AtomicUsize, Ordering::*, UnsafeCell};
use core::marker::PhantomData;
use core::mem::MaybeUninit;

const EMPTY: u8 = 0;
const STORING: u8 = 1;
const STORED: u8 = 2;
const LOADING: u8 = 3;

struct Slot<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T: Send> Sync for Slot<T> {}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Spins until `slot`'s state reaches `want`, optionally interleaving a
/// relaxed re-load between pause instructions (the "maximize throughput"
/// mode) to avoid broadcasting read-for-ownership traffic.
#[inline]
fn wait_for<const MAXIMIZE_THROUGHPUT: bool>(state: &AtomicU8, want: u8) {
    loop {
        let current = state.load(Acquire);
        if current == want {
            return;
        }
        if MAXIMIZE_THROUGHPUT {
            let _ = state.load(Relaxed);
        }
        spin_loop();
    }
}

/// A bounded MPMC/SPSC queue using a state byte per slot. `M` selects
/// producer/consumer cardinality; `TOTAL_ORDER` upgrades index advances to
/// sequentially consistent ordering for a global FIFO view across all
/// observers; `MAXIMIZE_THROUGHPUT` changes how the busy-wait loops poll.
pub struct StateQueue<
    T,
    M: QueueMode,
    const TOTAL_ORDER: bool = false,
    const MAXIMIZE_THROUGHPUT: bool = false,
> {
    slots: Box<[Slot<T>]>,
    capacity: usize,
    // Kept on separate allocations (one `Box<[Slot<T>]>` away from these two
    // words) so false sharing between the counters and the slot array is
    // limited to whatever the allocator happens to place nearby; the
    // counters themselves sit a cache line apart via the padding below.
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    _mode: PhantomData<M>,
}

#[repr(align(64))]
struct CachePadded<T>(T);

unsafe impl<T: Send> Send for StateQueue<T, crate::queue::Mpmc> {}
unsafe impl<T: Send> Sync for StateQueue<T, crate::queue::Mpmc> {}
unsafe impl<T: Send> Send for StateQueue<T, crate::queue::Spsc> {}
unsafe impl<T: Send> Sync for StateQueue<T, crate::queue::Spsc> {}

impl<T, M: QueueMode, const TOTAL_ORDER: bool, const MAXIMIZE_THROUGHPUT: bool>
    StateQueue<T, M, TOTAL_ORDER, MAXIMIZE_THROUGHPUT>
{
    /// Creates an empty queue whose capacity is `requested` rounded up to a
    /// power of two.
    pub fn with_capacity(requested: usize) -> Self {
        let capacity = capacity_for(requested);
        let slots = (0..capacity).map(|_| Slot::new()).collect();
        Self {
            slots,
            capacity,
            head: CachePadded(AtomicUsize::new(0)),
            tail: CachePadded(AtomicUsize::new(0)),
            _mode: PhantomData,
        }
    }

    /// The queue's fixed slot count.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn order() -> crate::loom::Ordering {
        if TOTAL_ORDER {
            SeqCst
        } else {
            AcqRel
        }
    }

    fn slot(&self, index: usize) -> &Slot<T> {
        &self.slots[remap_index(index, self.capacity)]
    }

    fn reserve_push(&self) -> Option<usize> {
        if M::IS_SPSC {
            let head = self.head.0.load(Relaxed);
            let tail = self.tail.0.load(Acquire);
            if head.wrapping_sub(tail) >= self.capacity {
                return None;
            }
            self.head.0.store(head + 1, Relaxed);
            Some(head)
        } else {
            loop {
                let head = self.head.0.load(Acquire);
                let tail = self.tail.0.load(Acquire);
                if head.wrapping_sub(tail) >= self.capacity {
                    return None;
                }
                if self
                    .head
                    .0
                    .compare_exchange_weak(head, head + 1, Self::order(), Relaxed)
                    .is_ok()
                {
                    return Some(head);
                }
                spin_loop();
            }
        }
    }

    fn reserve_pop(&self) -> Option<usize> {
        if M::IS_SPSC {
            let tail = self.tail.0.load(Relaxed);
            let head = self.head.0.load(Acquire);
            if head.wrapping_sub(tail) == 0 {
                return None;
            }
            self.tail.0.store(tail + 1, Relaxed);
            Some(tail)
        } else {
            loop {
                let tail = self.tail.0.load(Acquire);
                let head = self.head.0.load(Acquire);
                if head.wrapping_sub(tail) == 0 {
                    return None;
                }
                if self
                    .tail
                    .0
                    .compare_exchange_weak(tail, tail + 1, Self::order(), Relaxed)
                    .is_ok()
                {
                    return Some(tail);
                }
                spin_loop();
            }
        }
    }

    /// Unconditionally reserves the next index. Capacity is enforced by
    /// `publish` spinning on the slot itself being `EMPTY` before writing,
    /// not by refusing to reserve, keeping push/pop total operations.
    fn blocking_reserve_push(&self) -> usize {
        if M::IS_SPSC {
            let head = self.head.0.load(Relaxed);
            self.head.0.store(head + 1, Relaxed);
            head
        } else {
            self.head.0.fetch_add(1, Self::order())
        }
    }

    fn blocking_reserve_pop(&self) -> usize {
        if M::IS_SPSC {
            let tail = self.tail.0.load(Relaxed);
            loop {
                let head = self.head.0.load(Acquire);
                if head.wrapping_sub(tail) > 0 {
                    self.tail.0.store(tail + 1, Relaxed);
                    return tail;
                }
                spin_loop();
            }
        } else {
            self.tail.0.fetch_add(1, Self::order())
        }
    }

    /// Attempts to enqueue `value`, failing immediately under backpressure.
    pub fn try_push(&self, value: T) -> Result<(), TryPushError<T>> {
        let Some(index) = self.reserve_push() else {
            return Err(TryPushError(value));
        };
        self.publish(index, value);
        Ok(())
    }

    /// Attempts to dequeue a value, failing immediately if empty.
    pub fn try_pop(&self) -> Result<T, TryPopError> {
        let Some(index) = self.reserve_pop() else {
            return Err(TryPopError);
        };
        Ok(self.consume(index))
    }

    /// Enqueues `value`, waiting for a peer to free a slot if necessary.
    /// Never fails.
    pub fn push(&self, value: T) {
        let index = self.blocking_reserve_push();
        self.publish(index, value);
    }

    /// Dequeues a value, waiting for a producer if necessary. Never fails.
    pub fn pop(&self) -> T {
        let index = self.blocking_reserve_pop();
        self.consume(index)
    }

    fn publish(&self, index: usize, value: T) {
        let slot = self.slot(index);
        wait_for::<MAXIMIZE_THROUGHPUT>(&slot.state, EMPTY);
        slot.state.store(STORING, Relaxed);
        // SAFETY: this index was exclusively reserved by the caller and its
        // state was just observed EMPTY, so no other thread touches the
        // cell until the STORED store below makes it visible.
        unsafe { (*slot.value.get()).write(value) };
        slot.state.store(STORED, Release);
    }

    fn consume(&self, index: usize) -> T {
        let slot = self.slot(index);
        wait_for::<MAXIMIZE_THROUGHPUT>(&slot.state, STORED);
        slot.state.store(LOADING, Relaxed);
        // SAFETY: state was STORED, guaranteeing `publish` finished writing;
        // this index is exclusively reserved by the caller.
        let value = unsafe { (*slot.value.get()).assume_init_read() };
        slot.state.store(EMPTY, Release);
        value
    }

    /// Advisory: whether the queue looked empty at some recent instant.
    pub fn was_empty(&self) -> bool {
        self.was_size() == 0
    }

    /// Advisory: whether the queue looked full at some recent instant.
    pub fn was_full(&self) -> bool {
        self.was_size() >= self.capacity
    }

    /// Advisory snapshot of the queue's occupied length.
    pub fn was_size(&self) -> usize {
        let head = self.head.0.load(Relaxed);
        let tail = self.tail.0.load(Relaxed);
        head.wrapping_sub(tail)
    }
}

impl<T, M: QueueMode, const TOTAL_ORDER: bool, const MAXIMIZE_THROUGHPUT: bool> Drop
    for StateQueue<T, M, TOTAL_ORDER, MAXIMIZE_THROUGHPUT>
{
    fn drop(&mut self) {
        let head = *self.head.0.get_mut();
        let tail = *self.tail.0.get_mut();
        let mut index = tail;
        while index != head {
            let slot = self.slot(index);
            if slot.state.load(Relaxed) == STORED {
                // SAFETY: `&mut self` proves exclusivity; this slot still
                // holds an initialized, never-consumed value.
                unsafe { (*slot.value.get()).assume_init_drop() };
            }
            index = index.wrapping_add(1);
        }
    }
}
