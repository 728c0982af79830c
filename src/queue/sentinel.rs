//! Sentinel variant of the bounded queue: elements that fit in a single
//! atomic word, with one reserved value (`NIL`) that can never be a real
//! element, letting each slot be a single atomic rather than a state byte
//! plus a separate cell.

use super::{capacity_for, remap_index, QueueMode, TryPopError, TryPushError};
use crate::loom::{spin_loop, AtomicUsize, Ordering::*};
use core::marker::PhantomData;

/// A type usable with [`SentinelQueue`]: representable in a `usize` and
/// excluding one reserved bit pattern that stands in for "slot empty."
pub trait Sentinel: Copy {
    /// The reserved value. Never produced by encoding a real element.
    const NIL: usize;

    /// Encodes `self` into its atomic-word representation.
    fn encode(self) -> usize;

    /// # Safety
    /// `raw` must have come from [`Sentinel::encode`] and not equal `NIL`.
    unsafe fn decode(raw: usize) -> Self;
}

/// A bounded MPMC/SPSC queue whose slots are single atomic words. Producers
/// publish with `exchange(value, Release)`, consumers claim with
/// `exchange(NIL, Acquire)`; the MPMC path treats a read-back of `NIL`
/// (lost race, or not yet published) as "not ready yet" and spins.
pub struct SentinelQueue<
    T: Sentinel,
    M: QueueMode,
    const TOTAL_ORDER: bool = false,
    const MAXIMIZE_THROUGHPUT: bool = false,
> {
    slots: Box<[AtomicUsize]>,
    capacity: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
    _marker: PhantomData<(T, M)>,
}

unsafe impl<T: Sentinel + Send, M: QueueMode> Send for SentinelQueue<T, M> {}
unsafe impl<T: Sentinel + Send, M: QueueMode> Sync for SentinelQueue<T, M> {}

impl<T: Sentinel, M: QueueMode, const TOTAL_ORDER: bool, const MAXIMIZE_THROUGHPUT: bool>
    SentinelQueue<T, M, TOTAL_ORDER, MAXIMIZE_THROUGHPUT>
{
    /// Creates an empty queue whose capacity is `requested` rounded up to a
    /// power of two.
    pub fn with_capacity(requested: usize) -> Self {
        let capacity = capacity_for(requested);
        let slots = (0..capacity).map(|_| AtomicUsize::new(T::NIL)).collect();
        Self {
            slots,
            capacity,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            _marker: PhantomData,
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

    fn slot(&self, index: usize) -> &AtomicUsize {
        &self.slots[remap_index(index, self.capacity)]
    }

    fn reserve_push(&self) -> Option<usize> {
        if M::IS_SPSC {
            let head = self.head.load(Relaxed);
            let tail = self.tail.load(Acquire);
            if head.wrapping_sub(tail) >= self.capacity {
                return None;
            }
            self.head.store(head + 1, Relaxed);
            Some(head)
        } else {
            loop {
                let head = self.head.load(Acquire);
                let tail = self.tail.load(Acquire);
                if head.wrapping_sub(tail) >= self.capacity {
                    return None;
                }
                if self
                    .head
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
            let tail = self.tail.load(Relaxed);
            let head = self.head.load(Acquire);
            if head.wrapping_sub(tail) == 0 {
                return None;
            }
            self.tail.store(tail + 1, Relaxed);
            Some(tail)
        } else {
            loop {
                let tail = self.tail.load(Acquire);
                let head = self.head.load(Acquire);
                if head.wrapping_sub(tail) == 0 {
                    return None;
                }
                if self
                    .tail
                    .compare_exchange_weak(tail, tail + 1, Self::order(), Relaxed)
                    .is_ok()
                {
                    return Some(tail);
                }
                spin_loop();
            }
        }
    }

    fn publish(&self, index: usize, value: T) {
        let raw = value.encode();
        debug_assert_ne!(raw, T::NIL, "encoded value collides with the sentinel");
        let slot = self.slot(index);
        loop {
            if slot.load(Acquire) == T::NIL {
                let prev = slot.swap(raw, Release);
                if prev == T::NIL {
                    return;
                }
                // A consumer hadn't yet claimed the previous occupant;
                // restore it and keep waiting. Only reachable if callers
                // violate the cardinality their `M` promises.
                slot.store(prev, Release);
            }
            if MAXIMIZE_THROUGHPUT {
                let _ = slot.load(Relaxed);
            }
            spin_loop();
        }
    }

    fn consume(&self, index: usize) -> T {
        let slot = self.slot(index);
        loop {
            let raw = slot.swap(T::NIL, Acquire);
            if raw != T::NIL {
                // SAFETY: `raw` was produced by `encode` in `publish` and is
                // not `NIL`.
                return unsafe { T::decode(raw) };
            }
            slot.store(T::NIL, Relaxed);
            if MAXIMIZE_THROUGHPUT {
                let _ = slot.load(Relaxed);
            }
            spin_loop();
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
        let index = if M::IS_SPSC {
            let head = self.head.load(Relaxed);
            self.head.store(head + 1, Relaxed);
            head
        } else {
            self.head.fetch_add(1, Self::order())
        };
        self.publish(index, value);
    }

    /// Dequeues a value, waiting for a producer if necessary. Never fails.
    pub fn pop(&self) -> T {
        let index = if M::IS_SPSC {
            let tail = self.tail.load(Relaxed);
            self.tail.store(tail + 1, Relaxed);
            tail
        } else {
            self.tail.fetch_add(1, Self::order())
        };
        self.consume(index)
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
        let head = self.head.load(Relaxed);
        let tail = self.tail.load(Relaxed);
        head.wrapping_sub(tail)
    }
}
