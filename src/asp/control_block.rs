//! The control block: strong count (wait-free), weak count (plain atomic
//! word), and tag-dispatched dispose/destroy in place of virtual calls.
//! `T`'s concrete layout is only known to the two function pointers stamped
//! in at construction; everything generic over the control block works
//! through the type-erased [`ControlBlockHeader`].

use crate::counter::WaitFreeCounter;
use crate::loom::{AtomicU32, Ordering::*};
use core::cell::UnsafeCell;
use core::mem::ManuallyDrop;
use core::ptr::NonNull;

pub(crate) struct ControlBlockHeader {
    pub(crate) strong: WaitFreeCounter,
    pub(crate) weak: AtomicU32,
    dispose: unsafe fn(NonNull<ControlBlockHeader>),
    destroy: unsafe fn(NonNull<ControlBlockHeader>),
}

/// Concrete allocation for a `Shared<T>` constructed in place: header first
/// so a `ControlBlockHeader` pointer and a `Repr<T>` pointer are the same
/// address, letting the type-erased header recover its concrete layout
/// inside `dispose`/`destroy` without needing a vtable.
#[repr(C)]
struct Repr<T> {
    header: ControlBlockHeader,
    // The payload is written once at construction and only ever read
    // through `Deref` while a strong handle is live; it needs no
    // loom-instrumented cell, unlike the header's counters.
    value: UnsafeCell<ManuallyDrop<T>>,
}

unsafe fn dispose_fn<T>(header: NonNull<ControlBlockHeader>) {
    let repr = header.as_ptr() as *mut Repr<T>;
    // SAFETY: called exactly once, from the strong count's zero transition,
    // at which point no `Shared<T>` can still be dereferencing the value.
    unsafe {
        let value_ptr = core::ptr::addr_of_mut!((*repr).value);
        ManuallyDrop::drop(&mut *(*value_ptr).get());
    }
}

unsafe fn destroy_fn<T>(header: NonNull<ControlBlockHeader>) {
    let repr = header.as_ptr() as *mut Repr<T>;
    // SAFETY: called exactly once, after the hazard engine confirms no
    // slot still protects this address.
    unsafe { drop(Box::from_raw(repr)) };
}

pub(crate) fn allocate<T>(value: T) -> (NonNull<ControlBlockHeader>, NonNull<T>) {
    let repr = Box::into_raw(Box::new(Repr {
        header: ControlBlockHeader {
            strong: WaitFreeCounter::new(1),
            weak: AtomicU32::new(1),
            dispose: dispose_fn::<T>,
            destroy: destroy_fn::<T>,
        },
        value: UnsafeCell::new(ManuallyDrop::new(value)),
    }));
    // SAFETY: `repr` was just allocated, never null.
    let header = unsafe { NonNull::new_unchecked(repr as *mut ControlBlockHeader) };
    let data = data_ptr::<T>(header);
    (header, data)
}

/// A control block for a `Shared<T>` built from an already-boxed value plus a
/// caller-supplied disposer, so disposal can run arbitrary cleanup before the
/// value itself drops. The header and the payload are two separate
/// allocations here, unlike [`Repr<T>`], which makes this an *aliased*
/// construction: such a `Shared<T>` cannot be stored in an
/// [`crate::asp::AtomicSharedPtr`], which recomputes the data pointer from
/// the header assuming the in-place layout `allocate` produces.
struct BoxedRepr<T> {
    header: ControlBlockHeader,
    data: *mut T,
    disposer: UnsafeCell<ManuallyDrop<Box<dyn FnMut(&mut T) + Send>>>,
}

unsafe fn dispose_boxed_fn<T>(header: NonNull<ControlBlockHeader>) {
    let repr = header.as_ptr() as *mut BoxedRepr<T>;
    // SAFETY: called exactly once, from the strong count's zero transition.
    unsafe {
        let data = (*repr).data;
        let disposer = &mut *(*repr).disposer.get();
        (disposer)(&mut *data);
        ManuallyDrop::drop(disposer);
        drop(Box::from_raw(data));
    }
}

unsafe fn destroy_boxed_fn<T>(header: NonNull<ControlBlockHeader>) {
    let repr = header.as_ptr() as *mut BoxedRepr<T>;
    // SAFETY: called exactly once, after the hazard engine confirms no
    // slot still protects this address.
    unsafe { drop(Box::from_raw(repr)) };
}

/// Builds a control block around an existing `Box<T>`, running `disposer`
/// on the value just before it drops.
pub(crate) fn allocate_boxed<T>(
    value: Box<T>,
    disposer: Box<dyn FnMut(&mut T) + Send>,
) -> (NonNull<ControlBlockHeader>, NonNull<T>) {
    let data = Box::into_raw(value);
    let repr = Box::into_raw(Box::new(BoxedRepr {
        header: ControlBlockHeader {
            strong: WaitFreeCounter::new(1),
            weak: AtomicU32::new(1),
            dispose: dispose_boxed_fn::<T>,
            destroy: destroy_boxed_fn::<T>,
        },
        data,
        disposer: UnsafeCell::new(ManuallyDrop::new(disposer)),
    }));
    // SAFETY: both pointers were just allocated, never null.
    unsafe {
        (
            NonNull::new_unchecked(repr as *mut ControlBlockHeader),
            NonNull::new_unchecked(data),
        )
    }
}

/// Recovers the payload pointer for a non-aliased control block allocated
/// by [`allocate`]. Aliased `Shared<T>` handles carry their own,
/// independently tracked data pointer instead of calling this.
pub(crate) fn data_ptr<T>(header: NonNull<ControlBlockHeader>) -> NonNull<T> {
    let repr = header.as_ptr() as *mut Repr<T>;
    // SAFETY: field projection through a raw pointer, no reference created.
    unsafe {
        let value_ptr = core::ptr::addr_of_mut!((*repr).value) as *mut T;
        NonNull::new_unchecked(value_ptr)
    }
}

/// Releases one strong reference. If this call observes the strong count
/// reaching zero, disposes the payload and releases the control block's own
/// implicit weak reference.
///
/// # Safety
/// `header` must have been obtained from a live strong handle that is being
/// dropped or transferred away exactly once by this call.
pub(crate) unsafe fn release_strong<T>(header: NonNull<ControlBlockHeader>) {
    let hdr = unsafe { header.as_ref() };
    if hdr.strong.decrement(1) {
        unsafe { (hdr.dispose)(header) };
        release_weak(header);
    }
}

/// Releases one weak reference (including the implicit one the strong side
/// holds). If this is the last one, retires the control block through the
/// hazard engine rather than freeing it immediately.
///
/// # Safety
/// `header` must have been obtained from a live weak reference being
/// dropped or transferred away exactly once by this call.
pub(crate) unsafe fn release_weak(header: NonNull<ControlBlockHeader>) {
    let hdr = unsafe { header.as_ref() };
    let prev = hdr.weak.fetch_sub(1, AcqRel);
    debug_assert!(prev >= 1, "weak count underflow");
    if prev == 1 {
        let addr = header.as_ptr() as usize;
        // SAFETY: `destroy_via_header` recovers the correct destroy
        // function via the header itself; the hazard domain guarantees no
        // protected reader remains by the time it calls this.
        unsafe {
            crate::hazard::Domain::global().retire(addr, destroy_via_header);
        }
    }
}

unsafe fn destroy_via_header(addr: usize) {
    // SAFETY: `addr` was produced from a valid, still-allocated header by
    // `release_weak` immediately above; the hazard engine only calls this
    // once no slot protects it any longer.
    let header = unsafe { NonNull::new_unchecked(addr as *mut ControlBlockHeader) };
    let destroy = unsafe { header.as_ref() }.destroy;
    unsafe { destroy(header) };
}

/// Increments the weak count. Safe to call any time a live strong or weak
/// reference to `header` is held by the caller.
pub(crate) fn acquire_weak(header: NonNull<ControlBlockHeader>) {
    // SAFETY: caller holds a live reference, so `header` is valid.
    unsafe { header.as_ref() }.weak.fetch_add(1, AcqRel);
}
