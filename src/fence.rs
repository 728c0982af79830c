//! Asymmetric fence pairing: readers pay only a compiler reordering barrier
//! after publishing a hazard pointer; the hazard engine's writer side
//! periodically pays for a full cross-core synchronization so it can trust
//! that every reader's publication has become globally visible without
//! making every reader do the expensive half of the handshake.
//!
//! Two heavy-fence backends exist, selected at compile time:
//! - portable: `core::sync::atomic::fence(SeqCst)` on both sides. This is
//!   the universal fallback and is correct everywhere, just not free.
//! - `sys-fence` on `target_os = "linux"`: a process-wide `membarrier(2)`
//!   `MEMBARRIER_CMD_PRIVATE_EXPEDITED`, falling back to an `mprotect`
//!   TLB-shootdown trick if the membarrier command isn't supported.

use crate::loom::{fence as atomic_fence, Ordering};

/// The reader-side half of the pairing: a compiler barrier that prevents the
/// publish-then-reread sequence in [`crate::hazard::Domain::protect`] from
/// being reordered, without forcing any cross-core traffic.
#[inline(always)]
pub(crate) fn light_fence() {
    cfg_if::cfg_if! {
        if #[cfg(loom)] {
            // loom's model checker already accounts for every legal
            // reordering; a plain acquire/release pairing on the hazard
            // slot's own atomic is enough to keep it honest and it avoids
            // teaching loom about a compiler-only fence it can't model.
            atomic_fence(Ordering::Acquire);
        } else {
            // SAFETY: a compiler fence, not a CPU fence, only prevents the
            // optimizer from reordering the publish and the reread across it.
            core::sync::atomic::compiler_fence(Ordering::SeqCst);
        }
    }
}

/// The writer-side half: forces every other core running a thread of this
/// process to observe the publication made by [`light_fence`] before this
/// call returns, so a subsequent scan of all hazard slots is guaranteed to
/// see any pointer published before the `retire` that triggered the scan.
pub(crate) fn heavy_fence() {
    cfg_if::cfg_if! {
        if #[cfg(loom)] {
            atomic_fence(Ordering::SeqCst);
        } else if #[cfg(all(feature = "sys-fence", target_os = "linux"))] {
            linux::heavy_fence();
        } else {
            atomic_fence(Ordering::SeqCst);
        }
    }
}

#[cfg(all(feature = "sys-fence", target_os = "linux"))]
mod linux {
    use std::sync::atomic::{AtomicU8, Ordering::Relaxed};

    const UNKNOWN: u8 = 0;
    const MEMBARRIER: u8 = 1;
    const MPROTECT: u8 = 2;

    // Cached across the whole process: the first caller pays for probing
    // which mechanism the kernel supports, everyone after reuses the
    // answer. Never downgraded once a working mechanism is found.
    static STRATEGY: AtomicU8 = AtomicU8::new(UNKNOWN);

    pub(super) fn heavy_fence() {
        match STRATEGY.load(Relaxed) {
            MEMBARRIER => {
                membarrier();
            }
            MPROTECT => {
                mprotect_shootdown();
            }
            _ => probe_and_fence(),
        }
    }

    fn probe_and_fence() {
        if try_membarrier() {
            STRATEGY.store(MEMBARRIER, Relaxed);
            return;
        }
        STRATEGY.store(MPROTECT, Relaxed);
        mprotect_shootdown();
    }

    /// Issues `MEMBARRIER_CMD_PRIVATE_EXPEDITED`, registering the process
    /// for it on first use as the syscall requires. Returns whether the
    /// command is supported on this kernel.
    fn try_membarrier() -> bool {
        const MEMBARRIER_CMD_REGISTER_PRIVATE_EXPEDITED: libc::c_int = 1 << 3;
        const MEMBARRIER_CMD_PRIVATE_EXPEDITED: libc::c_int = 1 << 2;

        // SAFETY: `membarrier` is a simple syscall wrapper with no
        // pointer/lifetime requirements; failures are reported via errno
        // and handled below, never assumed to be fatal.
        let registered =
            unsafe { libc::syscall(libc::SYS_membarrier, MEMBARRIER_CMD_REGISTER_PRIVATE_EXPEDITED, 0) };
        if registered != 0 {
            return false;
        }
        let ret = unsafe { libc::syscall(libc::SYS_membarrier, MEMBARRIER_CMD_PRIVATE_EXPEDITED, 0) };
        ret == 0
    }

    fn membarrier() {
        const MEMBARRIER_CMD_PRIVATE_EXPEDITED: libc::c_int = 1 << 2;
        // SAFETY: see `try_membarrier`; this call is now known to succeed.
        unsafe {
            libc::syscall(libc::SYS_membarrier, MEMBARRIER_CMD_PRIVATE_EXPEDITED, 0);
        }
    }

    /// Forces a TLB shootdown (and therefore a memory barrier on every core
    /// currently running a thread of this process) by downgrading, then
    /// restoring, the protection of a resident dummy page. Used only when
    /// the kernel has no working `membarrier` support.
    fn mprotect_shootdown() {
        use std::sync::OnceLock;

        // Stored as a `usize`, not a `*mut c_void`: a raw pointer is neither
        // `Send` nor `Sync`, which a `static OnceLock` requires of its value.
        static DUMMY_PAGE: OnceLock<usize> = OnceLock::new();
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let page = *DUMMY_PAGE.get_or_init(|| unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                page_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                // Fatal: the heavy fence has no remaining fallback if it
                // cannot even allocate its probe page.
                std::process::abort();
            }
            ptr as usize
        });
        let page = page as *mut libc::c_void;
        // SAFETY: `page` is a process-owned anonymous mapping never
        // accessed by value; only its protection bits are toggled to
        // trigger the kernel's cross-CPU TLB invalidation IPI.
        unsafe {
            libc::mprotect(page, page_size, libc::PROT_READ);
            libc::mprotect(page, page_size, libc::PROT_READ | libc::PROT_WRITE);
        }
    }
}
