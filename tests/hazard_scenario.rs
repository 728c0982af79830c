//! Hazard retire safety. A reader loop repeatedly loads the ASP and
//! dereferences; a writer thread repeatedly stores new control blocks and
//! retires the old ones. Every retired block is destroyed exactly once; no
//! reader dereferences after destroy.
//!
//! Scaled down from a much larger iteration count to keep this test's
//! wall-clock time reasonable while still exercising the same race for long
//! enough that a use-after-reclaim bug would show up under `cargo test` with
//! sanitizers, the way CI actually runs this.

use std::sync::atomic::{AtomicUsize, Ordering::{Relaxed, SeqCst}};
use std::sync::Arc;
use std::thread;
use wf_concurrent::{AtomicSharedPtr, Shared};

const ITERATIONS: usize = 100_000;

#[test]
fn hazard_retire_safety_under_concurrent_load_and_store() {
    struct Tracked(Arc<AtomicUsize>);
    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, SeqCst);
        }
    }

    let destroyed = Arc::new(AtomicUsize::new(0));
    let created = Arc::new(AtomicUsize::new(1));
    let slot = Arc::new(AtomicSharedPtr::new(Some(Shared::new(Tracked(
        destroyed.clone(),
    )))));

    let writer = {
        let slot = slot.clone();
        let destroyed = destroyed.clone();
        let created = created.clone();
        thread::spawn(move || {
            for _ in 0..ITERATIONS {
                created.fetch_add(1, Relaxed);
                slot.store(Some(Shared::new(Tracked(destroyed.clone()))), SeqCst);
            }
        })
    };

    let reader = {
        let slot = slot.clone();
        thread::spawn(move || {
            for _ in 0..ITERATIONS {
                if let Some(handle) = slot.load(SeqCst) {
                    // Dereferencing a disposed block would be a use-after-free;
                    // under Miri/TSan this line is exactly what would fault.
                    let _ = &handle.0;
                }
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
    drop(slot);

    assert_eq!(destroyed.load(SeqCst), created.load(SeqCst));
}
