//! ASP single-store visibility.

use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::Arc;
use std::thread;
use wf_concurrent::{AtomicSharedPtr, Shared};

#[test]
fn single_store_is_visible_and_destroyed_exactly_once() {
    let destroyed = Arc::new(AtomicUsize::new(0));

    struct Tracked {
        value: u32,
        destroyed: Arc<AtomicUsize>,
    }
    impl Drop for Tracked {
        fn drop(&mut self) {
            self.destroyed.fetch_add(1, SeqCst);
        }
    }

    let slot = Arc::new(AtomicSharedPtr::new(None));
    let writer = {
        let slot = slot.clone();
        let destroyed = destroyed.clone();
        thread::spawn(move || {
            slot.store(
                Some(Shared::new(Tracked { value: 42, destroyed })),
                SeqCst,
            );
        })
    };
    writer.join().unwrap();

    let reader = {
        let slot = slot.clone();
        thread::spawn(move || {
            let loaded = slot.load(SeqCst).expect("store happened-before this load");
            assert_eq!(loaded.value, 42);
        })
    };
    reader.join().unwrap();

    // Nothing still alive should hold the allocation; dropping the slot
    // releases the last strong reference.
    drop(slot);
    assert_eq!(destroyed.load(SeqCst), 1);
}
