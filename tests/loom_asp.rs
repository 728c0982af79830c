#![cfg(loom)]

//! Loom model for `AtomicSharedPtr`/`Shared`: a writer stores a fresh
//! value while a reader loads and drops its handle, racing against a
//! final drop of the slot. No interleaving may double-free or leak.

use loom::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use loom::sync::Arc;
use loom::thread;

use wf_concurrent::{AtomicSharedPtr, Shared};

struct Counted(Arc<AtomicUsize>);

impl Drop for Counted {
    fn drop(&mut self) {
        self.0.fetch_add(1, SeqCst);
    }
}

#[test]
fn store_load_drop_destroys_every_value_exactly_once() {
    loom::model(|| {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let slot = Arc::new(AtomicSharedPtr::new(Some(Shared::new(Counted(
            destroyed.clone(),
        )))));

        let writer = {
            let slot = slot.clone();
            let destroyed = destroyed.clone();
            thread::spawn(move || {
                slot.store(Some(Shared::new(Counted(destroyed.clone()))), SeqCst);
            })
        };

        let reader = {
            let slot = slot.clone();
            thread::spawn(move || {
                if let Some(handle) = slot.load(SeqCst) {
                    let _ = &handle.0;
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();

        // Two handles were ever created (the initial one plus the writer's
        // replacement); dropping the slot must account for both.
        drop(slot);
        assert_eq!(destroyed.load(SeqCst), 2);
    });
}

#[test]
fn downgrade_upgrade_races_drop_without_resurrecting() {
    loom::model(|| {
        let shared = Shared::new(7i32);
        let weak = Shared::downgrade(&shared);

        let dropper = thread::spawn(move || drop(shared));
        let upgrader = thread::spawn(move || weak.upgrade().map(|s| *s));

        dropper.join().unwrap();
        let upgraded = upgrader.join().unwrap();
        if let Some(value) = upgraded {
            assert_eq!(value, 7);
        }
    });
}
