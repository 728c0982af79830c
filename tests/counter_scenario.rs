//! Wait-free counter reanimation rejection, exercised
//! end-to-end through the public ASP surface since `WaitFreeCounter` itself
//! is crate-private. Thread A drops the only strong handle (driving the
//! count 1 -> 0); thread B concurrently tries to upgrade a weak handle to
//! the same object. Exactly one of {A's drop zeroed it, B's upgrade failed}
//! must hold, and a successful upgrade must observe a live object.

use std::thread;
use wf_concurrent::Shared;

#[test]
fn concurrent_drop_and_upgrade_never_resurrects() {
    for _ in 0..1000 {
        let shared = Shared::new(7i32);
        let weak = Shared::downgrade(&shared);

        let dropper = thread::spawn(move || drop(shared));
        let upgrader = thread::spawn(move || weak.upgrade().map(|s| *s));

        dropper.join().unwrap();
        let upgraded = upgrader.join().unwrap();

        // If the upgrade succeeded, it must have observed the live value;
        // there's no interleaving where a partially-disposed object is
        // handed back.
        if let Some(value) = upgraded {
            assert_eq!(value, 7);
        }
    }
}

#[test]
fn many_threads_race_the_same_downgrade() {
    let shared = Shared::new(1u32);
    let weak = Shared::downgrade(&shared);

    let upgraders: Vec<_> = (0..8)
        .map(|_| {
            let weak = weak.clone();
            thread::spawn(move || weak.upgrade().is_some())
        })
        .collect();

    let results: Vec<bool> = upgraders.into_iter().map(|t| t.join().unwrap()).collect();
    // `shared` is still alive, so every concurrent upgrade must succeed.
    assert!(results.iter().all(|&ok| ok));
    drop(shared);
}
