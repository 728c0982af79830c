//! Deque steal convergence. Owner pushes `{0..9999}`,
//! sleeps briefly, then 12 thieves steal until empty; every element is
//! observed exactly once across the owner's remaining pops and the thieves'
//! steals.

use std::collections::HashSet;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use wf_concurrent::{deque, StealError};

#[test]
fn twelve_thieves_converge_with_owner_on_ten_thousand_elements() {
    let (worker, stealer) = deque::with_capacity::<u32>(64);
    for i in 0..10_000u32 {
        worker.push(i);
    }

    let seen = Mutex::new(HashSet::with_capacity(10_000));
    thread::sleep(Duration::from_millis(1));

    thread::scope(|scope| {
        let thieves: Vec<_> = (0..12)
            .map(|_| {
                let stealer = stealer.clone();
                let seen = &seen;
                scope.spawn(move || loop {
                    match stealer.steal() {
                        Ok(v) => {
                            let mut seen = seen.lock().unwrap();
                            assert!(seen.insert(v), "element {v} observed twice");
                        }
                        Err(StealError::Retry) => continue,
                        Err(StealError::Empty) => break,
                    }
                })
            })
            .collect();

        while let Some(v) = worker.pop() {
            let mut seen = seen.lock().unwrap();
            assert!(seen.insert(v), "element {v} observed twice");
        }

        for t in thieves {
            t.join().unwrap();
        }
    });

    // The thieves may have raced the owner to `Empty` before every element
    // was claimed; drain whatever the owner still has left.
    while let Some(v) = worker.pop() {
        let mut seen = seen.lock().unwrap();
        assert!(seen.insert(v), "element {v} observed twice");
    }

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.len(), 10_000);
    assert_eq!(seen, (0..10_000u32).collect::<HashSet<_>>());
}
