#![cfg(loom)]

//! Loom model for the work-stealing deque: the owner pushes two elements
//! then pops, while a single thief steals concurrently. Every element must
//! be observed by exactly one side.

use loom::thread;

use wf_concurrent::{deque, StealError};

#[test]
fn owner_pop_and_single_thief_steal_converge_without_duplication() {
    loom::model(|| {
        let (worker, stealer) = deque::with_capacity::<u32>(4);
        worker.push(1);
        worker.push(2);

        let thief = thread::spawn(move || loop {
            match stealer.steal() {
                Ok(v) => break Some(v),
                Err(StealError::Retry) => continue,
                Err(StealError::Empty) => break None,
            }
        });

        let owner_popped = worker.pop();
        let stolen = thief.join().unwrap();

        let mut seen = Vec::new();
        seen.extend(owner_popped);
        seen.extend(stolen);
        seen.sort_unstable();
        assert!(seen == [1] || seen == [2] || seen == [1, 2]);
    });
}
