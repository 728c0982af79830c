//! Queue MPMC exact transfer.
//! 4 producers push `{0..999}` each, 4 consumers drain all 4000; the
//! consumers' union must equal `{0..999}` repeated four times (as a
//! multiset), i.e. every value 0..999 is seen by exactly 4 pops total.

use std::sync::Arc;
use std::thread;
use wf_concurrent::{Mpmc, StateQueue};

#[test]
fn mpmc_exact_transfer_of_4000_elements() {
    let q: Arc<StateQueue<u32, Mpmc>> = Arc::new(StateQueue::with_capacity(64));

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let q = q.clone();
            thread::spawn(move || {
                for i in 0..1000u32 {
                    q.push(i);
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let q = q.clone();
            thread::spawn(move || {
                let mut values = Vec::with_capacity(1000);
                for _ in 0..1000 {
                    values.push(q.pop());
                }
                values
            })
        })
        .collect();

    for p in producers {
        p.join().unwrap();
    }

    let mut counts = [0u32; 1000];
    for c in consumers {
        for v in c.join().unwrap() {
            counts[v as usize] += 1;
        }
    }
    assert!(counts.iter().all(|&n| n == 4), "every value 0..999 must be seen exactly 4 times");
}
