#![cfg(loom)]

//! Loom model for the bounded queues: a producer and a consumer racing a
//! single slot. Kept to one element and one thread per side since loom's
//! state space is exponential in both.

use loom::thread;

use wf_concurrent::{Sentinel, SentinelQueue, Spsc, TryPopError};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Item(u32);

impl Sentinel for Item {
    const NIL: usize = usize::MAX;

    fn encode(self) -> usize {
        self.0 as usize
    }

    unsafe fn decode(raw: usize) -> Self {
        Item(raw as u32)
    }
}

#[test]
fn single_element_spsc_transfer_is_observed_exactly_once() {
    loom::model(|| {
        let q = std::sync::Arc::new(SentinelQueue::<Item, Spsc>::with_capacity(2));

        let producer = {
            let q = q.clone();
            thread::spawn(move || q.try_push(Item(1)).unwrap())
        };

        let consumer = {
            let q = q.clone();
            thread::spawn(move || loop {
                match q.try_pop() {
                    Ok(v) => break v,
                    Err(TryPopError::Empty) => continue,
                }
            })
        };

        producer.join().unwrap();
        let value = consumer.join().unwrap();
        assert_eq!(value, Item(1));
    });
}
