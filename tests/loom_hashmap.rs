#![cfg(loom)]

//! Loom model for the hashmap: two threads concurrently insert distinct
//! keys into a shared map; a third observes both once both insertions have
//! joined. Kept to two keys since hazard-pointer reclamation inside `set`
//! already gives loom plenty of interleavings to explore.

use loom::sync::Arc;
use loom::thread;

use wf_concurrent::ConcurrentHashMap;

#[test]
fn concurrent_inserts_of_distinct_keys_are_both_visible() {
    loom::model(|| {
        let map: Arc<ConcurrentHashMap<u32, u32>> =
            Arc::new(ConcurrentHashMap::with_capacity(16).unwrap());

        let t1 = {
            let map = map.clone();
            thread::spawn(move || map.set(1, 10).unwrap())
        };
        let t2 = {
            let map = map.clone();
            thread::spawn(move || map.set(2, 20).unwrap())
        };

        t1.join().unwrap();
        t2.join().unwrap();

        assert_eq!(map.get(&1), Some(10));
        assert_eq!(map.get(&2), Some(20));
    });
}
