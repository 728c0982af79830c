//! Hashmap insert+lookup. Insert `(0..4095, i)`,
//! look every key up, delete `(0..499)`, confirm those miss, reinsert with
//! `10000+i`, confirm the new value is visible.

use wf_concurrent::ConcurrentHashMap;

#[test]
fn insert_lookup_delete_reinsert_over_4096_keys() {
    let map: ConcurrentHashMap<u32, u32> = ConcurrentHashMap::with_capacity(8192).unwrap();

    for i in 0..4096u32 {
        map.set(i, i).unwrap();
    }
    for i in 0..4096u32 {
        assert_eq!(map.get(&i), Some(i));
    }

    for i in 0..500u32 {
        map.delete(&i);
    }
    for i in 0..500u32 {
        assert_eq!(map.get(&i), None);
    }
    for i in 500..4096u32 {
        assert_eq!(map.get(&i), Some(i));
    }

    for i in 0..500u32 {
        map.set(i, 10_000 + i).unwrap();
    }
    for i in 0..500u32 {
        assert_eq!(map.get(&i), Some(10_000 + i));
    }
}
