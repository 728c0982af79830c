//! Concurrent multi-level open-addressed hashmap: `L` levels of prime-sized
//! bucket arrays, probed in order; a key settles on the first level that
//! admits it and stays there until deleted.

mod cell;
mod sizing;

use crate::hazard::Domain;
use crate::loom::{AtomicPtr, AtomicUsize, Ordering::*};
use cell::{destroy_key, destroy_value, KeyCell, ValueCell};
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::marker::PhantomData;

pub use sizing::SizingError;

/// Failure modes for [`ConcurrentHashMap::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    /// No level had room for this key.
    ProbeExhausted,
    /// A cell allocation failed.
    AllocationFailed,
}

impl fmt::Display for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertError::ProbeExhausted => f.write_str("no level admitted this key"),
            InsertError::AllocationFailed => f.write_str("cell allocation failed"),
        }
    }
}

impl std::error::Error for InsertError {}

struct Bucket<K, V> {
    key: AtomicPtr<KeyCell<K>>,
    value: AtomicPtr<ValueCell<V>>,
}

impl<K, V> Bucket<K, V> {
    fn empty() -> Self {
        Self {
            key: AtomicPtr::new(core::ptr::null_mut()),
            value: AtomicPtr::new(core::ptr::null_mut()),
        }
    }
}

struct Level<K, V> {
    capacity: usize,
    buckets: Box<[Bucket<K, V>]>,
}

/// A concurrent hashmap whose buckets are reclaimed with hazard pointers
/// rather than locked. `S` is the hash builder, matching `std`'s own
/// `HashMap<K, V, S>` shape.
pub struct ConcurrentHashMap<K, V, S = RandomState> {
    levels: Box<[Level<K, V>]>,
    hasher: S,
    domain: &'static Domain,
    len: AtomicUsize,
    // `AtomicPtr<T>` is `Send`/`Sync` regardless of `T`, so without this the
    // auto traits would make this type `Send`/`Sync` even for non-`Send`
    // `K`/`V`, which `get`/`walk_all` dereferencing those pointers from any
    // thread would make unsound. This marker suppresses the blanket
    // derivation so the explicit, correctly bounded impls below apply.
    _not_auto_send_sync: PhantomData<*const ()>,
    _marker: PhantomData<(K, V)>,
}

unsafe impl<K: Send + Sync, V: Send + Sync, S: Send + Sync> Send for ConcurrentHashMap<K, V, S> {}
unsafe impl<K: Send + Sync, V: Send + Sync, S: Send + Sync> Sync for ConcurrentHashMap<K, V, S> {}

/// Configures level count and target occupancy before building a
/// [`ConcurrentHashMap`].
pub struct Builder {
    levels: usize,
    rho: f64,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            levels: sizing::DEFAULT_LEVELS,
            rho: sizing::DEFAULT_RHO,
        }
    }
}

impl Builder {
    /// Sets the number of levels to size (default [`sizing::DEFAULT_LEVELS`]).
    pub fn levels(mut self, levels: usize) -> Self {
        self.levels = levels;
        self
    }

    /// Sets the target load factor `rho` used when sizing each level
    /// (default [`sizing::DEFAULT_RHO`]).
    pub fn target_occupancy(mut self, rho: f64) -> Self {
        self.rho = rho;
        self
    }

    /// Builds a map sized for `expected_capacity` entries, hashing with
    /// [`RandomState`].
    pub fn build<K, V>(self, expected_capacity: usize) -> Result<ConcurrentHashMap<K, V>, SizingError> {
        self.build_with_hasher(expected_capacity, RandomState::default())
    }

    /// As [`Self::build`], but with an explicit hash builder.
    pub fn build_with_hasher<K, V, S>(
        self,
        expected_capacity: usize,
        hasher: S,
    ) -> Result<ConcurrentHashMap<K, V, S>, SizingError> {
        let caps = sizing::compute_level_capacities(expected_capacity, self.levels, self.rho)?;
        let levels = caps
            .into_iter()
            .map(|capacity| Level {
                capacity,
                buckets: (0..capacity).map(|_| Bucket::empty()).collect(),
            })
            .collect();
        Ok(ConcurrentHashMap {
            levels,
            hasher,
            domain: Domain::global(),
            len: AtomicUsize::new(0),
            _not_auto_send_sync: PhantomData,
            _marker: PhantomData,
        })
    }
}

impl<K, V> ConcurrentHashMap<K, V> {
    /// Builds a map sized for `expected_capacity` entries using the default
    /// level count and target occupancy.
    pub fn with_capacity(expected_capacity: usize) -> Result<Self, SizingError> {
        Builder::default().build(expected_capacity)
    }

    /// Starts a [`Builder`] for configuring level count and target occupancy.
    pub fn builder() -> Builder {
        Builder::default()
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> ConcurrentHashMap<K, V, S> {
    fn hash_of(&self, key: &K) -> u64 {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn bucket_index(&self, hash: u64, level: &Level<K, V>) -> usize {
        (hash % level.capacity as u64) as usize
    }

    /// Reads the value for `key`, returning a clone of it, or `None` on a
    /// miss. Protects the value cell with a hazard pointer for the duration
    /// of the read.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let hash = self.hash_of(key);
        for level in self.levels.iter() {
            let index = self.bucket_index(hash, level);
            let bucket = &level.buckets[index];
            let key_addr = self
                .domain
                .protect_with(|| bucket.key.load(Acquire) as usize);
            if key_addr == 0 {
                continue;
            }
            // SAFETY: `key_addr` is hazard-protected for the rest of this
            // scope.
            let key_cell = unsafe { &*(key_addr as *const KeyCell<K>) };
            let matches = key_cell.key == *key;
            if !matches {
                self.domain.release();
                continue;
            }
            let value_addr = self
                .domain
                .protect_with(|| bucket.value.load(Acquire) as usize);
            if value_addr == 0 {
                self.domain.release();
                continue;
            }
            // SAFETY: protected above for the duration of this read; the
            // hazard pointer is only released after the clone completes.
            let value_cell = unsafe { &*(value_addr as *const ValueCell<V>) };
            let result = value_cell.value.clone();
            self.domain.release();
            return Some(result);
        }
        None
    }

    /// Inserts or updates `key` with `value`.
    pub fn set(&self, key: K, value: V) -> Result<(), InsertError> {
        let hash = self.hash_of(&key);
        let mut new_key_cell = Some(KeyCell::new(key));

        for level in self.levels.iter() {
            let key_ref = new_key_cell.as_ref().expect("consumed only on success");
            let index = self.bucket_index(hash, level);
            let bucket = &level.buckets[index];

            let current_addr = self
                .domain
                .protect_with(|| bucket.key.load(Acquire) as usize);
            let current = current_addr as *mut KeyCell<K>;
            let admits = if current.is_null() {
                true
            } else {
                // SAFETY: `current` is hazard-protected for the extent of
                // this read.
                unsafe { &*current }.key == key_ref.key
            };
            self.domain.release();

            if !admits {
                continue;
            }

            let raw = Box::into_raw(new_key_cell.take().expect("not yet consumed"));
            let outcome = if current.is_null() {
                bucket
                    .key
                    .compare_exchange(core::ptr::null_mut(), raw, AcqRel, Relaxed)
            } else {
                // Key cell already present and equal: keep it, reuse slot.
                Ok(current)
            };

            match outcome {
                Ok(installed) if installed == current && !current.is_null() => {
                    // Reused an existing key cell; drop our provisional one.
                    unsafe { drop(Box::from_raw(raw)) };
                }
                Ok(_) => {
                    // We installed a brand new key cell (or it matches).
                }
                Err(_) => {
                    // Lost the race to install; put the cell back and move
                    // on to the next level, which will re-probe from there.
                    new_key_cell = Some(unsafe { Box::from_raw(raw) });
                    continue;
                }
            }

            let new_value = Box::into_raw(ValueCell::new(value));
            let old_value = bucket.value.swap(new_value, AcqRel);
            if !old_value.is_null() {
                // SAFETY: `old_value` was installed by a prior `set` and is
                // being unconditionally superseded; releasing its refcount
                // retires it once no reader holds it.
                let zeroed = unsafe { (*old_value).release() };
                unsafe {
                    cell::release_and_maybe_retire(
                        zeroed,
                        old_value as usize,
                        destroy_value::<V>,
                        self.domain,
                    )
                };
            } else {
                self.len.fetch_add(1, Relaxed);
            }
            return Ok(());
        }

        if let Some(unused) = new_key_cell {
            drop(unused);
        }
        Err(InsertError::ProbeExhausted)
    }

    /// Removes `key`, unconditionally reporting success whether or not it
    /// was present.
    pub fn delete(&self, key: &K) {
        let hash = self.hash_of(key);
        for level in self.levels.iter() {
            let index = self.bucket_index(hash, level);
            let bucket = &level.buckets[index];
            let current_addr = self
                .domain
                .protect_with(|| bucket.key.load(Acquire) as usize);
            let current = current_addr as *mut KeyCell<K>;
            if current.is_null() {
                self.domain.release();
                continue;
            }
            // SAFETY: `current` is hazard-protected for the extent of this
            // read.
            let mismatch = unsafe { &*current }.key != *key;
            self.domain.release();
            if mismatch {
                continue;
            }
            if bucket
                .key
                .compare_exchange(current, core::ptr::null_mut(), AcqRel, Relaxed)
                .is_err()
            {
                continue;
            }
            let old_value = bucket.value.swap(core::ptr::null_mut(), AcqRel);
            // SAFETY: `current` was just removed from the bucket by the CAS
            // above, so this thread uniquely owns releasing its refcount.
            let key_zeroed = unsafe { &*current }.release();
            unsafe {
                cell::release_and_maybe_retire(
                    key_zeroed,
                    current as usize,
                    destroy_key::<K>,
                    self.domain,
                )
            };
            if !old_value.is_null() {
                let value_zeroed = unsafe { (*old_value).release() };
                unsafe {
                    cell::release_and_maybe_retire(
                        value_zeroed,
                        old_value as usize,
                        destroy_value::<V>,
                        self.domain,
                    )
                };
                self.len.fetch_sub(1, Relaxed);
            }
            return;
        }
    }

    /// Advisory snapshot of the number of occupied buckets.
    pub fn len(&self) -> usize {
        self.len.load(Relaxed)
    }

    /// Advisory: whether the map looked empty at some recent instant.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visits every occupied `(key, value)` pair across every level, in no
    /// particular order. Not a linearizable snapshot: concurrent
    /// inserts/deletes may or may not be observed. Each thread holds only
    /// one hazard-protected address at a time, so the key and the value are
    /// each protected, cloned, and released in turn rather than handed to
    /// `visit` as live references.
    pub fn walk_all(&self, mut visit: impl FnMut(K, V))
    where
        K: Clone,
        V: Clone,
    {
        for level in self.levels.iter() {
            for bucket in level.buckets.iter() {
                let key_addr = self
                    .domain
                    .protect_with(|| bucket.key.load(Acquire) as usize);
                if key_addr == 0 {
                    continue;
                }
                // SAFETY: hazard-protected for the extent of this clone.
                let key = unsafe { &*(key_addr as *const KeyCell<K>) }.key.clone();
                self.domain.release();

                let value_addr = self
                    .domain
                    .protect_with(|| bucket.value.load(Acquire) as usize);
                if value_addr == 0 {
                    self.domain.release();
                    continue;
                }
                // SAFETY: see above.
                let value = unsafe { &*(value_addr as *const ValueCell<V>) }
                    .value
                    .clone();
                self.domain.release();

                visit(key, value);
            }
        }
    }

    /// As [`Self::walk_all`], but only visits `key`'s entry, if present.
    pub fn walk_key(&self, key: &K, mut visit: impl FnMut(V))
    where
        V: Clone,
    {
        let hash = self.hash_of(key);
        for level in self.levels.iter() {
            let index = self.bucket_index(hash, level);
            let bucket = &level.buckets[index];
            let key_addr = self
                .domain
                .protect_with(|| bucket.key.load(Acquire) as usize);
            if key_addr == 0 {
                continue;
            }
            // SAFETY: hazard-protected for the extent of this read.
            let matches = unsafe { &*(key_addr as *const KeyCell<K>) }.key == *key;
            self.domain.release();
            if !matches {
                continue;
            }
            let value_addr = self
                .domain
                .protect_with(|| bucket.value.load(Acquire) as usize);
            if value_addr != 0 {
                // SAFETY: see above.
                let value = unsafe { &*(value_addr as *const ValueCell<V>) }
                    .value
                    .clone();
                self.domain.release();
                visit(value);
            } else {
                self.domain.release();
            }
            return;
        }
    }

    /// Forces the reclaiming domain to process this thread's retired cells
    /// immediately, instead of waiting for the amortized threshold.
    pub fn cleanup(&self) {
        self.domain.cleanup_current_thread();
    }

    /// Snapshots every currently live `(key, value)` pair into an owned
    /// iterator. Like [`Self::walk_all`], not linearizable: it is built from
    /// the same best-effort single pass over every bucket, just collected
    /// up front instead of streamed through a callback.
    pub fn iter(&self) -> Iter<K, V>
    where
        K: Clone,
        V: Clone,
    {
        let mut items = Vec::new();
        self.walk_all(|k, v| items.push((k, v)));
        Iter {
            inner: items.into_iter(),
        }
    }
}

/// A point-in-time snapshot iterator over a [`ConcurrentHashMap`], returned
/// by [`ConcurrentHashMap::iter`].
pub struct Iter<K, V> {
    inner: std::vec::IntoIter<(K, V)>,
}

impl<K, V> Iterator for Iter<K, V> {
    type Item = (K, V);
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl<K, V, S> Drop for ConcurrentHashMap<K, V, S> {
    fn drop(&mut self) {
        for level in self.levels.iter_mut() {
            for bucket in level.buckets.iter_mut() {
                let key_ptr = *bucket.key.get_mut();
                if !key_ptr.is_null() {
                    unsafe { drop(Box::from_raw(key_ptr)) };
                }
                let value_ptr = *bucket.value.get_mut();
                if !value_ptr.is_null() {
                    unsafe { drop(Box::from_raw(value_ptr)) };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let map: ConcurrentHashMap<u32, String> = ConcurrentHashMap::with_capacity(64).unwrap();
        map.set(1, "one".to_string()).unwrap();
        assert_eq!(map.get(&1), Some("one".to_string()));
        assert_eq!(map.get(&2), None);
    }

    #[test]
    fn update_replaces_value_without_growing_len() {
        let map: ConcurrentHashMap<u32, u32> = ConcurrentHashMap::with_capacity(64).unwrap();
        map.set(1, 10).unwrap();
        map.set(1, 20).unwrap();
        assert_eq!(map.get(&1), Some(20));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn iter_snapshots_every_live_entry() {
        let map: ConcurrentHashMap<u32, u32> = ConcurrentHashMap::with_capacity(64).unwrap();
        for i in 0..10 {
            map.set(i, i * 10).unwrap();
        }
        let mut seen: Vec<_> = map.iter().collect();
        seen.sort();
        assert_eq!(seen, (0..10).map(|i| (i, i * 10)).collect::<Vec<_>>());
    }

    #[test]
    fn delete_then_reinsert_works() {
        let map: ConcurrentHashMap<u32, u32> = ConcurrentHashMap::with_capacity(64).unwrap();
        map.set(1, 10).unwrap();
        map.delete(&1);
        assert_eq!(map.get(&1), None);
        assert_eq!(map.len(), 0);
        map.set(1, 99).unwrap();
        assert_eq!(map.get(&1), Some(99));
    }

    #[test]
    fn walk_all_visits_every_live_entry() {
        let map: ConcurrentHashMap<u32, u32> = ConcurrentHashMap::with_capacity(64).unwrap();
        for i in 0..10 {
            map.set(i, i * 10).unwrap();
        }
        let mut seen = Vec::new();
        map.walk_all(|k, v| seen.push((k, v)));
        seen.sort();
        assert_eq!(seen, (0..10).map(|i| (i, i * 10)).collect::<Vec<_>>());
    }

    #[test]
    fn concurrent_insert_and_lookup_over_many_keys() {
        use std::sync::Arc;
        use std::thread;

        let map: Arc<ConcurrentHashMap<u32, u32>> =
            Arc::new(ConcurrentHashMap::with_capacity(8192).unwrap());
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let map = map.clone();
                thread::spawn(move || {
                    for i in 0..1024u32 {
                        let key = t * 1024 + i;
                        map.set(key, key).unwrap();
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }
        for key in 0..4096u32 {
            assert_eq!(map.get(&key), Some(key));
        }
    }
}
