//! Bucketed hash map with insertion-sorted buckets
//!
//! A small keyed-lookup structure for handler-side state: a fixed number of
//! buckets, each holding a key-sorted array of entries. Lookups binary-search
//! a single bucket; bucket storage grows and shrinks in fixed steps, keeping
//! reallocation churn bounded and memory layout predictable.
//!
//! # Examples
//!
//! ```
//! use strand_web::map::BucketMap;
//!
//! let mut map = BucketMap::new(64);
//!
//! map.add("greeting", "hello");
//! map.add("greeting", "hi"); // replaces
//!
//! assert_eq!(map.find("greeting"), Some(&"hi"));
//! assert_eq!(map.len(), 1);
//! ```

use std::{
    borrow::Borrow,
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

/// Hash map with a fixed bucket count and key-sorted bucket arrays.
///
/// Entries own their keys and values; removal drops both. The per-bucket
/// growth step is `clamp(n_buckets / 32, 4, 64)` entries.
#[derive(Debug)]
pub struct BucketMap<K, V> {
    buckets: Box<[Bucket<K, V>]>,
    count: usize,
    step: usize,
}

#[derive(Debug)]
struct Bucket<K, V> {
    entries: Vec<(K, V)>,
}

impl<K: Hash + Ord, V> BucketMap<K, V> {
    /// Creates a map with `n_buckets` buckets.
    ///
    /// # Panics
    ///
    /// Panics if `n_buckets` is zero.
    pub fn new(n_buckets: usize) -> Self {
        assert!(n_buckets > 0, "BucketMap requires at least one bucket");

        Self {
            buckets: (0..n_buckets)
                .map(|_| Bucket {
                    entries: Vec::new(),
                })
                .collect(),
            count: 0,
            step: (n_buckets / 32).clamp(4, 64),
        }
    }

    /// Inserts `value` under `key`, replacing and returning any previous
    /// value. Bucket order stays sorted by key.
    pub fn add(&mut self, key: K, value: V) -> Option<V> {
        let step = self.step;
        let bucket = self.bucket_mut(&key);

        match bucket.entries.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(index) => {
                let old = std::mem::replace(&mut bucket.entries[index].1, value);
                Some(old)
            }
            Err(index) => {
                bucket.grow_for_insert(step);
                bucket.entries.insert(index, (key, value));
                self.count += 1;
                None
            }
        }
    }

    /// Inserts `value` under `key` only when the key is absent; otherwise
    /// hands both back to the caller, leaving the map untouched.
    pub fn add_unique(&mut self, key: K, value: V) -> Result<(), (K, V)> {
        let step = self.step;
        let bucket = self.bucket_mut(&key);

        match bucket.entries.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(_) => Err((key, value)),
            Err(index) => {
                bucket.grow_for_insert(step);
                bucket.entries.insert(index, (key, value));
                self.count += 1;
                Ok(())
            }
        }
    }

    /// Binary-searches the keyed bucket.
    #[inline]
    pub fn find<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        let bucket = &self.buckets[self.bucket_index(key)];

        bucket
            .entries
            .binary_search_by(|(k, _)| k.borrow().cmp(key))
            .ok()
            .map(|index| &bucket.entries[index].1)
    }

    /// Removes `key`, returning its value. Bucket storage shrinks when
    /// usage drops more than one step below the allocation.
    pub fn del<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        let step = self.step;
        let index = self.bucket_index(key);
        let bucket = &mut self.buckets[index];

        let entry = bucket
            .entries
            .binary_search_by(|(k, _)| k.borrow().cmp(key))
            .ok()?;
        let (_, value) = bucket.entries.remove(entry);
        self.count -= 1;

        let steps_used = bucket.entries.len() / step;
        let steps_total = bucket.entries.capacity() / step;
        if steps_used + 1 < steps_total {
            bucket.entries.shrink_to((steps_used + 1) * step);
        }

        Some(value)
    }

    /// Number of entries across all buckets.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Visits every entry, bucket by bucket, in key order within a bucket.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.entries.iter().map(|(k, v)| (k, v)))
    }

    #[inline(always)]
    fn bucket_index<Q>(&self, key: &Q) -> usize
    where
        Q: Hash + ?Sized,
    {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.buckets.len() as u64) as usize
    }

    #[inline(always)]
    fn bucket_mut(&mut self, key: &K) -> &mut Bucket<K, V> {
        let index = self.bucket_index(key);
        &mut self.buckets[index]
    }
}

impl<K, V> Bucket<K, V> {
    // Growth happens one step at a time, ahead of the insert, so a bucket
    // never reallocates inside Vec::insert.
    #[inline(always)]
    fn grow_for_insert(&mut self, step: usize) {
        if self.entries.len() + 1 >= self.entries.capacity() {
            let new_total = self.entries.capacity() + step;
            self.entries.reserve_exact(new_total - self.entries.len());
        }
    }
}
