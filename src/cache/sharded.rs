//! Sharded, reference-counted LRU cache.
//!
//! Keys are hashed once; the top bits of the hash select one of 16
//! independently locked shards so threads working on different keys rarely
//! contend. Capacity is split evenly across the shards and eviction is per
//! shard, so the cache as a whole is only approximately LRU.

use std::sync::Arc;

use parking_lot::Mutex;

use super::shard::{Deleter, Handle, LruShard};
use super::stats::CacheStats;
use crate::options::Options;
use crate::util::hash::hash_key;

const NUM_SHARD_BITS: u32 = 4;

/// Number of shards.
pub const NUM_SHARDS: usize = 1 << NUM_SHARD_BITS;

/// A concurrent LRU cache mapping byte-string keys to values of type `V`.
///
/// Every entry has a charge counted against the capacity. Entries handed out
/// through a [`Handle`] are pinned: they stay readable, and are never
/// evicted, until the handle is returned with [`ShardedLruCache::release`].
/// Handles should all be released before the cache is dropped; see
/// [`Handle`] for what happens to ones that are not.
pub struct ShardedLruCache<V> {
    shards: Vec<LruShard<V>>,
    last_id: Mutex<u64>,
    capacity: usize,
    stats: Arc<CacheStats>,
}

impl<V> ShardedLruCache<V> {
    /// Create a cache holding up to `capacity` total charge.
    ///
    /// A capacity of 0 turns caching off: inserts still return a usable
    /// handle, but nothing is retained.
    pub fn new(capacity: usize) -> Self {
        let per_shard = capacity.div_ceil(NUM_SHARDS);
        let shards = (0..NUM_SHARDS).map(|_| LruShard::new(per_shard)).collect();
        tracing::debug!(capacity, per_shard, shards = NUM_SHARDS, "created sharded lru cache");

        Self {
            shards,
            last_id: Mutex::new(0),
            capacity,
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Create a cache sized by `options.cache_capacity`.
    pub fn from_options(options: &Options) -> Self {
        Self::new(options.cache_capacity)
    }

    /// Insert `key -> value` with the given charge and return a handle to
    /// the new entry. Any existing entry for `key` is displaced; it is
    /// destroyed once its outstanding handles are released.
    pub fn insert(&self, key: &[u8], value: V, charge: usize) -> Handle<V> {
        self.insert_entry(key, value, charge, None)
    }

    /// Like [`insert`](Self::insert), with a deleter that runs exactly once
    /// when the entry's last reference goes away.
    pub fn insert_with_deleter<F>(&self, key: &[u8], value: V, charge: usize, deleter: F) -> Handle<V>
    where
        F: FnOnce(&[u8], &V) + Send + 'static,
    {
        self.insert_entry(key, value, charge, Some(Box::new(deleter)))
    }

    fn insert_entry(&self, key: &[u8], value: V, charge: usize, deleter: Option<Deleter<V>>) -> Handle<V> {
        let hash = hash_key(key);
        let (handle, evicted) = self.shard(hash).insert(key, hash, value, charge, deleter);
        self.stats.record_insert(evicted);
        handle
    }

    /// Look up `key`, pinning the entry on a hit.
    pub fn lookup(&self, key: &[u8]) -> Option<Handle<V>> {
        let hash = hash_key(key);
        let handle = self.shard(hash).lookup(key, hash);
        self.stats.record_lookup(handle.is_some());
        handle
    }

    /// Return a handle obtained from this cache.
    ///
    /// # Panics
    ///
    /// Panics if the handle came from a different cache.
    pub fn release(&self, handle: Handle<V>) {
        self.shard(handle.hash()).release(handle);
    }

    /// Make `key` undiscoverable. Outstanding handles stay valid.
    pub fn erase(&self, key: &[u8]) {
        let hash = hash_key(key);
        self.shard(hash).erase(key, hash);
    }

    /// The value behind a handle.
    pub fn value<'a>(&self, handle: &'a Handle<V>) -> &'a V {
        handle.value()
    }

    /// A fresh numeric id, distinct from every id this cache returned
    /// before. Clients sharing one cache use it to partition the key space.
    pub fn new_id(&self) -> u64 {
        let mut last_id = self.last_id.lock();
        *last_id += 1;
        *last_id
    }

    /// Drop every entry that no client is using.
    pub fn prune(&self) {
        let pruned: usize = self.shards.iter().map(LruShard::prune).sum();
        self.stats.record_evictions(pruned);
    }

    /// Combined charge of all cached entries.
    ///
    /// Shards are read one at a time, so under concurrent mutation the sum
    /// is only a snapshot.
    pub fn total_charge(&self) -> usize {
        self.shards.iter().map(LruShard::total_charge).sum()
    }

    /// Number of entries currently discoverable through lookup.
    pub fn len(&self) -> usize {
        self.shards.iter().map(LruShard::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total capacity the cache was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shared hit/miss counters.
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    fn shard(&self, hash: u32) -> &LruShard<V> {
        &self.shards[shard_index(hash)]
    }
}

fn shard_index(hash: u32) -> usize {
    (hash >> (32 - NUM_SHARD_BITS)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(i: u32) -> Vec<u8> {
        i.to_be_bytes().to_vec()
    }

    /// Keys that all land in the same shard.
    fn keys_in_one_shard(count: usize) -> Vec<Vec<u8>> {
        let target = shard_index(hash_key(&key(0)));
        (0..)
            .map(key)
            .filter(|k| shard_index(hash_key(k)) == target)
            .take(count)
            .collect()
    }

    fn lookup_value(cache: &ShardedLruCache<u32>, k: &[u8]) -> Option<u32> {
        let handle = cache.lookup(k)?;
        let value = *cache.value(&handle);
        cache.release(handle);
        Some(value)
    }

    #[test]
    fn test_shard_index_uses_top_bits() {
        assert_eq!(shard_index(0), 0);
        assert_eq!(shard_index(0x0fff_ffff), 0);
        assert_eq!(shard_index(0x1000_0000), 1);
        assert_eq!(shard_index(u32::MAX), NUM_SHARDS - 1);
    }

    #[test]
    fn test_cache_insert_lookup() {
        let cache = ShardedLruCache::new(1000);
        for i in 0..100 {
            let handle = cache.insert(&key(i), i, 1);
            assert_eq!(*handle.value(), i);
            cache.release(handle);
        }
        assert_eq!(cache.len(), 100);
        assert_eq!(cache.total_charge(), 100);
        for i in 0..100 {
            assert_eq!(lookup_value(&cache, &key(i)), Some(i));
        }
        assert_eq!(lookup_value(&cache, &key(100)), None);

        let stats = cache.stats();
        assert_eq!(stats.hits.load(Ordering::Relaxed), 100);
        assert_eq!(stats.misses.load(Ordering::Relaxed), 1);
        assert_eq!(stats.inserts.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_cache_capacity_split_rounds_up() {
        // 17 / 16 rounds up to 2 per shard.
        let cache = ShardedLruCache::new(17);
        assert_eq!(cache.capacity(), 17);
        let keys = keys_in_one_shard(3);
        for (i, k) in keys.iter().enumerate() {
            cache.release(cache.insert(k, i as u32, 1));
        }
        assert_eq!(lookup_value(&cache, &keys[0]), None);
        assert_eq!(lookup_value(&cache, &keys[1]), Some(1));
        assert_eq!(lookup_value(&cache, &keys[2]), Some(2));
    }

    #[test]
    fn test_cache_evicts_least_recently_used_in_shard() {
        let n = 4;
        let cache = ShardedLruCache::new(n * NUM_SHARDS);
        let keys = keys_in_one_shard(n + 1);

        for (i, k) in keys.iter().enumerate() {
            cache.release(cache.insert(k, i as u32, 1));
        }

        assert_eq!(lookup_value(&cache, &keys[0]), None);
        for (i, k) in keys.iter().enumerate().skip(1) {
            assert_eq!(lookup_value(&cache, k), Some(i as u32));
        }
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_cache_reinsert_runs_old_deleter_after_release() {
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let cache = ShardedLruCache::new(1000);
        let record = |deleted: &Arc<Mutex<Vec<u32>>>| {
            let deleted = Arc::clone(deleted);
            move |_: &[u8], v: &u32| deleted.lock().push(*v)
        };

        let first = cache.insert_with_deleter(b"k", 1, 1, record(&deleted));
        cache.release(cache.insert_with_deleter(b"k", 2, 1, record(&deleted)));

        assert_eq!(lookup_value(&cache, b"k"), Some(2));
        assert!(deleted.lock().is_empty());
        assert_eq!(*cache.value(&first), 1);

        cache.release(first);
        assert_eq!(*deleted.lock(), vec![1]);
        assert_eq!(cache.total_charge(), 1);
    }

    #[test]
    fn test_cache_erase_while_held() {
        let deleted = Arc::new(AtomicUsize::new(0));
        let cache = ShardedLruCache::new(1000);
        let counter = Arc::clone(&deleted);
        let handle = cache.insert_with_deleter(b"gone", 42u32, 3, move |k: &[u8], _: &u32| {
            assert_eq!(k, b"gone");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        cache.erase(b"gone");
        assert!(cache.lookup(b"gone").is_none());
        assert_eq!(*cache.value(&handle), 42);
        assert_eq!(deleted.load(Ordering::SeqCst), 0);

        cache.release(handle);
        assert_eq!(deleted.load(Ordering::SeqCst), 1);
        assert_eq!(cache.total_charge(), 0);
    }

    #[test]
    fn test_cache_zero_capacity() {
        let cache = ShardedLruCache::new(0);
        let handle = cache.insert(b"k", 5u32, 1);
        assert_eq!(*handle.value(), 5);
        assert!(cache.lookup(b"k").is_none());
        cache.release(handle);
        assert!(cache.is_empty());
        assert_eq!(cache.total_charge(), 0);
    }

    #[test]
    fn test_cache_prune_keeps_pinned() {
        let cache = ShardedLruCache::new(1000);
        let pinned = cache.insert(b"pinned", 0u32, 1);
        for i in 1..20 {
            cache.release(cache.insert(&key(i), i, 1));
        }

        cache.prune();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_charge(), 1);
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 19);
        cache.release(pinned);
    }

    #[test]
    fn test_cache_new_id_is_monotonic() {
        let cache = ShardedLruCache::<u32>::new(10);
        assert_eq!(cache.new_id(), 1);
        assert_eq!(cache.new_id(), 2);
        assert_eq!(cache.new_id(), 3);
    }

    #[test]
    fn test_cache_from_options() {
        let options = Options {
            cache_capacity: 64,
            ..Options::default()
        };
        let cache = ShardedLruCache::<u32>::from_options(&options);
        assert_eq!(cache.capacity(), 64);
    }

    #[test]
    fn test_cache_drop_with_outstanding_handle() {
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let cache = ShardedLruCache::new(1000);
        let log = Arc::clone(&deleted);
        let handle = cache.insert_with_deleter(b"held", 7u32, 1, move |k: &[u8], v: &u32| {
            log.lock().push((k.to_vec(), *v));
        });

        drop(cache);
        // The deleter ran exactly once, yet the handle still reads its value.
        assert_eq!(*deleted.lock(), vec![(b"held".to_vec(), 7)]);
        assert_eq!(*handle.value(), 7);
        assert_eq!(handle.charge(), 1);
    }

    #[test]
    fn test_cache_drop_runs_remaining_deleters() {
        let deleted = Arc::new(AtomicUsize::new(0));
        let held;
        {
            let cache = ShardedLruCache::new(1000);
            for i in 0..10u32 {
                let counter = Arc::clone(&deleted);
                let handle = cache.insert_with_deleter(&key(i), i, 1, move |_: &[u8], _: &u32| {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
                cache.release(handle);
            }
            held = cache.lookup(&key(3)).map(|h| *h.value());
            assert_eq!(deleted.load(Ordering::SeqCst), 0);
        }
        assert_eq!(held, Some(3));
        assert_eq!(deleted.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_cache_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ShardedLruCache<Vec<u8>>>();
    }
}
