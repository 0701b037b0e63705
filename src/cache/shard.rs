//! A single shard of the LRU cache.
//!
//! Every entry carries an "in cache" flag telling whether the cache holds a
//! reference on it. The flag only becomes false without the entry being
//! destroyed via `erase`, via `insert` of a duplicate key, or via capacity
//! eviction.
//!
//! The shard keeps two lists. Every entry in the cache is on exactly one of
//! them; entries erased from the cache but still referenced by clients are
//! on neither.
//! - in-use: entries referenced by clients (refs >= 2), in no particular
//!   order.
//! - lru: entries only the cache references (refs == 1), oldest first.
//!
//! Entries move between the lists when they gain or lose their only external
//! reference. Deleters run after the shard lock is released, on the thread
//! that dropped the last reference.

use std::sync::Arc;

use parking_lot::Mutex;

use super::handle_table::{ChainEntry, HandleTable};
use super::slab::Slab;

/// Callback run exactly once when an entry's last reference is dropped.
pub type Deleter<V> = Box<dyn FnOnce(&[u8], &V) + Send>;

/// A client's reference to a cache entry.
///
/// Obtained from `insert` or `lookup`; must be handed back through
/// `release`. A handle that is dropped without being released keeps its
/// entry alive until the cache itself is dropped.
///
/// # Teardown
///
/// Release every handle before dropping the cache. Dropping a cache runs
/// the deleter of every entry it still owns, including entries pinned by
/// outstanding handles, and logs a warning for those. Such a handle can
/// still read its value, which it shares, but whatever the deleter tore
/// down on the caller's side is gone.
#[must_use = "cache handles must be released"]
pub struct Handle<V> {
    slot: usize,
    hash: u32,
    charge: usize,
    value: Arc<V>,
}

impl<V> Handle<V> {
    /// The cached value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// The charge the entry was inserted with.
    pub fn charge(&self) -> usize {
        self.charge
    }

    /// Hash of the entry's key.
    pub fn hash(&self) -> u32 {
        self.hash
    }
}

impl<V> std::fmt::Debug for Handle<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("slot", &self.slot)
            .field("hash", &self.hash)
            .field("charge", &self.charge)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    InUse,
    Lru,
}

/// Head and tail of one index-linked list. `head` is the oldest entry.
#[derive(Debug, Default)]
struct List {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

struct LruEntry<V> {
    key: Box<[u8]>,
    hash: u32,
    value: Arc<V>,
    deleter: Option<Deleter<V>>,
    charge: usize,
    /// Whether the cache holds a reference on this entry.
    in_cache: bool,
    /// References, including the cache's own one while `in_cache`.
    refs: u32,
    next_hash: Option<usize>,
    prev: Option<usize>,
    next: Option<usize>,
    list: Option<ListKind>,
}

impl<V> ChainEntry for LruEntry<V> {
    fn key(&self) -> &[u8] {
        &self.key
    }

    fn hash(&self) -> u32 {
        self.hash
    }

    fn next_hash(&self) -> Option<usize> {
        self.next_hash
    }

    fn set_next_hash(&mut self, next: Option<usize>) {
        self.next_hash = next;
    }
}

/// An entry whose last reference is gone, waiting for its deleter.
pub(crate) struct Freed<V> {
    key: Box<[u8]>,
    value: Arc<V>,
    deleter: Option<Deleter<V>>,
}

impl<V> Freed<V> {
    fn dispose(self) {
        if let Some(deleter) = self.deleter {
            deleter(&self.key, &self.value);
        }
    }
}

fn dispose_all<V>(freed: Vec<Freed<V>>) {
    for entry in freed {
        entry.dispose();
    }
}

/// Shard state guarded by the shard mutex.
struct ShardState<V> {
    capacity: usize,
    /// Sum of charges of entries in the cache.
    usage: usize,
    entries: Slab<LruEntry<V>>,
    table: HandleTable,
    /// Entries with refs == 1 and in_cache, oldest first.
    lru: List,
    /// Entries with refs >= 2 and in_cache.
    in_use: List,
}

impl<V> ShardState<V> {
    fn new() -> Self {
        Self {
            capacity: 0,
            usage: 0,
            entries: Slab::new(),
            table: HandleTable::new(),
            lru: List::default(),
            in_use: List::default(),
        }
    }

    fn list_mut(&mut self, kind: ListKind) -> &mut List {
        match kind {
            ListKind::InUse => &mut self.in_use,
            ListKind::Lru => &mut self.lru,
        }
    }

    /// Make `idx` the newest entry of `kind`.
    fn list_append(&mut self, kind: ListKind, idx: usize) {
        let tail = self.list_mut(kind).tail;
        {
            let entry = &mut self.entries[idx];
            debug_assert!(entry.list.is_none());
            entry.prev = tail;
            entry.next = None;
            entry.list = Some(kind);
        }
        match tail {
            Some(tail_idx) => self.entries[tail_idx].next = Some(idx),
            None => self.list_mut(kind).head = Some(idx),
        }
        let list = self.list_mut(kind);
        list.tail = Some(idx);
        list.len += 1;
    }

    /// Unlink `idx` from whichever list holds it.
    fn list_remove(&mut self, idx: usize) {
        let (prev, next, kind) = {
            let entry = &mut self.entries[idx];
            let kind = match entry.list.take() {
                Some(kind) => kind,
                None => panic!("cache entry {idx} is not on a list"),
            };
            (entry.prev.take(), entry.next.take(), kind)
        };

        match prev {
            Some(prev_idx) => self.entries[prev_idx].next = next,
            None => self.list_mut(kind).head = next,
        }
        match next {
            Some(next_idx) => self.entries[next_idx].prev = prev,
            None => self.list_mut(kind).tail = prev,
        }
        self.list_mut(kind).len -= 1;
    }

    fn ref_entry(&mut self, idx: usize) {
        let entry = &self.entries[idx];
        if entry.refs == 1 && entry.in_cache {
            // Gaining its first external reference: leave the lru list.
            self.list_remove(idx);
            self.list_append(ListKind::InUse, idx);
        }
        self.entries[idx].refs += 1;
    }

    fn unref(&mut self, idx: usize, freed: &mut Vec<Freed<V>>) {
        let entry = &mut self.entries[idx];
        assert!(entry.refs > 0, "cache entry reference count underflow");
        entry.refs -= 1;

        if entry.refs == 0 {
            assert!(!entry.in_cache, "freeing an entry still in the cache");
            let entry = self.entries.remove(idx);
            freed.push(Freed {
                key: entry.key,
                value: entry.value,
                deleter: entry.deleter,
            });
        } else if entry.in_cache && entry.refs == 1 {
            // No longer in use; now eligible for eviction.
            self.list_remove(idx);
            self.list_append(ListKind::Lru, idx);
        }
    }

    /// Finish removing an entry that was already unlinked from the table.
    fn finish_erase(&mut self, idx: Option<usize>, freed: &mut Vec<Freed<V>>) -> bool {
        let Some(idx) = idx else {
            return false;
        };
        assert!(self.entries[idx].in_cache);
        self.list_remove(idx);
        let entry = &mut self.entries[idx];
        entry.in_cache = false;
        self.usage -= entry.charge;
        self.unref(idx, freed);
        true
    }

    fn insert(
        &mut self,
        key: &[u8],
        hash: u32,
        value: V,
        charge: usize,
        deleter: Option<Deleter<V>>,
        freed: &mut Vec<Freed<V>>,
    ) -> (Handle<V>, usize) {
        let value = Arc::new(value);
        let idx = self.entries.insert(LruEntry {
            key: key.into(),
            hash,
            value: Arc::clone(&value),
            deleter,
            charge,
            in_cache: false,
            refs: 1, // for the returned handle
            next_hash: None,
            prev: None,
            next: None,
            list: None,
        });

        // A zero capacity turns caching off: the entry belongs to the caller.
        if self.capacity > 0 {
            {
                let entry = &mut self.entries[idx];
                entry.refs += 1; // for the cache's reference
                entry.in_cache = true;
            }
            self.list_append(ListKind::InUse, idx);
            self.usage += charge;
            let shadowed = self.table.insert(&mut self.entries, idx);
            self.finish_erase(shadowed, freed);
        }

        let evicted = self.evict_to_capacity(freed);

        let handle = Handle {
            slot: idx,
            hash,
            charge,
            value,
        };
        (handle, evicted)
    }

    fn evict_to_capacity(&mut self, freed: &mut Vec<Freed<V>>) -> usize {
        let mut evicted = 0;
        while self.usage > self.capacity {
            let Some(oldest) = self.lru.head else {
                break;
            };
            self.evict(oldest, freed);
            evicted += 1;
        }
        if evicted > 0 {
            tracing::trace!(evicted, usage = self.usage, capacity = self.capacity, "evicted cache entries");
        }
        evicted
    }

    fn evict(&mut self, idx: usize, freed: &mut Vec<Freed<V>>) {
        assert_eq!(self.entries[idx].refs, 1, "lru entry referenced by a client");
        let removed = self.table.remove_entry(&mut self.entries, idx);
        assert_eq!(removed, Some(idx), "lru entry missing from the table");
        self.finish_erase(removed, freed);
    }

    fn lookup(&mut self, key: &[u8], hash: u32) -> Option<Handle<V>> {
        let idx = self.table.lookup(&self.entries, key, hash)?;
        self.ref_entry(idx);
        let entry = &self.entries[idx];
        Some(Handle {
            slot: idx,
            hash,
            charge: entry.charge,
            value: Arc::clone(&entry.value),
        })
    }

    fn release(&mut self, handle: Handle<V>, freed: &mut Vec<Freed<V>>) {
        let same_entry = self
            .entries
            .get(handle.slot)
            .is_some_and(|entry| Arc::ptr_eq(&entry.value, &handle.value));
        assert!(same_entry, "handle released to a cache that does not own it");
        self.unref(handle.slot, freed);
    }

    fn erase(&mut self, key: &[u8], hash: u32, freed: &mut Vec<Freed<V>>) {
        let removed = self.table.remove(&mut self.entries, key, hash);
        self.finish_erase(removed, freed);
    }

    fn prune(&mut self, freed: &mut Vec<Freed<V>>) -> usize {
        let mut pruned = 0;
        while let Some(oldest) = self.lru.head {
            self.evict(oldest, freed);
            pruned += 1;
        }
        pruned
    }

    /// Verify the bookkeeping invariants, panicking on the first violation.
    #[cfg(test)]
    fn check_invariants(&self) {
        let mut usage = 0;
        let mut in_cache = 0;
        let (mut on_lru, mut on_in_use) = (0, 0);
        for (idx, entry) in self.entries.iter() {
            if entry.in_cache {
                usage += entry.charge;
                in_cache += 1;
                assert_eq!(self.table.lookup(&self.entries, &entry.key, entry.hash), Some(idx));
                match entry.list {
                    Some(ListKind::Lru) => {
                        assert_eq!(entry.refs, 1);
                        on_lru += 1;
                    }
                    Some(ListKind::InUse) => {
                        assert!(entry.refs >= 2);
                        on_in_use += 1;
                    }
                    None => panic!("cached entry {idx} is on no list"),
                }
            } else {
                assert!(entry.list.is_none());
                assert!(entry.refs >= 1);
            }
        }
        assert_eq!(usage, self.usage);
        assert_eq!(self.entries.iter().count(), self.entries.len());
        assert_eq!(in_cache, self.table.len());
        assert_eq!(on_lru, self.lru.len);
        assert_eq!(on_in_use, self.in_use.len);

        // Walk the lru list in both directions.
        let mut count = 0;
        let mut cursor = self.lru.head;
        let mut prev = None;
        while let Some(idx) = cursor {
            assert_eq!(self.entries[idx].prev, prev);
            prev = cursor;
            cursor = self.entries[idx].next;
            count += 1;
        }
        assert_eq!(prev, self.lru.tail);
        assert_eq!(count, self.lru.len);
    }
}

impl<V> Drop for ShardState<V> {
    fn drop(&mut self) {
        let still_referenced = self
            .entries
            .iter()
            .filter(|(_, e)| e.refs > u32::from(e.in_cache))
            .count();
        if still_referenced > 0 {
            tracing::warn!(
                still_referenced,
                "cache dropped with unreleased handles; destroying their entries"
            );
        }
        for entry in self.entries.drain() {
            Freed {
                key: entry.key,
                value: entry.value,
                deleter: entry.deleter,
            }
            .dispose();
        }
    }
}

/// One lock-protected partition of the sharded cache.
pub(crate) struct LruShard<V> {
    state: Mutex<ShardState<V>>,
}

impl<V> LruShard<V> {
    pub(crate) fn new(capacity: usize) -> Self {
        let mut state = ShardState::new();
        state.capacity = capacity;
        Self {
            state: Mutex::new(state),
        }
    }

    /// Insert a new entry. Returns its handle and the number of entries
    /// evicted to make room.
    pub(crate) fn insert(
        &self,
        key: &[u8],
        hash: u32,
        value: V,
        charge: usize,
        deleter: Option<Deleter<V>>,
    ) -> (Handle<V>, usize) {
        let mut freed = Vec::new();
        let result = self
            .state
            .lock()
            .insert(key, hash, value, charge, deleter, &mut freed);
        dispose_all(freed);
        result
    }

    pub(crate) fn lookup(&self, key: &[u8], hash: u32) -> Option<Handle<V>> {
        self.state.lock().lookup(key, hash)
    }

    pub(crate) fn release(&self, handle: Handle<V>) {
        let mut freed = Vec::new();
        self.state.lock().release(handle, &mut freed);
        dispose_all(freed);
    }

    pub(crate) fn erase(&self, key: &[u8], hash: u32) {
        let mut freed = Vec::new();
        self.state.lock().erase(key, hash, &mut freed);
        dispose_all(freed);
    }

    /// Drop every entry not referenced by a client. Returns how many were
    /// removed from the cache.
    pub(crate) fn prune(&self) -> usize {
        let mut freed = Vec::new();
        let pruned = self.state.lock().prune(&mut freed);
        dispose_all(freed);
        pruned
    }

    pub(crate) fn total_charge(&self) -> usize {
        self.state.lock().usage
    }

    /// Number of entries reachable through lookup.
    pub(crate) fn len(&self) -> usize {
        self.state.lock().table.len()
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        self.state.lock().check_invariants();
    }

    #[cfg(test)]
    fn live_entries(&self) -> usize {
        self.state.lock().entries.len()
    }
}
