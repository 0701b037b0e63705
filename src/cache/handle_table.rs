//! Chained hash table from cache keys to shard entries.
//!
//! Cache entries are fairly large, so the table aims for an average chain
//! length of at most one: whenever the element count exceeds the number of
//! buckets, the bucket array grows to the next power of two that holds every
//! element and all chains are rehashed. Chains are threaded through the
//! entries themselves via their `next_hash` link.

use super::slab::Slab;

/// Minimum number of buckets.
const MIN_BUCKETS: usize = 4;

/// An entry that can live on a hash chain.
pub(crate) trait ChainEntry {
    fn key(&self) -> &[u8];
    fn hash(&self) -> u32;
    fn next_hash(&self) -> Option<usize>;
    fn set_next_hash(&mut self, next: Option<usize>);
}

/// The link that points at a chain position: either a bucket head or the
/// `next_hash` field of the previous entry.
#[derive(Debug, Clone, Copy)]
enum Link {
    Bucket(usize),
    Chain(usize),
}

#[derive(Debug)]
pub(crate) struct HandleTable {
    list: Vec<Option<usize>>,
    elems: usize,
}

impl HandleTable {
    pub(crate) fn new() -> Self {
        Self {
            list: vec![None; MIN_BUCKETS],
            elems: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.elems
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.list.len()
    }

    /// Find the entry with `key` and `hash`.
    pub(crate) fn lookup<E: ChainEntry>(&self, slab: &Slab<E>, key: &[u8], hash: u32) -> Option<usize> {
        self.find_pointer(slab, key, hash).1
    }

    /// Link the entry at `idx` into the table.
    ///
    /// If an entry with the same key was present it is unlinked and returned;
    /// it stays in the slab and the caller must finish removing it.
    pub(crate) fn insert<E: ChainEntry>(&mut self, slab: &mut Slab<E>, idx: usize) -> Option<usize> {
        let (link, old) = {
            let entry = &slab[idx];
            self.find_pointer(slab, entry.key(), entry.hash())
        };

        match old {
            Some(old_idx) => {
                // Take over the shadowed entry's chain position.
                let next = slab[old_idx].next_hash();
                slab[idx].set_next_hash(next);
                slab[old_idx].set_next_hash(None);
                self.set_link(slab, link, Some(idx));
            }
            None => {
                let bucket = self.bucket_for(slab[idx].hash());
                let head = self.list[bucket];
                slab[idx].set_next_hash(head);
                self.list[bucket] = Some(idx);
                self.elems += 1;
                if self.elems > self.list.len() {
                    self.resize(slab);
                }
            }
        }

        old
    }

    /// Unlink and return the entry with `key` and `hash`.
    pub(crate) fn remove<E: ChainEntry>(&mut self, slab: &mut Slab<E>, key: &[u8], hash: u32) -> Option<usize> {
        let (link, found) = self.find_pointer(slab, key, hash);
        self.unlink(slab, link, found)
    }

    /// Unlink the entry at `idx`, using its own key and hash.
    pub(crate) fn remove_entry<E: ChainEntry>(&mut self, slab: &mut Slab<E>, idx: usize) -> Option<usize> {
        let (link, found) = {
            let entry = &slab[idx];
            self.find_pointer(slab, entry.key(), entry.hash())
        };
        self.unlink(slab, link, found)
    }

    fn unlink<E: ChainEntry>(&mut self, slab: &mut Slab<E>, link: Link, found: Option<usize>) -> Option<usize> {
        let idx = found?;
        let next = slab[idx].next_hash();
        self.set_link(slab, link, next);
        slab[idx].set_next_hash(None);
        self.elems -= 1;
        Some(idx)
    }

    fn bucket_for(&self, hash: u32) -> usize {
        hash as usize & (self.list.len() - 1)
    }

    /// Return the link that points at the entry matching `key`/`hash`, or
    /// the trailing link of its chain if there is no such entry.
    fn find_pointer<E: ChainEntry>(&self, slab: &Slab<E>, key: &[u8], hash: u32) -> (Link, Option<usize>) {
        let mut link = Link::Bucket(self.bucket_for(hash));
        loop {
            let current = match link {
                Link::Bucket(bucket) => self.list[bucket],
                Link::Chain(idx) => slab[idx].next_hash(),
            };
            match current {
                Some(idx) if slab[idx].hash() != hash || slab[idx].key() != key => {
                    link = Link::Chain(idx);
                }
                found => return (link, found),
            }
        }
    }

    fn set_link<E: ChainEntry>(&mut self, slab: &mut Slab<E>, link: Link, target: Option<usize>) {
        match link {
            Link::Bucket(bucket) => self.list[bucket] = target,
            Link::Chain(idx) => slab[idx].set_next_hash(target),
        }
    }

    fn resize<E: ChainEntry>(&mut self, slab: &mut Slab<E>) {
        let mut new_length = MIN_BUCKETS;
        while new_length < self.elems {
            new_length *= 2;
        }

        let mut new_list = vec![None; new_length];
        let mut count = 0;
        for bucket in std::mem::take(&mut self.list) {
            let mut cursor = bucket;
            while let Some(idx) = cursor {
                let entry = &mut slab[idx];
                cursor = entry.next_hash();
                let slot = entry.hash() as usize & (new_length - 1);
                entry.set_next_hash(new_list[slot]);
                new_list[slot] = Some(idx);
                count += 1;
            }
        }

        assert_eq!(self.elems, count, "handle table lost entries during resize");
        self.list = new_list;
    }
}
