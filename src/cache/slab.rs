//! Index-addressed entry storage for a cache shard.
//!
//! Entries link to each other (hash chains, recency lists) by slot index
//! instead of by pointer. A slot index stays valid until its entry is
//! removed, and is then recycled through the free list.

use std::ops::{Index, IndexMut};

#[derive(Debug)]
pub(crate) struct Slab<T> {
    slots: Vec<Option<T>>,
    free_list: Vec<usize>,
}

impl<T> Slab<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, value: T) -> usize {
        let idx = if let Some(idx) = self.free_list.pop() {
            debug_assert!(self.slots[idx].is_none());
            self.slots[idx] = Some(value);
            idx
        } else {
            self.slots.push(Some(value));
            self.slots.len() - 1
        };
        idx
    }

    /// Remove the entry at `idx`.
    ///
    /// Panics if the slot is vacant: a dangling index means the cache's
    /// bookkeeping is broken.
    pub(crate) fn remove(&mut self, idx: usize) -> T {
        let value = match self.slots.get_mut(idx).and_then(Option::take) {
            Some(value) => value,
            None => panic!("slab slot {idx} is vacant"),
        };
        self.free_list.push(idx);
        value
    }

    pub(crate) fn get(&self, idx: usize) -> Option<&T> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|value| (idx, value)))
    }

    /// Remove every entry, yielding them in slot order.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.free_list.clear();
        self.slots.drain(..).flatten()
    }
}

impl<T> Index<usize> for Slab<T> {
    type Output = T;

    fn index(&self, idx: usize) -> &T {
        match self.get(idx) {
            Some(value) => value,
            None => panic!("slab slot {idx} is vacant"),
        }
    }
}

impl<T> IndexMut<usize> for Slab<T> {
    fn index_mut(&mut self, idx: usize) -> &mut T {
        match self.slots.get_mut(idx).and_then(Option::as_mut) {
            Some(value) => value,
            None => panic!("slab slot {idx} is vacant"),
        }
    }
}
