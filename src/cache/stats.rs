//! Cache hit/miss accounting shared by every shard.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for cache operations.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Lookups that found an entry.
    pub hits: AtomicU64,
    /// Lookups that found nothing.
    pub misses: AtomicU64,
    /// Entries inserted, including ones not retained at zero capacity.
    pub inserts: AtomicU64,
    /// Entries pushed out by capacity pressure.
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_lookup(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self, evicted: usize) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
        self.record_evictions(evicted);
    }

    pub(crate) fn record_evictions(&self, evicted: usize) {
        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    /// Fraction of lookups that hit, 0.0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        match hits + misses {
            0 => 0.0,
            total => hits as f64 / total as f64,
        }
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [&self.hits, &self.misses, &self.inserts, &self.evictions] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Clone for CacheStats {
    fn clone(&self) -> Self {
        let copy = |counter: &AtomicU64| AtomicU64::new(counter.load(Ordering::Relaxed));
        Self {
            hits: copy(&self.hits),
            misses: copy(&self.misses),
            inserts: copy(&self.inserts),
            evictions: copy(&self.evictions),
        }
    }
}
