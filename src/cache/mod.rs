//! Block and table caching.
//!
//! - **Sharded LRU cache**: byte-string keys, charged entries, pinned
//!   through handles until released
//! - **Statistics**: hit/miss/eviction counters shared by all shards

mod handle_table;
mod shard;
mod sharded;
mod slab;
mod stats;

pub use shard::{Deleter, Handle};
pub use sharded::{ShardedLruCache, NUM_SHARDS};
pub use stats::CacheStats;
