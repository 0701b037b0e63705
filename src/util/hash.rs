//! Key hashing for cache shard routing and bucket selection.

use xxhash_rust::xxh32::xxh32;

/// Compute the 32-bit hash of a cache key.
///
/// The high bits pick the shard and the low bits pick the hash bucket, so
/// the function must mix well across the whole word.
pub fn hash_key(key: &[u8]) -> u32 {
    xxh32(key, 0)
}
