//! Shared low-level helpers: checksums, hashing, encoding and file naming.

pub mod coding;
pub mod crc;
pub mod filename;
pub mod hash;
