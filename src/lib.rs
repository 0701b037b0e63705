//! # kvcore
//!
//! Storage-engine building blocks: the write-ahead log record format and a
//! sharded, reference-counted LRU cache.
//!
//! ## Features
//!
//! - **Log framing**: 32KB blocks, checksummed physical records, records of
//!   any size split across blocks
//! - **Log reading**: reassembly with corruption reporting or skipping
//! - **Durability**: configurable sync policy
//! - **Concurrent cache**: 16 independently locked shards, charge-based
//!   capacity, deleters run on last release
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::path::Path;
//!
//! use kvcore::util::filename::log_file_path;
//! use kvcore::{LogReader, LogWriter, Options, ShardedLruCache};
//!
//! let options = Options::default();
//! let path = log_file_path(Path::new("./my_data"), 1);
//!
//! // Write a log
//! let mut writer = LogWriter::create(&path, &options)?;
//! writer.add_record(b"hello")?;
//! writer.close()?;
//!
//! // Read it back
//! let mut reader = LogReader::open(&path, &options)?;
//! while let Some(record) = reader.read_record()? {
//!     println!("{} bytes", record.len());
//! }
//!
//! // Cache
//! let cache = ShardedLruCache::from_options(&options);
//! let handle = cache.insert(b"block:1", vec![0u8; 4096], 4096);
//! cache.release(handle);
//! ```

// Public modules
pub mod error;
pub mod options;
pub mod util;

// Internal modules
mod cache;
mod wal;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use options::{Options, OptionsBuilder, SyncMode};

// Log
pub use wal::{
    LogFile, LogReader, LogRecords, LogWriter, RecordType, WritableFile, BLOCK_SIZE,
    HEADER_SIZE, MAX_FRAGMENT_SIZE,
};

// Cache
pub use cache::{CacheStats, Deleter, Handle, ShardedLruCache, NUM_SHARDS};
