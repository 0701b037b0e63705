//! Configuration options for kvcore.

use crate::{Error, Result};

/// Default cache capacity (8MB of charge).
pub const DEFAULT_CACHE_CAPACITY: usize = 8 * 1024 * 1024;

/// Log sync mode.
///
/// Every physical record is flushed to the OS as it is written; the sync mode
/// only decides when the file is additionally synced to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Sync after every logical record (safest, slowest).
    Always,
    /// Sync once at least N bytes were written since the last sync.
    Bytes {
        /// Number of bytes before sync.
        bytes: usize,
    },
    /// Never sync implicitly; the OS decides when data reaches the disk.
    #[default]
    None,
}

/// Engine configuration options.
#[derive(Debug, Clone)]
pub struct Options {
    // === Cache ===
    /// Total cache capacity, in charge units, split evenly across shards.
    pub cache_capacity: usize,

    // === Durability ===
    /// Log sync mode.
    pub sync_mode: SyncMode,

    /// Treat any corruption found while reading a log as fatal.
    pub paranoid_checks: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            sync_mode: SyncMode::default(),
            paranoid_checks: false,
        }
    }
}

impl Options {
    /// Create new options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if let SyncMode::Bytes { bytes: 0 } = self.sync_mode {
            return Err(Error::InvalidConfiguration(
                "SyncMode::Bytes requires a non-zero byte threshold".into(),
            ));
        }

        Ok(())
    }
}

/// Builder for Options.
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total cache capacity. Zero disables caching.
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.options.cache_capacity = capacity;
        self
    }

    /// Set sync mode.
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.options.sync_mode = mode;
        self
    }

    /// Set paranoid_checks.
    pub fn paranoid_checks(mut self, value: bool) -> Self {
        self.options.paranoid_checks = value;
        self
    }

    /// Build the options.
    pub fn build(self) -> Result<Options> {
        self.options.validate()?;
        Ok(self.options)
    }
}
