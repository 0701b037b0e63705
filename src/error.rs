//! Error types for kvcore.

use std::io;
use thiserror::Error;

/// Result type alias for kvcore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for log and cache operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// I/O error from file operations.
    #[error("I/O error: {0}")]
    Io(String),

    /// Data corruption detected.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// CRC checksum mismatch on a physical record.
    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// A physical record carried an unknown type byte.
    #[error("Invalid record type: {0}")]
    InvalidRecordType(u8),

    /// A physical record declared more payload than its block holds.
    #[error("Record too long: {length} bytes declared, {available} available in block")]
    RecordTooLong { length: usize, available: usize },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Create a corruption error with the given message.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Check if this error indicates corruption.
    ///
    /// Corruption is only ever recovered from by discarding the rest of the
    /// block that contained it.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::Corruption(_)
                | Error::CrcMismatch { .. }
                | Error::InvalidRecordType(_)
                | Error::RecordTooLong { .. }
        )
    }
}
