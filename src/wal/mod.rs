//! Write-Ahead Log (WAL) framing.
//!
//! The log is a sequence of 32KB blocks. A logical record is split into one
//! or more physical records, none of which crosses a block boundary. Each
//! physical record has:
//! - Masked CRC32C of the type byte and payload (4 bytes)
//! - Payload length (2 bytes)
//! - Record type (1 byte): FULL, FIRST, MIDDLE, LAST
//! - Payload (variable)
//!
//! All integers are little-endian. When fewer than [`HEADER_SIZE`] bytes
//! remain in a block they are zero-filled and the next record starts at the
//! following block.

mod file;
mod reader;
mod writer;

pub use file::{LogFile, WritableFile};
pub use reader::{LogReader, LogRecords};
pub use writer::LogWriter;

/// Block size for the log (32KB).
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Header size: CRC (4) + Length (2) + Type (1) = 7 bytes.
pub const HEADER_SIZE: usize = 4 + 2 + 1;

/// Maximum payload size of one physical record.
pub const MAX_FRAGMENT_SIZE: usize = BLOCK_SIZE - HEADER_SIZE;

/// Record types for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Zero is reserved for pre-allocated files.
    Zero = 0,
    /// Complete record in a single fragment.
    Full = 1,
    /// First fragment of a record.
    First = 2,
    /// Middle fragment(s) of a record.
    Middle = 3,
    /// Last fragment of a record.
    Last = 4,
}

/// Largest valid record type tag.
pub const MAX_RECORD_TYPE: u8 = RecordType::Last as u8;

impl RecordType {
    /// Create from byte value.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(RecordType::Zero),
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Pick the type of a fragment from its position in the logical record.
    pub fn for_fragment(begin: bool, end: bool) -> Self {
        match (begin, end) {
            (true, true) => RecordType::Full,
            (true, false) => RecordType::First,
            (false, true) => RecordType::Last,
            (false, false) => RecordType::Middle,
        }
    }
}
