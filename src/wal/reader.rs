//! Log reader implementation.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use bytes::Bytes;
use tracing::warn;

use crate::options::Options;
use crate::util::coding::{read_fixed16, read_fixed32};
use crate::util::crc::{crc32c, crc32c_extend, unmask_crc};
use crate::{Error, Result};

use super::{RecordType, BLOCK_SIZE, HEADER_SIZE};

/// Outcome of reading one physical record.
enum Physical {
    Record(RecordType, usize, usize),
    /// A corrupt record whose block was dropped.
    Bad,
    Eof,
}

/// Log reader for recovery.
///
/// Reads logical records back from a log, reassembling fragmented records
/// and verifying checksums. Corrupt data is never repaired: the rest of the
/// block holding it is discarded, and either the error is returned or, when
/// checksum errors are not fatal, the dropped bytes are counted and reading
/// continues at the next block.
pub struct LogReader<R: Read> {
    /// Source of log bytes.
    reader: R,
    /// Current block buffer.
    buffer: Box<[u8]>,
    /// Current position within the buffer.
    buffer_offset: usize,
    /// Valid bytes in the buffer.
    buffer_size: usize,
    /// Whether we've reached EOF.
    eof: bool,
    /// Whether to report corruption or skip.
    checksum_errors_are_fatal: bool,
    /// Bytes discarded because of corruption.
    dropped_bytes: u64,
}

impl<R: Read> LogReader<R> {
    /// Create a new log reader over `reader`, positioned at a block boundary.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: vec![0u8; BLOCK_SIZE].into_boxed_slice(),
            buffer_offset: 0,
            buffer_size: 0,
            eof: false,
            checksum_errors_are_fatal: true,
            dropped_bytes: 0,
        }
    }

    /// Set whether checksum errors should be fatal.
    pub fn set_checksum_errors_fatal(&mut self, fatal: bool) {
        self.checksum_errors_are_fatal = fatal;
    }

    /// Total bytes dropped because of corruption so far.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    /// Iterate over the remaining logical records.
    pub fn records(&mut self) -> LogRecords<'_, R> {
        LogRecords { reader: self }
    }

    /// Read the next logical record.
    ///
    /// Returns None when there are no more records. A record cut short by
    /// the end of the log is treated as never written.
    pub fn read_record(&mut self) -> Result<Option<Bytes>> {
        let mut scratch = Vec::new();
        let mut in_fragmented_record = false;

        loop {
            let (record_type, start, end) = match self.read_physical_record()? {
                Physical::Record(record_type, start, end) => (record_type, start, end),
                Physical::Bad => {
                    // Whatever was assembled so far lost its continuation.
                    if in_fragmented_record {
                        let dropped = scratch.len();
                        scratch.clear();
                        in_fragmented_record = false;
                        self.report_drop(dropped, Error::corruption("error in middle of record"))?;
                    }
                    continue;
                }
                // Incomplete record at end of file is dropped silently.
                Physical::Eof => return Ok(None),
            };

            match record_type {
                RecordType::Full | RecordType::First => {
                    if in_fragmented_record && !scratch.is_empty() {
                        let dropped = scratch.len();
                        scratch.clear();
                        self.report_drop(dropped, Error::corruption("partial record without end"))?;
                    }
                    if record_type == RecordType::Full {
                        return Ok(Some(Bytes::copy_from_slice(&self.buffer[start..end])));
                    }
                    scratch.extend_from_slice(&self.buffer[start..end]);
                    in_fragmented_record = true;
                }
                RecordType::Middle | RecordType::Last => {
                    if !in_fragmented_record {
                        self.report_drop(
                            end - start,
                            Error::corruption("missing start of fragmented record"),
                        )?;
                        continue;
                    }
                    scratch.extend_from_slice(&self.buffer[start..end]);
                    if record_type == RecordType::Last {
                        return Ok(Some(Bytes::from(scratch)));
                    }
                }
                RecordType::Zero => {
                    unreachable!("zero-type records are filtered by read_physical_record")
                }
            }
        }
    }

    /// Read a physical record from the current position.
    ///
    /// On success yields the record type and the payload's range within the
    /// buffer. In lenient mode a corrupt record yields [`Physical::Bad`]
    /// after the rest of its block was dropped.
    fn read_physical_record(&mut self) -> Result<Physical> {
        loop {
            let remaining = self.buffer_size - self.buffer_offset;

            // A block trailer, or the end of the data read so far
            if remaining < HEADER_SIZE {
                if self.eof {
                    // Truncated header at end of file
                    self.buffer_offset = self.buffer_size;
                    return Ok(Physical::Eof);
                }
                if !self.read_block()? {
                    return Ok(Physical::Eof);
                }
                continue;
            }

            // Read header
            let header = &self.buffer[self.buffer_offset..self.buffer_offset + HEADER_SIZE];
            let masked_crc = read_fixed32(header).unwrap_or_default();
            let length = read_fixed16(&header[4..]).unwrap_or_default() as usize;
            let type_byte = header[6];

            // Check if record fits in the block
            if HEADER_SIZE + length > remaining {
                if self.eof {
                    // Writer died in the middle of this record
                    self.buffer_offset = self.buffer_size;
                    return Ok(Physical::Eof);
                }
                self.report_corruption(Error::RecordTooLong {
                    length,
                    available: remaining - HEADER_SIZE,
                })?;
                return Ok(Physical::Bad);
            }

            // Pre-allocated, never written space
            if type_byte == RecordType::Zero.to_byte() && length == 0 {
                self.buffer_offset = self.buffer_size;
                continue;
            }

            // Verify CRC
            let data_start = self.buffer_offset + HEADER_SIZE;
            let data_end = data_start + length;
            let expected = unmask_crc(masked_crc);
            let actual = crc32c_extend(crc32c(&[type_byte]), &self.buffer[data_start..data_end]);
            if expected != actual {
                self.report_corruption(Error::CrcMismatch { expected, actual })?;
                return Ok(Physical::Bad);
            }

            let record_type = match RecordType::from_byte(type_byte) {
                Some(RecordType::Zero) | None => {
                    self.report_corruption(Error::InvalidRecordType(type_byte))?;
                    return Ok(Physical::Bad);
                }
                Some(rt) => rt,
            };

            self.buffer_offset = data_end;
            return Ok(Physical::Record(record_type, data_start, data_end));
        }
    }

    /// Discard the rest of the current block because of `err`.
    fn report_corruption(&mut self, err: Error) -> Result<()> {
        let dropped = self.buffer_size - self.buffer_offset;
        self.buffer_offset = self.buffer_size;
        self.report_drop(dropped, err)
    }

    fn report_drop(&mut self, bytes: usize, err: Error) -> Result<()> {
        self.dropped_bytes += bytes as u64;
        if self.checksum_errors_are_fatal {
            return Err(err);
        }
        warn!(bytes, error = %err, "dropping corrupt log data");
        Ok(())
    }

    /// Read the next block into the buffer.
    fn read_block(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }

        self.buffer_offset = 0;
        self.buffer_size = 0;
        while self.buffer_size < BLOCK_SIZE {
            match self.reader.read(&mut self.buffer[self.buffer_size..]) {
                Ok(0) => break,
                Ok(n) => self.buffer_size += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        // If we read less than a full block, we're at EOF
        if self.buffer_size < BLOCK_SIZE {
            self.eof = true;
        }

        Ok(self.buffer_size > 0)
    }
}

impl LogReader<File> {
    /// Open a log file for reading.
    ///
    /// Corruption is fatal when `paranoid_checks` is set.
    pub fn open(path: &Path, options: &Options) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = Self::new(file);
        reader.set_checksum_errors_fatal(options.paranoid_checks);
        Ok(reader)
    }
}

/// Iterator over log records.
pub struct LogRecords<'a, R: Read> {
    reader: &'a mut LogReader<R>,
}

impl<R: Read> Iterator for LogRecords<'_, R> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_record().transpose()
    }
}
