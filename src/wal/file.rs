//! Append-only destinations for the log writer.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::Result;

use super::BLOCK_SIZE;

/// An append-only file.
///
/// The log writer only ever appends, flushes after each physical record, and
/// syncs when the configured sync mode asks for it.
pub trait WritableFile {
    /// Append bytes at the end of the file.
    fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Push buffered bytes to the operating system.
    fn flush(&mut self) -> Result<()>;

    /// Make previously flushed bytes durable on stable storage.
    fn sync(&mut self) -> Result<()>;
}

/// In-memory destination, used to build log images.
impl WritableFile for Vec<u8> {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<W: WritableFile + ?Sized> WritableFile for &mut W {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        (**self).append(data)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn sync(&mut self) -> Result<()> {
        (**self).sync()
    }
}

/// Buffered log file on the local file system.
pub struct LogFile {
    /// Buffered writer for the file.
    writer: BufWriter<File>,
    /// File length when it was opened.
    initial_len: u64,
}

impl LogFile {
    /// Create (or truncate) a log file.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            writer: BufWriter::with_capacity(BLOCK_SIZE, file),
            initial_len: 0,
        })
    }

    /// Open an existing log file positioned at its end.
    pub fn open_for_append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let initial_len = file.metadata()?.len();

        Ok(Self {
            writer: BufWriter::with_capacity(BLOCK_SIZE, file),
            initial_len,
        })
    }

    /// File length at the time it was opened.
    pub fn initial_len(&self) -> u64 {
        self.initial_len
    }
}

impl WritableFile for LogFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }
}
