//! Log writer implementation.

use std::path::Path;

use tracing::{debug, trace, warn};

use crate::options::{Options, SyncMode};
use crate::util::coding::{encode_fixed16, encode_fixed32};
use crate::util::crc::{crc32c, crc32c_extend, mask_crc};
use crate::Result;

use super::file::{LogFile, WritableFile};
use super::{RecordType, BLOCK_SIZE, HEADER_SIZE, MAX_RECORD_TYPE};

/// Zero bytes used to fill a block trailer. A trailer is always shorter than
/// a header.
const TRAILER: [u8; HEADER_SIZE - 1] = [0; HEADER_SIZE - 1];

/// Log writer for durable logging.
///
/// Writes logical records to an append-only destination, fragmenting them
/// into checksummed physical records that never cross a block boundary.
///
/// The writer is not synchronized; a log has a single logical writer. Once
/// any call has returned an error the writer must not be used again: its
/// block offset already accounts for the failed record, and the bytes that
/// reached the file are unknown.
pub struct LogWriter<W: WritableFile> {
    /// Destination file.
    dest: W,
    /// Current position within the current block.
    block_offset: usize,
    /// CRC32C of each record type byte, used to seed the record checksum.
    type_crc: [u32; MAX_RECORD_TYPE as usize + 1],
    /// Sync mode for durability.
    sync_mode: SyncMode,
    /// Bytes written since last sync.
    bytes_since_sync: usize,
}

impl<W: WritableFile> LogWriter<W> {
    /// Create a writer that appends to `dest`, which must be empty.
    pub fn new(dest: W) -> Self {
        Self::with_offset(dest, 0)
    }

    /// Create a writer that appends to `dest`, which already holds
    /// `dest_length` bytes of log data.
    pub fn with_offset(dest: W, dest_length: u64) -> Self {
        Self {
            dest,
            block_offset: (dest_length % BLOCK_SIZE as u64) as usize,
            type_crc: init_type_crc(),
            sync_mode: SyncMode::None,
            bytes_since_sync: 0,
        }
    }

    /// Set the sync mode.
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    /// Current position within the active block.
    pub fn block_offset(&self) -> usize {
        self.block_offset
    }

    /// Borrow the destination.
    pub fn get_ref(&self) -> &W {
        &self.dest
    }

    /// Consume the writer and return the destination.
    pub fn into_inner(self) -> W {
        self.dest
    }

    /// Add a record to the log.
    ///
    /// The record may be split across multiple fragments if it doesn't fit
    /// in the current block. An empty record still produces one zero-length
    /// FULL fragment. On error, fragments written before the failure remain
    /// in the file.
    pub fn add_record(&mut self, data: &[u8]) -> Result<()> {
        let mut left = data.len();
        let mut ptr = 0;
        let mut begin = true;

        loop {
            let leftover = BLOCK_SIZE - self.block_offset;

            // Switch to a new block if we can't fit a header
            if leftover < HEADER_SIZE {
                if leftover > 0 {
                    trace!(leftover, "padding log block trailer");
                    self.dest.append(&TRAILER[..leftover]).inspect_err(|e| {
                        warn!(error = %e, "failed to pad log block trailer");
                    })?;
                    self.bytes_since_sync += leftover;
                }
                self.block_offset = 0;
            }

            debug_assert!(BLOCK_SIZE - self.block_offset >= HEADER_SIZE);

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_length = left.min(avail);
            let end = left == fragment_length;
            let record_type = RecordType::for_fragment(begin, end);

            self.emit_physical_record(record_type, &data[ptr..ptr + fragment_length])
                .inspect_err(|e| {
                    warn!(
                        error = %e,
                        ?record_type,
                        offset = ptr,
                        total = data.len(),
                        "failed to append log record"
                    );
                })?;

            ptr += fragment_length;
            left -= fragment_length;
            begin = false;

            if left == 0 {
                break;
            }
        }

        self.maybe_sync()
    }

    /// Write a physical record (header + data) and flush it.
    fn emit_physical_record(&mut self, record_type: RecordType, data: &[u8]) -> Result<()> {
        debug_assert!(data.len() <= 0xFFFF); // Length fits in 2 bytes
        debug_assert!(self.block_offset + HEADER_SIZE + data.len() <= BLOCK_SIZE);

        // Checksum covers the type byte and the payload
        let crc = crc32c_extend(self.type_crc[record_type.to_byte() as usize], data);

        // Header format: CRC (4) + Length (2) + Type (1)
        let mut header = [0u8; HEADER_SIZE];
        encode_fixed32(&mut header[0..4], mask_crc(crc));
        encode_fixed16(&mut header[4..6], data.len() as u16);
        header[6] = record_type.to_byte();

        let record_size = HEADER_SIZE + data.len();
        let result = self
            .dest
            .append(&header)
            .and_then(|()| self.dest.append(data))
            .and_then(|()| self.dest.flush());

        // The offset moves forward whether or not the write succeeded.
        self.block_offset += record_size;
        self.bytes_since_sync += record_size;

        result
    }

    /// Sync if required by sync mode.
    fn maybe_sync(&mut self) -> Result<()> {
        match self.sync_mode {
            SyncMode::Always => self.sync(),
            SyncMode::Bytes { bytes } if self.bytes_since_sync >= bytes => self.sync(),
            SyncMode::Bytes { .. } | SyncMode::None => Ok(()),
        }
    }

    /// Force a sync to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.dest.sync()?;
        self.bytes_since_sync = 0;
        Ok(())
    }

    /// Sync and close the writer.
    pub fn close(mut self) -> Result<()> {
        self.dest.flush()?;
        self.sync()
    }
}

impl LogWriter<LogFile> {
    /// Create a new, empty log file at `path`.
    pub fn create(path: &Path, options: &Options) -> Result<Self> {
        options.validate()?;
        let file = LogFile::create(path)?;
        debug!(path = %path.display(), "created log file");
        Ok(Self::new(file).with_sync_mode(options.sync_mode))
    }

    /// Reopen an existing log file and continue appending past its end.
    pub fn open_for_append(path: &Path, options: &Options) -> Result<Self> {
        options.validate()?;
        let file = LogFile::open_for_append(path)?;
        let len = file.initial_len();
        debug!(path = %path.display(), len, "reopened log file for append");
        Ok(Self::with_offset(file, len).with_sync_mode(options.sync_mode))
    }
}

fn init_type_crc() -> [u32; MAX_RECORD_TYPE as usize + 1] {
    let mut type_crc = [0u32; MAX_RECORD_TYPE as usize + 1];
    for (t, crc) in type_crc.iter_mut().enumerate() {
        *crc = crc32c(&[t as u8]);
    }
    type_crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::coding::{read_fixed16, read_fixed32};
    use crate::util::crc::unmask_crc;
    use crate::wal::MAX_FRAGMENT_SIZE;
    use crate::Error;
    use proptest::prelude::*;
    use tempfile::tempdir;

    /// A physical record parsed back out of a log image.
    #[derive(Debug)]
    struct Fragment {
        offset: usize,
        record_type: u8,
        payload: Vec<u8>,
    }

    /// Walk a log image block by block, checking every header.
    fn parse_fragments(image: &[u8]) -> Vec<Fragment> {
        let mut fragments = Vec::new();
        let mut pos = 0;
        while pos < image.len() {
            let block_left = BLOCK_SIZE - pos % BLOCK_SIZE;
            if block_left < HEADER_SIZE {
                assert!(image[pos..pos + block_left].iter().all(|&b| b == 0));
                pos += block_left;
                continue;
            }
            let header = &image[pos..pos + HEADER_SIZE];
            let masked = read_fixed32(header).unwrap();
            let length = read_fixed16(&header[4..]).unwrap() as usize;
            let record_type = header[6];
            assert!(HEADER_SIZE + length <= block_left, "fragment crosses block");

            let payload = image[pos + HEADER_SIZE..pos + HEADER_SIZE + length].to_vec();
            let expected = crc32c_extend(crc32c(&[record_type]), &payload);
            assert_eq!(unmask_crc(masked), expected);

            fragments.push(Fragment {
                offset: pos,
                record_type,
                payload,
            });
            pos += HEADER_SIZE + length;
        }
        fragments
    }

    /// Destination that fails appends after `ok_calls` successes and
    /// flushes after `ok_flushes` successes.
    struct FailingFile {
        written: Vec<u8>,
        ok_calls: usize,
        ok_flushes: usize,
    }

    impl WritableFile for FailingFile {
        fn append(&mut self, data: &[u8]) -> Result<()> {
            if self.ok_calls == 0 {
                return Err(Error::Io("no space left on device".into()));
            }
            self.ok_calls -= 1;
            self.written.extend_from_slice(data);
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            if self.ok_flushes == 0 {
                return Err(Error::Io("input/output error".into()));
            }
            self.ok_flushes -= 1;
            Ok(())
        }

        fn sync(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_writer_small_record_layout() {
        let mut writer = LogWriter::new(Vec::new());
        writer.add_record(b"foo").unwrap();

        let image = writer.into_inner();
        assert_eq!(image.len(), HEADER_SIZE + 3);
        assert_eq!(read_fixed16(&image[4..6]), Some(3));
        assert_eq!(image[6], RecordType::Full.to_byte());
        assert_eq!(&image[7..], b"foo");

        let crc = unmask_crc(read_fixed32(&image).unwrap());
        assert_eq!(crc, crc32c(&[1, b'f', b'o', b'o']));
    }

    #[test]
    fn test_writer_empty_record() {
        let mut writer = LogWriter::new(Vec::new());
        writer.add_record(b"").unwrap();
        assert_eq!(writer.block_offset(), HEADER_SIZE);

        let fragments = parse_fragments(writer.get_ref());
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].record_type, RecordType::Full.to_byte());
        assert!(fragments[0].payload.is_empty());
    }

    #[test]
    fn test_writer_fragments_40000_bytes() {
        let payload: Vec<u8> = (0..40000).map(|i| (i % 251) as u8).collect();
        let mut writer = LogWriter::new(Vec::new());
        writer.add_record(&payload).unwrap();

        let fragments = parse_fragments(writer.get_ref());
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].record_type, RecordType::First.to_byte());
        assert_eq!(fragments[0].payload.len(), 32761);
        assert_eq!(fragments[1].record_type, RecordType::Last.to_byte());
        assert_eq!(fragments[1].payload.len(), 7239);
        // Exactly one header's worth of space was left, so no padding.
        assert_eq!(fragments[1].offset, BLOCK_SIZE);

        let joined: Vec<u8> = fragments.into_iter().flat_map(|f| f.payload).collect();
        assert_eq!(joined, payload);
    }

    #[test]
    fn test_writer_middle_fragments() {
        let payload = vec![b'm'; BLOCK_SIZE * 3];
        let mut writer = LogWriter::new(Vec::new());
        writer.add_record(&payload).unwrap();

        let types: Vec<u8> = parse_fragments(writer.get_ref())
            .iter()
            .map(|f| f.record_type)
            .collect();
        assert_eq!(types, vec![2, 3, 3, 4]);
    }

    #[test]
    fn test_writer_pads_block_trailer() {
        // Leaves 3 bytes in the first block: too small for a header.
        let first = vec![b'a'; BLOCK_SIZE - HEADER_SIZE - 3];
        let mut writer = LogWriter::new(Vec::new());
        writer.add_record(&first).unwrap();
        assert_eq!(writer.block_offset(), BLOCK_SIZE - 3);

        writer.add_record(b"next").unwrap();
        assert_eq!(writer.block_offset(), HEADER_SIZE + 4);

        let image = writer.get_ref();
        assert_eq!(&image[BLOCK_SIZE - 3..BLOCK_SIZE], &[0, 0, 0]);

        let fragments = parse_fragments(image);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[1].offset, BLOCK_SIZE);
        assert_eq!(fragments[1].payload, b"next");
    }

    #[test]
    fn test_writer_exact_block_fill() {
        let mut writer = LogWriter::new(Vec::new());
        writer.add_record(&vec![b'z'; BLOCK_SIZE - HEADER_SIZE]).unwrap();
        assert_eq!(writer.block_offset(), BLOCK_SIZE);

        writer.add_record(b"").unwrap();
        assert_eq!(writer.get_ref().len(), BLOCK_SIZE + HEADER_SIZE);
        assert_eq!(writer.block_offset(), HEADER_SIZE);
    }

    #[test]
    fn test_writer_resume_offset() {
        let mut writer = LogWriter::new(Vec::new());
        writer.add_record(&vec![b'x'; 1000]).unwrap();
        let image = writer.into_inner();
        let len = image.len() as u64;

        let mut resumed = LogWriter::with_offset(image, len);
        assert_eq!(resumed.block_offset(), 1000 + HEADER_SIZE);
        resumed.add_record(&vec![b'y'; BLOCK_SIZE]).unwrap();

        for fragment in parse_fragments(resumed.get_ref()) {
            assert!(fragment.offset % BLOCK_SIZE + HEADER_SIZE + fragment.payload.len() <= BLOCK_SIZE);
        }

        let resumed_far = LogWriter::with_offset(Vec::new(), (BLOCK_SIZE * 5 + 17) as u64);
        assert_eq!(resumed_far.block_offset(), 17);
    }

    #[test]
    fn test_writer_propagates_append_failure() {
        // Header and payload of the first fragment succeed, the second fails.
        let dest = FailingFile {
            written: Vec::new(),
            ok_calls: 2,
            ok_flushes: usize::MAX,
        };
        let mut writer = LogWriter::new(dest);
        let err = writer.add_record(&vec![b'q'; 40000]).unwrap_err();
        assert!(matches!(err, Error::Io(_)));

        let dest = writer.get_ref();
        assert_eq!(dest.written.len(), BLOCK_SIZE);
        // The failed fragment is still counted in the offset.
        assert_eq!(writer.block_offset(), HEADER_SIZE + 7239);
    }

    #[test]
    fn test_writer_propagates_flush_failure() {
        let dest = FailingFile {
            written: Vec::new(),
            ok_calls: usize::MAX,
            ok_flushes: 0,
        };
        let mut writer = LogWriter::new(dest);
        let err = writer.add_record(&vec![b'q'; 40000]).unwrap_err();
        assert!(matches!(err, Error::Io(_)));

        // Only the first fragment reached the file; the LAST was never sent.
        let fragments = parse_fragments(&writer.get_ref().written);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].record_type, RecordType::First.to_byte());
        assert_eq!(fragments[0].payload.len(), MAX_FRAGMENT_SIZE);
        // The offset still covers the unflushed fragment.
        assert_eq!(writer.block_offset(), HEADER_SIZE + MAX_FRAGMENT_SIZE);
    }

    #[test]
    fn test_writer_create_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000003.log");
        let options = Options::default();

        let mut writer = LogWriter::create(&path, &options).unwrap();
        writer.add_record(b"hello world").unwrap();
        writer.close().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 18);

        let mut writer = LogWriter::open_for_append(&path, &options).unwrap();
        assert_eq!(writer.block_offset(), 18);
        writer.add_record(b"again").unwrap();
        writer.close().unwrap();

        let image = std::fs::read(&path).unwrap();
        let fragments = parse_fragments(&image);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[1].payload, b"again");
    }

    #[test]
    fn test_writer_sync_modes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000004.log");

        let options = Options {
            sync_mode: SyncMode::Always,
            ..Options::default()
        };
        let mut writer = LogWriter::create(&path, &options).unwrap();
        writer.add_record(b"synced record").unwrap();
        assert_eq!(writer.bytes_since_sync, 0);

        let mut writer = LogWriter::new(Vec::new()).with_sync_mode(SyncMode::Bytes { bytes: 100 });
        writer.add_record(&[0u8; 50]).unwrap();
        assert_eq!(writer.bytes_since_sync, 57);
        writer.add_record(&[0u8; 50]).unwrap();
        assert_eq!(writer.bytes_since_sync, 0);
    }

    #[test]
    fn test_writer_rejects_invalid_options() {
        let dir = tempdir().unwrap();
        let options = Options {
            sync_mode: SyncMode::Bytes { bytes: 0 },
            ..Options::default()
        };
        let result = LogWriter::create(&dir.path().join("000005.log"), &options);
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    proptest! {
        #[test]
        fn prop_fragments_reassemble(
            sizes in proptest::collection::vec(0usize..3 * BLOCK_SIZE, 1..8),
        ) {
            let records: Vec<Vec<u8>> = sizes
                .iter()
                .enumerate()
                .map(|(i, &n)| (0..n).map(|j| (i * 31 + j) as u8).collect())
                .collect();

            let mut writer = LogWriter::new(Vec::new());
            for record in &records {
                writer.add_record(record).unwrap();
            }
            let image = writer.into_inner();

            let mut assembled = Vec::new();
            let mut current: Option<Vec<u8>> = None;
            for fragment in parse_fragments(&image) {
                prop_assert!(fragment.payload.len() <= MAX_FRAGMENT_SIZE);
                let end = fragment.offset + HEADER_SIZE + fragment.payload.len();
                prop_assert_eq!(fragment.offset / BLOCK_SIZE, (end - 1) / BLOCK_SIZE);

                match RecordType::from_byte(fragment.record_type).unwrap() {
                    RecordType::Full => {
                        prop_assert!(current.is_none());
                        assembled.push(fragment.payload);
                    }
                    RecordType::First => {
                        prop_assert!(current.is_none());
                        current = Some(fragment.payload);
                    }
                    RecordType::Middle => {
                        current.as_mut().unwrap().extend_from_slice(&fragment.payload);
                    }
                    RecordType::Last => {
                        let mut record = current.take().unwrap();
                        record.extend_from_slice(&fragment.payload);
                        assembled.push(record);
                    }
                    RecordType::Zero => prop_assert!(false, "zero type written"),
                }
            }
            prop_assert!(current.is_none());
            prop_assert_eq!(assembled, records);
        }
    }
}
