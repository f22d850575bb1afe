//! Bucket file writer.
//!
//! Writes a bucket file from a sequence of events that must already be in
//! layout order.

use super::record::Record;
use super::{encode_event, FileKind, MAGIC};
use crate::error::{Error, Result};
use crate::types::{AcidEvent, EventKey};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// EventFileWriter builds one bucket file.
///
/// Usage:
/// ```no_run
/// use acidstore::event::{EventFileWriter, FileKind};
/// use acidstore::types::AcidEvent;
///
/// let mut writer = EventFileWriter::create("bucket_00000", FileKind::Acid).unwrap();
/// writer.append(&AcidEvent::insert(1, 0, 0, &b"row0"[..])).unwrap();
/// writer.append(&AcidEvent::insert(1, 0, 1, &b"row1"[..])).unwrap();
/// writer.finish().unwrap();
/// ```
pub struct EventFileWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    kind: FileKind,
    last_key: Option<EventKey>,
    num_records: u64,
    file_size: u64,
}

impl EventFileWriter {
    /// Create a new bucket file, truncating any existing file at `path`.
    pub fn create<P: AsRef<Path>>(path: P, kind: FileKind) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(MAGIC)?;
        writer.write_all(&[kind as u8])?;

        Ok(Self {
            path,
            writer,
            kind,
            last_key: None,
            num_records: 0,
            file_size: super::FILE_HEADER_SIZE as u64,
        })
    }

    /// Append an event.
    ///
    /// Events must be added in strictly increasing [`EventKey`] order.
    pub fn append(&mut self, event: &AcidEvent) -> Result<()> {
        if self.kind != FileKind::Acid {
            return Err(Error::invalid_state("cannot append events to an original-row file"));
        }

        let key = event.key();
        if let Some(last) = self.last_key {
            if key <= last {
                return Err(Error::invalid_argument(format!(
                    "Events must be added in sorted order: {:?} after {:?}",
                    key, last
                )));
            }
        }

        self.write_record(Record::new(encode_event(event)))?;
        self.last_key = Some(key);
        Ok(())
    }

    /// Append a plain row to an original-row file.
    pub fn append_row(&mut self, row: &[u8]) -> Result<()> {
        if self.kind != FileKind::Original {
            return Err(Error::invalid_state("cannot append plain rows to an event file"));
        }
        self.write_record(Record::new(bytes::Bytes::copy_from_slice(row)))
    }

    fn write_record(&mut self, record: Record) -> Result<()> {
        let encoded = record.encode()?;
        self.writer.write_all(&encoded)?;
        self.file_size += encoded.len() as u64;
        self.num_records += 1;
        Ok(())
    }

    /// Flush, sync and close the file. Returns the file size.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        log::trace!("Finished bucket file {:?}: {} records", self.path, self.num_records);
        Ok(self.file_size)
    }

    /// Number of records written so far.
    pub fn num_records(&self) -> u64 {
        self.num_records
    }

    /// Path of the file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordIdentifier;
    use tempfile::TempDir;

    #[test]
    fn test_rejects_out_of_order_events() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer =
            EventFileWriter::create(temp_dir.path().join("bucket_00000"), FileKind::Acid).unwrap();

        writer.append(&AcidEvent::insert(2, 0, 0, &b"a"[..])).unwrap();
        let result = writer.append(&AcidEvent::insert(1, 0, 0, &b"b"[..]));
        assert!(matches!(result, Err(Error::InvalidArgument(_))));

        // newer event for the same row must come first
        let id = RecordIdentifier::new(2, 0, 1);
        writer.append(&AcidEvent::delete(id, 5)).unwrap();
        assert!(writer.append(&AcidEvent::update(id, 6, &b"c"[..])).is_err());
        assert_eq!(writer.num_records(), 2);
    }

    #[test]
    fn test_rejects_duplicate_event() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer =
            EventFileWriter::create(temp_dir.path().join("bucket_00000"), FileKind::Acid).unwrap();
        let event = AcidEvent::insert(1, 0, 0, &b"a"[..]);
        writer.append(&event).unwrap();
        assert!(writer.append(&event).is_err());
    }

    #[test]
    fn test_kind_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let mut original =
            EventFileWriter::create(temp_dir.path().join("000000_0"), FileKind::Original).unwrap();
        assert!(original.append(&AcidEvent::insert(1, 0, 0, &b"a"[..])).is_err());
        original.append_row(b"plain").unwrap();

        let mut acid =
            EventFileWriter::create(temp_dir.path().join("bucket_00000"), FileKind::Acid).unwrap();
        assert!(acid.append_row(b"plain").is_err());
    }

    #[test]
    fn test_finish_reports_size() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bucket_00000");
        let mut writer = EventFileWriter::create(&path, FileKind::Acid).unwrap();
        writer.append(&AcidEvent::insert(1, 0, 0, &b"abc"[..])).unwrap();
        let size = writer.finish().unwrap();

        assert_eq!(size, std::fs::metadata(&path).unwrap().len());
        assert_eq!(size, 9 + 8 + 33 + 3);
    }
}
