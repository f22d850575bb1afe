//! One input of a merge.

use crate::error::{Error, Result};
use crate::event::{EventFileReader, FileKind};
use crate::storage::Storage;
use crate::types::{AcidEvent, BucketId, EventKey, Operation, RecordIdentifier};
use std::collections::VecDeque;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Description of a merge input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeSource {
    /// One ACID bucket file of a base or delta.
    Events {
        /// Path of the bucket file.
        path: PathBuf,
    },
    /// The legacy files of one bucket, read back to back as one source.
    Originals {
        /// Bucket the files belong to.
        bucket: BucketId,
        /// Files in read order.
        paths: Vec<PathBuf>,
    },
}

impl MergeSource {
    /// Paths read by this source.
    pub fn paths(&self) -> &[PathBuf] {
        match self {
            MergeSource::Events { path } => std::slice::from_ref(path),
            MergeSource::Originals { paths, .. } => paths,
        }
    }
}

type BoxedReader = EventFileReader<Box<dyn Read + Send>>;

/// An open source yielding events in key order.
pub(crate) struct SourceCursor {
    reader: Option<BoxedReader>,
    path: PathBuf,
    pending: VecDeque<PathBuf>,
    original_bucket: Option<BucketId>,
    next_ordinal: u64,
    last_key: Option<EventKey>,
    verify_checksums: bool,
}

impl SourceCursor {
    /// Opens the first file of the source.
    pub(crate) fn open(storage: &dyn Storage, input: &MergeSource, verify_checksums: bool) -> Result<Self> {
        let (original_bucket, mut pending): (Option<BucketId>, VecDeque<PathBuf>) = match input {
            MergeSource::Events { path } => (None, VecDeque::from([path.clone()])),
            MergeSource::Originals { bucket, paths } => (Some(*bucket), paths.iter().cloned().collect()),
        };
        let path = pending
            .pop_front()
            .ok_or_else(|| Error::invalid_argument("source has no files"))?;

        let mut cursor = Self {
            reader: None,
            path,
            pending,
            original_bucket,
            next_ordinal: 0,
            last_key: None,
            verify_checksums,
        };
        cursor.reader = Some(cursor.open_file(storage)?);
        Ok(cursor)
    }

    fn expected_kind(&self) -> FileKind {
        if self.original_bucket.is_some() {
            FileKind::Original
        } else {
            FileKind::Acid
        }
    }

    fn open_file(&self, storage: &dyn Storage) -> Result<BoxedReader> {
        let stream = storage.open(&self.path).map_err(|e| self.annotate(e))?;
        let reader = EventFileReader::new(stream, self.verify_checksums).map_err(|e| self.annotate(e))?;
        if reader.kind() != self.expected_kind() {
            return Err(Error::corruption(format!(
                "{}: expected {:?} file, found {:?}",
                self.path.display(),
                self.expected_kind(),
                reader.kind()
            )));
        }
        log::trace!("Opened source file {:?}", self.path);
        Ok(reader)
    }

    /// Path of the file currently being read.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    fn annotate(&self, err: Error) -> Error {
        match err {
            Error::Io(source) => Error::source_io(&self.path, source),
            Error::Corruption(msg) => Error::corruption(format!("{}: {}", self.path.display(), msg)),
            Error::ChecksumMismatch { expected, actual } => Error::corruption(format!(
                "{}: checksum mismatch, expected {:#x}, got {:#x}",
                self.path.display(),
                expected,
                actual
            )),
            other => other,
        }
    }

    /// Reads the next event, moving on to the next file of the source when
    /// the current one ends.
    pub(crate) fn next_event(&mut self, storage: &dyn Storage) -> Result<Option<AcidEvent>> {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };
            let event = match self.original_bucket {
                None => reader.read_event(),
                Some(bucket) => reader.read_record().map(|record| {
                    record.map(|row| {
                        let id = RecordIdentifier::new(0, bucket, self.next_ordinal);
                        self.next_ordinal += 1;
                        AcidEvent { operation: Operation::Insert, id, current_write_id: 0, statement_id: 0, row }
                    })
                }),
            }
            .map_err(|e| self.annotate(e))?;

            match event {
                Some(event) => {
                    let key = event.key();
                    if let Some(last) = self.last_key {
                        if key <= last {
                            return Err(Error::corruption(format!(
                                "{}: events out of order, {:?} after {:?}",
                                self.path.display(),
                                key,
                                last
                            )));
                        }
                    }
                    self.last_key = Some(key);
                    return Ok(Some(event));
                }
                None => {
                    self.reader = None;
                    match self.pending.pop_front() {
                        Some(next) => {
                            self.path = next;
                            self.reader = Some(self.open_file(storage)?);
                        }
                        None => return Ok(None),
                    }
                }
            }
        }
    }
}
