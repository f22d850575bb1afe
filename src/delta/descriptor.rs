//! Binary descriptor of one delta batch.
//!
//! Format (big-endian):
//! ```text
//! [min_write_id: u64]
//! [max_write_id: u64]
//! [num_statements: u32] [statement_id: u32] * num_statements
//! [visibility_id: u64]
//! [num_files: u32] [DeltaFileRecord] * num_files
//! ```

use super::file_record::{ensure_remaining, DeltaFileRecord};
use crate::error::{Error, Result};
use crate::naming::{self, DeltaKind, DESCRIPTOR_FILE};
use crate::storage::{FileStatus, Storage};
use crate::types::{StatementId, VisibilityId, WriteIdRange};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Describes one delta batch: a write id range, optionally split over one
/// directory per statement, plus the files it contains.
///
/// With no statement ids the batch occupies exactly one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaBatchDescriptor {
    range: WriteIdRange,
    statement_ids: Vec<StatementId>,
    visibility_id: VisibilityId,
    files: Vec<DeltaFileRecord>,
}

impl DeltaBatchDescriptor {
    /// Creates a descriptor. Statement ids are sorted and deduplicated.
    pub fn new(
        range: WriteIdRange,
        mut statement_ids: Vec<StatementId>,
        visibility_id: VisibilityId,
        files: Vec<DeltaFileRecord>,
    ) -> Self {
        statement_ids.sort_unstable();
        statement_ids.dedup();
        Self { range, statement_ids, visibility_id, files }
    }

    /// Creates a descriptor from a live file listing.
    ///
    /// Directories and hidden side files in `statuses` are skipped; the
    /// status of every bucket file is captured now so identity never needs
    /// another trip to the backend.
    pub fn from_listing(
        range: WriteIdRange,
        statement_ids: Vec<StatementId>,
        visibility_id: VisibilityId,
        statuses: &[FileStatus],
    ) -> Result<Self> {
        let mut files = Vec::with_capacity(statuses.len());
        for status in statuses {
            let name = status.file_name()?;
            if status.is_dir || naming::is_hidden(name) {
                continue;
            }
            naming::parse_bucket_file(name)?;
            files.push(DeltaFileRecord::from_status(status));
        }
        Ok(Self::new(range, statement_ids, visibility_id, files))
    }

    /// Lists every directory of the batch under `root` and builds its
    /// descriptor.
    pub fn load(
        storage: &dyn Storage,
        root: &Path,
        kind: DeltaKind,
        range: WriteIdRange,
        statement_ids: Vec<StatementId>,
        visibility_id: VisibilityId,
    ) -> Result<Self> {
        let layout = Self::new(range, statement_ids, visibility_id, Vec::new());
        let mut statuses = Vec::new();
        for dir in layout.paths_for(root, kind) {
            statuses.extend(storage.list(&dir)?);
        }
        Self::from_listing(layout.range, layout.statement_ids, visibility_id, &statuses)
    }

    /// Write id range of the batch.
    pub fn range(&self) -> WriteIdRange {
        self.range
    }

    /// Statement ids, empty for an unsplit batch.
    pub fn statement_ids(&self) -> &[StatementId] {
        &self.statement_ids
    }

    /// Visibility threshold shared by every directory of the batch.
    pub fn visibility_id(&self) -> VisibilityId {
        self.visibility_id
    }

    /// Files of the batch.
    pub fn files(&self) -> &[DeltaFileRecord] {
        &self.files
    }

    /// Directory paths of an insert batch under `root`.
    ///
    /// Never empty: one path per statement id, or a single path.
    pub fn paths(&self, root: &Path) -> Vec<PathBuf> {
        self.paths_for(root, DeltaKind::Insert)
    }

    /// Directory paths of the batch for a given delta kind.
    pub fn paths_for(&self, root: &Path, kind: DeltaKind) -> Vec<PathBuf> {
        if self.statement_ids.is_empty() {
            vec![root.join(naming::delta_dir_name(kind, self.range, None, self.visibility_id))]
        } else {
            self.statement_ids
                .iter()
                .map(|&stmt| {
                    root.join(naming::delta_dir_name(kind, self.range, Some(stmt), self.visibility_id))
                })
                .collect()
        }
    }

    /// Number of bytes `encode` writes.
    pub fn encoded_size(&self) -> usize {
        8 + 8
            + 4
            + 4 * self.statement_ids.len()
            + 8
            + 4
            + self.files.iter().map(DeltaFileRecord::encoded_size).sum::<usize>()
    }

    /// Encodes the descriptor.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64(self.range.min);
        buf.put_u64(self.range.max);
        buf.put_u32(self.statement_ids.len() as u32);
        for &stmt in &self.statement_ids {
            buf.put_u32(stmt);
        }
        buf.put_u64(self.visibility_id);
        buf.put_u32(self.files.len() as u32);
        for file in &self.files {
            file.encode(buf);
        }
    }

    /// Encodes the descriptor into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decodes a descriptor, consuming exactly the bytes `encode` produced.
    ///
    /// Statement ids are kept in the order they were written so that
    /// re-encoding reproduces the input byte for byte.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure_remaining(buf, 20, "descriptor header")?;
        let min = buf.get_u64();
        let max = buf.get_u64();
        let range = WriteIdRange::new(min, max)
            .map_err(|_| Error::encoding(format!("inverted write id range {}..={}", min, max)))?;

        let num_statements = buf.get_u32() as usize;
        if num_statements > buf.remaining() / 4 {
            return Err(Error::encoding(format!(
                "statement count {} exceeds remaining {} bytes",
                num_statements,
                buf.remaining()
            )));
        }
        let mut statement_ids = Vec::with_capacity(num_statements);
        for _ in 0..num_statements {
            statement_ids.push(buf.get_u32());
        }

        ensure_remaining(buf, 12, "visibility id and file count")?;
        let visibility_id = buf.get_u64();
        let num_files = buf.get_u32() as usize;
        if num_files > buf.remaining() / 17 {
            return Err(Error::encoding(format!(
                "file count {} exceeds remaining {} bytes",
                num_files,
                buf.remaining()
            )));
        }
        let mut files = Vec::with_capacity(num_files);
        for _ in 0..num_files {
            files.push(DeltaFileRecord::decode(buf)?);
        }

        Ok(Self { range, statement_ids, visibility_id, files })
    }

    /// Decodes a descriptor that must span all of `data`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let descriptor = Self::decode(&mut buf)?;
        if buf.has_remaining() {
            return Err(Error::encoding(format!(
                "{} trailing bytes after descriptor",
                buf.remaining()
            )));
        }
        Ok(descriptor)
    }

    /// Writes the encoded descriptor into `dir` as `_delta_descriptor`.
    pub fn write_sidecar(&self, dir: &Path) -> Result<()> {
        let mut file = File::create(dir.join(DESCRIPTOR_FILE))?;
        file.write_all(&self.to_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Reads the descriptor persisted in `dir`, returning `None` if there
    /// is none.
    pub fn read_sidecar(storage: &dyn Storage, dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(DESCRIPTOR_FILE);
        let mut reader = match storage.open(&path) {
            Ok(reader) => reader,
            Err(Error::SourceIo { source, .. }) if source.kind() == ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
            .map(Some)
            .map_err(|e| Error::encoding(format!("bad {:?}: {}", path, e)))
    }
}

impl fmt::Display for DeltaBatchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Delta({}, {}, {:?}, {})",
            self.range.min, self.range.max, self.statement_ids, self.visibility_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;

    fn sample() -> DeltaBatchDescriptor {
        DeltaBatchDescriptor::new(
            WriteIdRange::new(5, 9).unwrap(),
            vec![1, 0],
            42,
            vec![
                DeltaFileRecord::new(1000, 10, None, None),
                DeltaFileRecord::new(2000, 20, Some(1), Some(555)),
            ],
        )
    }

    #[test]
    fn test_encode_layout() {
        let descriptor = sample();
        let bytes = descriptor.to_bytes();
        assert_eq!(bytes.len(), descriptor.encoded_size());

        assert_eq!(&bytes[0..8], &5u64.to_be_bytes());
        assert_eq!(&bytes[8..16], &9u64.to_be_bytes());
        assert_eq!(&bytes[16..20], &2u32.to_be_bytes());
        assert_eq!(&bytes[20..24], &0u32.to_be_bytes());
        assert_eq!(&bytes[24..28], &1u32.to_be_bytes());
        assert_eq!(&bytes[28..36], &42u64.to_be_bytes());
        assert_eq!(&bytes[36..40], &2u32.to_be_bytes());
    }

    #[test]
    fn test_decode_roundtrip() {
        let descriptor = sample();
        let bytes = descriptor.to_bytes();
        let decoded = DeltaBatchDescriptor::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, descriptor);
        assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn test_decode_preserves_statement_order() {
        let mut bytes = Vec::new();
        bytes.put_u64(1);
        bytes.put_u64(1);
        bytes.put_u32(2);
        bytes.put_u32(7);
        bytes.put_u32(3);
        bytes.put_u64(0);
        bytes.put_u32(0);

        let decoded = DeltaBatchDescriptor::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.statement_ids(), &[7, 3]);
        assert_eq!(decoded.to_bytes().as_ref(), bytes.as_slice());
    }

    #[test]
    fn test_decode_rejects_bad_counts() {
        let mut bytes = Vec::new();
        bytes.put_u64(1);
        bytes.put_u64(2);
        bytes.put_u32(1000);
        bytes.put_u32(0);
        assert!(matches!(DeltaBatchDescriptor::from_bytes(&bytes), Err(Error::Encoding(_))));

        let mut bytes = sample().to_bytes().to_vec();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(DeltaBatchDescriptor::from_bytes(&bytes), Err(Error::Encoding(_))));

        let mut bytes = sample().to_bytes().to_vec();
        bytes.push(0);
        assert!(matches!(DeltaBatchDescriptor::from_bytes(&bytes), Err(Error::Encoding(_))));
    }

    #[test]
    fn test_paths_single_directory() {
        let descriptor = DeltaBatchDescriptor::new(WriteIdRange::new(3, 4).unwrap(), vec![], 0, vec![]);
        let paths = descriptor.paths(Path::new("/t"));
        assert_eq!(paths, vec![PathBuf::from("/t/delta_3_4")]);
    }

    #[test]
    fn test_paths_per_statement() {
        let descriptor = DeltaBatchDescriptor::new(WriteIdRange::single(5), vec![0, 1], 0, vec![]);
        assert_eq!(
            descriptor.paths(Path::new("/t")),
            vec![PathBuf::from("/t/delta_5_5_0"), PathBuf::from("/t/delta_5_5_1")]
        );

        let visible = DeltaBatchDescriptor::new(WriteIdRange::single(5), vec![0, 1], 12, vec![]);
        assert_eq!(
            visible.paths_for(Path::new("/t"), DeltaKind::Delete),
            vec![PathBuf::from("/t/delete_delta_5_5_0_v12"), PathBuf::from("/t/delete_delta_5_5_1_v12")]
        );
    }

    #[test]
    fn test_from_listing_skips_side_files() {
        let statuses = vec![
            FileStatus {
                path: PathBuf::from("/t/delta_1_1/_metadata_acid"),
                length: 40,
                modification_time: 1,
                is_dir: false,
                file_id: None,
            },
            FileStatus {
                path: PathBuf::from("/t/delta_1_1/bucket_00000"),
                length: 100,
                modification_time: 2,
                is_dir: false,
                file_id: Some(9),
            },
        ];
        let descriptor =
            DeltaBatchDescriptor::from_listing(WriteIdRange::single(1), vec![], 0, &statuses).unwrap();
        assert_eq!(descriptor.files(), &[DeltaFileRecord::new(2, 100, None, Some(9))]);
    }

    #[test]
    fn test_load_multi_statement_delete_batch() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let range = WriteIdRange::single(7);
        for (stmt, buckets) in [(0u32, &[0u32, 2][..]), (1, &[1][..])] {
            let dir = temp_dir.path().join(naming::delta_dir_name(DeltaKind::Delete, range, Some(stmt), 30));
            std::fs::create_dir(&dir).unwrap();
            for &bucket in buckets {
                std::fs::write(naming::bucket_file_path(&dir, bucket, None), vec![0u8; 10 + bucket as usize])
                    .unwrap();
            }
        }

        let storage = LocalStorage::new();
        let loaded =
            DeltaBatchDescriptor::load(&storage, temp_dir.path(), DeltaKind::Delete, range, vec![1, 0], 30).unwrap();
        assert_eq!(loaded.statement_ids(), &[0, 1]);
        assert_eq!(loaded.visibility_id(), 30);
        let mut lengths: Vec<u64> = loaded.files().iter().map(|f| f.length).collect();
        lengths.sort();
        assert_eq!(lengths, vec![10, 11, 12]);

        // The insert directories of the same batch do not exist
        let inserts = DeltaBatchDescriptor::load(&storage, temp_dir.path(), DeltaKind::Insert, range, vec![0, 1], 30);
        assert!(inserts.is_err());
    }

    #[test]
    fn test_sidecar_roundtrip() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let storage = LocalStorage::new();
        assert!(DeltaBatchDescriptor::read_sidecar(&storage, temp_dir.path()).unwrap().is_none());

        sample().write_sidecar(temp_dir.path()).unwrap();
        assert_eq!(DeltaBatchDescriptor::read_sidecar(&storage, temp_dir.path()).unwrap(), Some(sample()));

        std::fs::write(temp_dir.path().join(DESCRIPTOR_FILE), b"short").unwrap();
        assert!(matches!(DeltaBatchDescriptor::read_sidecar(&storage, temp_dir.path()), Err(Error::Encoding(_))));
    }

    #[test]
    fn test_display() {
        assert_eq!(sample().to_string(), "Delta(5, 9, [0, 1], 42)");
    }
}
