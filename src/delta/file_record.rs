//! Per-file metadata of a delta directory.
//!
//! Format (big-endian):
//! ```text
//! [flags: u8]          bit 0: file id present, bit 1: attempt id present
//! [modification_time: u64]
//! [length: u64]
//! [attempt_id: u32]    only if flagged
//! [file_id: u64]       only if flagged
//! ```

use crate::error::{Error, Result};
use crate::naming;
use crate::storage::FileStatus;
use crate::types::{AttemptId, BucketId};
use bytes::{Buf, BufMut};
use std::fmt;
use std::path::{Path, PathBuf};

/// Flag bit: a 64-bit file id follows.
pub const HAS_LONG_FILE_ID_FLAG: u8 = 1;

/// Flag bit: an attempt id follows.
pub const HAS_ATTEMPT_ID_FLAG: u8 = 2;

const KNOWN_FLAGS: u8 = HAS_LONG_FILE_ID_FLAG | HAS_ATTEMPT_ID_FLAG;

/// Stand-in identity for backends that do not assign file ids.
///
/// Best-effort identity, not a cryptographic hash. It is a pure function of
/// path, length and modification time, so independent processes derive the
/// same value and it can key caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyntheticFileId {
    /// CRC32 of the path bytes.
    pub path_hash: u32,
    /// File length in bytes.
    pub length: u64,
    /// Modification time in milliseconds.
    pub modification_time: u64,
}

impl SyntheticFileId {
    /// Computes the synthetic id of a file.
    pub fn synthesize(path: &Path, length: u64, modification_time: u64) -> Self {
        let path_hash = crc32fast::hash(path.as_os_str().as_encoded_bytes());
        Self { path_hash, length, modification_time }
    }
}

impl fmt::Display for SyntheticFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:08x}/{}/{}]", self.path_hash, self.modification_time, self.length)
    }
}

/// Identity of a delta file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileId {
    /// Id assigned by the storage backend.
    Native(u64),
    /// Id computed from path, length and modification time.
    Synthetic(SyntheticFileId),
}

/// Metadata of one bucket file inside a delta directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaFileRecord {
    /// Modification time in milliseconds.
    pub modification_time: u64,
    /// Length in bytes.
    pub length: u64,
    /// Attempt that wrote the file.
    pub attempt_id: Option<AttemptId>,
    /// Backend file id, if the backend provides one.
    pub file_id: Option<u64>,
}

impl DeltaFileRecord {
    /// Creates a new record.
    pub fn new(
        modification_time: u64,
        length: u64,
        attempt_id: Option<AttemptId>,
        file_id: Option<u64>,
    ) -> Self {
        Self { modification_time, length, attempt_id, file_id }
    }

    /// Captures a record from a live file listing.
    pub fn from_status(status: &FileStatus) -> Self {
        Self {
            modification_time: status.modification_time,
            length: status.length,
            attempt_id: naming::parse_attempt_id(&status.path),
            file_id: status.file_id,
        }
    }

    /// Path of this file for `bucket` inside `delta_dir`.
    pub fn path(&self, delta_dir: &Path, bucket: BucketId) -> PathBuf {
        naming::bucket_file_path(delta_dir, bucket, self.attempt_id)
    }

    /// Stored file id, or the synthetic id of the file's path.
    pub fn file_id(&self, delta_dir: &Path, bucket: BucketId) -> FileId {
        match self.file_id {
            Some(id) => FileId::Native(id),
            None => FileId::Synthetic(SyntheticFileId::synthesize(
                &self.path(delta_dir, bucket),
                self.length,
                self.modification_time,
            )),
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.file_id.is_some() {
            flags |= HAS_LONG_FILE_ID_FLAG;
        }
        if self.attempt_id.is_some() {
            flags |= HAS_ATTEMPT_ID_FLAG;
        }
        flags
    }

    /// Number of bytes `encode` writes.
    pub fn encoded_size(&self) -> usize {
        17 + self.attempt_id.map_or(0, |_| 4) + self.file_id.map_or(0, |_| 8)
    }

    /// Encodes the record.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.flags());
        buf.put_u64(self.modification_time);
        buf.put_u64(self.length);
        if let Some(attempt) = self.attempt_id {
            buf.put_u32(attempt);
        }
        if let Some(id) = self.file_id {
            buf.put_u64(id);
        }
    }

    /// Decodes a record, consuming exactly the bytes `encode` produced.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure_remaining(buf, 17, "file record header")?;
        let flags = buf.get_u8();
        if flags & !KNOWN_FLAGS != 0 {
            return Err(Error::encoding(format!("unexpected file record flags {:#04x}", flags)));
        }
        let modification_time = buf.get_u64();
        let length = buf.get_u64();

        let attempt_id = if flags & HAS_ATTEMPT_ID_FLAG != 0 {
            ensure_remaining(buf, 4, "attempt id")?;
            Some(buf.get_u32())
        } else {
            None
        };
        let file_id = if flags & HAS_LONG_FILE_ID_FLAG != 0 {
            ensure_remaining(buf, 8, "file id")?;
            Some(buf.get_u64())
        } else {
            None
        };

        Ok(Self { modification_time, length, attempt_id, file_id })
    }
}

pub(crate) fn ensure_remaining<B: Buf>(buf: &B, needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(Error::encoding(format!(
            "truncated {}: need {} bytes, {} remaining",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}
