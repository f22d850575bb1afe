//! Storage backend capabilities used by the read path.
//!
//! Readers only ever list directories, open files and stat them. Anything
//! that can provide these three operations can back a partition.

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Status of one file or directory as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    /// Full path of the entry.
    pub path: PathBuf,
    /// Length in bytes (0 for directories).
    pub length: u64,
    /// Modification time in milliseconds since the Unix epoch.
    pub modification_time: u64,
    /// True for directories.
    pub is_dir: bool,
    /// Identifier assigned by the backend, when it has one.
    pub file_id: Option<u64>,
}

impl FileStatus {
    /// Returns the final path component as UTF-8.
    pub fn file_name(&self) -> Result<&str> {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::malformed(&self.path, "path has no UTF-8 file name"))
    }
}

/// Minimal capability set a partition backend must provide.
pub trait Storage: Send + Sync {
    /// Lists the immediate children of a directory.
    fn list(&self, path: &Path) -> Result<Vec<FileStatus>>;

    /// Opens a file for sequential reading.
    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>>;

    /// Returns the status of a single path.
    fn stat(&self, path: &Path) -> Result<FileStatus>;
}

/// Storage backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

impl LocalStorage {
    /// Creates a new local storage backend.
    pub fn new() -> Self {
        Self
    }

    fn status_of(path: PathBuf, metadata: &fs::Metadata) -> Result<FileStatus> {
        let modification_time = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        #[cfg(unix)]
        let file_id = {
            use std::os::unix::fs::MetadataExt;
            Some(metadata.ino())
        };
        #[cfg(not(unix))]
        let file_id = None;

        Ok(FileStatus {
            path,
            length: if metadata.is_dir() { 0 } else { metadata.len() },
            modification_time,
            is_dir: metadata.is_dir(),
            file_id,
        })
    }
}

impl Storage for LocalStorage {
    fn list(&self, path: &Path) -> Result<Vec<FileStatus>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            // Entries renamed away between read_dir and stat are skipped
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            entries.push(Self::status_of(entry.path(), &metadata)?);
        }
        // read_dir order is platform dependent
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let file = File::open(path).map_err(|e| Error::source_io(path, e))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn stat(&self, path: &Path) -> Result<FileStatus> {
        let metadata = fs::metadata(path)?;
        Self::status_of(path.to_path_buf(), &metadata)
    }
}
