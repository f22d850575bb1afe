//! `_metadata_acid` sidecar files.
//!
//! A base or delta directory may carry a small JSON document describing how
//! it was produced. Readers use it to tell a compactor-produced base (which
//! erases history) from one written directly by an insert-overwrite.

use crate::error::{Error, Result};
use crate::naming::METADATA_FILE;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;

/// Current sidecar version.
pub const CURRENT_VERSION: &str = "0";

/// How the data in a directory was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// Written by the compactor.
    Compacted,
    /// Written directly by a query.
    Direct,
}

/// Contents of a `_metadata_acid` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcidMetadata {
    /// Format version of this file.
    pub this_file_version: String,
    /// Producer of the directory.
    pub data_format: DataFormat,
}

impl AcidMetadata {
    /// Creates metadata in the current version.
    pub fn new(data_format: DataFormat) -> Self {
        Self { this_file_version: CURRENT_VERSION.to_string(), data_format }
    }

    /// Reads the sidecar of `dir`, returning `None` if there is none.
    pub fn read(storage: &dyn Storage, dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(METADATA_FILE);
        let mut reader = match storage.open(&path) {
            Ok(reader) => reader,
            Err(Error::SourceIo { source, .. }) if source.kind() == ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        let metadata: AcidMetadata = serde_json::from_str(&text)
            .map_err(|e| Error::encoding(format!("bad {:?}: {}", path, e)))?;
        if metadata.this_file_version != CURRENT_VERSION {
            return Err(Error::encoding(format!(
                "unsupported {} version {:?} in {:?}",
                METADATA_FILE, metadata.this_file_version, dir
            )));
        }
        Ok(Some(metadata))
    }

    /// Writes the sidecar into `dir` on the local filesystem.
    pub fn write(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        let mut file = File::create(dir.join(METADATA_FILE))?;
        file.write_all(json.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}
