//! Publishing of base and delta directories.
//!
//! A batch is written into `_tmp_<name>` under the partition root and made
//! visible with a single rename. Readers list the root and never see a
//! half-written directory.

use crate::config::WriterOptions;
use crate::delta::DeltaBatchDescriptor;
use crate::error::{Error, Result};
use crate::event::{EventFileWriter, FileKind};
use crate::metadata::{AcidMetadata, DataFormat};
use crate::naming::{self, DeltaKind, TMP_PREFIX};
use crate::storage::{FileStatus, LocalStorage, Storage};
use crate::types::{AcidEvent, BucketId, StatementId, VisibilityId, WriteId, WriteIdRange};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory a batch is published as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Base { write_id: WriteId },
    Delta { kind: DeltaKind, range: WriteIdRange, statement_id: Option<StatementId> },
}

/// A directory that has been published.
#[derive(Debug, Clone)]
pub struct PublishedBatch {
    /// Final path of the directory.
    pub path: PathBuf,
    /// Listing of the directory after the rename.
    pub files: Vec<FileStatus>,
    /// Number of events written across all buckets.
    pub events_written: u64,
    descriptor: Option<DeltaBatchDescriptor>,
}

impl PublishedBatch {
    /// Descriptor of a published delta; `None` for a base.
    pub fn descriptor(&self) -> Option<&DeltaBatchDescriptor> {
        self.descriptor.as_ref()
    }
}

/// Buffers the events of one batch and publishes them atomically.
///
/// `append` may be called from several threads.
///
/// # Example
///
/// ```rust,no_run
/// use acidstore::config::WriterOptions;
/// use acidstore::types::{AcidEvent, WriteIdRange};
/// use acidstore::writer::BatchWriter;
/// use acidstore::naming::DeltaKind;
///
/// # fn main() -> Result<(), acidstore::Error> {
/// let writer = BatchWriter::delta(
///     "/warehouse/t/p=1",
///     DeltaKind::Insert,
///     WriteIdRange::single(5),
///     Some(0),
///     0,
///     WriterOptions::default(),
/// )?;
/// writer.append(AcidEvent::insert(5, 0, 0, &b"row"[..]))?;
/// let published = writer.finish()?;
/// assert!(published.path.ends_with("delta_5_5_0"));
/// # Ok(())
/// # }
/// ```
pub struct BatchWriter {
    root: PathBuf,
    target: Target,
    visibility_id: VisibilityId,
    data_format: DataFormat,
    options: WriterOptions,
    buffers: Mutex<BTreeMap<BucketId, Vec<AcidEvent>>>,
}

impl BatchWriter {
    /// A writer publishing `delta_`/`delete_delta_` directories.
    pub fn delta(
        root: impl Into<PathBuf>,
        kind: DeltaKind,
        range: WriteIdRange,
        statement_id: Option<StatementId>,
        visibility_id: VisibilityId,
        options: WriterOptions,
    ) -> Result<Self> {
        let range = WriteIdRange::new(range.min, range.max)?;
        Ok(Self::with_target(
            root.into(),
            Target::Delta { kind, range, statement_id },
            visibility_id,
            DataFormat::Direct,
            options,
        ))
    }

    /// A writer publishing a `base_` directory.
    pub fn base(
        root: impl Into<PathBuf>,
        write_id: WriteId,
        visibility_id: VisibilityId,
        data_format: DataFormat,
        options: WriterOptions,
    ) -> Self {
        Self::with_target(root.into(), Target::Base { write_id }, visibility_id, data_format, options)
    }

    fn with_target(
        root: PathBuf,
        target: Target,
        visibility_id: VisibilityId,
        data_format: DataFormat,
        options: WriterOptions,
    ) -> Self {
        Self { root, target, visibility_id, data_format, options, buffers: Mutex::new(BTreeMap::new()) }
    }

    /// Name of the directory this writer publishes.
    pub fn dir_name(&self) -> String {
        match self.target {
            Target::Base { write_id } => naming::base_dir_name(write_id, self.visibility_id),
            Target::Delta { kind, range, statement_id } => {
                naming::delta_dir_name(kind, range, statement_id, self.visibility_id)
            }
        }
    }

    /// Buffer one event.
    pub fn append(&self, event: AcidEvent) -> Result<()> {
        match self.target {
            Target::Base { write_id } => {
                if event.current_write_id > write_id {
                    return Err(Error::invalid_argument(format!(
                        "event of write id {} above base {}",
                        event.current_write_id, write_id
                    )));
                }
            }
            Target::Delta { kind, range, .. } => {
                if !range.contains(event.current_write_id) {
                    return Err(Error::invalid_argument(format!(
                        "event of write id {} outside delta range {}",
                        event.current_write_id, range
                    )));
                }
                if kind == DeltaKind::Delete && !event.is_delete() {
                    return Err(Error::invalid_argument("delete delta accepts only delete events"));
                }
            }
        }
        self.buffers.lock().entry(event.id.bucket).or_default().push(event);
        Ok(())
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.buffers.lock().values().map(Vec::len).sum()
    }

    /// Returns true if nothing has been buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write every bucket file and publish the directory.
    pub fn finish(self) -> Result<PublishedBatch> {
        let dir_name = self.dir_name();
        let final_path = self.root.join(&dir_name);
        let tmp_path = self.root.join(format!("{}{}", TMP_PREFIX, dir_name));
        if final_path.exists() {
            return Err(Error::invalid_state(format!("{:?} is already published", final_path)));
        }
        if tmp_path.exists() {
            log::warn!("Removing leftover {:?}", tmp_path);
            fs::remove_dir_all(&tmp_path)?;
        }
        fs::create_dir_all(&tmp_path)?;

        let mut events_written = 0u64;
        for (bucket, mut events) in self.buffers.into_inner() {
            events.sort_by_key(AcidEvent::key);
            let path = naming::bucket_file_path(&tmp_path, bucket, None);
            let mut writer = EventFileWriter::create(&path, FileKind::Acid)?;
            for event in &events {
                writer.append(event)?;
            }
            writer.finish()?;
            events_written += events.len() as u64;
        }

        if self.options.write_metadata_file {
            AcidMetadata::new(self.data_format).write(&tmp_path)?;
        }

        // Renaming keeps file ids, lengths and times, so the staged listing
        // describes the published directory
        let descriptor = match self.target {
            Target::Delta { range, statement_id, .. } => {
                let staged = LocalStorage::new().list(&tmp_path)?;
                let descriptor = DeltaBatchDescriptor::from_listing(
                    range,
                    statement_id.into_iter().collect(),
                    self.visibility_id,
                    &staged,
                )?;
                if self.options.write_descriptor_file {
                    descriptor.write_sidecar(&tmp_path)?;
                }
                Some(descriptor)
            }
            Target::Base { .. } => None,
        };

        if self.options.sync_on_publish {
            sync_dir(&tmp_path)?;
        }
        fs::rename(&tmp_path, &final_path)?;
        if self.options.sync_on_publish {
            sync_dir(&self.root)?;
        }
        log::info!("Published {:?}: {} events", final_path, events_written);

        let files = LocalStorage::new().list(&final_path)?;
        Ok(PublishedBatch { path: final_path, files, events_written, descriptor })
    }
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> Result<()> {
    fs::File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> Result<()> {
    Ok(())
}
