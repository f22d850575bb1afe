//! # acidstore - Snapshot-isolated reads over a versioned partition layout
//!
//! acidstore gives ACID semantics to a table stored as immutable files. Every
//! write publishes a new directory; readers combine a base with the deltas
//! above it under a fixed snapshot of committed write ids.
//!
//! ## Architecture
//!
//! - **Naming**: the directory and file names of the layout
//! - **Delta descriptors**: compact binary description of a delta batch
//! - **Snapshot resolution**: picks the base and deltas a snapshot needs
//! - **Merge**: k-way merge of the selected bucket files
//! - **Writer**: publishes a batch with a single rename
//! - **Compaction**: folds deltas into a base (major) or a wider delta (minor)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use acidstore::{Partition, ReaderOptions};
//! use acidstore::snapshot::{Snapshot, ValidWriteIdList};
//! use acidstore::naming::DeltaKind;
//! use acidstore::types::{AcidEvent, WriteIdRange};
//!
//! # fn main() -> Result<(), acidstore::Error> {
//! let partition = Partition::open("./warehouse/t/p=1", ReaderOptions::default())?;
//!
//! // Publish write id 1
//! let writer = partition.delta_writer(DeltaKind::Insert, WriteIdRange::single(1), None, 0)?;
//! writer.append(AcidEvent::insert(1, 0, 0, &b"row"[..]))?;
//! writer.finish()?;
//!
//! // Read under a snapshot that sees it
//! let write_ids: ValidWriteIdList = "db.t:1:9223372036854775807::".parse()?;
//! for record in partition.scan(&Snapshot::new(write_ids))? {
//!     println!("{} -> {:?}", record.id(), record.row());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod compaction;
pub mod config;
pub mod delta;
pub mod error;
pub mod event;
pub mod merge;
pub mod metadata;
pub mod naming;
pub mod snapshot;
pub mod storage;
pub mod types;
pub mod writer;

// Re-exports
pub use config::{ReaderOptions, WriterOptions};
pub use delta::{DeltaBatchDescriptor, DeltaFileRecord};
pub use error::{Error, Result};
pub use merge::{MergeReader, MergedRecord, Mode};
pub use snapshot::{ResolvedSnapshot, Snapshot, SnapshotResolver};

use compaction::CompactionJob;
use naming::DeltaKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::{LocalStorage, Storage};
use types::{BucketId, StatementId, VisibilityId, WriteIdRange};
use writer::BatchWriter;

/// Handle on one partition directory.
///
/// A `Partition` holds no state besides its location and options. Every
/// read resolves the directory afresh, so any number of handles and reads
/// can run concurrently with writers and compaction.
pub struct Partition {
    /// Storage backend
    storage: Arc<dyn Storage>,

    /// Partition root
    root: PathBuf,

    /// Options for every reader opened through this handle
    options: ReaderOptions,

    /// Options for every batch published through this handle
    writer_options: WriterOptions,
}

impl Partition {
    /// Opens a partition on the local filesystem, creating the directory
    /// if needed.
    pub fn open<P: AsRef<Path>>(root: P, options: ReaderOptions) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Self::with_storage(Arc::new(LocalStorage::new()), root, options)
    }

    /// Opens a partition on an arbitrary storage backend.
    pub fn with_storage(
        storage: Arc<dyn Storage>,
        root: impl Into<PathBuf>,
        options: ReaderOptions,
    ) -> Result<Self> {
        options.validate()?;
        let root = root.into();
        log::debug!("Opened partition {:?}", root);
        Ok(Self { storage, root, options, writer_options: WriterOptions::default() })
    }

    /// Sets the options used to publish batches.
    pub fn set_writer_options(&mut self, options: WriterOptions) {
        self.writer_options = options;
    }

    /// Partition root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage backend.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Determines the directories needed to read under `snapshot`.
    pub fn resolve(&self, snapshot: &Snapshot, mode: Mode) -> Result<ResolvedSnapshot> {
        SnapshotResolver::new(self.storage.clone()).resolve(&self.root, snapshot, mode)
    }

    /// Opens a merge reader over one bucket.
    pub fn reader(&self, snapshot: &Snapshot, bucket: BucketId, mode: Mode) -> Result<MergeReader> {
        let resolved = self.resolve(snapshot, mode)?;
        MergeReader::for_bucket(
            self.storage.clone(),
            &resolved,
            bucket,
            snapshot.clone(),
            mode,
            self.options.clone(),
        )
    }

    /// Reads every live row of the partition, bucket by bucket.
    pub fn scan(&self, snapshot: &Snapshot) -> Result<Vec<MergedRecord>> {
        let resolved = self.resolve(snapshot, Mode::RowView)?;
        let mut rows = Vec::new();
        for bucket in resolved.buckets()? {
            let reader = MergeReader::for_bucket(
                self.storage.clone(),
                &resolved,
                bucket,
                snapshot.clone(),
                Mode::RowView,
                self.options.clone(),
            )?;
            for record in reader {
                rows.push(record?);
            }
        }
        Ok(rows)
    }

    /// Creates a writer for a new delta of this partition.
    pub fn delta_writer(
        &self,
        kind: DeltaKind,
        range: WriteIdRange,
        statement_id: Option<StatementId>,
        visibility_id: VisibilityId,
    ) -> Result<BatchWriter> {
        BatchWriter::delta(&self.root, kind, range, statement_id, visibility_id, self.writer_options.clone())
    }

    /// Creates a compaction job running as transaction `visibility_id`.
    pub fn compaction(&self, snapshot: Snapshot, visibility_id: VisibilityId) -> CompactionJob {
        CompactionJob::new(self.storage.clone(), &self.root, snapshot, visibility_id)
            .reader_options(self.options.clone())
            .writer_options(self.writer_options.clone())
    }
}
