//! Compaction of a partition.
//!
//! Compaction folds the event history of a partition into fewer
//! directories. It only ever adds directories; the inputs stay in place
//! until an external retention process removes them.
//!
//! ## Kinds
//!
//! - Major: base + deltas -> `base_<hwm>_v<visibility>`. Every row is
//!   collapsed to its newest version and deleted rows are dropped.
//! - Minor: deltas -> `delta_<min>_<max>_v<visibility>` plus a matching
//!   `delete_delta_` for delete events. The full event history is kept.
//!
//! ## Process
//!
//! 1. Cap the snapshot below the lowest open write id
//! 2. Resolve the partition in raw mode
//! 3. Merge every bucket and write the output batch
//! 4. Publish the output with a single rename

use crate::config::{ReaderOptions, WriterOptions};
use crate::delta::DeltaBatchDescriptor;
use crate::error::Result;
use crate::merge::{MergeReader, MergeSource, Mode};
use crate::metadata::DataFormat;
use crate::naming::DeltaKind;
use crate::snapshot::{IdSnapshot, ResolvedSnapshot, Snapshot, SnapshotResolver, ValidWriteIdList};
use crate::storage::Storage;
use crate::types::{VisibilityId, WriteIdRange};
use crate::writer::BatchWriter;
use std::path::PathBuf;
use std::sync::Arc;

/// Which compaction ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionKind {
    /// Base and deltas into a new base.
    Major,
    /// Deltas into one wider delta.
    Minor,
}

/// Result of a compaction operation
#[derive(Debug, Clone)]
pub struct CompactionResult {
    /// Kind of compaction
    pub kind: CompactionKind,
    /// Published directories
    pub outputs: Vec<PathBuf>,
    /// Descriptors of the published deltas, also persisted inside them
    pub descriptors: Vec<(DeltaKind, DeltaBatchDescriptor)>,
    /// Directories whose contents the outputs now hold
    pub inputs: Vec<PathBuf>,
    /// Deltas made only of aborted write ids, safe to remove
    pub aborted: Vec<PathBuf>,
    /// Events consumed from the inputs
    pub events_read: u64,
    /// Events written to the outputs
    pub events_written: u64,
}

/// Compaction job over one partition.
pub struct CompactionJob {
    storage: Arc<dyn Storage>,
    root: PathBuf,
    snapshot: Snapshot,
    visibility_id: VisibilityId,
    reader_options: ReaderOptions,
    writer_options: WriterOptions,
}

impl CompactionJob {
    /// Create a job.
    ///
    /// `visibility_id` is the id of the compactor's own transaction; it is
    /// appended to every output directory name.
    pub fn new(
        storage: Arc<dyn Storage>,
        root: impl Into<PathBuf>,
        snapshot: Snapshot,
        visibility_id: VisibilityId,
    ) -> Self {
        Self {
            storage,
            root: root.into(),
            snapshot,
            visibility_id,
            reader_options: ReaderOptions::default(),
            writer_options: WriterOptions::default(),
        }
    }

    /// Sets the options used to read the inputs.
    pub fn reader_options(mut self, options: ReaderOptions) -> Self {
        self.reader_options = options;
        self
    }

    /// Sets the options used to publish the outputs.
    pub fn writer_options(mut self, options: WriterOptions) -> Self {
        self.writer_options = options;
        self
    }

    /// The snapshot compaction reads with: nothing at or above the lowest
    /// open write id.
    pub fn compactor_snapshot(&self) -> Result<Snapshot> {
        let write_ids = self.snapshot.write_ids();
        let ids = write_ids.ids();
        let limit = match ids.min_open() {
            Some(min_open) => min_open.saturating_sub(1),
            None => ids.high_watermark(),
        };
        let capped = IdSnapshot::new(limit, [], ids.aborted_ids().filter(|&id| id <= limit))?;
        Ok(Snapshot::new(ValidWriteIdList::new(write_ids.table(), capped))
            .with_txns(self.snapshot.txns().clone()))
    }

    fn resolve(&self, snapshot: &Snapshot, mode: Mode) -> Result<ResolvedSnapshot> {
        SnapshotResolver::new(self.storage.clone()).resolve(&self.root, snapshot, mode)
    }

    fn input_paths(resolved: &ResolvedSnapshot, include_base: bool) -> Vec<PathBuf> {
        let mut inputs = Vec::new();
        if include_base {
            inputs.extend(resolved.base().map(|b| b.path.clone()));
            inputs.extend(resolved.original_files().iter().map(|f| f.status.path.clone()));
        }
        inputs.extend(resolved.deltas().iter().map(|d| d.path.clone()));
        inputs
    }

    fn merge_sources(
        &self,
        inputs: Vec<MergeSource>,
        snapshot: &Snapshot,
        mode: Mode,
    ) -> Result<MergeReader> {
        MergeReader::new(self.storage.clone(), inputs, snapshot.clone(), mode, self.reader_options.clone())
    }

    /// Rewrite the base and all deltas above it into a new base.
    ///
    /// Returns `None` if there is nothing above the current base.
    pub fn major(&self) -> Result<Option<CompactionResult>> {
        let snapshot = self.compactor_snapshot()?;
        let mode = Mode::RawView { collapse_events: true };
        let resolved = self.resolve(&snapshot, mode)?;
        if resolved.deltas().is_empty() && resolved.original_files().is_empty() {
            log::debug!("Nothing to compact in {:?}", self.root);
            return Ok(None);
        }

        let write_id = snapshot.high_watermark();
        log::info!(
            "Starting major compaction of {:?}: {} deltas -> base {}",
            self.root,
            resolved.deltas().len(),
            write_id
        );

        let writer = BatchWriter::base(
            &self.root,
            write_id,
            self.visibility_id,
            DataFormat::Compacted,
            self.writer_options.clone(),
        );
        let mut events_read = 0;
        for bucket in resolved.buckets()? {
            let inputs = resolved.sources_for_bucket_with_attempts(bucket, &self.reader_options.delta_attempts)?;
            let mut reader = self.merge_sources(inputs, &snapshot, mode)?;
            while let Some(record) = reader.next_record()? {
                // Deleted rows end here
                if record.is_delete() {
                    continue;
                }
                writer.append(record.into_event())?;
            }
            events_read += reader.events_read();
        }
        let published = writer.finish()?;

        log::info!(
            "Major compaction completed: {} events read, {} rows written to {:?}",
            events_read,
            published.events_written,
            published.path
        );
        Ok(Some(CompactionResult {
            kind: CompactionKind::Major,
            outputs: vec![published.path],
            descriptors: Vec::new(),
            inputs: Self::input_paths(&resolved, true),
            aborted: resolved.aborted().to_vec(),
            events_read,
            events_written: published.events_written,
        }))
    }

    /// Merge the deltas above the current base into one delta.
    ///
    /// Returns `None` if fewer than two deltas are eligible.
    pub fn minor(&self) -> Result<Option<CompactionResult>> {
        let snapshot = self.compactor_snapshot()?;
        let mode = Mode::raw();
        let resolved = self.resolve(&snapshot, mode)?;
        let deltas = resolved.deltas();
        if deltas.len() < 2 {
            log::debug!("Not enough deltas to compact in {:?}: {}", self.root, deltas.len());
            return Ok(None);
        }

        let min = deltas.iter().map(|d| d.parsed.range.min).min().unwrap_or_default();
        let max = deltas.iter().map(|d| d.parsed.range.max).max().unwrap_or_default();
        let range = WriteIdRange::new(min, max)?;
        log::info!("Starting minor compaction of {:?}: {} deltas -> {}", self.root, deltas.len(), range);

        let options = self.writer_options.clone().write_descriptor_file(true);
        let open_writer = |kind| BatchWriter::delta(&self.root, kind, range, None, self.visibility_id, options.clone());
        let inserts = open_writer(DeltaKind::Insert)?;
        let deletes = open_writer(DeltaKind::Delete)?;

        let mut events_read = 0;
        for bucket in resolved.buckets()? {
            let inputs = resolved.delta_sources_for_bucket_with_attempts(bucket, &self.reader_options.delta_attempts)?;
            if inputs.is_empty() {
                continue;
            }
            let mut reader = self.merge_sources(inputs, &snapshot, mode)?;
            while let Some(record) = reader.next_record()? {
                if record.is_delete() {
                    deletes.append(record.into_event())?;
                } else {
                    inserts.append(record.into_event())?;
                }
            }
            events_read += reader.events_read();
        }

        // Publish an empty insert delta when nothing survived
        let mut writers = Vec::with_capacity(2);
        if !inserts.is_empty() || deletes.is_empty() {
            writers.push((DeltaKind::Insert, inserts));
        }
        if !deletes.is_empty() {
            writers.push((DeltaKind::Delete, deletes));
        }
        let mut outputs = Vec::with_capacity(writers.len());
        let mut descriptors = Vec::with_capacity(writers.len());
        let mut events_written = 0;
        for (kind, writer) in writers {
            let published = writer.finish()?;
            events_written += published.events_written;
            if let Some(descriptor) = published.descriptor() {
                descriptors.push((kind, descriptor.clone()));
            }
            outputs.push(published.path);
        }

        log::info!(
            "Minor compaction completed: {} events read, {} written to {:?}",
            events_read,
            events_written,
            outputs
        );
        Ok(Some(CompactionResult {
            kind: CompactionKind::Minor,
            outputs,
            descriptors,
            inputs: Self::input_paths(&resolved, false),
            aborted: resolved.aborted().to_vec(),
            events_read,
            events_written,
        }))
    }
}
