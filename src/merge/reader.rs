//! The merge reader.

use super::source::{MergeSource, SourceCursor};
use super::{MergeState, MergedRecord, Mode};
use crate::config::ReaderOptions;
use crate::error::{Error, Result};
use crate::snapshot::{ResolvedSnapshot, Snapshot};
use crate::storage::Storage;
use crate::types::{AcidEvent, BucketId, EventKey, RecordIdentifier};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// Entry in the merge heap
struct HeapEntry {
    key: EventKey,
    event: AcidEvent,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (smallest key first)
        other.key.cmp(&self.key).then_with(|| {
            // For equal keys, prefer the earlier source
            other.source.cmp(&self.source)
        })
    }
}

/// Merges the sources of one bucket under a fixed snapshot.
///
/// The reader opens lazily on the first call to [`next_record`] (or on an
/// explicit [`open`]). Any error closes it; a closed reader yields nothing.
///
/// [`next_record`]: MergeReader::next_record
/// [`open`]: MergeReader::open
pub struct MergeReader {
    storage: Arc<dyn Storage>,
    inputs: Vec<MergeSource>,
    snapshot: Snapshot,
    mode: Mode,
    options: ReaderOptions,
    state: MergeState,
    sources: Vec<SourceCursor>,
    heap: BinaryHeap<HeapEntry>,
    last_id: Option<RecordIdentifier>,
    last_key: Option<EventKey>,
    events_read: u64,
}

impl MergeReader {
    /// Create a reader over explicit sources, in source order.
    pub fn new(
        storage: Arc<dyn Storage>,
        inputs: Vec<MergeSource>,
        snapshot: Snapshot,
        mode: Mode,
        options: ReaderOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            storage,
            inputs,
            snapshot,
            mode,
            options,
            state: MergeState::Unopened,
            sources: Vec::new(),
            heap: BinaryHeap::new(),
            last_id: None,
            last_key: None,
            events_read: 0,
        })
    }

    /// Create a reader over one bucket of a resolved partition.
    ///
    /// Directories named in `options.delta_attempts` contribute only the
    /// chosen attempt's file.
    pub fn for_bucket(
        storage: Arc<dyn Storage>,
        resolved: &ResolvedSnapshot,
        bucket: BucketId,
        snapshot: Snapshot,
        mode: Mode,
        options: ReaderOptions,
    ) -> Result<Self> {
        let inputs = resolved.sources_for_bucket_with_attempts(bucket, &options.delta_attempts)?;
        Self::new(storage, inputs, snapshot, mode, options)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MergeState {
        self.state
    }

    /// Merge mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Events consumed from all sources so far.
    pub fn events_read(&self) -> u64 {
        self.events_read
    }

    /// Open every source and position the merge at its first event.
    ///
    /// If any source fails to open, the ones already opened are released
    /// before the error is returned.
    pub fn open(&mut self) -> Result<()> {
        if self.state != MergeState::Unopened {
            return Err(Error::invalid_state(format!("cannot open a reader in state {:?}", self.state)));
        }
        let result = self.open_sources();
        if result.is_err() {
            self.close();
        }
        result
    }

    fn open_sources(&mut self) -> Result<()> {
        for input in &self.inputs {
            let cursor = SourceCursor::open(self.storage.as_ref(), input, self.options.verify_checksums)?;
            log::trace!("Source {} reads {:?}", self.sources.len(), cursor.path());
            self.sources.push(cursor);
        }
        for index in 0..self.sources.len() {
            self.advance(index)?;
        }
        self.state = MergeState::Merging;
        log::debug!("Merging {} sources in {:?} mode", self.sources.len(), self.mode);
        Ok(())
    }

    /// Pull the next visible event of one source into the heap.
    fn advance(&mut self, index: usize) -> Result<()> {
        let storage = self.storage.as_ref();
        let cursor = &mut self.sources[index];
        while let Some(event) = cursor.next_event(storage)? {
            if !self.snapshot.is_write_id_valid(event.current_write_id) {
                log::trace!("Skipping event {} of invisible write id {}", event.id, event.current_write_id);
                continue;
            }
            self.heap.push(HeapEntry { key: event.key(), event, source: index });
            break;
        }
        Ok(())
    }

    fn report_progress(&mut self) {
        self.events_read += 1;
        if let Some(reporter) = &self.options.progress_reporter {
            if self.events_read % self.options.report_interval == 0 {
                reporter.progress(self.events_read);
            }
        }
    }

    /// Return the next record, or `None` once the merge is exhausted or
    /// closed.
    pub fn next_record(&mut self) -> Result<Option<MergedRecord>> {
        match self.state {
            MergeState::Unopened => self.open()?,
            MergeState::Merging => {}
            MergeState::Exhausted | MergeState::Closed => return Ok(None),
        }
        let result = self.step();
        if result.is_err() {
            self.close();
        }
        result
    }

    fn step(&mut self) -> Result<Option<MergedRecord>> {
        loop {
            let Some(entry) = self.heap.pop() else {
                self.state = MergeState::Exhausted;
                self.sources.clear();
                log::debug!("Merge exhausted after {} events", self.events_read);
                return Ok(None);
            };
            self.advance(entry.source)?;
            self.report_progress();

            if self.mode.collapses() {
                // Older versions of a row already decided
                if self.last_id == Some(entry.key.id) {
                    continue;
                }
                self.last_id = Some(entry.key.id);
                if self.mode == Mode::RowView && entry.event.is_delete() {
                    continue;
                }
            } else {
                // Same event seen through overlapping deltas
                if self.last_key == Some(entry.key) {
                    continue;
                }
                self.last_key = Some(entry.key);
            }
            return Ok(Some(MergedRecord::new(entry.event, entry.source)));
        }
    }

    /// Release every source. Safe to call in any state; terminal.
    pub fn close(&mut self) {
        if self.state != MergeState::Closed {
            log::trace!("Closing merge reader with {} open sources", self.sources.len());
        }
        self.heap.clear();
        self.sources.clear();
        self.state = MergeState::Closed;
    }
}

impl Iterator for MergeReader {
    type Item = Result<MergedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
