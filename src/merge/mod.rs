//! K-way merge of the bucket files selected for one bucket.
//!
//! Every source is sorted by [`EventKey`](crate::types::EventKey). The
//! merge keeps one head event per source in a heap and emits events in
//! global key order, so all versions of one row arrive together with the
//! newest version first.

pub mod reader;
pub mod source;

pub use reader::MergeReader;
pub use source::MergeSource;

use crate::types::{AcidEvent, RecordIdentifier, WriteId};
use bytes::Bytes;

/// What a merge produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// One row per live logical row; deleted rows are suppressed.
    #[default]
    RowView,
    /// The event stream consumed by compaction.
    RawView {
        /// Keep only the newest event of each row.
        collapse_events: bool,
    },
}

impl Mode {
    /// Raw view with the full event history.
    pub fn raw() -> Self {
        Mode::RawView { collapse_events: false }
    }

    /// Returns true for the raw view.
    pub fn is_raw(self) -> bool {
        matches!(self, Mode::RawView { .. })
    }

    /// Returns true if older versions of a row are dropped.
    pub fn collapses(self) -> bool {
        match self {
            Mode::RowView => true,
            Mode::RawView { collapse_events } => collapse_events,
        }
    }
}

/// Lifecycle of a [`MergeReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    /// Created, no source opened yet.
    Unopened,
    /// Sources are open and records are flowing.
    Merging,
    /// Every source has been read to the end.
    Exhausted,
    /// Released; terminal.
    Closed,
}

/// One record produced by a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedRecord {
    event: AcidEvent,
    source: usize,
}

impl MergedRecord {
    pub(crate) fn new(event: AcidEvent, source: usize) -> Self {
        Self { event, source }
    }

    /// Identity of the row.
    pub fn id(&self) -> RecordIdentifier {
        self.event.id
    }

    /// Row payload; empty for deletes.
    pub fn row(&self) -> &Bytes {
        &self.event.row
    }

    /// Write id of the event.
    pub fn current_write_id(&self) -> WriteId {
        self.event.current_write_id
    }

    /// Returns true if the event is a delete.
    pub fn is_delete(&self) -> bool {
        self.event.is_delete()
    }

    /// Index of the source the record came from.
    pub fn source(&self) -> usize {
        self.source
    }

    /// The underlying event.
    pub fn event(&self) -> &AcidEvent {
        &self.event
    }

    /// Consumes the record, returning the event.
    pub fn into_event(self) -> AcidEvent {
        self.event
    }
}
