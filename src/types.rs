//! # Core identifiers
//!
//! Write ids, statement ids, visibility ids and the row identity carried by
//! every ACID event.
//!
//! ## Event ordering
//!
//! Every bucket file is sorted by:
//! 1. original write id (ascending)
//! 2. bucket (ascending)
//! 3. row id (ascending)
//! 4. current write id (descending - newest event first)

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Table-level, monotonically increasing id of one write operation.
pub type WriteId = u64;

/// Disambiguates several deltas written by one transaction.
pub type StatementId = u32;

/// Transaction id threshold attached to a directory. `0` is always visible.
pub type VisibilityId = u64;

/// Partition-of-partition identifier.
pub type BucketId = u32;

/// Retry attempt that produced a file.
pub type AttemptId = u32;

/// An inclusive range of write ids covered by a delta directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WriteIdRange {
    /// Lowest write id in the range.
    pub min: WriteId,
    /// Highest write id in the range.
    pub max: WriteId,
}

impl WriteIdRange {
    /// Creates a new range, rejecting `min > max`.
    pub fn new(min: WriteId, max: WriteId) -> crate::Result<Self> {
        if min > max {
            return Err(crate::Error::invalid_argument(format!(
                "write id range {}..={} is inverted",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    /// A range covering exactly one write id.
    pub fn single(write_id: WriteId) -> Self {
        Self { min: write_id, max: write_id }
    }

    /// Returns true if `write_id` falls inside the range.
    pub fn contains(&self, write_id: WriteId) -> bool {
        self.min <= write_id && write_id <= self.max
    }
}

impl fmt::Display for WriteIdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Identity of a logical row across its insert/update/delete history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordIdentifier {
    /// Write id of the insert that created the row.
    pub original_write_id: WriteId,
    /// Bucket holding the row.
    pub bucket: BucketId,
    /// Row number within (original write id, bucket).
    pub row_id: u64,
}

impl RecordIdentifier {
    /// Creates a new record identifier.
    pub fn new(original_write_id: WriteId, bucket: BucketId, row_id: u64) -> Self {
        Self { original_write_id, bucket, row_id }
    }
}

impl fmt::Display for RecordIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{originalWriteId: {}, bucket: {}, rowId: {}}}",
            self.original_write_id, self.bucket, self.row_id
        )
    }
}

/// The kind of change an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Operation {
    /// A new row.
    Insert = 0,
    /// A new version of an existing row.
    Update = 1,
    /// A tombstone for an existing row.
    Delete = 2,
}

impl Operation {
    /// Converts a u8 to an Operation.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Operation::Insert),
            1 => Some(Operation::Update),
            2 => Some(Operation::Delete),
            _ => None,
        }
    }

    /// Converts the Operation to a u8.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Sort key of an event in a bucket file.
///
/// Ordered by row identity ascending, then current write id descending,
/// then statement id descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKey {
    /// Identity of the row the event belongs to.
    pub id: RecordIdentifier,
    /// Write id of the operation that produced the event.
    pub current_write_id: WriteId,
    /// Statement within the writing transaction.
    pub statement_id: StatementId,
}

impl PartialOrd for EventKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| other.current_write_id.cmp(&self.current_write_id))
            .then_with(|| other.statement_id.cmp(&self.statement_id))
    }
}

/// A single change event as stored in a bucket file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcidEvent {
    /// What the event does.
    pub operation: Operation,
    /// Identity of the affected row.
    pub id: RecordIdentifier,
    /// Write id of the operation that produced the event.
    pub current_write_id: WriteId,
    /// Statement within the writing transaction.
    pub statement_id: StatementId,
    /// Opaque row payload. Empty for deletes.
    pub row: Bytes,
}

impl AcidEvent {
    /// Creates an insert event; the row's original write id is the current one.
    pub fn insert(write_id: WriteId, bucket: BucketId, row_id: u64, row: impl Into<Bytes>) -> Self {
        Self {
            operation: Operation::Insert,
            id: RecordIdentifier::new(write_id, bucket, row_id),
            current_write_id: write_id,
            statement_id: 0,
            row: row.into(),
        }
    }

    /// Creates an update event for an existing row.
    pub fn update(id: RecordIdentifier, write_id: WriteId, row: impl Into<Bytes>) -> Self {
        Self {
            operation: Operation::Update,
            id,
            current_write_id: write_id,
            statement_id: 0,
            row: row.into(),
        }
    }

    /// Creates a delete event for an existing row.
    pub fn delete(id: RecordIdentifier, write_id: WriteId) -> Self {
        Self {
            operation: Operation::Delete,
            id,
            current_write_id: write_id,
            statement_id: 0,
            row: Bytes::new(),
        }
    }

    /// Sets the statement id.
    pub fn with_statement(mut self, statement_id: StatementId) -> Self {
        self.statement_id = statement_id;
        self
    }

    /// Returns the sort key of this event.
    pub fn key(&self) -> EventKey {
        EventKey { id: self.id, current_write_id: self.current_write_id, statement_id: self.statement_id }
    }

    /// Returns true for delete events.
    pub fn is_delete(&self) -> bool {
        self.operation == Operation::Delete
    }
}
