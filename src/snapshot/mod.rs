//! Snapshot of visible write ids for point-in-time consistent reads.
//!
//! A reader fixes its snapshot before resolving a partition. Everything it
//! reads afterwards is filtered through that snapshot, so commits that land
//! while the read is running stay invisible to it.

pub mod resolver;
pub mod valid_ids;

pub use resolver::{
    BaseDirectory, DeltaDirectory, OriginalFile, ResolvedSnapshot, SnapshotResolver,
};
pub use valid_ids::{IdSnapshot, RangeState, ValidTxnList, ValidWriteIdList};

use crate::types::{VisibilityId, WriteId};
use serde::{Deserialize, Serialize};

/// The ids a read is allowed to observe.
///
/// # Example
///
/// ```rust
/// use acidstore::snapshot::{Snapshot, ValidWriteIdList};
///
/// # fn main() -> Result<(), acidstore::Error> {
/// let write_ids: ValidWriteIdList = "db.t:10:9223372036854775807::5".parse()?;
/// let snapshot = Snapshot::new(write_ids);
///
/// assert!(snapshot.is_write_id_valid(4));
/// assert!(!snapshot.is_write_id_valid(5));
/// assert!(!snapshot.is_write_id_valid(11));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Write ids of the table.
    write_ids: ValidWriteIdList,

    /// Transactions used to evaluate directory visibility ids.
    txns: ValidTxnList,
}

impl Snapshot {
    /// Creates a snapshot in which every visibility id is considered
    /// committed.
    pub fn new(write_ids: ValidWriteIdList) -> Self {
        Self { write_ids, txns: ValidTxnList::all() }
    }

    /// Sets the transaction list used for visibility ids.
    pub fn with_txns(mut self, txns: ValidTxnList) -> Self {
        self.txns = txns;
        self
    }

    /// The write id list.
    pub fn write_ids(&self) -> &ValidWriteIdList {
        &self.write_ids
    }

    /// The transaction list.
    pub fn txns(&self) -> &ValidTxnList {
        &self.txns
    }

    /// Highest write id the snapshot can observe.
    pub fn high_watermark(&self) -> WriteId {
        self.write_ids.ids().high_watermark()
    }

    /// Returns true if events written by `write_id` are visible.
    pub fn is_write_id_valid(&self, write_id: WriteId) -> bool {
        self.write_ids.is_write_id_valid(write_id)
    }

    /// Returns true if a directory with this visibility id may be read.
    pub fn is_directory_visible(&self, visibility_id: VisibilityId) -> bool {
        self.txns.is_visible(visibility_id)
    }
}
