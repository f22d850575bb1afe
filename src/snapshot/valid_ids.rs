//! Valid id lists published by the transaction service.
//!
//! A list is a high watermark plus the ids at or below it that a reader must
//! not see: ids still open, and ids known to be aborted. Both write ids and
//! transaction ids (used for visibility thresholds) are described this way.
//!
//! ## Text form
//!
//! ```text
//! write ids:    <table>:<hwm>:<minOpen>:<open,...>:<aborted,...>
//! transactions: <hwm>:<minOpen>:<open,...>:<aborted,...>
//! ```
//!
//! `minOpen` is `9223372036854775807` when nothing is open.

use crate::error::{Error, Result};
use crate::types::{VisibilityId, WriteId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

const NO_OPEN_ID: u64 = i64::MAX as u64;

/// How a contiguous range of ids relates to a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeState {
    /// Every id in the range is committed and visible.
    AllValid,
    /// Every id is committed or aborted, with at least one of each.
    ValidOrAborted,
    /// Every id in the range is aborted.
    AllAborted,
    /// At least one id is open or above the high watermark.
    NotVisible,
}

/// The ids a reader may observe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdSnapshot {
    high_watermark: u64,
    open: BTreeSet<u64>,
    aborted: BTreeSet<u64>,
}

impl IdSnapshot {
    /// Creates a snapshot. Exceptions must not exceed the high watermark and
    /// an id cannot be both open and aborted.
    pub fn new(
        high_watermark: u64,
        open: impl IntoIterator<Item = u64>,
        aborted: impl IntoIterator<Item = u64>,
    ) -> Result<Self> {
        let open: BTreeSet<u64> = open.into_iter().collect();
        let aborted: BTreeSet<u64> = aborted.into_iter().collect();

        if let Some(&id) = open.iter().chain(aborted.iter()).find(|&&id| id > high_watermark) {
            return Err(Error::invalid_argument(format!(
                "exception {} above high watermark {}",
                id, high_watermark
            )));
        }
        if let Some(id) = open.intersection(&aborted).next() {
            return Err(Error::invalid_argument(format!("id {} is both open and aborted", id)));
        }

        Ok(Self { high_watermark, open, aborted })
    }

    /// A snapshot in which every id is visible.
    pub fn all() -> Self {
        Self { high_watermark: u64::MAX, open: BTreeSet::new(), aborted: BTreeSet::new() }
    }

    /// Highest id the snapshot knows about.
    pub fn high_watermark(&self) -> u64 {
        self.high_watermark
    }

    /// Lowest open id, if any.
    pub fn min_open(&self) -> Option<u64> {
        self.open.first().copied()
    }

    /// Open ids at or below the high watermark.
    pub fn open_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.open.iter().copied()
    }

    /// Aborted ids at or below the high watermark.
    pub fn aborted_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.aborted.iter().copied()
    }

    /// Returns true if `id` is committed and visible.
    pub fn is_valid(&self, id: u64) -> bool {
        id <= self.high_watermark && !self.open.contains(&id) && !self.aborted.contains(&id)
    }

    /// Returns true if `id` is known to be aborted.
    pub fn is_aborted(&self, id: u64) -> bool {
        self.aborted.contains(&id)
    }

    /// Returns true if a base covering `[0, id]` contains nothing open.
    pub fn is_valid_base(&self, id: u64) -> bool {
        id <= self.high_watermark && self.min_open().is_none_or(|min_open| id < min_open)
    }

    /// Classifies the inclusive range `[min, max]`.
    pub fn range_state(&self, min: u64, max: u64) -> RangeState {
        if max > self.high_watermark || self.open.range(min..=max).next().is_some() {
            return RangeState::NotVisible;
        }
        let aborted = self.aborted.range(min..=max).count() as u64;
        if aborted == 0 {
            RangeState::AllValid
        } else if aborted - 1 == max - min {
            RangeState::AllAborted
        } else {
            RangeState::ValidOrAborted
        }
    }

    fn write_body(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.high_watermark,
            self.min_open().unwrap_or(NO_OPEN_ID),
            join(&self.open),
            join(&self.aborted)
        )
    }

    fn parse_body(text: &str, fields: &[&str]) -> Result<Self> {
        let [hwm, min_open, open, aborted] = fields else {
            return Err(Error::invalid_argument(format!("malformed valid id list {:?}", text)));
        };
        let high_watermark = parse_id(text, hwm)?;
        let open = split_ids(text, open)?;
        let aborted = split_ids(text, aborted)?;
        let snapshot = Self::new(high_watermark, open, aborted)?;

        let declared_min_open = parse_id(text, min_open)?;
        if snapshot.min_open().unwrap_or(NO_OPEN_ID) != declared_min_open {
            return Err(Error::invalid_argument(format!(
                "valid id list {:?} declares min open {} but lists {:?}",
                text,
                declared_min_open,
                snapshot.min_open()
            )));
        }
        Ok(snapshot)
    }
}

fn join(ids: &BTreeSet<u64>) -> String {
    ids.iter().map(u64::to_string).collect::<Vec<_>>().join(",")
}

fn parse_id(text: &str, field: &str) -> Result<u64> {
    field
        .parse::<u64>()
        .map_err(|_| Error::invalid_argument(format!("bad id {:?} in valid id list {:?}", field, text)))
}

fn split_ids(text: &str, field: &str) -> Result<Vec<u64>> {
    if field.is_empty() {
        return Ok(Vec::new());
    }
    field.split(',').map(|id| parse_id(text, id)).collect()
}

/// Write ids of one table visible to a reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidWriteIdList {
    table: String,
    ids: IdSnapshot,
}

impl ValidWriteIdList {
    /// Creates a write id list for `table`.
    pub fn new(table: impl Into<String>, ids: IdSnapshot) -> Self {
        Self { table: table.into(), ids }
    }

    /// Name of the table the list belongs to.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The underlying id snapshot.
    pub fn ids(&self) -> &IdSnapshot {
        &self.ids
    }

    /// Returns true if events written by `write_id` are visible.
    pub fn is_write_id_valid(&self, write_id: WriteId) -> bool {
        self.ids.is_valid(write_id)
    }
}

impl fmt::Display for ValidWriteIdList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.table)?;
        self.ids.write_body(f)
    }
}

impl FromStr for ValidWriteIdList {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let fields: Vec<&str> = text.split(':').collect();
        let Some((table, body)) = fields.split_first() else {
            return Err(Error::invalid_argument("empty valid write id list"));
        };
        if table.is_empty() {
            return Err(Error::invalid_argument(format!("missing table name in {:?}", text)));
        }
        Ok(Self { table: (*table).to_string(), ids: IdSnapshot::parse_body(text, body)? })
    }
}

/// Transaction ids visible to a reader, used for visibility thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidTxnList(IdSnapshot);

impl ValidTxnList {
    /// Creates a transaction list.
    pub fn new(ids: IdSnapshot) -> Self {
        Self(ids)
    }

    /// A list in which every transaction is committed.
    pub fn all() -> Self {
        Self(IdSnapshot::all())
    }

    /// The underlying id snapshot.
    pub fn ids(&self) -> &IdSnapshot {
        &self.0
    }

    /// Returns true if a directory with this visibility id may be read.
    ///
    /// Visibility id 0 is always visible.
    pub fn is_visible(&self, visibility_id: VisibilityId) -> bool {
        visibility_id == 0 || self.0.is_valid(visibility_id)
    }
}

impl fmt::Display for ValidTxnList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.write_body(f)
    }
}

impl FromStr for ValidTxnList {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let fields: Vec<&str> = text.split(':').collect();
        Ok(Self(IdSnapshot::parse_body(text, &fields)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity() {
        let ids = IdSnapshot::new(10, [4], [6, 7]).unwrap();
        assert!(ids.is_valid(1));
        assert!(!ids.is_valid(4));
        assert!(!ids.is_valid(6));
        assert!(ids.is_aborted(6));
        assert!(!ids.is_valid(11));
        assert_eq!(ids.min_open(), Some(4));
    }

    #[test]
    fn test_rejects_inconsistent_lists() {
        assert!(IdSnapshot::new(5, [6], []).is_err());
        assert!(IdSnapshot::new(5, [3], [3]).is_err());
    }

    #[test]
    fn test_range_state() {
        let ids = IdSnapshot::new(10, [9], [3, 4]).unwrap();
        assert_eq!(ids.range_state(1, 2), RangeState::AllValid);
        assert_eq!(ids.range_state(1, 5), RangeState::ValidOrAborted);
        assert_eq!(ids.range_state(3, 4), RangeState::AllAborted);
        assert_eq!(ids.range_state(8, 9), RangeState::NotVisible);
        assert_eq!(ids.range_state(10, 11), RangeState::NotVisible);
    }

    #[test]
    fn test_range_state_full_id_space() {
        let ids = IdSnapshot::new(u64::MAX, [], [5]).unwrap();
        assert_eq!(ids.range_state(0, u64::MAX), RangeState::ValidOrAborted);
        assert_eq!(ids.range_state(5, 5), RangeState::AllAborted);
        assert_eq!(IdSnapshot::new(u64::MAX, [], []).unwrap().range_state(0, u64::MAX), RangeState::AllValid);
    }

    #[test]
    fn test_valid_base() {
        let ids = IdSnapshot::new(10, [5], []).unwrap();
        assert!(ids.is_valid_base(4));
        assert!(!ids.is_valid_base(5));
        assert!(!ids.is_valid_base(11));
        assert!(IdSnapshot::new(10, [], [5]).unwrap().is_valid_base(10));
    }

    #[test]
    fn test_write_id_list_text_form() {
        let list = ValidWriteIdList::new("db.t", IdSnapshot::new(10, [4, 8], [6]).unwrap());
        let text = list.to_string();
        assert_eq!(text, "db.t:10:4:4,8:6");
        assert_eq!(text.parse::<ValidWriteIdList>().unwrap(), list);

        let empty = ValidWriteIdList::new("db.t", IdSnapshot::new(3, [], []).unwrap());
        assert_eq!(empty.to_string(), "db.t:3:9223372036854775807::");
        assert_eq!("db.t:3:9223372036854775807::".parse::<ValidWriteIdList>().unwrap(), empty);
    }

    #[test]
    fn test_write_id_list_parse_errors() {
        assert!("".parse::<ValidWriteIdList>().is_err());
        assert!("db.t:10".parse::<ValidWriteIdList>().is_err());
        assert!("db.t:x:1::".parse::<ValidWriteIdList>().is_err());
        // min open disagrees with the open list
        assert!("db.t:10:2:4:".parse::<ValidWriteIdList>().is_err());
    }

    #[test]
    fn test_txn_list_visibility() {
        let txns: ValidTxnList = "100:50:50:60".parse().unwrap();
        assert!(txns.is_visible(0));
        assert!(txns.is_visible(49));
        assert!(!txns.is_visible(50));
        assert!(!txns.is_visible(60));
        assert!(!txns.is_visible(101));
        assert_eq!(txns.to_string(), "100:50:50:60");
    }

    #[test]
    fn test_serde_roundtrip() {
        let list = ValidWriteIdList::new("db.t", IdSnapshot::new(10, [4], [6]).unwrap());
        let json = serde_json::to_string(&list).unwrap();
        let back: ValidWriteIdList = serde_json::from_str(&json).unwrap();
        assert_eq!(back, list);
    }
}
