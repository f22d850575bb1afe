//! On-disk naming scheme for a versioned partition.
//!
//! This module is the single source of truth for the directory and file
//! names of the layout. Every function is pure.
//!
//! ## Layout
//!
//! ```text
//! $partition/base_$wid[_v$vis]/bucket_$bucket[_$attempt]
//!            delta_$min_$max[_$stmt][_v$vis]/bucket_$bucket[_$attempt]
//!            delete_delta_$min_$max[_$stmt][_v$vis]/bucket_$bucket[_$attempt]
//! ```
//!
//! Legacy (non-versioned) partitions keep their files directly under the
//! partition root, named `$bucket_$copy` with a six digit bucket number.

use crate::error::{Error, Result};
use crate::types::{AttemptId, BucketId, StatementId, VisibilityId, WriteId, WriteIdRange};
use std::path::{Path, PathBuf};

/// Prefix of base directories.
pub const BASE_PREFIX: &str = "base_";

/// Prefix of insert delta directories.
pub const DELTA_PREFIX: &str = "delta_";

/// Prefix of delete delta directories.
pub const DELETE_DELTA_PREFIX: &str = "delete_delta_";

/// Separator in front of a visibility id.
pub const VISIBILITY_PREFIX: &str = "_v";

/// Prefix of bucket files inside a base or delta directory.
pub const BUCKET_PREFIX: &str = "bucket_";

/// Name of the JSON sidecar describing a directory.
pub const METADATA_FILE: &str = "_metadata_acid";

/// Name of the binary delta descriptor written next to compacted deltas.
pub const DESCRIPTOR_FILE: &str = "_delta_descriptor";

/// Prefix of directories that are still being written.
pub const TMP_PREFIX: &str = "_tmp_";

/// Which kind of events a delta directory holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeltaKind {
    /// Inserts and updates (`delta_`).
    Insert,
    /// Deletes only (`delete_delta_`).
    Delete,
}

impl DeltaKind {
    /// Returns the directory name prefix for this kind.
    pub fn prefix(self) -> &'static str {
        match self {
            DeltaKind::Insert => DELTA_PREFIX,
            DeltaKind::Delete => DELETE_DELTA_PREFIX,
        }
    }
}

/// A decoded base directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedBase {
    /// All write ids in `[0, write_id]` are materialized.
    pub write_id: WriteId,
    /// Visibility threshold, 0 when absent.
    pub visibility_id: VisibilityId,
}

/// A decoded delta directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedDelta {
    /// Insert or delete delta.
    pub kind: DeltaKind,
    /// Write ids covered (inclusive).
    pub range: WriteIdRange,
    /// Statement id when the transaction split its output.
    pub statement_id: Option<StatementId>,
    /// Visibility threshold, 0 when absent.
    pub visibility_id: VisibilityId,
}

/// A decoded bucket file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedBucketFile {
    /// Bucket the file holds.
    pub bucket: BucketId,
    /// Attempt that wrote the file, if recorded in the name.
    pub attempt_id: Option<AttemptId>,
}

/// Classification of one child of a partition directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutEntry {
    /// A `base_` directory.
    Base(ParsedBase),
    /// A `delta_` or `delete_delta_` directory.
    Delta(ParsedDelta),
    /// A bucket file of a legacy layout, sitting directly under the root.
    Original(BucketId),
    /// Hidden, temporary or side files that take no part in reads.
    Ignored,
}

/// Appends `_v<visibility>` unless the visibility id is 0.
pub fn add_visibility_suffix(name: String, visibility_id: VisibilityId) -> String {
    if visibility_id == 0 {
        name
    } else {
        format!("{}{}{}", name, VISIBILITY_PREFIX, visibility_id)
    }
}

/// Formats the name of a delta directory.
pub fn delta_dir_name(
    kind: DeltaKind,
    range: WriteIdRange,
    statement_id: Option<StatementId>,
    visibility_id: VisibilityId,
) -> String {
    let name = match statement_id {
        Some(stmt) => format!("{}{}_{}_{}", kind.prefix(), range.min, range.max, stmt),
        None => format!("{}{}_{}", kind.prefix(), range.min, range.max),
    };
    add_visibility_suffix(name, visibility_id)
}

/// Formats the name of a base directory.
pub fn base_dir_name(write_id: WriteId, visibility_id: VisibilityId) -> String {
    add_visibility_suffix(format!("{}{}", BASE_PREFIX, write_id), visibility_id)
}

/// Formats the name of a bucket file.
pub fn bucket_file_name(bucket: BucketId, attempt_id: Option<AttemptId>) -> String {
    match attempt_id {
        Some(attempt) => format!("{}{:05}_{}", BUCKET_PREFIX, bucket, attempt),
        None => format!("{}{:05}", BUCKET_PREFIX, bucket),
    }
}

/// Resolves the path of a bucket file inside a base or delta directory.
pub fn bucket_file_path(dir: &Path, bucket: BucketId, attempt_id: Option<AttemptId>) -> PathBuf {
    dir.join(bucket_file_name(bucket, attempt_id))
}

/// Formats the name of a bucket file of a legacy layout.
pub fn original_file_name(bucket: BucketId) -> String {
    format!("{:06}_0", bucket)
}

fn parse_number<T: std::str::FromStr>(name: &str, field: &str, text: &str) -> Result<T> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::malformed(name, format!("{} is not a number: {:?}", field, text)));
    }
    text.parse::<T>()
        .map_err(|_| Error::malformed(name, format!("{} out of range: {:?}", field, text)))
}

/// Splits a trailing `_v<digits>` suffix off `rest`.
fn split_visibility<'a>(name: &str, rest: &'a str) -> Result<(&'a str, VisibilityId)> {
    match rest.rfind(VISIBILITY_PREFIX) {
        Some(idx) => {
            let visibility = parse_number(name, "visibility id", &rest[idx + VISIBILITY_PREFIX.len()..])?;
            Ok((&rest[..idx], visibility))
        }
        None => Ok((rest, 0)),
    }
}

/// Parses a base directory name.
pub fn parse_base(name: &str) -> Result<ParsedBase> {
    let rest = name
        .strip_prefix(BASE_PREFIX)
        .ok_or_else(|| Error::malformed(name, "missing base_ prefix"))?;
    let (rest, visibility_id) = split_visibility(name, rest)?;
    let write_id = parse_number(name, "write id", rest)?;
    Ok(ParsedBase { write_id, visibility_id })
}

/// Parses a delta or delete delta directory name.
pub fn parse_delta(name: &str) -> Result<ParsedDelta> {
    let (kind, rest) = if let Some(rest) = name.strip_prefix(DELETE_DELTA_PREFIX) {
        (DeltaKind::Delete, rest)
    } else if let Some(rest) = name.strip_prefix(DELTA_PREFIX) {
        (DeltaKind::Insert, rest)
    } else {
        return Err(Error::malformed(name, "missing delta_ prefix"));
    };

    let (rest, visibility_id) = split_visibility(name, rest)?;
    let parts: Vec<&str> = rest.split('_').collect();
    let (min, max, statement_id) = match parts.as_slice() {
        [min, max] => (parse_number(name, "min write id", min)?, parse_number(name, "max write id", max)?, None),
        [min, max, stmt] => (
            parse_number(name, "min write id", min)?,
            parse_number(name, "max write id", max)?,
            Some(parse_number(name, "statement id", stmt)?),
        ),
        _ => return Err(Error::malformed(name, "expected <min>_<max>[_<stmt>]")),
    };
    if min > max {
        return Err(Error::malformed(name, format!("min write id {} > max write id {}", min, max)));
    }

    Ok(ParsedDelta { kind, range: WriteIdRange { min, max }, statement_id, visibility_id })
}

/// Parses a bucket file name inside a base or delta directory.
pub fn parse_bucket_file(name: &str) -> Result<ParsedBucketFile> {
    let rest = name
        .strip_prefix(BUCKET_PREFIX)
        .ok_or_else(|| Error::malformed(name, "missing bucket_ prefix"))?;
    match rest.split_once('_') {
        Some((bucket, attempt)) => Ok(ParsedBucketFile {
            bucket: parse_number(name, "bucket id", bucket)?,
            attempt_id: Some(parse_number(name, "attempt id", attempt)?),
        }),
        None => Ok(ParsedBucketFile { bucket: parse_number(name, "bucket id", rest)?, attempt_id: None }),
    }
}

/// Parses a legacy bucket file name (`000001_0` or `000001_0_copy_2`).
///
/// Returns `None` for names that do not follow the legacy pattern.
pub fn parse_original_bucket(name: &str) -> Option<BucketId> {
    let (bucket, rest) = name.split_once('_')?;
    if bucket.len() != 6 || !bucket.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let copy = rest.split("_copy_").collect::<Vec<_>>();
    let digits_only = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    match copy.as_slice() {
        [task] if digits_only(task) => bucket.parse().ok(),
        [task, n] if digits_only(task) && digits_only(n) => bucket.parse().ok(),
        _ => None,
    }
}

/// Extracts the attempt id encoded in a bucket file path, if any.
pub fn parse_attempt_id(path: &Path) -> Option<AttemptId> {
    let name = path.file_name()?.to_str()?;
    parse_bucket_file(name).ok()?.attempt_id
}

/// Returns true for names that never take part in a read.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_')
}

/// Classifies one child of a partition directory.
///
/// Names carrying a layout prefix must parse; anything else that is not a
/// legacy bucket file is rejected rather than skipped.
pub fn classify(name: &str, is_dir: bool) -> Result<LayoutEntry> {
    if is_hidden(name) {
        return Ok(LayoutEntry::Ignored);
    }
    if is_dir {
        if name.starts_with(BASE_PREFIX) {
            return parse_base(name).map(LayoutEntry::Base);
        }
        if name.starts_with(DELTA_PREFIX) || name.starts_with(DELETE_DELTA_PREFIX) {
            return parse_delta(name).map(LayoutEntry::Delta);
        }
        return Err(Error::malformed(name, "unrecognized directory in partition"));
    }
    match parse_original_bucket(name) {
        Some(bucket) => Ok(LayoutEntry::Original(bucket)),
        None => Err(Error::malformed(name, "unrecognized file in partition")),
    }
}
