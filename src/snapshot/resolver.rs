//! Resolution of a partition directory against a snapshot.
//!
//! ## Algorithm
//!
//! 1. List the immediate children of the partition root.
//! 2. Classify each child as base, delta, legacy bucket file or ignorable.
//!    A child carrying a layout prefix that does not parse fails the read.
//! 3. Drop directories whose visibility id is not committed, deltas that
//!    contain open write ids, and deltas made only of aborted write ids.
//! 4. Pick the newest usable base and every remaining delta above it.
//!    Overlapping deltas are all kept.
//! 5. Order the deltas by ascending min write id.

use super::Snapshot;
use crate::delta::DeltaBatchDescriptor;
use crate::error::{Error, Result};
use crate::merge::{MergeSource, Mode};
use crate::metadata::{AcidMetadata, DataFormat};
use crate::naming::{self, DeltaKind, LayoutEntry, ParsedBase, ParsedDelta};
use crate::snapshot::RangeState;
use crate::storage::{FileStatus, Storage};
use crate::types::{AttemptId, BucketId, StatementId, VisibilityId, WriteId, WriteIdRange};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The base selected for a read.
#[derive(Debug, Clone)]
pub struct BaseDirectory {
    /// Directory path.
    pub path: PathBuf,
    /// Every write id up to and including this one is materialized.
    pub write_id: WriteId,
    /// Visibility threshold of the directory.
    pub visibility_id: VisibilityId,
    /// True if the base was produced by compaction.
    pub compacted: bool,
    /// Contents of the directory.
    pub files: Vec<FileStatus>,
}

/// A delta selected for a read.
#[derive(Debug, Clone)]
pub struct DeltaDirectory {
    /// Directory path.
    pub path: PathBuf,
    /// Decoded directory name.
    pub parsed: ParsedDelta,
    /// Contents of the directory.
    pub files: Vec<FileStatus>,
}

/// A bucket file of a legacy layout.
#[derive(Debug, Clone)]
pub struct OriginalFile {
    /// Bucket parsed from the file name.
    pub bucket: BucketId,
    /// Status captured at listing time.
    pub status: FileStatus,
}

/// The minimal set of directories needed to answer a read.
#[derive(Debug, Clone)]
pub struct ResolvedSnapshot {
    root: PathBuf,
    base: Option<BaseDirectory>,
    deltas: Vec<DeltaDirectory>,
    original_files: Vec<OriginalFile>,
    obsolete: Vec<PathBuf>,
    aborted: Vec<PathBuf>,
}

impl ResolvedSnapshot {
    /// Partition root that was resolved.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The selected base, if any.
    pub fn base(&self) -> Option<&BaseDirectory> {
        self.base.as_ref()
    }

    /// Selected deltas, ordered by ascending min write id.
    pub fn deltas(&self) -> &[DeltaDirectory] {
        &self.deltas
    }

    /// Legacy bucket files acting as the base of the partition.
    pub fn original_files(&self) -> &[OriginalFile] {
        &self.original_files
    }

    /// Directories superseded by the selected base (raw view only).
    pub fn obsolete(&self) -> &[PathBuf] {
        &self.obsolete
    }

    /// Deltas holding only aborted write ids (raw view only).
    pub fn aborted(&self) -> &[PathBuf] {
        &self.aborted
    }

    /// Returns true if there is nothing to read.
    pub fn is_empty(&self) -> bool {
        self.base.is_none() && self.deltas.is_empty() && self.original_files.is_empty()
    }

    /// Every bucket with at least one file in the selected sources.
    pub fn buckets(&self) -> Result<BTreeSet<BucketId>> {
        let mut buckets: BTreeSet<BucketId> = self.original_files.iter().map(|f| f.bucket).collect();
        let dirs = self
            .base
            .iter()
            .map(|b| b.files.as_slice())
            .chain(self.deltas.iter().map(|d| d.files.as_slice()));
        for files in dirs {
            for status in files {
                let name = status.file_name()?;
                if status.is_dir || naming::is_hidden(name) {
                    continue;
                }
                buckets.insert(naming::parse_bucket_file(name)?.bucket);
            }
        }
        Ok(buckets)
    }

    /// Merge sources for one bucket: legacy files or the base first, then
    /// the deltas in order.
    ///
    /// Fails if a directory holds the bucket from more than one attempt.
    pub fn sources_for_bucket(&self, bucket: BucketId) -> Result<Vec<MergeSource>> {
        self.sources_for_bucket_with_attempts(bucket, &HashMap::new())
    }

    /// Like [`sources_for_bucket`](Self::sources_for_bucket), reading the
    /// named attempt from every directory listed in `attempts`.
    pub fn sources_for_bucket_with_attempts(
        &self,
        bucket: BucketId,
        attempts: &HashMap<PathBuf, AttemptId>,
    ) -> Result<Vec<MergeSource>> {
        let mut sources = Vec::with_capacity(self.deltas.len() + 1);

        let mut originals: Vec<&OriginalFile> =
            self.original_files.iter().filter(|f| f.bucket == bucket).collect();
        if !originals.is_empty() {
            originals.sort_by(|a, b| a.status.path.cmp(&b.status.path));
            sources.push(MergeSource::Originals {
                bucket,
                paths: originals.into_iter().map(|f| f.status.path.clone()).collect(),
            });
        }

        if let Some(base) = &self.base {
            let attempt = attempts.get(&base.path).copied();
            if let Some(path) = find_bucket_file(&base.path, &base.files, bucket, attempt)? {
                sources.push(MergeSource::Events { path });
            }
        }
        sources.extend(self.delta_sources_for_bucket_with_attempts(bucket, attempts)?);
        Ok(sources)
    }

    /// Merge sources for one bucket taken from the deltas alone.
    pub fn delta_sources_for_bucket(&self, bucket: BucketId) -> Result<Vec<MergeSource>> {
        self.delta_sources_for_bucket_with_attempts(bucket, &HashMap::new())
    }

    /// Delta sources for one bucket, honoring per-directory attempt choices.
    pub fn delta_sources_for_bucket_with_attempts(
        &self,
        bucket: BucketId,
        attempts: &HashMap<PathBuf, AttemptId>,
    ) -> Result<Vec<MergeSource>> {
        let mut sources = Vec::with_capacity(self.deltas.len());
        for delta in &self.deltas {
            let attempt = attempts.get(&delta.path).copied();
            if let Some(path) = find_bucket_file(&delta.path, &delta.files, bucket, attempt)? {
                sources.push(MergeSource::Events { path });
            }
        }
        Ok(sources)
    }

    /// Descriptors of the selected deltas, grouping per-statement
    /// directories of one write id range into one batch.
    pub fn delta_batches(&self) -> Result<Vec<(DeltaKind, DeltaBatchDescriptor)>> {
        type GroupKey = (WriteId, WriteId, DeltaKind, VisibilityId, bool);
        let mut groups: BTreeMap<GroupKey, (Vec<StatementId>, Vec<FileStatus>)> = BTreeMap::new();

        for delta in &self.deltas {
            let p = delta.parsed;
            let key = (p.range.min, p.range.max, p.kind, p.visibility_id, p.statement_id.is_some());
            let group = groups.entry(key).or_default();
            group.0.extend(p.statement_id);
            group.1.extend(delta.files.iter().cloned());
        }

        groups
            .into_iter()
            .map(|((min, max, kind, visibility_id, _), (statement_ids, files))| {
                let range = WriteIdRange { min, max };
                DeltaBatchDescriptor::from_listing(range, statement_ids, visibility_id, &files)
                    .map(|descriptor| (kind, descriptor))
            })
            .collect()
    }
}

/// Picks the file holding `bucket` in one directory.
///
/// With `attempt` set only that attempt's file is read and the others are
/// left alone. Without it, two files for the same bucket are an error.
fn find_bucket_file(
    dir: &Path,
    files: &[FileStatus],
    bucket: BucketId,
    attempt: Option<AttemptId>,
) -> Result<Option<PathBuf>> {
    let mut found: Option<PathBuf> = None;
    let mut others = Vec::new();
    for status in files {
        let name = status.file_name()?;
        if status.is_dir || naming::is_hidden(name) {
            continue;
        }
        let parsed = naming::parse_bucket_file(name)?;
        if parsed.bucket != bucket {
            continue;
        }
        if attempt.is_some() && parsed.attempt_id != attempt {
            others.push(status.path.clone());
            continue;
        }
        if let Some(previous) = &found {
            return Err(Error::malformed(
                dir,
                format!("bucket {} written by several attempts: {:?} and {:?}", bucket, previous, status.path),
            ));
        }
        found = Some(status.path.clone());
    }

    if let Some(attempt) = attempt {
        if found.is_none() && !others.is_empty() {
            return Err(Error::malformed(
                dir,
                format!("bucket {} has no file for attempt {}: found {:?}", bucket, attempt, others),
            ));
        }
        for path in &others {
            log::debug!("Skipping {:?}: attempt {} selected", path, attempt);
        }
    }
    Ok(found)
}

/// Resolves partition directories against snapshots.
pub struct SnapshotResolver {
    storage: Arc<dyn Storage>,
}

impl SnapshotResolver {
    /// Create a resolver over a storage backend.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Determine the directories needed to read `root` under `snapshot`.
    ///
    /// An empty partition resolves to an empty result. Unparseable names
    /// and snapshots older than the oldest compacted base are errors.
    pub fn resolve(&self, root: &Path, snapshot: &Snapshot, mode: Mode) -> Result<ResolvedSnapshot> {
        let mut base_candidates: Vec<(PathBuf, ParsedBase)> = Vec::new();
        let mut delta_candidates: Vec<(PathBuf, ParsedDelta)> = Vec::new();
        let mut original_files = Vec::new();

        for child in self.storage.list(root)? {
            let entry = naming::classify(child.file_name()?, child.is_dir)?;
            match entry {
                LayoutEntry::Base(parsed) => base_candidates.push((child.path, parsed)),
                LayoutEntry::Delta(parsed) => delta_candidates.push((child.path, parsed)),
                LayoutEntry::Original(bucket) => original_files.push(OriginalFile { bucket, status: child }),
                LayoutEntry::Ignored => log::trace!("Ignoring {:?}", child.path),
            }
        }

        let ids = snapshot.write_ids().ids();
        let mut obsolete = Vec::new();
        let mut aborted = Vec::new();

        // Base selection
        let mut best: Option<(PathBuf, ParsedBase, bool)> = None;
        let mut oldest: Option<(PathBuf, WriteId, bool)> = None;
        for (path, parsed) in base_candidates {
            if !snapshot.is_directory_visible(parsed.visibility_id) {
                log::debug!("Skipping base {:?}: visibility id {} not committed", path, parsed.visibility_id);
                continue;
            }
            let compacted = self.is_compacted_base(&path, &parsed)?;
            if oldest.as_ref().is_none_or(|(_, write_id, _)| parsed.write_id < *write_id) {
                oldest = Some((path.clone(), parsed.write_id, compacted));
            }

            let usable = if compacted {
                ids.is_valid_base(parsed.write_id)
            } else {
                ids.is_valid(parsed.write_id)
            };
            if !usable {
                continue;
            }
            let newer = best.as_ref().is_none_or(|(_, current, _)| parsed.write_id > current.write_id);
            if !newer {
                obsolete.push(path);
            } else if let Some((previous, _, _)) = best.replace((path, parsed, compacted)) {
                obsolete.push(previous);
            }
        }

        if best.is_none() {
            if let Some((oldest_base, _, true)) = oldest {
                return Err(Error::SnapshotUnsatisfiable {
                    high_watermark: ids.high_watermark(),
                    min_open: ids.min_open(),
                    oldest_base,
                });
            }
        }
        let covered = best.as_ref().map(|(_, parsed, _)| parsed.write_id);

        // Delta selection
        let mut selected: Vec<(PathBuf, ParsedDelta)> = Vec::new();
        for (path, parsed) in delta_candidates {
            if !snapshot.is_directory_visible(parsed.visibility_id) {
                log::debug!("Skipping delta {:?}: visibility id {} not committed", path, parsed.visibility_id);
                continue;
            }
            match ids.range_state(parsed.range.min, parsed.range.max) {
                RangeState::NotVisible => {
                    log::debug!("Skipping delta {:?}: range {} not in snapshot", path, parsed.range);
                    continue;
                }
                RangeState::AllAborted => {
                    aborted.push(path);
                    continue;
                }
                RangeState::AllValid | RangeState::ValidOrAborted => {}
            }
            if covered.is_some_and(|write_id| parsed.range.max <= write_id) {
                obsolete.push(path);
                continue;
            }
            selected.push((path, parsed));
        }
        selected.sort_by(|(_, a), (_, b)| {
            a.range
                .min
                .cmp(&b.range.min)
                .then_with(|| b.range.max.cmp(&a.range.max))
                .then_with(|| a.kind.cmp(&b.kind))
                .then_with(|| a.statement_id.cmp(&b.statement_id))
        });

        if best.is_some() {
            obsolete.extend(original_files.drain(..).map(|f| f.status.path));
        }

        let base = match best {
            Some((path, parsed, compacted)) => Some(BaseDirectory {
                files: self.storage.list(&path)?,
                path,
                write_id: parsed.write_id,
                visibility_id: parsed.visibility_id,
                compacted,
            }),
            None => None,
        };
        let mut deltas = Vec::with_capacity(selected.len());
        for (path, parsed) in selected {
            deltas.push(DeltaDirectory { files: self.storage.list(&path)?, path, parsed });
        }

        if !mode.is_raw() {
            obsolete.clear();
            aborted.clear();
        }

        log::debug!(
            "Resolved {:?} at hwm {}: base={:?}, {} deltas, {} original files",
            root,
            ids.high_watermark(),
            base.as_ref().map(|b| &b.path),
            deltas.len(),
            original_files.len()
        );

        Ok(ResolvedSnapshot { root: root.to_path_buf(), base, deltas, original_files, obsolete, aborted })
    }

    fn is_compacted_base(&self, path: &Path, parsed: &ParsedBase) -> Result<bool> {
        if parsed.visibility_id != 0 {
            return Ok(true);
        }
        Ok(AcidMetadata::read(self.storage.as_ref(), path)?
            .is_some_and(|metadata| metadata.data_format == DataFormat::Compacted))
    }
}
