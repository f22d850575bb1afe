// Integration tests for acidstore
// End-to-end reads over published partitions

use acidstore::event::{EventFileWriter, FileKind};
use acidstore::naming::{self, DeltaKind};
use acidstore::snapshot::{IdSnapshot, ValidTxnList, ValidWriteIdList};
use acidstore::types::{AcidEvent, RecordIdentifier, WriteIdRange};
use acidstore::{DeltaBatchDescriptor, Error, Mode, Partition, ReaderOptions, Snapshot};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn snapshot(hwm: u64, open: &[u64], aborted: &[u64]) -> Snapshot {
    Snapshot::new(ValidWriteIdList::new(
        "db.t",
        IdSnapshot::new(hwm, open.iter().copied(), aborted.iter().copied()).unwrap(),
    ))
}

fn write(partition: &Partition, kind: DeltaKind, write_id: u64, stmt: Option<u32>, events: Vec<AcidEvent>) {
    let writer = partition.delta_writer(kind, WriteIdRange::single(write_id), stmt, 0).unwrap();
    for event in events {
        writer.append(event).unwrap();
    }
    writer.finish().unwrap();
}

fn rows(partition: &Partition, snapshot: &Snapshot) -> Vec<(RecordIdentifier, Vec<u8>)> {
    partition.scan(snapshot).unwrap().into_iter().map(|r| (r.id(), r.row().to_vec())).collect()
}

/// Delete in a later source wins over the insert
#[test]
fn test_delete_wins_across_sources() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let partition = Partition::open(dir.path(), ReaderOptions::default()).unwrap();
    let id = RecordIdentifier::new(1, 0, 0);

    write(&partition, DeltaKind::Insert, 1, None, vec![AcidEvent::insert(1, 0, 0, &b"row"[..])]);
    write(&partition, DeltaKind::Delete, 3, None, vec![AcidEvent::delete(id, 3)]);

    let snap = snapshot(3, &[], &[]);
    assert!(rows(&partition, &snap).is_empty());

    let raw: Vec<AcidEvent> =
        partition.reader(&snap, 0, Mode::raw()).unwrap().map(|r| r.unwrap().into_event()).collect();
    assert_eq!(raw.len(), 2);
    assert!(raw[0].is_delete());
    assert_eq!(raw[0].current_write_id, 3);
    assert_eq!(raw[1].current_write_id, 1);
}

/// Commits after resolution stay invisible to the read
#[test]
fn test_snapshot_isolation() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let partition = Partition::open(dir.path(), ReaderOptions::default()).unwrap();

    write(&partition, DeltaKind::Insert, 1, None, vec![AcidEvent::insert(1, 0, 0, &b"v1"[..])]);

    // Reader fixes its snapshot while write id 2 is open
    let snap = snapshot(2, &[2], &[]);
    let mut reader = partition.reader(&snap, 0, Mode::RowView).unwrap();

    write(
        &partition,
        DeltaKind::Insert,
        2,
        None,
        vec![AcidEvent::update(RecordIdentifier::new(1, 0, 0), 2, &b"v2"[..])],
    );

    let record = reader.next_record().unwrap().unwrap();
    assert_eq!(record.row().as_ref(), b"v1");
    assert!(reader.next_record().unwrap().is_none());

    assert_eq!(rows(&partition, &snapshot(2, &[], &[]))[0].1, b"v2".to_vec());
}

/// Aborted write ids are invisible, at directory and at event level
#[test]
fn test_aborted_writes() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let partition = Partition::open(dir.path(), ReaderOptions::default()).unwrap();

    write(&partition, DeltaKind::Insert, 1, None, vec![AcidEvent::insert(1, 0, 0, &b"a"[..])]);
    write(&partition, DeltaKind::Insert, 2, None, vec![AcidEvent::insert(2, 0, 0, &b"b"[..])]);
    write(&partition, DeltaKind::Insert, 3, None, vec![AcidEvent::insert(3, 0, 0, &b"c"[..])]);

    let visible = rows(&partition, &snapshot(3, &[], &[2]));
    assert_eq!(visible.iter().map(|(_, row)| row.clone()).collect::<Vec<_>>(), vec![b"a".to_vec(), b"c".to_vec()]);

    let resolved = partition.resolve(&snapshot(3, &[], &[2]), Mode::raw()).unwrap();
    assert_eq!(resolved.aborted(), &[dir.path().join("delta_2_2")]);
}

/// Multi-statement transaction: one directory per statement
#[test]
fn test_multi_statement_batch() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let partition = Partition::open(dir.path(), ReaderOptions::default()).unwrap();

    write(&partition, DeltaKind::Insert, 5, Some(0), vec![AcidEvent::insert(5, 0, 0, &b"s0"[..])]);
    write(
        &partition,
        DeltaKind::Insert,
        5,
        Some(1),
        vec![AcidEvent::insert(5, 0, 1, &b"s1"[..]).with_statement(1)],
    );

    let descriptor = DeltaBatchDescriptor::new(WriteIdRange::single(5), vec![1, 0], 0, Vec::new());
    assert_eq!(
        descriptor.paths(dir.path()),
        vec![dir.path().join("delta_5_5_0"), dir.path().join("delta_5_5_1")]
    );

    let with_visibility = DeltaBatchDescriptor::new(WriteIdRange::single(5), vec![0, 1], 17, Vec::new());
    assert_eq!(
        with_visibility.paths(dir.path()),
        vec![dir.path().join("delta_5_5_0_v17"), dir.path().join("delta_5_5_1_v17")]
    );

    let snap = snapshot(5, &[], &[]);
    assert_eq!(rows(&partition, &snap).len(), 2);

    let batches = partition.resolve(&snap, Mode::RowView).unwrap().delta_batches().unwrap();
    assert_eq!(batches.len(), 1);
    let (kind, batch) = &batches[0];
    assert_eq!(*kind, DeltaKind::Insert);
    assert_eq!(batch.statement_ids(), &[0, 1]);

    let bytes = batch.to_bytes();
    assert_eq!(&DeltaBatchDescriptor::from_bytes(&bytes).unwrap(), batch);
}

/// An empty partition resolves to nothing, not an error
#[test]
fn test_empty_partition() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let partition = Partition::open(dir.path(), ReaderOptions::default()).unwrap();

    let resolved = partition.resolve(&snapshot(100, &[], &[]), Mode::RowView).unwrap();
    assert!(resolved.is_empty());
    assert!(resolved.buckets().unwrap().is_empty());
    assert!(partition.scan(&snapshot(100, &[], &[])).unwrap().is_empty());
}

fn write_original(path: &Path, rows: &[&[u8]]) {
    let mut writer = EventFileWriter::create(path, FileKind::Original).unwrap();
    for row in rows {
        writer.append_row(row).unwrap();
    }
    writer.finish().unwrap();
}

/// A legacy partition converted in place keeps its rows addressable
#[test]
fn test_legacy_files_with_deltas() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    write_original(&dir.path().join(naming::original_file_name(0)), &[b"o0", b"o1", b"o2"]);

    let partition = Partition::open(dir.path(), ReaderOptions::default()).unwrap();
    write(&partition, DeltaKind::Delete, 1, None, vec![AcidEvent::delete(RecordIdentifier::new(0, 0, 1), 1)]);
    write(&partition, DeltaKind::Insert, 2, None, vec![AcidEvent::insert(2, 0, 0, &b"new"[..])]);

    let visible = rows(&partition, &snapshot(2, &[], &[]));
    assert_eq!(
        visible,
        vec![
            (RecordIdentifier::new(0, 0, 0), b"o0".to_vec()),
            (RecordIdentifier::new(0, 0, 2), b"o2".to_vec()),
            (RecordIdentifier::new(2, 0, 0), b"new".to_vec()),
        ]
    );
}

/// Directories written by uncommitted transactions are skipped
#[test]
fn test_visibility_ids() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let partition = Partition::open(dir.path(), ReaderOptions::default()).unwrap();

    write(&partition, DeltaKind::Insert, 1, None, vec![AcidEvent::insert(1, 0, 0, &b"a"[..])]);
    let writer = partition.delta_writer(DeltaKind::Insert, WriteIdRange::new(1, 2).unwrap(), None, 50).unwrap();
    writer.append(AcidEvent::insert(1, 0, 0, &b"a"[..])).unwrap();
    writer.append(AcidEvent::insert(2, 0, 0, &b"b"[..])).unwrap();
    writer.finish().unwrap();

    let hidden = snapshot(2, &[], &[]).with_txns(ValidTxnList::new(IdSnapshot::new(60, [50], []).unwrap()));
    let resolved = partition.resolve(&hidden, Mode::RowView).unwrap();
    assert_eq!(resolved.deltas().len(), 1);

    // Overlapping deltas are merged without duplicates
    let all = snapshot(2, &[], &[]);
    assert_eq!(partition.resolve(&all, Mode::RowView).unwrap().deltas().len(), 2);
    assert_eq!(rows(&partition, &all).len(), 2);
}

/// Unparseable names fail the read instead of being skipped
#[test]
fn test_malformed_layout() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("delta_7_x")).unwrap();
    let partition = Partition::open(dir.path(), ReaderOptions::default()).unwrap();

    match partition.scan(&snapshot(10, &[], &[])) {
        Err(Error::MalformedLayout { path, .. }) => assert!(path.ends_with("delta_7_x")),
        other => panic!("expected MalformedLayout, got {:?}", other.map(|r| r.len())),
    }
}

/// A retried writer leaves a second bucket file next to the first
#[test]
fn test_retried_attempt_in_delta() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let retry_dir = TempDir::new().unwrap();

    let partition = Partition::open(dir.path(), ReaderOptions::default()).unwrap();
    write(&partition, DeltaKind::Insert, 1, None, vec![AcidEvent::insert(1, 0, 0, &b"first"[..])]);
    write(&partition, DeltaKind::Insert, 2, None, vec![AcidEvent::insert(2, 0, 0, &b"other"[..])]);

    let retry = Partition::open(retry_dir.path(), ReaderOptions::default()).unwrap();
    write(&retry, DeltaKind::Insert, 1, None, vec![AcidEvent::insert(1, 0, 0, &b"retry"[..])]);
    let delta = dir.path().join("delta_1_1");
    fs::copy(retry_dir.path().join("delta_1_1").join("bucket_00000"), delta.join("bucket_00000_1")).unwrap();

    let snap = snapshot(2, &[], &[]);
    assert!(matches!(partition.scan(&snap), Err(Error::MalformedLayout { .. })));

    let chosen = Partition::open(dir.path(), ReaderOptions::new().attempt(&delta, 1)).unwrap();
    assert_eq!(
        rows(&chosen, &snap),
        vec![(RecordIdentifier::new(1, 0, 0), b"retry".to_vec()), (RecordIdentifier::new(2, 0, 0), b"other".to_vec())]
    );

    let result = chosen.compaction(snap.clone(), 9).major().unwrap().unwrap();
    assert_eq!(result.events_written, 2);
    assert_eq!(result.outputs, vec![dir.path().join("base_2_v9")]);

    // The new base hides the ambiguous delta, so the strict handle reads again
    let rows_after = rows(&partition, &snap);
    assert_eq!(rows_after.len(), 2);
    assert_eq!(rows_after[0].1, b"retry".to_vec());
}
