// Randomized merge tests for acidstore
// Cross-checks the k-way merge against a brute-force model of the event history

use acidstore::naming::DeltaKind;
use acidstore::snapshot::{IdSnapshot, ValidWriteIdList};
use acidstore::types::{AcidEvent, RecordIdentifier, WriteIdRange};
use acidstore::{Mode, Partition, ReaderOptions, Snapshot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use tempfile::TempDir;

const WRITES: u64 = 12;

/// Every event ever written, grouped by write id
struct History {
    events: BTreeMap<u64, Vec<AcidEvent>>,
}

impl History {
    fn generate(rng: &mut StdRng) -> Self {
        let mut events: BTreeMap<u64, Vec<AcidEvent>> = BTreeMap::new();
        let mut rows: Vec<RecordIdentifier> = Vec::new();
        for write_id in 1..=WRITES {
            let mut batch = Vec::new();
            let mut touched = BTreeSet::new();
            for row_id in 0..rng.random_range(1..4u64) {
                let bucket = rng.random_range(0..3u32);
                let event = AcidEvent::insert(write_id, bucket, row_id, format!("w{}r{}", write_id, row_id).into_bytes());
                touched.insert(event.id);
                rows.push(event.id);
                batch.push(event);
            }
            for _ in 0..rng.random_range(0..3) {
                let id = rows[rng.random_range(0..rows.len())];
                if !touched.insert(id) {
                    continue;
                }
                if rng.random_bool(0.5) {
                    batch.push(AcidEvent::delete(id, write_id));
                } else {
                    batch.push(AcidEvent::update(id, write_id, format!("w{}u", write_id).into_bytes()));
                }
            }
            events.insert(write_id, batch);
        }
        Self { events }
    }

    /// Publish each write as an insert delta plus a delete delta
    fn publish(&self, partition: &Partition) {
        for (&write_id, batch) in &self.events {
            let range = WriteIdRange::single(write_id);
            let inserts = partition.delta_writer(DeltaKind::Insert, range, None, 0).unwrap();
            let deletes = partition.delta_writer(DeltaKind::Delete, range, None, 0).unwrap();
            for event in batch {
                if event.is_delete() {
                    deletes.append(event.clone()).unwrap();
                } else {
                    inserts.append(event.clone()).unwrap();
                }
            }
            inserts.finish().unwrap();
            if !deletes.is_empty() {
                deletes.finish().unwrap();
            }
        }
    }

    /// Newest visible event per row, deletes removed
    fn expected_rows(&self, snapshot: &Snapshot) -> BTreeMap<RecordIdentifier, Vec<u8>> {
        let mut latest: BTreeMap<RecordIdentifier, &AcidEvent> = BTreeMap::new();
        for (&write_id, batch) in &self.events {
            if !snapshot.is_write_id_valid(write_id) {
                continue;
            }
            for event in batch {
                latest.insert(event.id, event);
            }
        }
        latest
            .into_iter()
            .filter(|(_, event)| !event.is_delete())
            .map(|(id, event)| (id, event.row.to_vec()))
            .collect()
    }

    /// Every visible event, bucket by bucket in key order
    fn expected_events(&self, snapshot: &Snapshot) -> Vec<AcidEvent> {
        let mut events: Vec<AcidEvent> = self
            .events
            .iter()
            .filter(|(write_id, _)| snapshot.is_write_id_valid(**write_id))
            .flat_map(|(_, batch)| batch.iter().cloned())
            .collect();
        events.sort_by_key(|event| (event.id.bucket, event.key()));
        events
    }
}

fn random_snapshot(rng: &mut StdRng) -> Snapshot {
    let hwm = rng.random_range(1..=WRITES);
    let mut open = BTreeSet::new();
    let mut aborted = BTreeSet::new();
    for id in 1..=hwm {
        match rng.random_range(0..10) {
            0 => {
                open.insert(id);
            }
            1 => {
                aborted.insert(id);
            }
            _ => {}
        }
    }
    Snapshot::new(ValidWriteIdList::new("db.t", IdSnapshot::new(hwm, open, aborted).unwrap()))
}

#[test]
fn test_row_view_matches_model() {
    env_logger::try_init().ok();
    for seed in 0..20u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let history = History::generate(&mut rng);
        let dir = TempDir::new().unwrap();
        let partition = Partition::open(dir.path(), ReaderOptions::default()).unwrap();
        history.publish(&partition);

        for _ in 0..5 {
            let snapshot = random_snapshot(&mut rng);
            let actual: BTreeMap<RecordIdentifier, Vec<u8>> =
                partition.scan(&snapshot).unwrap().into_iter().map(|r| (r.id(), r.row().to_vec())).collect();
            assert_eq!(actual, history.expected_rows(&snapshot), "seed {} snapshot {}", seed, snapshot.write_ids());
        }
    }
}

#[test]
fn test_raw_view_matches_model() {
    env_logger::try_init().ok();
    for seed in 100..110u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let history = History::generate(&mut rng);
        let dir = TempDir::new().unwrap();
        let partition = Partition::open(dir.path(), ReaderOptions::default()).unwrap();
        history.publish(&partition);

        let snapshot = random_snapshot(&mut rng);
        let resolved = partition.resolve(&snapshot, Mode::raw()).unwrap();
        let mut actual = Vec::new();
        for bucket in resolved.buckets().unwrap() {
            for record in partition.reader(&snapshot, bucket, Mode::raw()).unwrap() {
                actual.push(record.unwrap().into_event());
            }
        }
        assert_eq!(actual, history.expected_events(&snapshot), "seed {}", seed);
    }
}

#[test]
fn test_compaction_preserves_rows() {
    env_logger::try_init().ok();
    for seed in 200..210u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let history = History::generate(&mut rng);
        let dir = TempDir::new().unwrap();
        let partition = Partition::open(dir.path(), ReaderOptions::default()).unwrap();
        history.publish(&partition);

        let snapshot = random_snapshot(&mut rng);
        let before = history.expected_rows(&snapshot);

        partition.compaction(snapshot.clone(), 1000).minor().unwrap();
        partition.compaction(snapshot.clone(), 1001).major().unwrap();

        let after: BTreeMap<RecordIdentifier, Vec<u8>> =
            partition.scan(&snapshot).unwrap().into_iter().map(|r| (r.id(), r.row().to_vec())).collect();
        assert_eq!(after, before, "seed {}", seed);
    }
}
