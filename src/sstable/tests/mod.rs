use crate::sstable::{SSTable, SstWriter};
use crate::tuple::{Tuple, Value};
use tempfile::tempdir;

fn tuple(ts: i64, v: f64) -> Tuple {
    Tuple::new(ts, Value::Scalar(v))
}

#[test]
fn build_then_get_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("L0_1.sst");
    let writer = SstWriter::new(&path);
    let tuples = vec![tuple(1000, 1.0), tuple(2000, 2.0), tuple(3000, 3.0)];
    writer.build(tuples.into_iter(), 0, 1).unwrap();

    let sst = SSTable::open(&path).unwrap();
    let props = sst.properties();
    assert_eq!(props.level, 0);
    assert_eq!(props.sequence, 1);
    assert_eq!(props.num_entries, 3);
    assert_eq!(props.min_ts, 1000);
    assert_eq!(props.max_ts, 3000);

    let got = sst.get(2000).unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].value, Value::Scalar(2.0));

    assert!(sst.get(9999).unwrap().is_empty());
}

#[test]
fn range_scan_is_half_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("L0_1.sst");
    let writer = SstWriter::new(&path);
    let tuples = vec![
        tuple(1000, 1.0),
        tuple(1500, 2.0),
        tuple(2000, 3.0),
        tuple(2500, 4.0),
    ];
    writer.build(tuples.into_iter(), 0, 1).unwrap();

    let sst = SSTable::open(&path).unwrap();
    let got = sst.range(1000, 2000).unwrap();
    assert_eq!(got.len(), 2);
    assert_eq!(got[0].ts, 1000);
    assert_eq!(got[1].ts, 1500);
}

#[test]
fn bloom_rejects_absent_timestamp() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("L0_1.sst");
    let writer = SstWriter::new(&path);
    writer.build(vec![tuple(1000, 1.0)].into_iter(), 0, 1).unwrap();

    let sst = SSTable::open(&path).unwrap();
    assert!(sst.get(42).unwrap().is_empty());
}

#[test]
fn multi_block_file_round_trips_every_tuple() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("L0_1.sst");
    let writer = SstWriter::new(&path);

    // Oversized vectors push each tuple's encoding well past a few hundred
    // bytes so a few thousand of them span multiple ~64 KiB blocks.
    let tuples: Vec<Tuple> = (0..4000)
        .map(|i| Tuple::new(i as i64, Value::Vector(vec![i as f64; 8])))
        .collect();
    writer.build(tuples.clone().into_iter(), 1, 7).unwrap();

    let sst = SSTable::open(&path).unwrap();
    assert_eq!(sst.properties().num_entries, 4000);
    for t in &tuples {
        let got = sst.get(t.ts).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].value, t.value);
    }
}

#[test]
fn iter_yields_all_tuples_in_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("L0_1.sst");
    let writer = SstWriter::new(&path);
    let tuples = vec![tuple(100, 1.0), tuple(200, 2.0), tuple(300, 3.0)];
    writer.build(tuples.into_iter(), 0, 1).unwrap();

    let sst = SSTable::open(&path).unwrap();
    let collected: Vec<i64> = sst.iter().map(|r| r.unwrap().ts).collect();
    assert_eq!(collected, vec![100, 200, 300]);
}
