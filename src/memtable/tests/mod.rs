use crate::memtable::Memtable;
use crate::tuple::{Tuple, Value};
use tempfile::tempdir;

fn tuple(ts: i64, v: f64) -> Tuple {
    Tuple::new(ts, Value::Scalar(v))
}

#[test]
fn put_then_get_returns_all_values_at_ts() {
    let dir = tempdir().unwrap();
    let mt = Memtable::open(dir.path().join("wal-000001.log"), 1 << 20, 0.75).unwrap();

    mt.put(1000, tuple(1000, 1.0)).unwrap();
    mt.put(1000, tuple(1000, 2.0)).unwrap();

    let got = mt.get(1000).unwrap();
    assert_eq!(got.len(), 2);
    assert_eq!(got[0].value, Value::Scalar(1.0));
    assert_eq!(got[1].value, Value::Scalar(2.0));
}

#[test]
fn range_is_half_open_and_sorted() {
    let dir = tempdir().unwrap();
    let mt = Memtable::open(dir.path().join("wal-000001.log"), 1 << 20, 0.75).unwrap();

    mt.put(1000, tuple(1000, 1.0)).unwrap();
    mt.put(1500, tuple(1500, 2.0)).unwrap();
    mt.put(2000, tuple(2000, 3.0)).unwrap();

    let got = mt.range(1000, 2000).unwrap();
    assert_eq!(got.len(), 2);
    assert_eq!(got[0].ts, 1000);
    assert_eq!(got[1].ts, 1500);
}

#[test]
fn byte_estimate_zero_iff_empty() {
    let dir = tempdir().unwrap();
    let mt = Memtable::open(dir.path().join("wal-000001.log"), 1 << 20, 0.75).unwrap();
    assert_eq!(mt.size_bytes(), 0);
    assert!(mt.is_empty());

    mt.put(1000, tuple(1000, 1.0)).unwrap();
    assert!(mt.size_bytes() > 0);
    assert!(!mt.is_empty());
}

#[test]
fn recover_replays_wal_into_fresh_memtable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal-000001.log");
    {
        let mt = Memtable::open(&path, 1 << 20, 0.75).unwrap();
        mt.put(1000, tuple(1000, 1.0)).unwrap();
        mt.put(2000, tuple(2000, 2.0)).unwrap();
    }

    let recovered = Memtable::recover(&path, 1 << 20, 0.75).unwrap();
    assert_eq!(recovered.len(), 2);
    assert_eq!(recovered.get(1000).unwrap()[0].value, Value::Scalar(1.0));
}

#[test]
fn is_full_respects_threshold() {
    let dir = tempdir().unwrap();
    // Tiny cap forces is_full() after a single write.
    let mt = Memtable::open(dir.path().join("wal-000001.log"), 16, 0.5).unwrap();
    mt.put(1000, tuple(1000, 1.0)).unwrap();
    assert!(mt.is_full());
}

#[test]
fn iter_for_flush_is_timestamp_ordered_and_non_mutating() {
    let dir = tempdir().unwrap();
    let mt = Memtable::open(dir.path().join("wal-000001.log"), 1 << 20, 0.75).unwrap();
    mt.put(2000, tuple(2000, 2.0)).unwrap();
    mt.put(1000, tuple(1000, 1.0)).unwrap();

    let snapshot = mt.iter_for_flush().unwrap();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].ts, 1000);
    assert_eq!(snapshot[1].ts, 2000);
    // Unaffected by the snapshot.
    assert_eq!(mt.len(), 2);
}
