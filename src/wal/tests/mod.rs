use crate::tuple::{Tuple, Value};
use crate::wal::{TupleRecord, Wal};
use tempfile::tempdir;

fn rec(ts: i64, v: f64) -> TupleRecord {
    TupleRecord {
        ts,
        tuple: Tuple::new(ts, Value::Scalar(v)),
    }
}

#[test]
fn append_and_replay_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal-000001.log");
    let wal = Wal::<TupleRecord>::open(&path, None).unwrap();

    wal.append(&rec(1000, 1.0)).unwrap();
    wal.append(&rec(2000, 2.0)).unwrap();
    wal.append(&rec(3000, 3.0)).unwrap();

    let replayed: Vec<TupleRecord> = wal
        .replay_iter()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(replayed.len(), 3);
    assert_eq!(replayed[0].ts, 1000);
    assert_eq!(replayed[2].ts, 3000);
}

#[test]
fn truncate_empties_log_but_keeps_header() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal-000001.log");
    let mut wal = Wal::<TupleRecord>::open(&path, None).unwrap();
    wal.append(&rec(1000, 1.0)).unwrap();
    wal.truncate().unwrap();

    let replayed: Vec<TupleRecord> = wal
        .replay_iter()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(replayed.is_empty());
}

#[test]
fn reopen_existing_wal_validates_header() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal-000001.log");
    {
        let wal = Wal::<TupleRecord>::open(&path, None).unwrap();
        wal.append(&rec(1000, 1.0)).unwrap();
    }
    let wal = Wal::<TupleRecord>::open(&path, None).unwrap();
    let replayed: Vec<TupleRecord> = wal
        .replay_iter()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(replayed.len(), 1);
}

#[test]
fn rotate_next_allocates_new_segment() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal-000001.log");
    let mut wal = Wal::<TupleRecord>::open(&path, None).unwrap();
    wal.append(&rec(1000, 1.0)).unwrap();
    let next_seq = wal.rotate_next().unwrap();
    assert_eq!(next_seq, 2);
    assert_eq!(wal.wal_seq(), 2);

    let replayed: Vec<TupleRecord> = wal
        .replay_iter()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(replayed.is_empty());
}

#[test]
fn truncated_tail_record_is_discarded_not_fatal() {
    use std::fs::OpenOptions;
    use std::io::Write;

    let dir = tempdir().unwrap();
    let path = dir.path().join("wal-000001.log");
    {
        let wal = Wal::<TupleRecord>::open(&path, None).unwrap();
        wal.append(&rec(1000, 1.0)).unwrap();
        wal.append(&rec(2000, 2.0)).unwrap();
    }

    // Corrupt the tail by appending a partial length prefix with no payload.
    let mut f = OpenOptions::new().append(true).open(&path).unwrap();
    f.write_all(&[7, 0, 0, 0]).unwrap();
    drop(f);

    let wal = Wal::<TupleRecord>::open(&path, None).unwrap();
    let mut iter = wal.replay_iter().unwrap();
    let mut good = Vec::new();
    for item in &mut iter {
        match item {
            Ok(r) => good.push(r),
            Err(_) => break,
        }
    }
    assert_eq!(good.len(), 2);
}
