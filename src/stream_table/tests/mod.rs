use crate::lsm::EngineConfig;
use crate::stream_table::StreamTable;
use crate::tuple::{Tags, TimeRange, Tuple, Value};
use tempfile::tempdir;

fn tuple_with_tag(ts: i64, v: f64, key: &str, value: &str) -> Tuple {
    let mut tags = Tags::new();
    tags.insert(key, value);
    Tuple::new(ts, Value::Scalar(v)).with_tags(tags)
}

#[test]
fn insert_assigns_increasing_local_ids() {
    let dir = tempdir().unwrap();
    let table = StreamTable::open(dir.path(), EngineConfig::default()).unwrap();

    let a = table.insert(tuple_with_tag(1000, 1.0, "region", "us")).unwrap();
    let b = table.insert(tuple_with_tag(2000, 2.0, "region", "eu")).unwrap();
    assert!(b > a);
}

#[test]
fn query_filters_by_tag_value() {
    let dir = tempdir().unwrap();
    let table = StreamTable::open(dir.path(), EngineConfig::default()).unwrap();

    table
        .insert_batch(vec![
            tuple_with_tag(1000, 1.0, "region", "us"),
            tuple_with_tag(2000, 2.0, "region", "eu"),
            tuple_with_tag(3000, 3.0, "region", "us"),
        ])
        .unwrap();

    let us_only = table
        .query(TimeRange::new(0, 10_000), &[("region".to_string(), "us".to_string())])
        .unwrap();
    assert_eq!(us_only.len(), 2);
    assert!(us_only.iter().all(|t| t.tags.get("region") == Some("us")));
}

#[test]
fn query_intersects_multiple_tag_filters() {
    let dir = tempdir().unwrap();
    let table = StreamTable::open(dir.path(), EngineConfig::default()).unwrap();

    let mut both = Tags::new();
    both.insert("region", "us");
    both.insert("host", "a");
    table.insert(Tuple::new(1000, Value::Scalar(1.0)).with_tags(both)).unwrap();

    let mut region_only = Tags::new();
    region_only.insert("region", "us");
    region_only.insert("host", "b");
    table.insert(Tuple::new(2000, Value::Scalar(2.0)).with_tags(region_only)).unwrap();

    let found = table
        .query(
            TimeRange::new(0, 10_000),
            &[("region".to_string(), "us".to_string()), ("host".to_string(), "a".to_string())],
        )
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].ts, 1000);
}

#[test]
fn query_with_unindexed_tag_value_returns_empty() {
    let dir = tempdir().unwrap();
    let table = StreamTable::open(dir.path(), EngineConfig::default()).unwrap();
    table.insert(tuple_with_tag(1000, 1.0, "region", "us")).unwrap();

    let found = table
        .query(TimeRange::new(0, 10_000), &[("region".to_string(), "apac".to_string())])
        .unwrap();
    assert!(found.is_empty());
}

#[test]
fn query_without_filter_returns_full_range() {
    let dir = tempdir().unwrap();
    let table = StreamTable::open(dir.path(), EngineConfig::default()).unwrap();
    table.insert(tuple_with_tag(1000, 1.0, "k", "v")).unwrap();
    table.insert(tuple_with_tag(2000, 2.0, "k", "v")).unwrap();

    let all = table.query(TimeRange::new(0, 10_000), &[]).unwrap();
    assert_eq!(all.len(), 2);
}

#[test]
fn count_matches_range_cardinality() {
    let dir = tempdir().unwrap();
    let table = StreamTable::open(dir.path(), EngineConfig::default()).unwrap();
    for i in 0..5 {
        table.insert(tuple_with_tag(i * 1000, i as f64, "k", "v")).unwrap();
    }
    assert_eq!(table.count(TimeRange::new(0, 3000)).unwrap(), 3);
}

#[test]
fn query_latest_returns_n_highest_timestamps_descending() {
    let dir = tempdir().unwrap();
    let table = StreamTable::open(dir.path(), EngineConfig::default()).unwrap();
    for i in 0..5 {
        table.insert(tuple_with_tag(i * 1000, i as f64, "k", "v")).unwrap();
    }

    let latest = table.query_latest(2).unwrap();
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].ts, 4000);
    assert_eq!(latest[1].ts, 3000);
}

#[test]
fn reopen_rebuilds_tag_index_from_scan() {
    let dir = tempdir().unwrap();
    {
        let table = StreamTable::open(dir.path(), EngineConfig::default()).unwrap();
        table
            .insert_batch(vec![
                tuple_with_tag(1000, 1.0, "region", "us"),
                tuple_with_tag(2000, 2.0, "region", "eu"),
            ])
            .unwrap();
    }

    let table = StreamTable::open(dir.path(), EngineConfig::default()).unwrap();
    let us_only = table
        .query(TimeRange::new(0, 10_000), &[("region".to_string(), "us".to_string())])
        .unwrap();
    assert_eq!(us_only.len(), 1);
}
