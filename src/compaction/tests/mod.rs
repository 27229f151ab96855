use crate::compaction::leveled::LeveledCompaction;
use crate::compaction::{CompactionConfig, CompactionStrategy, LeveledSstables};
use crate::manifest::{Manifest, ManifestSstEntry};
use crate::sstable::{SSTable, SstWriter};
use crate::tuple::{Tuple, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::tempdir;

fn tuple(ts: i64, v: f64) -> Tuple {
    Tuple::new(ts, Value::Scalar(v))
}

#[test]
fn l0_trigger_merges_into_l1_preserving_key_set() {
    let dir = tempdir().unwrap();
    let manifest = Manifest::open(dir.path().join("wal-000001.log")).unwrap();

    let mut l0 = Vec::new();
    for i in 0..4u64 {
        let path = dir.path().join(format!("L0_{i}.sst"));
        SstWriter::new(&path)
            .build(vec![tuple(i as i64 * 1000, i as f64)].into_iter(), 0, i)
            .unwrap();
        manifest
            .add_sstable(ManifestSstEntry {
                level: 0,
                sequence: i,
                path: path.clone(),
            })
            .unwrap();
        l0.push(Arc::new(SSTable::open(&path).unwrap()));
    }

    let mut levels = BTreeMap::new();
    levels.insert(0u32, l0);
    let sstables = LeveledSstables { levels };

    let config = CompactionConfig {
        l0_trigger: 4,
        ..Default::default()
    };
    let result = LeveledCompaction
        .compact(&sstables, &manifest, dir.path().to_str().unwrap(), &config)
        .unwrap()
        .expect("compaction should trigger");

    assert_eq!(result.removed.len(), 4);
    assert_eq!(result.produced.len(), 1);
    assert_eq!(result.produced[0].level, 1);

    let produced = SSTable::open(&result.produced[0].path).unwrap();
    assert_eq!(produced.properties().num_entries, 4);
}

#[test]
fn below_trigger_returns_none() {
    let dir = tempdir().unwrap();
    let manifest = Manifest::open(dir.path().join("wal-000001.log")).unwrap();
    let sstables = LeveledSstables {
        levels: BTreeMap::new(),
    };
    let config = CompactionConfig::default();
    let result = LeveledCompaction
        .compact(&sstables, &manifest, dir.path().to_str().unwrap(), &config)
        .unwrap();
    assert!(result.is_none());
}
