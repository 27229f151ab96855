use crate::manifest::{Manifest, ManifestSstEntry};
use std::path::PathBuf;
use tempfile::tempdir;

fn open(dir: &std::path::Path) -> Manifest {
    Manifest::open(dir.join("wal-000001.log")).unwrap()
}

#[test]
fn allocate_sst_id_is_monotonic() {
    let dir = tempdir().unwrap();
    let manifest = open(dir.path());
    let a = manifest.allocate_sst_id().unwrap();
    let b = manifest.allocate_sst_id().unwrap();
    assert!(b > a);
}

#[test]
fn add_and_list_sstables_per_level() {
    let dir = tempdir().unwrap();
    let manifest = open(dir.path());
    manifest
        .add_sstable(ManifestSstEntry {
            level: 0,
            sequence: 1,
            path: PathBuf::from("L0_1.sst"),
        })
        .unwrap();
    manifest
        .add_sstable(ManifestSstEntry {
            level: 1,
            sequence: 2,
            path: PathBuf::from("L1_2.sst"),
        })
        .unwrap();

    let levels = manifest.levels().unwrap();
    assert_eq!(levels.get(&0).unwrap().len(), 1);
    assert_eq!(levels.get(&1).unwrap().len(), 1);
}

#[test]
fn apply_compaction_swaps_entries_atomically() {
    let dir = tempdir().unwrap();
    let manifest = open(dir.path());
    manifest
        .add_sstable(ManifestSstEntry {
            level: 0,
            sequence: 1,
            path: PathBuf::from("L0_1.sst"),
        })
        .unwrap();
    manifest
        .apply_compaction(
            vec![ManifestSstEntry {
                level: 1,
                sequence: 2,
                path: PathBuf::from("L1_2.sst"),
            }],
            vec![(0, 1)],
        )
        .unwrap();

    let levels = manifest.levels().unwrap();
    assert!(levels.get(&0).map(Vec::is_empty).unwrap_or(true));
    assert_eq!(levels.get(&1).unwrap().len(), 1);
}

#[test]
fn state_survives_reopen_via_event_replay() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal-000001.log");
    {
        let manifest = Manifest::open(&path).unwrap();
        manifest.set_active_wal(5).unwrap();
        manifest
            .add_sstable(ManifestSstEntry {
                level: 0,
                sequence: 1,
                path: PathBuf::from("L0_1.sst"),
            })
            .unwrap();
    }

    let reopened = Manifest::open(&path).unwrap();
    assert_eq!(reopened.get_active_wal().unwrap(), 5);
    assert_eq!(reopened.levels().unwrap().get(&0).unwrap().len(), 1);
}
