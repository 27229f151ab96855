//! Leveled compaction strategy: L0 triggers at a file count, L1+ trigger at
//! a byte-size threshold growing geometrically (`base * multiplier^level`).
//! Victim selection for `L -> L+1` picks the oldest SSTable in `L` plus
//! every SSTable in `L+1` whose key range overlaps it, so that after the
//! merge, `L+1` again holds disjoint ranges.

use super::{
    CompactionConfig, CompactionError, CompactionResult, CompactionStrategy, LeveledSstables,
    finalize_merge, merge_sorted,
};
use crate::manifest::Manifest;
use crate::sstable::SSTable;
use std::sync::Arc;

pub struct LeveledCompaction;

fn level_bytes(sstables: &[Arc<SSTable>]) -> u64 {
    sstables.iter().map(|s| s.file_size()).sum()
}

fn overlaps(a: &SSTable, b: &SSTable) -> bool {
    let ap = a.properties();
    let bp = b.properties();
    ap.min_ts <= bp.max_ts && bp.min_ts <= ap.max_ts
}

impl CompactionStrategy for LeveledCompaction {
    fn compact(
        &self,
        sstables: &LeveledSstables,
        manifest: &Manifest,
        data_dir: &str,
        config: &CompactionConfig,
    ) -> Result<Option<CompactionResult>, CompactionError> {
        let empty: Vec<Arc<SSTable>> = Vec::new();
        let l0 = sstables.levels.get(&0).unwrap_or(&empty);

        if l0.len() >= config.l0_trigger {
            let l1 = sstables.levels.get(&1).unwrap_or(&empty);
            let overlapping_l1: Vec<&Arc<SSTable>> = l1
                .iter()
                .filter(|s1| l0.iter().any(|s0| overlaps(s0, s1)))
                .collect();

            let mut removed = Vec::new();
            let mut iters: Vec<Box<dyn Iterator<Item = _> + '_>> = Vec::new();
            for sst in l0 {
                removed.push((0, sst.properties().sequence));
                iters.push(Box::new(sst.iter()));
            }
            for sst in &overlapping_l1 {
                removed.push((1, sst.properties().sequence));
                iters.push(Box::new(sst.iter()));
            }

            let merged = merge_sorted(iters)?;
            return Ok(Some(split_and_finalize(
                manifest, data_dir, 1, merged, removed, config,
            )?));
        }

        for (&level, ssts) in &sstables.levels {
            if level == 0 {
                continue;
            }
            let threshold =
                config.level_base_bytes * config.level_size_multiplier.pow(level);
            if level_bytes(ssts) <= threshold {
                continue;
            }

            let Some(oldest) = ssts.iter().min_by_key(|s| s.properties().sequence) else {
                continue;
            };
            let next_level = level + 1;
            let next = sstables.levels.get(&next_level).unwrap_or(&empty);
            let overlapping_next: Vec<&Arc<SSTable>> =
                next.iter().filter(|s| overlaps(oldest, s)).collect();

            let mut removed = vec![(level, oldest.properties().sequence)];
            let mut iters: Vec<Box<dyn Iterator<Item = _> + '_>> =
                vec![Box::new(oldest.iter())];
            for sst in &overlapping_next {
                removed.push((next_level, sst.properties().sequence));
                iters.push(Box::new(sst.iter()));
            }

            let merged = merge_sorted(iters)?;
            return Ok(Some(split_and_finalize(
                manifest,
                data_dir,
                next_level,
                merged,
                removed,
                config,
            )?));
        }

        Ok(None)
    }
}

/// Splits a merged tuple stream into multiple output SSTables once it
/// exceeds `target_sst_bytes` (approximated by entry count — exact byte
/// accounting happens in the SSTable writer), so one oversized merge does
/// not produce an unbounded single file.
fn split_and_finalize(
    manifest: &Manifest,
    data_dir: &str,
    level: u32,
    tuples: Vec<crate::tuple::Tuple>,
    removed: Vec<(u32, u64)>,
    config: &CompactionConfig,
) -> Result<CompactionResult, CompactionError> {
    const APPROX_BYTES_PER_TUPLE: u64 = 128;
    let per_chunk = (config.target_sst_bytes / APPROX_BYTES_PER_TUPLE).max(1) as usize;

    if tuples.len() <= per_chunk {
        return finalize_merge(manifest, data_dir, level, tuples, removed);
    }

    let mut produced = Vec::new();
    let mut first = true;
    for chunk in tuples.chunks(per_chunk) {
        let chunk_removed = if first {
            first = false;
            removed.clone()
        } else {
            Vec::new()
        };
        let result = finalize_merge(manifest, data_dir, level, chunk.to_vec(), chunk_removed)?;
        produced.extend(result.produced);
    }
    Ok(CompactionResult { removed, produced })
}
