//! # Compaction
//!
//! Leveled compaction: SSTables within one level (beyond L0) are kept to
//! disjoint key ranges, bounding per-query file fan-out. The
//! [`CompactionStrategy`] trait shape and the shared merge/dedup/finalize
//! plumbing stay fixed; only the victim-selection logic varies by strategy.

pub mod leveled;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use crate::manifest::{Manifest, ManifestError, ManifestSstEntry};
use crate::sstable::{SSTable, SSTableError, SstWriter};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Leveled compaction configuration, mirrored from the LSM engine's config.
#[derive(Debug, Clone, Copy)]
pub struct CompactionConfig {
    pub l0_trigger: usize,
    pub level_base_bytes: u64,
    pub level_size_multiplier: u64,
    pub target_sst_bytes: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            l0_trigger: 4,
            level_base_bytes: 4 * 1024 * 1024,
            level_size_multiplier: 10,
            target_sst_bytes: 16 * 1024 * 1024,
        }
    }
}

/// A level `L` SSTable together with its storage handle, as seen by the
/// compactor (which operates on snapshots handed to it by the LSM engine).
pub struct LeveledSstables {
    pub levels: std::collections::BTreeMap<u32, Vec<Arc<SSTable>>>,
}

/// One produced output SSTable from a compaction round.
pub struct CompactedSstable {
    pub level: u32,
    pub sequence: u64,
    pub path: std::path::PathBuf,
}

/// Result of a compaction execution.
pub struct CompactionResult {
    /// `(level, sequence)` pairs consumed by this round.
    pub removed: Vec<(u32, u64)>,
    /// SSTables produced by this round (plural: a level merge may split
    /// into several output files once it exceeds the target size).
    pub produced: Vec<CompactedSstable>,
}

pub trait CompactionStrategy {
    fn compact(
        &self,
        sstables: &LeveledSstables,
        manifest: &Manifest,
        data_dir: &str,
        config: &CompactionConfig,
    ) -> Result<Option<CompactionResult>, CompactionError>;
}

/// n-way merges already-sorted SSTable streams into one timestamp-ordered
/// stream, discarding exact `(ts, value, tags, fields)` duplicates the way
/// `Lsm::range` does.
pub fn merge_sorted(
    iters: Vec<Box<dyn Iterator<Item = Result<crate::tuple::Tuple, SSTableError>> + '_>>,
) -> Result<Vec<crate::tuple::Tuple>, CompactionError> {
    let mut all = Vec::new();
    for iter in iters {
        for item in iter {
            all.push(item?);
        }
    }
    all.sort_by(|a, b| a.ts.cmp(&b.ts));
    all.dedup_by(|a, b| a.ts == b.ts && a.value == b.value && a.tags == b.tags && a.fields == b.fields);
    Ok(all)
}

/// Shared tail: builds a new SSTable from merged entries and records the
/// manifest swap. Returns `None` (no file) when the input set is empty.
pub(crate) fn finalize_merge(
    manifest: &Manifest,
    data_dir: &str,
    level: u32,
    tuples: Vec<crate::tuple::Tuple>,
    removed: Vec<(u32, u64)>,
) -> Result<CompactionResult, CompactionError> {
    if tuples.is_empty() {
        manifest.apply_compaction(Vec::new(), removed.clone())?;
        return Ok(CompactionResult {
            removed,
            produced: Vec::new(),
        });
    }

    let sequence = manifest.allocate_sst_id()?;
    let file_name = SSTable::file_name(level as u64, sequence);
    let path = std::path::PathBuf::from(data_dir).join(&file_name);

    SstWriter::new(&path).build(tuples.into_iter(), level as u64, sequence)?;

    manifest.apply_compaction(
        vec![ManifestSstEntry {
            level,
            sequence,
            path: path.clone(),
        }],
        removed.clone(),
    )?;

    info!(level, sequence, path = %path.display(), "compaction produced new SSTable");

    Ok(CompactionResult {
        removed,
        produced: vec![CompactedSstable {
            level,
            sequence,
            path,
        }],
    })
}
