//! # LSM engine
//!
//! Composes the bloom filter, WAL, memtable, SSTable, and manifest modules
//! into one per-table storage engine: `put`/`put_batch`/`get`/`range`/
//! `flush`/`compact`/`recover`, plus the statistics surface used by
//! `StreamTable` and operational tooling.
//!
//! A single `Arc<RwLock<_>>`-guarded inner state backs the whole facade,
//! holding SSTables as a `levels: BTreeMap<u32, Vec<Arc<SSTable>>>` rather
//! than a flat list, so leveled compaction has somewhere to put its
//! per-level disjointness invariant.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::compaction::leveled::LeveledCompaction;
use crate::compaction::{
    CompactionConfig, CompactionError, CompactionStrategy, LeveledSstables,
};
use crate::manifest::{Manifest, ManifestError, ManifestSstEntry};
use crate::memtable::{Memtable, MemtableError};
use crate::sstable::{SSTable, SSTableError, SstWriter};
use crate::tuple::Tuple;
use thiserror::Error;
use tracing::{info, warn};

pub const MANIFEST_DIR: &str = "manifest";
pub const SSTABLE_DIR: &str = "sstables";

#[derive(Debug, Error)]
pub enum LsmError {
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("memtable error: {0}")]
    Memtable(#[from] MemtableError),

    #[error("sstable error: {0}")]
    SSTable(#[from] SSTableError),

    #[error("compaction error: {0}")]
    Compaction(#[from] CompactionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backpressure exhausted: writer should retry later")]
    BackpressureExhausted,

    #[error("busy: {0}")]
    Busy(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub memtable_max_bytes: usize,
    pub flush_threshold: f64,
    pub compaction: CompactionConfig,
    pub durable: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memtable_max_bytes: 4 * 1024 * 1024,
            flush_threshold: 0.75,
            compaction: CompactionConfig::default(),
            durable: true,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EngineStats {
    pub put_count: u64,
    pub get_count: u64,
    pub range_count: u64,
    pub memtable_hits: u64,
    pub sstable_hits: u64,
    pub bloom_rejections: u64,
    pub compaction_count: u64,
    pub total_bytes: u64,
}

struct Counters {
    put_count: AtomicU64,
    get_count: AtomicU64,
    range_count: AtomicU64,
    memtable_hits: AtomicU64,
    sstable_hits: AtomicU64,
    bloom_rejections: AtomicU64,
    compaction_count: AtomicU64,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            put_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            range_count: AtomicU64::new(0),
            memtable_hits: AtomicU64::new(0),
            sstable_hits: AtomicU64::new(0),
            bloom_rejections: AtomicU64::new(0),
            compaction_count: AtomicU64::new(0),
        }
    }
}

struct EngineInner {
    active: Memtable,
    sealed: Option<Memtable>,
    levels: BTreeMap<u32, Vec<Arc<SSTable>>>,
    manifest: Manifest,
    next_wal_seq: u64,
}

/// A single table's storage engine: one active memtable, at most one
/// sealed memtable awaiting flush, a WAL, and a leveled set of SSTables.
pub struct Lsm {
    inner: RwLock<EngineInner>,
    data_dir: PathBuf,
    config: EngineConfig,
    counters: Counters,
}

impl Lsm {
    pub fn open(data_dir: impl AsRef<Path>, config: EngineConfig) -> Result<Self, LsmError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(data_dir.join(MANIFEST_DIR))?;
        fs::create_dir_all(data_dir.join(SSTABLE_DIR))?;

        let manifest_path = data_dir.join(MANIFEST_DIR).join("wal-000001.log");
        let manifest = Manifest::open(manifest_path)?;

        let mut levels: BTreeMap<u32, Vec<Arc<SSTable>>> = BTreeMap::new();
        for (level, entries) in manifest.levels()? {
            let mut ssts = Vec::new();
            for entry in entries {
                ssts.push(Arc::new(SSTable::open(&entry.path)?));
            }
            levels.insert(level, ssts);
        }

        let active_wal_seq = manifest.get_active_wal()?;
        let active_wal_seq = if active_wal_seq == 0 {
            manifest.set_active_wal(1)?;
            1
        } else {
            active_wal_seq
        };
        let active_wal_path = data_dir.join(format!("wal-{active_wal_seq:06}.log"));
        let active = if active_wal_path.exists() {
            Memtable::recover(&active_wal_path, config.memtable_max_bytes, config.flush_threshold)?
        } else {
            Memtable::open(&active_wal_path, config.memtable_max_bytes, config.flush_threshold)?
        };

        info!(path = %data_dir.display(), levels = levels.len(), "LSM engine opened");

        Ok(Self {
            inner: RwLock::new(EngineInner {
                active,
                sealed: None,
                levels,
                manifest,
                next_wal_seq: active_wal_seq + 1,
            }),
            data_dir,
            config,
            counters: Counters::default(),
        })
    }

    fn lock_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, EngineInner>, LsmError> {
        self.inner
            .write()
            .map_err(|_| LsmError::Busy("poisoned lock".into()))
    }

    fn lock_read(&self) -> Result<std::sync::RwLockReadGuard<'_, EngineInner>, LsmError> {
        self.inner
            .read()
            .map_err(|_| LsmError::Busy("poisoned lock".into()))
    }

    /// Appends to the WAL, then inserts into the active memtable. Seals
    /// the memtable inline (synchronously) and flushes it once full, rather
    /// than handing the flush to a background task — simple to reason about
    /// under this crate's single-writer-per-table model.
    pub fn put(&self, ts: i64, tuple: Tuple) -> Result<(), LsmError> {
        self.put_batch(vec![(ts, tuple)])
    }

    pub fn put_batch(&self, tuples: Vec<(i64, Tuple)>) -> Result<(), LsmError> {
        let mut inner = self.lock_write()?;

        let sealed_bytes = inner.sealed.as_ref().map(Memtable::size_bytes).unwrap_or(0);
        if sealed_bytes + inner.active.size_bytes() > 2 * self.config.memtable_max_bytes {
            return Err(LsmError::BackpressureExhausted);
        }

        for (ts, tuple) in tuples {
            if inner.active.is_full() {
                self.seal_and_flush_locked(&mut inner)?;
            }
            inner.active.put(ts, tuple)?;
        }
        self.counters.put_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn seal_and_flush_locked(&self, inner: &mut EngineInner) -> Result<(), LsmError> {
        if inner.sealed.is_some() {
            return Err(LsmError::Busy("flush already in progress".into()));
        }

        let next_seq = inner.next_wal_seq;
        inner.next_wal_seq += 1;
        let new_wal_path = self.data_dir.join(format!("wal-{next_seq:06}.log"));
        let new_active = Memtable::open(
            &new_wal_path,
            self.config.memtable_max_bytes,
            self.config.flush_threshold,
        )?;
        let sealed = std::mem::replace(&mut inner.active, new_active);
        inner.manifest.set_active_wal(next_seq)?;

        let tuples = sealed.iter_for_flush()?;
        let sequence = inner.manifest.allocate_sst_id()?;
        let file_name = SSTable::file_name(0, sequence);
        let path = self.data_dir.join(SSTABLE_DIR).join(&file_name);
        SstWriter::new(&path).build(tuples.into_iter(), 0, sequence)?;

        inner.manifest.add_sstable(ManifestSstEntry {
            level: 0,
            sequence,
            path: path.clone(),
        })?;
        let sst = Arc::new(SSTable::open(&path)?);
        inner.levels.entry(0).or_default().push(sst);

        let mut sealed = sealed;
        sealed.truncate_wal()?;
        let sealed_path = sealed.wal_path().to_path_buf();
        drop(sealed);
        let _ = fs::remove_file(sealed_path);

        info!(sequence, "flushed sealed memtable to L0");
        Ok(())
    }

    /// Forces the active memtable to flush regardless of its size.
    pub fn flush(&self) -> Result<(), LsmError> {
        let mut inner = self.lock_write()?;
        if inner.active.is_empty() {
            return Ok(());
        }
        self.seal_and_flush_locked(&mut inner)
    }

    /// Searches active -> sealed -> L0 (newest-sequence-first) -> L1..Ln.
    /// Returns the first match found for `ts`.
    pub fn get(&self, ts: i64) -> Result<Vec<Tuple>, LsmError> {
        self.counters.get_count.fetch_add(1, Ordering::Relaxed);
        let inner = self.lock_read()?;

        let active = inner.active.get(ts)?;
        if !active.is_empty() {
            self.counters.memtable_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(active);
        }
        if let Some(sealed) = &inner.sealed {
            let got = sealed.get(ts)?;
            if !got.is_empty() {
                self.counters.memtable_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(got);
            }
        }

        for (_level, ssts) in inner.levels.iter() {
            let mut newest_first: Vec<&Arc<SSTable>> = ssts.iter().collect();
            newest_first.sort_by_key(|s| std::cmp::Reverse(s.properties().sequence));
            for sst in newest_first {
                let got = sst.get(ts)?;
                if !got.is_empty() {
                    self.counters.sstable_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(got);
                }
                self.counters.bloom_rejections.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(Vec::new())
    }

    /// Merges results from every source; duplicate `(ts, tuple)` pairs are
    /// de-duplicated, output sorted by `ts`.
    pub fn range(&self, start: i64, end: i64) -> Result<Vec<Tuple>, LsmError> {
        if end < start {
            return Err(LsmError::InvalidArgument(
                "range end must not be less than start".into(),
            ));
        }
        self.counters.range_count.fetch_add(1, Ordering::Relaxed);
        let inner = self.lock_read()?;

        let mut out = inner.active.range(start, end)?;
        if let Some(sealed) = &inner.sealed {
            out.extend(sealed.range(start, end)?);
        }
        for ssts in inner.levels.values() {
            for sst in ssts {
                out.extend(sst.range(start, end)?);
            }
        }

        out.sort_by(|a, b| a.ts.cmp(&b.ts));
        out.dedup_by(|a, b| {
            a.ts == b.ts && a.value == b.value && a.tags == b.tags && a.fields == b.fields
        });
        Ok(out)
    }

    /// Wakes the compactor for one round. Logs and leaves the layout
    /// unchanged on failure; the next trigger retries.
    pub fn compact(&self) -> Result<bool, LsmError> {
        let snapshot = {
            let inner = self.lock_read()?;
            LeveledSstables {
                levels: inner.levels.clone(),
            }
        };

        let inner = self.lock_read()?;
        let data_dir = self.data_dir.join(SSTABLE_DIR);
        let result = LeveledCompaction.compact(
            &snapshot,
            &inner.manifest,
            data_dir.to_str().unwrap_or("."),
            &self.config.compaction,
        );
        drop(inner);

        match result {
            Ok(Some(result)) => {
                self.apply_compaction_result(result)?;
                self.counters
                    .compaction_count
                    .fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                warn!(error = %e, "compaction round failed; level layout unchanged");
                Ok(false)
            }
        }
    }

    fn apply_compaction_result(
        &self,
        result: crate::compaction::CompactionResult,
    ) -> Result<(), LsmError> {
        let mut inner = self.lock_write()?;
        for (level, sequence) in &result.removed {
            if let Some(v) = inner.levels.get_mut(level) {
                v.retain(|s| s.properties().sequence != *sequence);
            }
        }
        for produced in &result.produced {
            let sst = Arc::new(SSTable::open(&produced.path)?);
            inner.levels.entry(produced.level).or_default().push(sst);
        }
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        let inner = self.inner.read().ok();
        let total_bytes = inner
            .as_ref()
            .map(|i| {
                i.levels
                    .values()
                    .flatten()
                    .map(|s| s.file_size())
                    .sum::<u64>()
            })
            .unwrap_or(0);
        EngineStats {
            put_count: self.counters.put_count.load(Ordering::Relaxed),
            get_count: self.counters.get_count.load(Ordering::Relaxed),
            range_count: self.counters.range_count.load(Ordering::Relaxed),
            memtable_hits: self.counters.memtable_hits.load(Ordering::Relaxed),
            sstable_hits: self.counters.sstable_hits.load(Ordering::Relaxed),
            bloom_rejections: self.counters.bloom_rejections.load(Ordering::Relaxed),
            compaction_count: self.counters.compaction_count.load(Ordering::Relaxed),
            total_bytes,
        }
    }

    pub fn sstable_counts_per_level(&self) -> BTreeMap<u32, usize> {
        self.inner
            .read()
            .map(|inner| inner.levels.iter().map(|(l, v)| (*l, v.len())).collect())
            .unwrap_or_default()
    }
}
