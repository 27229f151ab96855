//! # MemTable
//!
//! The mutable, in-memory write buffer of one LSM engine epoch: an ordered
//! map from `ts` to `Vec<Tuple>` (multi-valued — streams have no
//! uniqueness constraint and never delete). Writes are WAL-first: the
//! caller's tuple is durably appended before it becomes visible in memory.
//!
//! Unlike a general key-value memtable, there is no MVCC/tombstone
//! machinery here — the domain is append-only, so the only concern is
//! preserving insertion order among tuples that share a timestamp.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use crate::tuple::{Tuple, Value};
use crate::wal::{TupleRecord, Wal, WalError};
use thiserror::Error;
use tracing::{info, trace, warn};

#[derive(Debug, Error)]
pub enum MemtableError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    #[error("flush required before further writes")]
    FlushRequired,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Rough per-tuple overhead (timestamp + value tag + map lengths) added on
/// top of the encoded payload when estimating memtable size.
const TUPLE_OVERHEAD_BYTES: usize = 24;

struct MemtableInner {
    map: BTreeMap<i64, Vec<Tuple>>,
    byte_estimate: usize,
}

impl MemtableInner {
    fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            byte_estimate: 0,
        }
    }

    fn estimate(tuple: &Tuple) -> usize {
        let value_bytes = match &tuple.value {
            Value::Scalar(_) => 8,
            Value::Vector(v) => v.len() * 8,
        };
        let tag_bytes: usize = tuple
            .tags
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum::<usize>()
            + tuple
                .fields
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>();
        TUPLE_OVERHEAD_BYTES + value_bytes + tag_bytes
    }

    fn put(&mut self, ts: i64, tuple: Tuple) {
        self.byte_estimate += Self::estimate(&tuple);
        self.map.entry(ts).or_default().push(tuple);
    }

    fn get(&self, ts: i64) -> Vec<Tuple> {
        self.map.get(&ts).cloned().unwrap_or_default()
    }

    fn range(&self, start: i64, end: i64) -> Vec<Tuple> {
        self.map
            .range(start..end)
            .flat_map(|(_, tuples)| tuples.iter().cloned())
            .collect()
    }

    fn len(&self) -> usize {
        self.map.values().map(Vec::len).sum()
    }
}

/// The active write buffer for one LSM engine. Every `put` is WAL-first:
/// if the WAL append fails, the in-memory map is left untouched.
pub struct Memtable {
    inner: RwLock<MemtableInner>,
    wal: Wal<TupleRecord>,
    max_bytes: usize,
    flush_threshold: f64,
}

impl Memtable {
    pub fn open<P: AsRef<Path>>(
        wal_path: P,
        max_bytes: usize,
        flush_threshold: f64,
    ) -> Result<Self, MemtableError> {
        let wal = Wal::open(wal_path, None)?;
        Ok(Self {
            inner: RwLock::new(MemtableInner::new()),
            wal,
            max_bytes,
            flush_threshold,
        })
    }

    /// Replays this memtable's WAL into a fresh in-memory map — used during
    /// `Lsm::recover` to reconstruct the active memtable after a restart.
    pub fn recover<P: AsRef<Path>>(
        wal_path: P,
        max_bytes: usize,
        flush_threshold: f64,
    ) -> Result<Self, MemtableError> {
        let memtable = Self::open(wal_path, max_bytes, flush_threshold)?;
        let mut inner = memtable
            .inner
            .write()
            .map_err(|_| MemtableError::Internal("poisoned lock".into()))?;

        let mut recovered = 0usize;
        for item in memtable.wal.replay_iter()? {
            match item {
                Ok(record) => {
                    inner.put(record.ts, record.tuple);
                    recovered += 1;
                }
                Err(e) => {
                    warn!("memtable WAL replay stopped due to WAL error: {e}");
                    break;
                }
            }
        }
        drop(inner);
        info!(recovered, "memtable recovered from WAL");
        Ok(memtable)
    }

    /// Appends to the WAL, then inserts into the in-memory map. Returns
    /// only after the WAL fsync completes: a write-ahead-log-first
    /// discipline, so a crash between the two steps never loses data.
    pub fn put(&self, ts: i64, tuple: Tuple) -> Result<(), MemtableError> {
        if self.is_full() {
            return Err(MemtableError::FlushRequired);
        }
        self.wal.append(&TupleRecord {
            ts,
            tuple: tuple.clone(),
        })?;
        let mut inner = self
            .inner
            .write()
            .map_err(|_| MemtableError::Internal("poisoned lock".into()))?;
        inner.put(ts, tuple);
        trace!(ts, "memtable put");
        Ok(())
    }

    pub fn get(&self, ts: i64) -> Result<Vec<Tuple>, MemtableError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| MemtableError::Internal("poisoned lock".into()))?;
        Ok(inner.get(ts))
    }

    pub fn range(&self, start: i64, end: i64) -> Result<Vec<Tuple>, MemtableError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| MemtableError::Internal("poisoned lock".into()))?;
        Ok(inner.range(start, end))
    }

    pub fn size_bytes(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.byte_estimate)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.size_bytes() >= (self.max_bytes as f64 * self.flush_threshold) as usize
    }

    /// A full, timestamp-ordered snapshot of the memtable's contents, for
    /// building an SSTable on flush. Does not mutate or clear state.
    pub fn iter_for_flush(&self) -> Result<Vec<Tuple>, MemtableError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| MemtableError::Internal("poisoned lock".into()))?;
        Ok(inner
            .map
            .values()
            .flat_map(|tuples| tuples.iter().cloned())
            .collect())
    }

    pub fn truncate_wal(&mut self) -> Result<(), MemtableError> {
        self.wal.truncate()?;
        Ok(())
    }

    pub fn wal_path(&self) -> &Path {
        self.wal.path()
    }
}
