//! # StreamTable
//!
//! Wraps one [`Lsm`] with tag-hash indexes maintained on every insert, so
//! queries can intersect by tag value before touching storage. Indexes are
//! rebuilt from a full LSM scan on recovery rather than persisted — they
//! are a derived, in-memory-only structure.
//!
//! A facade-over-engine pattern: the index lives alongside the LSM it
//! wraps rather than inside it, the same way `Lsm` itself is a thin
//! wrapper over its inner state.

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::RwLock;

use crate::lsm::{EngineConfig, Lsm, LsmError};
use crate::tuple::{TimeRange, Tuple};
use thiserror::Error;
use tracing::debug;

pub type LocalId = u64;

#[derive(Debug, Error)]
pub enum StreamTableError {
    #[error("LSM error: {0}")]
    Lsm(#[from] LsmError),

    #[error("internal error: {0}")]
    Internal(String),
}

struct TagIndexes {
    /// `tag_name -> tag_value -> local ids`.
    indexes: HashMap<String, HashMap<String, Vec<LocalId>>>,
    /// Backs the index-only candidate ids with the tuple they name, so a
    /// query can fetch matches without a second LSM scan.
    by_id: HashMap<LocalId, Tuple>,
    next_id: LocalId,
}

impl TagIndexes {
    fn new() -> Self {
        Self {
            indexes: HashMap::new(),
            by_id: HashMap::new(),
            next_id: 0,
        }
    }

    fn record(&mut self, id: LocalId, tuple: &Tuple) {
        for (k, v) in tuple.tags.iter() {
            self.indexes
                .entry(k.to_string())
                .or_default()
                .entry(v.to_string())
                .or_default()
                .push(id);
        }
        self.by_id.insert(id, tuple.clone());
    }

    /// Ids whose indexed `(key, value)` pair matches, or an empty set if
    /// the value was never recorded under that key.
    fn candidates(&self, key: &str, value: &str) -> HashSet<LocalId> {
        self.indexes
            .get(key)
            .and_then(|by_value| by_value.get(value))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }
}

pub struct StreamTable {
    lsm: Lsm,
    tags: RwLock<TagIndexes>,
}

impl StreamTable {
    pub fn open(data_dir: impl AsRef<Path>, config: EngineConfig) -> Result<Self, StreamTableError> {
        let lsm = Lsm::open(data_dir, config)?;
        let mut tags = TagIndexes::new();

        // Rebuild indexes by streaming every tuple currently in the LSM.
        // `LocalId` is assigned by timestamp order during this rebuild, so
        // re-running it deterministically reproduces the same ids.
        for tuple in lsm.range(i64::MIN, i64::MAX)? {
            let id = tags.next_id;
            tags.next_id += 1;
            tags.record(id, &tuple);
        }

        debug!(rebuilt_ids = tags.next_id, "tag indexes rebuilt from LSM scan");
        Ok(Self {
            lsm,
            tags: RwLock::new(tags),
        })
    }

    pub fn insert(&self, tuple: Tuple) -> Result<LocalId, StreamTableError> {
        let ts = tuple.ts;
        self.lsm.put(ts, tuple.clone())?;
        let mut tags = self
            .tags
            .write()
            .map_err(|_| StreamTableError::Internal("poisoned lock".into()))?;
        let id = tags.next_id;
        tags.next_id += 1;
        tags.record(id, &tuple);
        Ok(id)
    }

    pub fn insert_batch(&self, tuples: Vec<Tuple>) -> Result<Vec<LocalId>, StreamTableError> {
        let mut ids = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            ids.push(self.insert(tuple)?);
        }
        Ok(ids)
    }

    /// With no filter tags, this is a plain LSM range scan. Otherwise each
    /// filter tag's candidate ids are looked up in the tag index and
    /// intersected before any tuple is fetched, so a filtered query never
    /// re-scans tuples that can't match.
    pub fn query(
        &self,
        range: TimeRange,
        filter_tags: &[(String, String)],
    ) -> Result<Vec<Tuple>, StreamTableError> {
        if range.end < range.start {
            return Err(StreamTableError::Internal(
                "range end must not be less than start".into(),
            ));
        }

        if filter_tags.is_empty() {
            return Ok(self.lsm.range(range.start, range.end)?);
        }

        let tags = self
            .tags
            .read()
            .map_err(|_| StreamTableError::Internal("poisoned lock".into()))?;

        let mut candidates: Option<HashSet<LocalId>> = None;
        for (k, v) in filter_tags {
            let matches = tags.candidates(k, v);
            candidates = Some(match candidates {
                Some(existing) => existing.intersection(&matches).copied().collect(),
                None => matches,
            });
            if candidates.as_ref().is_some_and(HashSet::is_empty) {
                return Ok(Vec::new());
            }
        }

        let mut out: Vec<Tuple> = candidates
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| tags.by_id.get(&id))
            .filter(|t| range.contains(t.ts))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.ts);
        Ok(out)
    }

    pub fn count(&self, range: TimeRange) -> Result<usize, StreamTableError> {
        Ok(self.lsm.range(range.start, range.end)?.len())
    }

    /// Returns the `n` highest-`ts` tuples.
    pub fn query_latest(&self, n: usize) -> Result<Vec<Tuple>, StreamTableError> {
        let mut all = self.lsm.range(i64::MIN, i64::MAX)?;
        all.sort_by(|a, b| b.ts.cmp(&a.ts));
        all.truncate(n);
        Ok(all)
    }

    pub fn stats(&self) -> crate::lsm::EngineStats {
        self.lsm.stats()
    }
}
