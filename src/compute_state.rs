//! # Compute-state manager
//!
//! Persists scheduler/operator state through two reserved `StreamTable`s,
//! `__compute_state` and `__compute_checkpoint`, so a process can resume
//! scheduling after a restart. `load_state` and `restore_checkpoint` both
//! resolve concurrent saves by picking the highest `ts` record, never an
//! unordered first match.
//!
//! Grounded on [`JoinResultTable`](crate::join_result_table)'s
//! tags/fields-encoding approach, applied to an arbitrary serialized state
//! blob instead of a `JoinRecord`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::encoding::{from_hex, to_hex};
use crate::stream_table::{StreamTable, StreamTableError};
use crate::tuple::{Tags, TimeRange, Tuple, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ComputeStateError {
    #[error("table error: {0}")]
    Table(#[from] StreamTableError),
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

const TOMBSTONE_FIELD: &str = "tombstone";
const STATE_HEX_FIELD: &str = "state_hex";
const COMPUTE_NAME_TAG: &str = "compute_name";
const CHECKPOINT_ID_TAG: &str = "checkpoint_id";

fn is_tombstone(tuple: &Tuple) -> bool {
    tuple.fields.get(TOMBSTONE_FIELD) == Some("true")
}

fn latest(tuples: Vec<Tuple>) -> Option<Tuple> {
    tuples.into_iter().max_by_key(|t| t.ts)
}

pub struct ComputeStateManager {
    state_table: Arc<StreamTable>,
    checkpoint_table: Arc<StreamTable>,
}

impl ComputeStateManager {
    pub fn new(state_table: Arc<StreamTable>, checkpoint_table: Arc<StreamTable>) -> Self {
        Self { state_table, checkpoint_table }
    }

    pub fn save_state(&self, name: &str, state: &[u8]) -> Result<(), ComputeStateError> {
        let mut tags = Tags::new();
        tags.insert(COMPUTE_NAME_TAG, name);
        let mut fields = Tags::new();
        fields.insert(STATE_HEX_FIELD, to_hex(state));
        fields.insert(TOMBSTONE_FIELD, "false");

        let tuple = Tuple::new(now_micros(), Value::Scalar(state.len() as f64))
            .with_tags(tags)
            .with_fields(fields);
        self.state_table.insert(tuple)?;
        Ok(())
    }

    /// Returns the highest-timestamp record for `name`, or `None` if absent
    /// or the latest write was a deletion tombstone.
    pub fn load_state(&self, name: &str) -> Result<Option<Vec<u8>>, ComputeStateError> {
        let tuples = self.state_table.query(
            TimeRange::new(i64::MIN, i64::MAX),
            &[(COMPUTE_NAME_TAG.to_string(), name.to_string())],
        )?;
        Ok(latest(tuples).filter(|t| !is_tombstone(t)).and_then(|t| t.fields.get(STATE_HEX_FIELD).map(from_hex)))
    }

    /// Copies the current state tuple for `name` into the checkpoint table,
    /// tagged with `checkpoint_id`. Errors are surfaced only for storage
    /// failures; a missing current state simply writes nothing.
    pub fn create_checkpoint(&self, name: &str, checkpoint_id: &str) -> Result<(), ComputeStateError> {
        let Some(state) = self.load_state(name)? else {
            return Ok(());
        };
        let mut tags = Tags::new();
        tags.insert(COMPUTE_NAME_TAG, name);
        tags.insert(CHECKPOINT_ID_TAG, checkpoint_id);
        let mut fields = Tags::new();
        fields.insert(STATE_HEX_FIELD, to_hex(&state));
        fields.insert(TOMBSTONE_FIELD, "false");

        let tuple = Tuple::new(now_micros(), Value::Scalar(state.len() as f64))
            .with_tags(tags)
            .with_fields(fields);
        self.checkpoint_table.insert(tuple)?;
        Ok(())
    }

    pub fn restore_checkpoint(&self, name: &str, checkpoint_id: &str) -> Result<Option<Vec<u8>>, ComputeStateError> {
        let tuples = self.checkpoint_table.query(
            TimeRange::new(i64::MIN, i64::MAX),
            &[
                (COMPUTE_NAME_TAG.to_string(), name.to_string()),
                (CHECKPOINT_ID_TAG.to_string(), checkpoint_id.to_string()),
            ],
        )?;
        Ok(latest(tuples).filter(|t| !is_tombstone(t)).and_then(|t| t.fields.get(STATE_HEX_FIELD).map(from_hex)))
    }

    pub fn list_checkpoints(&self, name: &str) -> Result<Vec<String>, ComputeStateError> {
        let tuples = self.checkpoint_table.query(
            TimeRange::new(i64::MIN, i64::MAX),
            &[(COMPUTE_NAME_TAG.to_string(), name.to_string())],
        )?;
        let mut by_id: std::collections::HashMap<String, Tuple> = std::collections::HashMap::new();
        for tuple in tuples {
            let Some(id) = tuple.tags.get(CHECKPOINT_ID_TAG).map(str::to_string) else {
                continue;
            };
            match by_id.get(&id) {
                Some(existing) if existing.ts >= tuple.ts => {}
                _ => {
                    by_id.insert(id, tuple);
                }
            }
        }
        let mut ids: Vec<String> = by_id.into_iter().filter(|(_, t)| !is_tombstone(t)).map(|(id, _)| id).collect();
        ids.sort();
        Ok(ids)
    }

    /// Writes a tombstone tuple; storage space is reclaimed by ordinary
    /// compaction, not eagerly.
    pub fn delete_checkpoint(&self, name: &str, checkpoint_id: &str) -> Result<(), ComputeStateError> {
        let mut tags = Tags::new();
        tags.insert(COMPUTE_NAME_TAG, name);
        tags.insert(CHECKPOINT_ID_TAG, checkpoint_id);
        let mut fields = Tags::new();
        fields.insert(TOMBSTONE_FIELD, "true");

        let tuple = Tuple::new(now_micros(), Value::Scalar(0.0)).with_tags(tags).with_fields(fields);
        self.checkpoint_table.insert(tuple)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsm::EngineConfig;
    use tempfile::tempdir;

    fn manager() -> ComputeStateManager {
        let dir = tempdir().unwrap();
        let state = Arc::new(StreamTable::open(dir.path().join("state"), EngineConfig::default()).unwrap());
        let checkpoint = Arc::new(StreamTable::open(dir.path().join("checkpoint"), EngineConfig::default()).unwrap());
        std::mem::forget(dir);
        ComputeStateManager::new(state, checkpoint)
    }

    #[test]
    fn save_then_load_round_trips_latest_write() {
        let mgr = manager();
        mgr.save_state("scheduler-a", b"v1").unwrap();
        mgr.save_state("scheduler-a", b"v2").unwrap();
        assert_eq!(mgr.load_state("scheduler-a").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn load_state_for_unknown_name_is_none() {
        let mgr = manager();
        assert_eq!(mgr.load_state("missing").unwrap(), None);
    }

    #[test]
    fn checkpoint_round_trips_current_state() {
        let mgr = manager();
        mgr.save_state("scheduler-a", b"checkpoint-me").unwrap();
        mgr.create_checkpoint("scheduler-a", "cp1").unwrap();
        assert_eq!(mgr.restore_checkpoint("scheduler-a", "cp1").unwrap(), Some(b"checkpoint-me".to_vec()));
    }

    #[test]
    fn list_checkpoints_excludes_deleted() {
        let mgr = manager();
        mgr.save_state("scheduler-a", b"v1").unwrap();
        mgr.create_checkpoint("scheduler-a", "cp1").unwrap();
        mgr.create_checkpoint("scheduler-a", "cp2").unwrap();
        mgr.delete_checkpoint("scheduler-a", "cp1").unwrap();

        let ids = mgr.list_checkpoints("scheduler-a").unwrap();
        assert_eq!(ids, vec!["cp2".to_string()]);
    }

    #[test]
    fn restore_after_delete_returns_none() {
        let mgr = manager();
        mgr.save_state("scheduler-a", b"v1").unwrap();
        mgr.create_checkpoint("scheduler-a", "cp1").unwrap();
        mgr.delete_checkpoint("scheduler-a", "cp1").unwrap();
        assert_eq!(mgr.restore_checkpoint("scheduler-a", "cp1").unwrap(), None);
    }
}
