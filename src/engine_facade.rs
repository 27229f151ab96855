//! # Top-level engine
//!
//! [`TimeSeriesEngine`] wires the catalog, resource manager, and
//! compute-state manager into one handle, and mints [`Scheduler`]s for
//! windowed joins between two named stream tables. There is no persistent
//! "default table" — every table is created and addressed by name.
//!
//! Acts as the single top-level entry point a process opens, the way a
//! storage engine's root handle typically does, generalized here to
//! catalog-mediated multi-table rather than one-LSM-per-process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::catalog::{Catalog, CatalogError, TableKind};
use crate::compute_state::{ComputeStateError, ComputeStateManager};
use crate::join_result_table::JoinResultTable;
use crate::lsm::EngineConfig;
use crate::resource_manager::{ResourceError, ResourceHandle, ResourceManager, ResourceRequest};
use crate::scheduler::{JoinFn, Scheduler, SchedulerConfig};
use crate::stream_table::{StreamTable, StreamTableError};
use crate::tuple::{Tags, TimeRange, Tuple};

const COMPUTE_STATE_TABLE: &str = "__compute_state";
const COMPUTE_CHECKPOINT_TABLE: &str = "__compute_checkpoint";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("table error: {0}")]
    Table(#[from] StreamTableError),

    #[error("compute state error: {0}")]
    ComputeState(#[from] ComputeStateError),

    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("quota denied for tenant '{0}'")]
    QuotaDenied(String),

    #[error("table '{0}' is not a stream table")]
    NotAStream(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableCreateKind {
    Stream,
    JoinResult,
}

/// Entry point tying together table storage, resource isolation, and
/// scheduled window joins for one data directory.
pub struct TimeSeriesEngine {
    catalog: Catalog,
    resources: Arc<ResourceManager>,
    compute_state: ComputeStateManager,
}

impl TimeSeriesEngine {
    pub fn open(data_dir: impl AsRef<Path>, config: EngineConfig, worker_count: usize) -> Result<Self, EngineError> {
        let data_dir: PathBuf = data_dir.as_ref().to_path_buf();
        let catalog = Catalog::new(&data_dir, config);

        let state_table = match catalog.create_compute_state_stream(COMPUTE_STATE_TABLE) {
            Ok(t) => t,
            Err(CatalogError::AlreadyExists(_)) => catalog.get_stream(COMPUTE_STATE_TABLE)?,
            Err(e) => return Err(e.into()),
        };
        let checkpoint_table = match catalog.create_compute_state_stream(COMPUTE_CHECKPOINT_TABLE) {
            Ok(t) => t,
            Err(CatalogError::AlreadyExists(_)) => catalog.get_stream(COMPUTE_CHECKPOINT_TABLE)?,
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            catalog,
            resources: Arc::new(ResourceManager::new(worker_count.max(1))),
            compute_state: ComputeStateManager::new(state_table, checkpoint_table),
        })
    }

    // ------------------------------------------------------------------
    // Catalog surface
    // ------------------------------------------------------------------

    pub fn create_table(&self, name: &str, kind: TableCreateKind) -> Result<(), EngineError> {
        match kind {
            TableCreateKind::Stream => {
                self.catalog.create_stream(name)?;
            }
            TableCreateKind::JoinResult => {
                self.catalog.create_result(name)?;
            }
        }
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> Result<(), EngineError> {
        Ok(self.catalog.drop_table(name)?)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.catalog.has_table(name)
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.catalog.list_tables().into_iter().filter(|n| n != COMPUTE_STATE_TABLE && n != COMPUTE_CHECKPOINT_TABLE).collect()
    }

    pub fn insert(&self, table: &str, tuple: Tuple) -> Result<u64, EngineError> {
        let stream = self.catalog.get_stream(table)?;
        Ok(stream.insert(tuple)?)
    }

    pub fn insert_batch(&self, table: &str, tuples: Vec<Tuple>) -> Result<Vec<u64>, EngineError> {
        let stream = self.catalog.get_stream(table)?;
        Ok(stream.insert_batch(tuples)?)
    }

    pub fn query(&self, table: &str, range: TimeRange, filter_tags: &[(String, String)]) -> Result<Vec<Tuple>, EngineError> {
        let stream = self.catalog.get_stream(table)?;
        Ok(stream.query(range, filter_tags)?)
    }

    fn resolve_stream(&self, name: &str) -> Result<Arc<StreamTable>, EngineError> {
        self.catalog.get_stream(name).map_err(|e| match e {
            CatalogError::WrongKind(n, _) => EngineError::NotAStream(n),
            other => other.into(),
        })
    }

    fn resolve_result(&self, name: &str) -> Result<Arc<JoinResultTable>, EngineError> {
        Ok(self.catalog.get_result(name)?)
    }

    // ------------------------------------------------------------------
    // Scheduler surface
    // ------------------------------------------------------------------

    /// Allocates a dedicated resource handle for the scheduler (tenant name
    /// is the result table's name) and builds a [`Scheduler`] over the two
    /// input tables and the result table, using `join_fn` to compute each
    /// window's join.
    pub fn create_scheduler(
        &self,
        config: SchedulerConfig,
        input_tables: [&str; 2],
        result_table: &str,
        join_fn: Arc<JoinFn>,
    ) -> Result<Arc<Scheduler>, EngineError> {
        let stream_s = self.resolve_stream(input_tables[0])?;
        let stream_r = self.resolve_stream(input_tables[1])?;
        let results = self.resolve_result(result_table)?;

        let handle = self
            .resources
            .allocate(result_table, ResourceRequest { threads: 2, memory_bytes: 64 * 1024 * 1024, priority: 0 })
            .ok_or_else(|| EngineError::QuotaDenied(result_table.to_string()))?;

        Ok(Scheduler::new(config, stream_s, stream_r, results, handle, join_fn))
    }

    // ------------------------------------------------------------------
    // Resource manager surface
    // ------------------------------------------------------------------

    pub fn set_global_resource_limits(&self, max_threads: u64, max_memory: u64) {
        self.resources.set_global_limits(max_threads, max_memory);
    }

    pub fn allocate_for_compute(&self, tenant: &str, request: ResourceRequest) -> Option<ResourceHandle> {
        self.resources.allocate_for_compute(tenant, request)
    }

    pub fn release_resources(&self, tenant: &str) -> Result<(), EngineError> {
        Ok(self.resources.release(tenant)?)
    }

    pub fn query_resource_usage(&self, tenant: &str) -> Option<crate::resource_manager::ResourceGrant> {
        self.resources.query_usage(tenant)
    }

    pub fn total_resource_usage(&self) -> crate::resource_manager::ResourceUsage {
        self.resources.get_total_usage()
    }

    pub fn is_under_pressure(&self) -> bool {
        self.resources.is_under_pressure()
    }

    pub fn throttle_compute(&self, tenant: &str, factor: f64) -> Result<(), EngineError> {
        Ok(self.resources.throttle_compute(tenant, factor)?)
    }

    // ------------------------------------------------------------------
    // Compute-state surface
    // ------------------------------------------------------------------

    pub fn save_state(&self, name: &str, state: &[u8]) -> Result<(), EngineError> {
        Ok(self.compute_state.save_state(name, state)?)
    }

    pub fn load_state(&self, name: &str) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.compute_state.load_state(name)?)
    }

    pub fn create_checkpoint(&self, name: &str, checkpoint_id: &str) -> Result<(), EngineError> {
        Ok(self.compute_state.create_checkpoint(name, checkpoint_id)?)
    }

    pub fn restore_checkpoint(&self, name: &str, checkpoint_id: &str) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.compute_state.restore_checkpoint(name, checkpoint_id)?)
    }

    pub fn list_checkpoints(&self, name: &str) -> Result<Vec<String>, EngineError> {
        Ok(self.compute_state.list_checkpoints(name)?)
    }

    pub fn delete_checkpoint(&self, name: &str, checkpoint_id: &str) -> Result<(), EngineError> {
        Ok(self.compute_state.delete_checkpoint(name, checkpoint_id)?)
    }
}
