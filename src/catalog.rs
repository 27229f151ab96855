//! # Catalog / TableManager
//!
//! Holds every named table for one engine instance: `StreamTable`s and
//! `JoinResultTable`s, looked up by name under one `RwLock`, so one process
//! can open many named tables instead of exactly one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::join_result_table::JoinResultTable;
use crate::lsm::EngineConfig;
use crate::stream_table::StreamTableError;
use crate::stream_table::StreamTable;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("table '{0}' already exists")]
    AlreadyExists(String),

    #[error("table '{0}' not found")]
    NotFound(String),

    #[error("table '{0}' exists but is not a {1} table")]
    WrongKind(String, &'static str),

    #[error("table error: {0}")]
    Table(#[from] StreamTableError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Stream,
    JoinResult,
    ComputeState,
}

impl TableKind {
    fn label(self) -> &'static str {
        match self {
            TableKind::Stream => "stream",
            TableKind::JoinResult => "join result",
            TableKind::ComputeState => "compute state",
        }
    }
}

enum TableHandle {
    Stream(Arc<StreamTable>),
    JoinResult(Arc<JoinResultTable>),
}

pub struct CatalogEntry {
    pub name: String,
    pub kind: TableKind,
    handle: TableHandle,
    pub created_ts: i64,
    pub access_count: AtomicU64,
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

pub struct Catalog {
    data_dir: PathBuf,
    config: EngineConfig,
    tables: RwLock<HashMap<String, Arc<CatalogEntry>>>,
}

impl Catalog {
    pub fn new(data_dir: impl AsRef<Path>, config: EngineConfig) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            config,
            tables: RwLock::new(HashMap::new()),
        }
    }

    fn table_dir(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    fn insert_entry(&self, name: &str, kind: TableKind, handle: TableHandle) -> Result<(), CatalogError> {
        let mut tables = self.tables.write().expect("catalog lock poisoned");
        if tables.contains_key(name) {
            return Err(CatalogError::AlreadyExists(name.to_string()));
        }
        tables.insert(
            name.to_string(),
            Arc::new(CatalogEntry {
                name: name.to_string(),
                kind,
                handle,
                created_ts: now_micros(),
                access_count: AtomicU64::new(0),
            }),
        );
        Ok(())
    }

    pub fn create_stream(&self, name: &str) -> Result<Arc<StreamTable>, CatalogError> {
        if self.has_table(name) {
            return Err(CatalogError::AlreadyExists(name.to_string()));
        }
        std::fs::create_dir_all(self.table_dir(name))?;
        let table = Arc::new(StreamTable::open(self.table_dir(name), self.config)?);
        self.insert_entry(name, TableKind::Stream, TableHandle::Stream(table.clone()))?;
        Ok(table)
    }

    pub fn create_result(&self, name: &str) -> Result<Arc<JoinResultTable>, CatalogError> {
        if self.has_table(name) {
            return Err(CatalogError::AlreadyExists(name.to_string()));
        }
        std::fs::create_dir_all(self.table_dir(name))?;
        let table = Arc::new(JoinResultTable::open(self.table_dir(name), self.config)?);
        self.insert_entry(name, TableKind::JoinResult, TableHandle::JoinResult(table.clone()))?;
        Ok(table)
    }

    /// Same as [`Self::create_stream`] but tagged `ComputeState` in the
    /// catalog; used by the compute-state manager's reserved tables.
    pub fn create_compute_state_stream(&self, name: &str) -> Result<Arc<StreamTable>, CatalogError> {
        if self.has_table(name) {
            return Err(CatalogError::AlreadyExists(name.to_string()));
        }
        std::fs::create_dir_all(self.table_dir(name))?;
        let table = Arc::new(StreamTable::open(self.table_dir(name), self.config)?);
        self.insert_entry(name, TableKind::ComputeState, TableHandle::Stream(table.clone()))?;
        Ok(table)
    }

    fn get_entry(&self, name: &str) -> Option<Arc<CatalogEntry>> {
        let tables = self.tables.read().expect("catalog lock poisoned");
        let entry = tables.get(name)?.clone();
        entry.access_count.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }

    pub fn get_stream(&self, name: &str) -> Result<Arc<StreamTable>, CatalogError> {
        let entry = self.get_entry(name).ok_or_else(|| CatalogError::NotFound(name.to_string()))?;
        match &entry.handle {
            TableHandle::Stream(t) => Ok(t.clone()),
            _ => Err(CatalogError::WrongKind(name.to_string(), TableKind::Stream.label())),
        }
    }

    pub fn get_result(&self, name: &str) -> Result<Arc<JoinResultTable>, CatalogError> {
        let entry = self.get_entry(name).ok_or_else(|| CatalogError::NotFound(name.to_string()))?;
        match &entry.handle {
            TableHandle::JoinResult(t) => Ok(t.clone()),
            _ => Err(CatalogError::WrongKind(name.to_string(), TableKind::JoinResult.label())),
        }
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.read().expect("catalog lock poisoned").contains_key(name)
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.tables.read().expect("catalog lock poisoned").keys().cloned().collect()
    }

    /// Releases the catalog's handle; the underlying table's resources are
    /// reclaimed once the last `Arc` clone held by a caller is dropped.
    pub fn drop_table(&self, name: &str) -> Result<(), CatalogError> {
        let mut tables = self.tables.write().expect("catalog lock poisoned");
        tables
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }

    pub fn drop_all(&self) {
        self.tables.write().expect("catalog lock poisoned").clear();
    }

    /// Creates the standard PECJ (predicate-evaluation / commutative-join)
    /// table triple: two input streams plus one join-result table.
    pub fn create_pecj_tables(&self, prefix: &str) -> Result<(), CatalogError> {
        self.create_stream(&format!("{prefix}stream_s"))?;
        self.create_stream(&format!("{prefix}stream_r"))?;
        self.create_result(&format!("{prefix}join_results"))?;
        Ok(())
    }
}

static GLOBAL: OnceLock<Catalog> = OnceLock::new();

/// Initializes the process-wide catalog singleton. A no-op (returning the
/// already-initialized instance) if called more than once.
pub fn global_init(data_dir: impl AsRef<Path>, config: EngineConfig) -> &'static Catalog {
    GLOBAL.get_or_init(|| Catalog::new(data_dir, config))
}

/// Returns the global catalog, if [`global_init`] has been called.
pub fn global() -> Option<&'static Catalog> {
    GLOBAL.get()
}
