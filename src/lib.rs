//! # confluencedb
//!
//! An embeddable storage engine specialized for windowed joins between two
//! time-ordered streams. Built on a **Log-Structured Merge Tree** (LSM-tree)
//! architecture, with a scheduler on top that materializes tumbling, sliding,
//! or session windows and dispatches each one's join computation through an
//! isolated resource pool.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        TimeSeriesEngine                        │
//! │  ┌──────────┐   ┌──────────────┐   ┌─────────────────────┐    │
//! │  │ Catalog  │   │ Scheduler(s) │   │ ComputeStateManager  │    │
//! │  │ (tables  │   │ (windows →   │   │ (checkpoints via     │    │
//! │  │  by name)│   │  join_fn)    │   │  reserved tables)     │    │
//! │  └────┬─────┘   └──────┬───────┘   └──────────┬───────────┘    │
//! │       │                │                      │                │
//! │       ▼                ▼                      ▼                │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │       StreamTable / JoinResultTable (LSM-backed)         │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                           │                                    │
//! │                           ▼                                    │
//! │          WAL + memtable + leveled SSTables + manifest          │
//! └────────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//!                     ResourceManager (thread/memory quotas per tenant)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`encoding`] | Binary and string serialization primitives shared by every on-disk format |
//! | [`tuple`] | The stored unit: timestamp, tagged value, queryable tags, opaque fields |
//! | [`bloom`] | Hand-rolled bloom filter over `i64` timestamps, used by SSTables |
//! | [`wal`] | Generic, CRC-protected write-ahead log for crash recovery |
//! | [`memtable`] | In-memory multi-valued write buffer, WAL-backed |
//! | [`sstable`] | Immutable, mmap-backed, on-disk table with bloom filter and sparse index |
//! | [`manifest`] | Persistent metadata log for SSTable/level membership |
//! | [`compaction`] | Leveled compaction strategy |
//! | [`lsm`] | Per-table LSM engine tying memtable, WAL, manifest, and SSTables together |
//! | [`stream_table`] | Typed tuple store over one LSM, with tag-hash secondary indexes |
//! | [`join_result_table`] | Typed store for join computation results |
//! | [`catalog`] | Named-table registry shared by one engine instance |
//! | [`resource_manager`] | Per-tenant thread/memory quotas and fair task dispatch |
//! | [`scheduler`] | Window materialization, triggering, and dispatch for a join |
//! | [`compute_state`] | Checkpointing for scheduler/operator state |
//! | [`engine_facade`] | [`TimeSeriesEngine`], the top-level entry point |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is durable before being
//!   acknowledged.
//! - **Leveled compaction** — SSTables are organized into levels with
//!   geometrically increasing size targets, bounding per-query file fan-out.
//! - **Tagged value union** — each tuple carries either a scalar or a float
//!   vector, chosen explicitly rather than left untyped.
//! - **Watermark-driven windowing** — tumbling, sliding, and session windows,
//!   triggered by time, count, or both, with late-data re-triggering.
//! - **Resource isolation** — scheduling work and plugin/compute work draw
//!   from separate quota pools so one cannot starve the other.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use confluencedb::engine_facade::{TableCreateKind, TimeSeriesEngine};
//! use confluencedb::lsm::EngineConfig;
//! use confluencedb::tuple::{Tuple, TimeRange, Value};
//!
//! let engine = TimeSeriesEngine::open("/tmp/confluence_db", EngineConfig::default(), 4).unwrap();
//! engine.create_table("events", TableCreateKind::Stream).unwrap();
//! engine.insert("events", Tuple::new(1_000, Value::Scalar(42.0))).unwrap();
//! let found = engine.query("events", TimeRange::new(0, 2_000), &[]).unwrap();
//! assert_eq!(found.len(), 1);
//! ```

#![allow(dead_code)]

pub mod bloom;
pub mod catalog;
pub mod compaction;
pub mod compute_state;
pub mod encoding;
pub mod engine_facade;
pub mod join_result_table;
pub mod lsm;
pub mod manifest;
pub mod memtable;
pub mod resource_manager;
pub mod scheduler;
pub mod sstable;
pub mod stream_table;
pub mod tuple;
pub mod wal;

pub use engine_facade::{EngineError, TableCreateKind, TimeSeriesEngine};
