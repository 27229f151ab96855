//! # JoinResultTable
//!
//! Thin typed façade over a [`StreamTable`] storing join results. Each
//! [`JoinRecord`] is packed into one [`Tuple`]: `join_count` as the tuple's
//! scalar value, everything else as string key/value pairs in `tags`
//! (`window_id`, queryable) and `fields` (opaque). The payload byte blob has
//! no home in the `Scalar | Vector<f64>` value union, so it travels hex-coded
//! inside `fields` alongside the rest of the record.
//!
//! Grounded on `StreamTable`'s facade pattern; the field-packing approach is
//! grounded on `sstable`'s fixed-layout header encode/decode pairing, applied
//! here to a flat string map instead of a binary struct.

use crate::encoding::{from_hex, to_hex};
use crate::lsm::EngineConfig;
use crate::stream_table::{StreamTable, StreamTableError};
use crate::tuple::{Tags, TimeRange, Tuple, Value};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct JoinMetrics {
    pub computation_ms: f64,
    pub memory_bytes: u64,
    pub threads: u32,
    pub cpu_pct: f64,
    pub used_aqp: bool,
    pub algorithm_tag: String,
}

#[derive(Debug, Clone)]
pub struct JoinRecord {
    pub window_id: u64,
    pub ts: i64,
    pub join_count: u64,
    pub aqp_estimate: f64,
    pub selectivity: f64,
    pub payload: Vec<u8>,
    pub metrics: JoinMetrics,
    pub tags: Tags,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct JoinResultAggregate {
    pub total_windows: u64,
    pub total_joins: u64,
    pub avg_join_count: f64,
    pub avg_computation_ms: f64,
    pub avg_selectivity: f64,
    pub aqp_usage_count: u64,
    pub error_count: u64,
}

impl JoinRecord {
    fn into_tuple(self) -> Tuple {
        let mut tags = self.tags;
        tags.insert("window_id", self.window_id.to_string());

        let mut fields = Tags::new();
        fields.insert("window_id", self.window_id.to_string());
        fields.insert("join_count", self.join_count.to_string());
        fields.insert("aqp_estimate", self.aqp_estimate.to_string());
        fields.insert("selectivity", self.selectivity.to_string());
        fields.insert("payload_hex", to_hex(&self.payload));
        fields.insert("computation_ms", self.metrics.computation_ms.to_string());
        fields.insert("memory_bytes", self.metrics.memory_bytes.to_string());
        fields.insert("threads", self.metrics.threads.to_string());
        fields.insert("cpu_pct", self.metrics.cpu_pct.to_string());
        fields.insert("used_aqp", self.metrics.used_aqp.to_string());
        fields.insert("algorithm_tag", self.metrics.algorithm_tag.clone());
        if let Some(msg) = &self.error_message {
            fields.insert("error_message", msg.clone());
        }

        Tuple::new(self.ts, Value::Scalar(self.join_count as f64))
            .with_tags(tags)
            .with_fields(fields)
    }

    fn from_tuple(tuple: &Tuple) -> Option<JoinRecord> {
        let f = &tuple.fields;
        let window_id: u64 = f.get("window_id")?.parse().ok()?;
        let join_count: u64 = f.get("join_count")?.parse().ok()?;
        let aqp_estimate: f64 = f.get("aqp_estimate")?.parse().ok()?;
        let selectivity: f64 = f.get("selectivity")?.parse().ok()?;
        let payload = f.get("payload_hex").map(from_hex).unwrap_or_default();
        let metrics = JoinMetrics {
            computation_ms: f.get("computation_ms")?.parse().ok()?,
            memory_bytes: f.get("memory_bytes")?.parse().ok()?,
            threads: f.get("threads")?.parse().ok()?,
            cpu_pct: f.get("cpu_pct")?.parse().ok()?,
            used_aqp: f.get("used_aqp")?.parse().ok()?,
            algorithm_tag: f.get("algorithm_tag").unwrap_or("").to_string(),
        };

        Some(JoinRecord {
            window_id,
            ts: tuple.ts,
            join_count,
            aqp_estimate,
            selectivity,
            payload,
            metrics,
            tags: tuple.tags.clone(),
            error_message: f.get("error_message").map(str::to_string),
        })
    }
}

pub struct JoinResultTable {
    inner: StreamTable,
}

impl JoinResultTable {
    pub fn open(data_dir: impl AsRef<Path>, config: EngineConfig) -> Result<Self, StreamTableError> {
        Ok(Self {
            inner: StreamTable::open(data_dir, config)?,
        })
    }

    pub fn insert(&self, record: JoinRecord) -> Result<(), StreamTableError> {
        self.inner.insert(record.into_tuple())?;
        Ok(())
    }

    pub fn query_by_window(&self, window_id: u64) -> Result<Vec<JoinRecord>, StreamTableError> {
        let tuples = self.inner.query(
            TimeRange::new(i64::MIN, i64::MAX),
            &[("window_id".to_string(), window_id.to_string())],
        )?;
        Ok(tuples.iter().filter_map(JoinRecord::from_tuple).collect())
    }

    /// Computes summary statistics over every join result whose `ts` falls
    /// in `range`, in a single pass.
    pub fn aggregate(&self, range: TimeRange) -> Result<JoinResultAggregate, StreamTableError> {
        let tuples = self.inner.query(range, &[])?;
        let mut agg = JoinResultAggregate::default();
        let mut window_ids = std::collections::HashSet::new();
        let mut sum_join_count = 0u64;
        let mut sum_computation_ms = 0.0;
        let mut sum_selectivity = 0.0;
        let mut n = 0u64;

        for tuple in &tuples {
            let Some(record) = JoinRecord::from_tuple(tuple) else {
                continue;
            };
            window_ids.insert(record.window_id);
            sum_join_count += record.join_count;
            sum_computation_ms += record.metrics.computation_ms;
            sum_selectivity += record.selectivity;
            if record.metrics.used_aqp {
                agg.aqp_usage_count += 1;
            }
            if record.error_message.is_some() {
                agg.error_count += 1;
            }
            n += 1;
        }

        agg.total_windows = window_ids.len() as u64;
        agg.total_joins = sum_join_count;
        if n > 0 {
            agg.avg_join_count = sum_join_count as f64 / n as f64;
            agg.avg_computation_ms = sum_computation_ms / n as f64;
            agg.avg_selectivity = sum_selectivity / n as f64;
        }
        Ok(agg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(window_id: u64, ts: i64, used_aqp: bool, error: Option<&str>) -> JoinRecord {
        JoinRecord {
            window_id,
            ts,
            join_count: 3,
            aqp_estimate: 0.42,
            selectivity: 0.1,
            payload: vec![0xde, 0xad, 0xbe, 0xef],
            metrics: JoinMetrics {
                computation_ms: 12.5,
                memory_bytes: 4096,
                threads: 2,
                cpu_pct: 50.0,
                used_aqp,
                algorithm_tag: "hash-join".to_string(),
            },
            tags: Tags::new(),
            error_message: error.map(str::to_string),
        }
    }

    #[test]
    fn insert_then_query_by_window_round_trips_record() {
        let dir = tempdir().unwrap();
        let table = JoinResultTable::open(dir.path(), EngineConfig::default()).unwrap();
        table.insert(sample(7, 1000, true, None)).unwrap();

        let found = table.query_by_window(7).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].join_count, 3);
        assert_eq!(found[0].payload, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(found[0].metrics.algorithm_tag, "hash-join");
    }

    #[test]
    fn query_by_window_excludes_other_windows() {
        let dir = tempdir().unwrap();
        let table = JoinResultTable::open(dir.path(), EngineConfig::default()).unwrap();
        table.insert(sample(1, 1000, false, None)).unwrap();
        table.insert(sample(2, 2000, false, None)).unwrap();

        assert_eq!(table.query_by_window(1).unwrap().len(), 1);
        assert_eq!(table.query_by_window(2).unwrap().len(), 1);
    }

    #[test]
    fn aggregate_computes_averages_and_counts() {
        let dir = tempdir().unwrap();
        let table = JoinResultTable::open(dir.path(), EngineConfig::default()).unwrap();
        table.insert(sample(1, 1000, true, None)).unwrap();
        table.insert(sample(2, 2000, false, Some("timeout"))).unwrap();

        let agg = table.aggregate(TimeRange::new(0, 10_000)).unwrap();
        assert_eq!(agg.total_windows, 2);
        assert_eq!(agg.total_joins, 6);
        assert_eq!(agg.aqp_usage_count, 1);
        assert_eq!(agg.error_count, 1);
        assert!((agg.avg_join_count - 3.0).abs() < 1e-9);
    }
}
