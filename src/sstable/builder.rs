//! SSTable construction: from a single memtable's sorted snapshot, and from
//! an n-way merge of existing SSTables during compaction.
//!
//! Publish is atomic: the file is written to a `.tmp` path, fsynced,
//! renamed into place, and the parent directory is fsynced, so a crash
//! mid-write never leaves a partially-visible SSTable.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{IndexEntry, SSTableError, SSTableHeader, TARGET_BLOCK_SIZE, encode_index};
use crate::bloom::BloomFilter;
use crate::encoding::{self, Encode};
use crate::tuple::Tuple;

pub struct SstWriter {
    path: PathBuf,
}

impl SstWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Builds an SSTable from an already-sorted (by `ts`) iterator of
    /// tuples. Used both for a single memtable flush and for the merged
    /// output of a compaction round.
    pub fn build(
        &self,
        tuples: impl Iterator<Item = Tuple>,
        level: u64,
        sequence: u64,
    ) -> Result<(), SSTableError> {
        let mut data = Vec::new();
        let mut index = Vec::new();
        let mut bloom_keys = Vec::new();

        let mut min_ts = i64::MAX;
        let mut max_ts = i64::MIN;
        let mut num_entries: u64 = 0;

        let mut block = Vec::new();
        let mut block_first_ts: Option<i64> = None;

        for tuple in tuples {
            min_ts = min_ts.min(tuple.ts);
            max_ts = max_ts.max(tuple.ts);
            num_entries += 1;
            bloom_keys.push(tuple.ts);

            if block_first_ts.is_none() {
                block_first_ts = Some(tuple.ts);
            }

            let encoded = encoding::encode_to_vec(&tuple)?;
            (encoded.len() as u32).encode_to(&mut block)?;
            block.extend_from_slice(&encoded);

            if block.len() >= TARGET_BLOCK_SIZE {
                Self::flush_block(&mut data, &mut index, &mut block, &mut block_first_ts)?;
            }
        }
        if !block.is_empty() {
            Self::flush_block(&mut data, &mut index, &mut block, &mut block_first_ts)?;
        }

        if num_entries == 0 {
            min_ts = 0;
            max_ts = 0;
        }

        let mut bloom = BloomFilter::with_capacity(num_entries.max(1), 10);
        for k in &bloom_keys {
            bloom.insert(*k);
        }
        let bloom_bytes = encoding::encode_to_vec(&bloom)?;

        let header_size = SSTableHeader::ENCODED_SIZE as u64;
        let bloom_off = header_size;
        let index_off = bloom_off + bloom_bytes.len() as u64;
        let index_bytes = encode_index(&index)?;
        let data_off = index_off + index_bytes.len() as u64;

        // Index entries were recorded relative to the start of the data
        // section; now that we know where that section begins, rebase them.
        let index_bytes = {
            let rebased: Vec<IndexEntry> = index
                .iter()
                .map(|e| IndexEntry {
                    ts: e.ts,
                    data_off_abs: e.data_off_abs + data_off,
                    block_size: e.block_size,
                })
                .collect();
            encode_index(&rebased)?
        };

        let header = SSTableHeader {
            magic: super::SST_MAGIC,
            version: super::SST_VERSION,
            level,
            sequence,
            num_entries,
            min_ts,
            max_ts,
            bloom_off,
            index_off,
            data_off,
        };
        let header_bytes = encoding::encode_to_vec(&header)?;

        let tmp_path = self.path.with_extension("sst.tmp");
        {
            let mut f = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&tmp_path)?;
            f.write_all(&header_bytes)?;
            f.write_all(&bloom_bytes)?;
            f.write_all(&index_bytes)?;
            f.write_all(&data)?;
            f.sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)?;
        Self::fsync_parent(&self.path)?;

        tracing::info!(
            path = %self.path.display(),
            level,
            sequence,
            num_entries,
            "SSTable built and published"
        );
        Ok(())
    }

    fn flush_block(
        data: &mut Vec<u8>,
        index: &mut Vec<IndexEntry>,
        block: &mut Vec<u8>,
        block_first_ts: &mut Option<i64>,
    ) -> Result<(), SSTableError> {
        let ts = block_first_ts.take().ok_or_else(|| {
            SSTableError::Internal("flushed an empty block with no first timestamp".into())
        })?;
        index.push(IndexEntry {
            ts,
            // Relative to the start of the data section; rebased by the caller.
            data_off_abs: data.len() as u64,
            block_size: block.len() as u32,
        });
        data.extend_from_slice(block);
        block.clear();
        Ok(())
    }

    fn fsync_parent(path: &Path) -> Result<(), SSTableError> {
        if let Some(dir) = path.parent() {
            let dir_file = File::open(dir)?;
            dir_file.sync_all()?;
        }
        Ok(())
    }
}
