//! # SSTable
//!
//! An immutable, mmap-backed on-disk run: header, bloom filter, sparse
//! index, and data blocks, laid out exactly as in the external file format
//! (see the crate's top-level documentation). Identified by `(level,
//! sequence)`; `sequence` increases monotonically across every SSTable of
//! one LSM engine.
//!
//! Reads go through an mmap'd view rather than buffered file reads; writes
//! use the write-temp/fsync/rename/fsync-parent-dir publish discipline from
//! `builder`. Layout is a flat header/bloom/index/data scheme rather than a
//! block/footer/metaindex one.

pub mod builder;
pub mod iterator;

#[cfg(test)]
mod tests;

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::bloom::BloomFilter;
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::tuple::Tuple;
use memmap2::Mmap;
use thiserror::Error;

pub use builder::SstWriter;
pub use iterator::SSTableIter;

pub const SST_MAGIC: u32 = 0x5353_5442; // "SSTB"
pub const SST_VERSION: u32 = 1;

/// Target uncompressed size of one data block before starting a new one.
pub const TARGET_BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum SSTableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("bad magic in SSTable file")]
    BadMagic,

    #[error("unsupported SSTable version {0}")]
    UnsupportedVersion(u32),

    #[error("corrupt SSTable: {0}")]
    Corrupt(String),

    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct SSTableHeader {
    pub magic: u32,
    pub version: u32,
    pub level: u64,
    pub sequence: u64,
    pub num_entries: u64,
    pub min_ts: i64,
    pub max_ts: i64,
    pub bloom_off: u64,
    pub index_off: u64,
    pub data_off: u64,
}

impl SSTableHeader {
    /// Fixed encoded size: every field is a fixed-width integer, so the
    /// header never needs a length prefix of its own.
    pub const ENCODED_SIZE: usize = 4 + 4 + 8 + 8 + 8 + 8 + 8 + 8 + 8 + 8;
}

impl Encode for SSTableHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.level.encode_to(buf)?;
        self.sequence.encode_to(buf)?;
        self.num_entries.encode_to(buf)?;
        (self.min_ts as u64).encode_to(buf)?;
        (self.max_ts as u64).encode_to(buf)?;
        self.bloom_off.encode_to(buf)?;
        self.index_off.encode_to(buf)?;
        self.data_off.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for SSTableHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (magic, mut o) = u32::decode_from(buf)?;
        let (version, n) = u32::decode_from(&buf[o..])?;
        o += n;
        let (level, n) = u64::decode_from(&buf[o..])?;
        o += n;
        let (sequence, n) = u64::decode_from(&buf[o..])?;
        o += n;
        let (num_entries, n) = u64::decode_from(&buf[o..])?;
        o += n;
        let (min_ts, n) = u64::decode_from(&buf[o..])?;
        o += n;
        let (max_ts, n) = u64::decode_from(&buf[o..])?;
        o += n;
        let (bloom_off, n) = u64::decode_from(&buf[o..])?;
        o += n;
        let (index_off, n) = u64::decode_from(&buf[o..])?;
        o += n;
        let (data_off, n) = u64::decode_from(&buf[o..])?;
        o += n;
        Ok((
            Self {
                magic,
                version,
                level,
                sequence,
                num_entries,
                min_ts: min_ts as i64,
                max_ts: max_ts as i64,
                bloom_off,
                index_off,
                data_off,
            },
            o,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Sparse index
// ------------------------------------------------------------------------------------------------

/// One entry per data block: the first timestamp in the block, its
/// absolute file offset, and its byte length.
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry {
    pub ts: i64,
    pub data_off_abs: u64,
    pub block_size: u32,
}

impl Encode for IndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        (self.ts as u64).encode_to(buf)?;
        self.data_off_abs.encode_to(buf)?;
        self.block_size.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for IndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (ts, mut o) = u64::decode_from(buf)?;
        let (data_off_abs, n) = u64::decode_from(&buf[o..])?;
        o += n;
        let (block_size, n) = u32::decode_from(&buf[o..])?;
        o += n;
        Ok((
            Self {
                ts: ts as i64,
                data_off_abs,
                block_size,
            },
            o,
        ))
    }
}

fn encode_index(entries: &[IndexEntry]) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    encoding::encode_vec(entries, &mut buf)?;
    Ok(buf)
}

fn decode_index(buf: &[u8]) -> Result<Vec<IndexEntry>, EncodingError> {
    let (entries, _) = encoding::decode_vec::<IndexEntry>(buf)?;
    Ok(entries)
}

// ------------------------------------------------------------------------------------------------
// Properties — exposed for compaction victim selection
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct SSTableProperties {
    pub level: u64,
    pub sequence: u64,
    pub num_entries: u64,
    pub min_ts: i64,
    pub max_ts: i64,
}

// ------------------------------------------------------------------------------------------------
// SSTable reader
// ------------------------------------------------------------------------------------------------

pub struct SSTable {
    mmap: Mmap,
    path: PathBuf,
    header: SSTableHeader,
    bloom: BloomFilter,
    index: Vec<IndexEntry>,
}

impl SSTable {
    pub fn file_name(level: u64, sequence: u64) -> String {
        format!("L{level}_{sequence}.sst")
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, SSTableError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // SAFETY: the file is only ever mutated by an atomic rename-in-place
        // after fsync (see builder.rs); we never write into a mapped file.
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < SSTableHeader::ENCODED_SIZE {
            return Err(SSTableError::Corrupt("file shorter than header".into()));
        }
        let (header, _) = encoding::decode_from_slice::<SSTableHeader>(&mmap)?;
        if header.magic != SST_MAGIC {
            return Err(SSTableError::BadMagic);
        }
        if header.version != SST_VERSION {
            return Err(SSTableError::UnsupportedVersion(header.version));
        }

        let bloom_end = header.index_off as usize;
        let bloom_bytes = mmap
            .get(header.bloom_off as usize..bloom_end)
            .ok_or_else(|| SSTableError::Corrupt("bloom section out of bounds".into()))?;
        let (bloom, _) = encoding::decode_from_slice::<BloomFilter>(bloom_bytes)?;

        let index_end = header.data_off as usize;
        let index_bytes = mmap
            .get(header.index_off as usize..index_end)
            .ok_or_else(|| SSTableError::Corrupt("index section out of bounds".into()))?;
        let index = decode_index(index_bytes)?;

        Ok(Self {
            mmap,
            path,
            header,
            bloom,
            index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn properties(&self) -> SSTableProperties {
        SSTableProperties {
            level: self.header.level,
            sequence: self.header.sequence,
            num_entries: self.header.num_entries,
            min_ts: self.header.min_ts,
            max_ts: self.header.max_ts,
        }
    }

    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn block_bytes(&self, entry: &IndexEntry) -> Result<&[u8], SSTableError> {
        let start = entry.data_off_abs as usize;
        let end = start + entry.block_size as usize;
        self.mmap
            .get(start..end)
            .ok_or_else(|| SSTableError::Corrupt("data block out of bounds".into()))
    }

    fn decode_block(bytes: &[u8]) -> Result<Vec<Tuple>, SSTableError> {
        let mut tuples = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let (len, n) = u32::decode_from(&bytes[offset..])?;
            offset += n;
            let len = len as usize;
            let (tuple, _) = encoding::decode_from_slice::<Tuple>(&bytes[offset..offset + len])?;
            offset += len;
            tuples.push(tuple);
        }
        Ok(tuples)
    }

    /// Consults the bloom filter first; only scans the matching block when
    /// the bloom says "possibly present".
    pub fn get(&self, ts: i64) -> Result<Vec<Tuple>, SSTableError> {
        if !self.bloom.contains(ts) {
            return Ok(Vec::new());
        }
        let Some(entry) = self.find_block_for(ts) else {
            return Ok(Vec::new());
        };
        let bytes = self.block_bytes(entry)?;
        let tuples = Self::decode_block(bytes)?;
        Ok(tuples.into_iter().filter(|t| t.ts == ts).collect())
    }

    /// Finds the index entry whose block may contain `ts`: the last block
    /// whose first timestamp is `<= ts`.
    fn find_block_for(&self, ts: i64) -> Option<&IndexEntry> {
        if self.index.is_empty() {
            return None;
        }
        match self.index.binary_search_by(|e| e.ts.cmp(&ts)) {
            Ok(i) => Some(&self.index[i]),
            Err(0) => None,
            Err(i) => Some(&self.index[i - 1]),
        }
    }

    /// Streams tuples whose `ts` falls in `[start, end)`, scanning only the
    /// blocks whose index range can overlap it.
    pub fn range(&self, start: i64, end: i64) -> Result<Vec<Tuple>, SSTableError> {
        if self.index.is_empty() {
            return Ok(Vec::new());
        }
        let lo = match self.index.binary_search_by(|e| e.ts.cmp(&start)) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        };
        let mut out = Vec::new();
        for entry in &self.index[lo..] {
            if entry.ts >= end {
                break;
            }
            let bytes = self.block_bytes(entry)?;
            for tuple in Self::decode_block(bytes)? {
                if tuple.ts >= start && tuple.ts < end {
                    out.push(tuple);
                }
            }
        }
        Ok(out)
    }

    pub fn iter(&self) -> SSTableIter<'_> {
        SSTableIter::new(self)
    }

    pub(crate) fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    pub(crate) fn block_bytes_at(&self, i: usize) -> Result<&[u8], SSTableError> {
        self.block_bytes(&self.index[i])
    }
}
