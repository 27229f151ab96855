//! Streaming, block-at-a-time iteration over one SSTable's full key range.
//! Used by compaction to n-way merge several SSTables without loading any
//! of them fully into memory.

use super::{SSTable, SSTableError};
use crate::tuple::Tuple;

pub struct SSTableIter<'a> {
    sstable: &'a SSTable,
    block_idx: usize,
    pending: std::vec::IntoIter<Tuple>,
}

impl<'a> SSTableIter<'a> {
    pub(crate) fn new(sstable: &'a SSTable) -> Self {
        Self {
            sstable,
            block_idx: 0,
            pending: Vec::new().into_iter(),
        }
    }

    fn load_next_block(&mut self) -> Result<bool, SSTableError> {
        if self.block_idx >= self.sstable.index().len() {
            return Ok(false);
        }
        let bytes = self.sstable.block_bytes_at(self.block_idx)?;
        let tuples = SSTable::decode_block(bytes)?;
        self.block_idx += 1;
        self.pending = tuples.into_iter();
        Ok(true)
    }
}

impl<'a> Iterator for SSTableIter<'a> {
    type Item = Result<Tuple, SSTableError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(t) = self.pending.next() {
                return Some(Ok(t));
            }
            match self.load_next_block() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
