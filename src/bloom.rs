//! # Bloom filter
//!
//! A fixed-size bit array keyed by `i64` timestamp, with `k` hash functions
//! derived from two independent base hashes via double hashing
//! (`h_i = h1 + i*h2 mod m`). Hand-rolled rather than built on the
//! `bloomfilter` crate: the on-disk format (`m`, `k`, raw bits) and the
//! exact double-hashing scheme both need to round-trip byte-for-byte, which
//! an opaque dependency can't guarantee, so this follows the `encoding`
//! module's own Encode/Decode idiom instead.
//!
//! No false negatives: `contains` only ever says "definitely absent" or
//! "possibly present". The false-positive rate climbs monotonically with
//! load, so callers must size `m` for the expected entry count.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::encoding::{Decode, Encode, EncodingError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BloomError {
    #[error("invalid bloom filter parameters: m={m}, k={k}")]
    InvalidParams { m: u64, k: u32 },

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

/// A fixed-capacity bloom filter over `i64` keys.
#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilter {
    m: u64,
    k: u32,
    bits: Vec<u8>,
}

impl BloomFilter {
    /// Builds a filter sized for `expected_entries` at `bits_per_key` bits
    /// of bit-array capacity per expected entry. `k` is derived from the
    /// standard optimum `k = round((m/n) * ln 2)`, clamped to `[1, 30]`.
    pub fn with_capacity(expected_entries: u64, bits_per_key: u32) -> Self {
        let n = expected_entries.max(1);
        let m = (n * bits_per_key as u64).max(64);
        let k = (((m as f64 / n as f64) * std::f64::consts::LN_2).round() as i64)
            .clamp(1, 30) as u32;
        let byte_len = m.div_ceil(8) as usize;
        Self {
            m,
            k,
            bits: vec![0u8; byte_len],
        }
    }

    pub fn m(&self) -> u64 {
        self.m
    }

    pub fn k(&self) -> u32 {
        self.k
    }

    fn base_hashes(key: i64) -> (u64, u64) {
        let mut h1 = DefaultHasher::new();
        key.hash(&mut h1);
        let a = h1.finish();

        let mut h2 = DefaultHasher::new();
        key.hash(&mut h2);
        0xdead_beef_cafe_u64.hash(&mut h2);
        let mut b = h2.finish();
        // Double hashing degenerates if h2 == 0; force it odd and non-zero.
        if b == 0 {
            b = 1;
        }
        (a, b)
    }

    fn bit_positions(&self, key: i64) -> impl Iterator<Item = u64> + '_ {
        let (h1, h2) = Self::base_hashes(key);
        let m = self.m;
        (0..self.k).map(move |i| {
            let combined = h1.wrapping_add((i as u64).wrapping_mul(h2));
            combined % m
        })
    }

    fn set_bit(&mut self, pos: u64) {
        let byte = (pos / 8) as usize;
        let bit = (pos % 8) as u8;
        self.bits[byte] |= 1 << bit;
    }

    fn get_bit(&self, pos: u64) -> bool {
        let byte = (pos / 8) as usize;
        let bit = (pos % 8) as u8;
        (self.bits[byte] & (1 << bit)) != 0
    }

    pub fn insert(&mut self, key: i64) {
        let positions: Vec<u64> = self.bit_positions(key).collect();
        for pos in positions {
            self.set_bit(pos);
        }
    }

    /// Returns `false` only when `key` is definitely absent. `true` means
    /// "possibly present" — callers must confirm with an actual lookup.
    pub fn contains(&self, key: i64) -> bool {
        self.bit_positions(key).all(|pos| self.get_bit(pos))
    }
}

/// `[Bloom] m: u64, k: u32, bits: ceil(m/8) bytes`.
impl Encode for BloomFilter {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.m.encode_to(buf)?;
        self.k.encode_to(buf)?;
        buf.extend_from_slice(&self.bits);
        Ok(())
    }
}

impl Decode for BloomFilter {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (m, mut offset) = u64::decode_from(buf)?;
        let (k, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let byte_len = m.div_ceil(8) as usize;
        if buf.len() < offset + byte_len {
            return Err(EncodingError::UnexpectedEof {
                needed: offset + byte_len,
                available: buf.len(),
            });
        }
        let bits = buf[offset..offset + byte_len].to_vec();
        offset += byte_len;
        Ok((Self { m, k, bits }, offset))
    }
}
