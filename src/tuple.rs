//! # Tuple model
//!
//! The unit of storage: a timestamped observation with a scalar or vector
//! value plus two ordered string maps (`tags`, queryable; `fields`, opaque).
//!
//! Tags and fields preserve insertion order — callers may rely on iteration
//! order matching insertion order, which is why both are backed by
//! `Vec<(String, String)>` rather than a `HashMap`.

use crate::encoding::{self, Decode, Encode, EncodingError};

/// Converts a length to `u32`, surfacing the same overflow error the
/// `encoding` module itself uses for its length-prefixed containers.
fn vec_len_u32(len: usize) -> Result<u32, EncodingError> {
    u32::try_from(len)
        .map_err(|_| EncodingError::LengthOverflow(format!("length {len} exceeds u32::MAX")))
}

// ------------------------------------------------------------------------------------------------
// Value
// ------------------------------------------------------------------------------------------------

/// A tagged value union: either a single scalar or a fixed-length float
/// vector. Replaces an untyped `std::variant`-style value with an explicit,
/// exhaustively-matchable Rust enum.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Value {
    /// Returns the scalar value, or `None` for a vector.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => Some(*v),
            Value::Vector(_) => None,
        }
    }

    /// `value_kind` discriminant used on the wire: 0 = scalar, 1 = vector.
    fn kind(&self) -> u8 {
        match self {
            Value::Scalar(_) => 0,
            Value::Vector(_) => 1,
        }
    }
}

impl Encode for Value {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.kind().encode_to(buf)?;
        match self {
            Value::Scalar(v) => v.to_bits().encode_to(buf)?,
            Value::Vector(vs) => {
                vec_len_u32(vs.len())?.encode_to(buf)?;
                for v in vs {
                    v.to_bits().encode_to(buf)?;
                }
            }
        }
        Ok(())
    }
}

impl Decode for Value {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (kind, mut offset) = u8::decode_from(buf)?;
        match kind {
            0 => {
                let (bits, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((Value::Scalar(f64::from_bits(bits)), offset))
            }
            1 => {
                let (count, n) = u32::decode_from(&buf[offset..])?;
                offset += n;
                if count > encoding::MAX_VEC_ELEMENTS {
                    return Err(EncodingError::LengthOverflow(format!(
                        "vector element count {count} exceeds MAX_VEC_ELEMENTS ({})",
                        encoding::MAX_VEC_ELEMENTS
                    )));
                }
                let mut vs = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let (bits, n) = u64::decode_from(&buf[offset..])?;
                    offset += n;
                    vs.push(f64::from_bits(bits));
                }
                Ok((Value::Vector(vs), offset))
            }
            other => Err(EncodingError::InvalidTag {
                tag: other as u32,
                type_name: "Value",
            }),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Tags — insertion-ordered string map
// ------------------------------------------------------------------------------------------------

/// An insertion-ordered `string -> string` map. Used for both `tags` and
/// `fields` on a [`Tuple`]; a plain `Vec` keeps iteration order explicit
/// without pulling in a generic ordered-map dependency for a domain with
/// a small, fixed number of entries per tuple.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tags(pub Vec<(String, String)>);

impl Tags {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Tags {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Encode for Tags {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        vec_len_u32(self.0.len())?.encode_to(buf)?;
        for (k, v) in &self.0 {
            k.encode_to(buf)?;
            v.encode_to(buf)?;
        }
        Ok(())
    }
}

impl Decode for Tags {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (count, mut offset) = u32::decode_from(buf)?;
        if count > encoding::MAX_VEC_ELEMENTS {
            return Err(EncodingError::LengthOverflow(format!(
                "tag count {count} exceeds MAX_VEC_ELEMENTS ({})",
                encoding::MAX_VEC_ELEMENTS
            )));
        }
        let mut pairs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (k, n) = String::decode_from(&buf[offset..])?;
            offset += n;
            let (v, n) = String::decode_from(&buf[offset..])?;
            offset += n;
            pairs.push((k, v));
        }
        Ok((Self(pairs), offset))
    }
}

// ------------------------------------------------------------------------------------------------
// Tuple
// ------------------------------------------------------------------------------------------------

/// One timestamped observation in a stream. Immutable once inserted; no
/// uniqueness constraint on `ts` — two tuples sharing a timestamp may
/// coexist and both are returned by range queries.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    /// Microseconds since the epoch.
    pub ts: i64,
    pub value: Value,
    /// Queryable key/value pairs (feeds `StreamTable` tag indexes).
    pub tags: Tags,
    /// Opaque key/value pairs, never indexed.
    pub fields: Tags,
}

impl Tuple {
    pub fn new(ts: i64, value: Value) -> Self {
        Self {
            ts,
            value,
            tags: Tags::new(),
            fields: Tags::new(),
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_fields(mut self, fields: Tags) -> Self {
        self.fields = fields;
        self
    }
}

/// Wire layout: `[u64 ts][value][tags][fields]`. The outer length-prefix
/// and checksum are the WAL/SSTable record framing's job, not this type's.
impl Encode for Tuple {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        (self.ts as u64).encode_to(buf)?;
        self.value.encode_to(buf)?;
        self.tags.encode_to(buf)?;
        self.fields.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Tuple {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (ts_bits, mut offset) = u64::decode_from(buf)?;
        let ts = ts_bits as i64;
        let (value, n) = Value::decode_from(&buf[offset..])?;
        offset += n;
        let (tags, n) = Tags::decode_from(&buf[offset..])?;
        offset += n;
        let (fields, n) = Tags::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Tuple {
                ts,
                value,
                tags,
                fields,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// TimeRange
// ------------------------------------------------------------------------------------------------

/// A half-open interval `[start, end)`. Picked uniformly half-open per the
/// design notes — the source was inconsistent between inclusive and
/// half-open across files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: i64) -> bool {
        self.start <= ts && ts < self.end
    }

    pub fn is_valid(&self) -> bool {
        self.end > self.start
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_range_half_open_contains() {
        let r = TimeRange::new(1000, 2000);
        assert!(r.contains(1000));
        assert!(r.contains(1999));
        assert!(!r.contains(2000));
        assert!(!r.contains(999));
    }

    #[test]
    fn time_range_validity() {
        assert!(TimeRange::new(0, 1).is_valid());
        assert!(!TimeRange::new(5, 5).is_valid());
        assert!(!TimeRange::new(5, 1).is_valid());
    }

    #[test]
    fn value_scalar_round_trip() {
        let v = Value::Scalar(3.5);
        let bytes = encoding::encode_to_vec(&v).unwrap();
        let (decoded, consumed) = Value::decode_from(&bytes).unwrap();
        assert_eq!(decoded, v);
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.as_f64(), Some(3.5));
    }

    #[test]
    fn value_vector_round_trip() {
        let v = Value::Vector(vec![1.0, 2.0, 3.0]);
        let bytes = encoding::encode_to_vec(&v).unwrap();
        let (decoded, _) = Value::decode_from(&bytes).unwrap();
        assert_eq!(decoded, v);
        assert_eq!(decoded.as_f64(), None);
    }

    #[test]
    fn tuple_round_trip_with_tags_and_fields() {
        let mut tags = Tags::new();
        tags.insert("k", "A");
        let mut fields = Tags::new();
        fields.insert("source", "sensor-1");

        let t = Tuple::new(1000, Value::Scalar(1.0))
            .with_tags(tags)
            .with_fields(fields);

        let bytes = encoding::encode_to_vec(&t).unwrap();
        let (decoded, consumed) = Tuple::decode_from(&bytes).unwrap();
        assert_eq!(decoded, t);
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.tags.get("k"), Some("A"));
    }

    #[test]
    fn tags_preserve_insertion_order() {
        let mut tags = Tags::new();
        tags.insert("b", "2");
        tags.insert("a", "1");
        let collected: Vec<_> = tags.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(collected, vec!["b".to_string(), "a".to_string()]);
    }
}
