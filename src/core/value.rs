// Copyright 2026 Spilljoin Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Runtime value type with a compact binary encoding
//!
//! The binary encoding is used both for chunk-file payloads and for join
//! keys: one tag byte followed by a little-endian fixed-width body, or a
//! u32-length-prefixed body for text. The encoding is injective per type,
//! so byte equality of encoded join keys implies value equality.
//!
//! The encoding is private to one join execution; it makes no
//! cross-process or cross-version compatibility promises.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::error::{Error, Result};
use super::types::DataType;

/// A runtime value
///
/// Text uses `Arc<str>` for cheap cloning: rows are cloned when a probe
/// row fans out to multiple matches.
#[derive(Debug, Clone)]
pub enum Value {
    /// NULL value with optional type hint
    Null(DataType),

    /// 64-bit signed integer
    Integer(i64),

    /// 64-bit floating point
    Float(f64),

    /// UTF-8 text string (Arc for cheap cloning)
    Text(Arc<str>),

    /// Boolean value
    Boolean(bool),

    /// Timestamp (UTC)
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Create an integer value
    #[inline]
    pub fn integer(v: i64) -> Self {
        Value::Integer(v)
    }

    /// Create a float value
    #[inline]
    pub fn float(v: f64) -> Self {
        Value::Float(v)
    }

    /// Create a text value
    #[inline]
    pub fn text(v: impl Into<Arc<str>>) -> Self {
        Value::Text(v.into())
    }

    /// Create a boolean value
    #[inline]
    pub fn boolean(v: bool) -> Self {
        Value::Boolean(v)
    }

    /// Create a timestamp value
    #[inline]
    pub fn timestamp(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }

    /// Create a typed NULL
    #[inline]
    pub fn null(dt: DataType) -> Self {
        Value::Null(dt)
    }

    /// Create a NULL with no type hint
    #[inline]
    pub fn null_unknown() -> Self {
        Value::Null(DataType::Null)
    }

    /// Check whether this value is NULL
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }

    /// The data type of this value
    #[inline]
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null(dt) => *dt,
            Value::Integer(_) => DataType::Integer,
            Value::Float(_) => DataType::Float,
            Value::Text(_) => DataType::Text,
            Value::Boolean(_) => DataType::Boolean,
            Value::Timestamp(_) => DataType::Timestamp,
        }
    }

    /// Extract an i64 if this is an integer
    #[inline]
    pub fn as_int64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Extract a &str if this is text
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Number of bytes this value occupies in the binary encoding
    pub fn encoded_size(&self) -> usize {
        1 + match self {
            Value::Null(_) => 1,
            Value::Integer(_) | Value::Float(_) => 8,
            Value::Text(s) => 4 + s.len(),
            Value::Boolean(_) => 1,
            Value::Timestamp(_) => 12,
        }
    }

    /// Append the binary encoding of this value to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Null(dt) => {
                buf.push(DataType::Null.as_u8());
                buf.push(dt.as_u8());
            }
            Value::Integer(i) => {
                buf.push(DataType::Integer.as_u8());
                buf.extend_from_slice(&i.to_le_bytes());
            }
            Value::Float(f) => {
                buf.push(DataType::Float.as_u8());
                buf.extend_from_slice(&f.to_le_bytes());
            }
            Value::Text(s) => {
                buf.push(DataType::Text.as_u8());
                buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            Value::Boolean(b) => {
                buf.push(DataType::Boolean.as_u8());
                buf.push(u8::from(*b));
            }
            Value::Timestamp(ts) => {
                buf.push(DataType::Timestamp.as_u8());
                buf.extend_from_slice(&ts.timestamp().to_le_bytes());
                buf.extend_from_slice(&ts.timestamp_subsec_nanos().to_le_bytes());
            }
        }
    }

    /// Decode one value from `data`, returning it and the bytes consumed
    pub fn decode(data: &[u8]) -> Result<(Value, usize)> {
        let tag = *data
            .first()
            .ok_or_else(|| Error::internal("empty value encoding"))?;
        let rest = &data[1..];

        match DataType::from_u8(tag) {
            Some(DataType::Null) => {
                let hint = *rest
                    .first()
                    .ok_or_else(|| Error::internal("truncated NULL encoding"))?;
                let dt = DataType::from_u8(hint).unwrap_or(DataType::Null);
                Ok((Value::Null(dt), 2))
            }
            Some(DataType::Integer) => {
                let bytes = rest
                    .get(..8)
                    .ok_or_else(|| Error::internal("truncated integer encoding"))?;
                let v = i64::from_le_bytes(bytes.try_into().expect("sliced to 8 bytes"));
                Ok((Value::Integer(v), 9))
            }
            Some(DataType::Float) => {
                let bytes = rest
                    .get(..8)
                    .ok_or_else(|| Error::internal("truncated float encoding"))?;
                let v = f64::from_le_bytes(bytes.try_into().expect("sliced to 8 bytes"));
                Ok((Value::Float(v), 9))
            }
            Some(DataType::Text) => {
                let len_bytes = rest
                    .get(..4)
                    .ok_or_else(|| Error::internal("truncated text length"))?;
                let len = u32::from_le_bytes(len_bytes.try_into().expect("sliced to 4 bytes"))
                    as usize;
                let text = rest
                    .get(4..4 + len)
                    .ok_or_else(|| Error::internal("truncated text body"))?;
                let s = std::str::from_utf8(text)
                    .map_err(|_| Error::internal("invalid UTF-8 in text value"))?;
                Ok((Value::text(s), 1 + 4 + len))
            }
            Some(DataType::Boolean) => {
                let b = *rest
                    .first()
                    .ok_or_else(|| Error::internal("truncated boolean encoding"))?;
                Ok((Value::Boolean(b != 0), 2))
            }
            Some(DataType::Timestamp) => {
                let secs_bytes = rest
                    .get(..8)
                    .ok_or_else(|| Error::internal("truncated timestamp encoding"))?;
                let nanos_bytes = rest
                    .get(8..12)
                    .ok_or_else(|| Error::internal("truncated timestamp encoding"))?;
                let secs = i64::from_le_bytes(secs_bytes.try_into().expect("sliced to 8 bytes"));
                let nanos =
                    u32::from_le_bytes(nanos_bytes.try_into().expect("sliced to 4 bytes"));
                let ts = DateTime::from_timestamp(secs, nanos)
                    .ok_or_else(|| Error::internal("timestamp out of range"))?;
                Ok((Value::Timestamp(ts), 13))
            }
            None => Err(Error::internal(format!("unknown value tag: {tag}"))),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            // Type hints on NULLs do not affect equality
            (Value::Null(_), Value::Null(_)) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            // Bit-exact float comparison for consistent semantics
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null(_) => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: Value) -> Value {
        let mut buf = Vec::new();
        v.encode_into(&mut buf);
        assert_eq!(buf.len(), v.encoded_size());
        let (decoded, consumed) = Value::decode(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        decoded
    }

    #[test]
    fn test_encode_round_trip() {
        assert_eq!(round_trip(Value::integer(-42)), Value::integer(-42));
        assert_eq!(round_trip(Value::float(2.5)), Value::float(2.5));
        assert_eq!(round_trip(Value::text("hello")), Value::text("hello"));
        assert_eq!(round_trip(Value::text("")), Value::text(""));
        assert_eq!(round_trip(Value::boolean(true)), Value::boolean(true));
        assert_eq!(
            round_trip(Value::null(DataType::Text)),
            Value::null(DataType::Text)
        );

        let ts = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(round_trip(Value::timestamp(ts)), Value::timestamp(ts));
    }

    #[test]
    fn test_decode_truncated() {
        let mut buf = Vec::new();
        Value::text("truncate me").encode_into(&mut buf);
        buf.truncate(buf.len() - 1);
        assert!(Value::decode(&buf).is_err());

        assert!(Value::decode(&[]).is_err());
        assert!(Value::decode(&[99]).is_err());
    }

    #[test]
    fn test_equality_rules() {
        // NULL equals NULL regardless of type hint (engine-internal semantics;
        // SQL NULL-matching is handled at the join-key level, not here)
        assert_eq!(Value::null(DataType::Integer), Value::null(DataType::Text));
        // Floats compare bit-exact
        assert_eq!(Value::float(1.5), Value::float(1.5));
        assert_ne!(Value::float(0.0), Value::float(-0.0));
        // No cross-type numeric equality
        assert_ne!(Value::integer(1), Value::float(1.0));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::integer(7).to_string(), "7");
        assert_eq!(Value::null_unknown().to_string(), "NULL");
        assert_eq!(Value::text("abc").to_string(), "abc");
    }
}
