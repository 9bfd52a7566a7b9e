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

//! Row type - a collection of column values

use std::fmt;
use std::ops::{Deref, Index};

use super::error::{Error, Result};
use super::value::Value;

/// A row of column values
///
/// Rows cross three owners during a join: the in-memory row store, chunk
/// files on disk (via [`Row::encode_into`]), and the output assembled by
/// the driver ([`Row::concat`]).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    /// Create a new empty row
    #[inline]
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Create a row from a vector of values
    #[inline]
    pub fn from_values(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Create a row of `count` untyped NULLs
    pub fn nulls(count: usize) -> Self {
        Self {
            values: vec![Value::null_unknown(); count],
        }
    }

    /// Get the number of values in the row
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by index
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get an iterator over the values
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }

    /// Get a reference to the underlying slice
    #[inline]
    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    /// Get the underlying vector of values
    #[inline]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Concatenate two rows (join output assembly)
    pub fn concat(&self, other: &Row) -> Row {
        let mut values = Vec::with_capacity(self.len() + other.len());
        values.extend(self.values.iter().cloned());
        values.extend(other.values.iter().cloned());
        Row::from_values(values)
    }

    /// Size of this row in the binary encoding, in bytes
    ///
    /// Also serves as the memory-accounting weight of a buffered row.
    pub fn payload_size(&self) -> usize {
        4 + self.values.iter().map(Value::encoded_size).sum::<usize>()
    }

    /// Append the binary encoding of this row to `buf`
    ///
    /// Layout: u32 value count, then each value in the
    /// [`Value::encode_into`] format.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.values.len() as u32).to_le_bytes());
        for value in &self.values {
            value.encode_into(buf);
        }
    }

    /// Decode a row from its binary encoding
    pub fn decode(data: &[u8]) -> Result<Row> {
        let count_bytes = data
            .get(..4)
            .ok_or_else(|| Error::internal("truncated row encoding"))?;
        let count =
            u32::from_le_bytes(count_bytes.try_into().expect("sliced to 4 bytes")) as usize;

        let mut pos = 4;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let (value, consumed) = Value::decode(&data[pos..])?;
            pos += consumed;
            values.push(value);
        }
        if pos != data.len() {
            return Err(Error::internal("trailing bytes after row encoding"));
        }
        Ok(Row::from_values(values))
    }
}

impl Deref for Row {
    type Target = [Value];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.values
    }
}

impl Index<usize> for Row {
    type Output = Value;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.values[index]
    }
}

impl FromIterator<Value> for Row {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Row::from_values(iter.into_iter().collect())
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::from_values(values)
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}

/// Macro for creating rows conveniently
#[macro_export]
macro_rules! row {
    () => {
        $crate::core::Row::new()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::core::Row::from_values(vec![$($crate::core::Value::from($value)),+])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DataType;

    #[test]
    fn test_row_basics() {
        let row = Row::from_values(vec![Value::integer(1), Value::text("hello")]);
        assert_eq!(row.len(), 2);
        assert_eq!(row.get(0), Some(&Value::integer(1)));
        assert_eq!(row.get(2), None);
        assert_eq!(row[1], Value::text("hello"));
        assert_eq!(row.to_string(), "(1, hello)");
    }

    #[test]
    fn test_row_concat() {
        let left = row![1i64, "a"];
        let right = row![2i64];
        let combined = left.concat(&right);
        assert_eq!(combined.len(), 3);
        assert_eq!(combined[0], Value::integer(1));
        assert_eq!(combined[2], Value::integer(2));
    }

    #[test]
    fn test_row_nulls() {
        let row = Row::nulls(3);
        assert_eq!(row.len(), 3);
        assert!(row.iter().all(Value::is_null));
    }

    #[test]
    fn test_row_encode_round_trip() {
        let row = Row::from_values(vec![
            Value::integer(-5),
            Value::text("spill"),
            Value::null(DataType::Float),
            Value::boolean(false),
        ]);

        let mut buf = Vec::new();
        row.encode_into(&mut buf);
        assert_eq!(buf.len(), row.payload_size());

        let decoded = Row::decode(&buf).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn test_row_decode_rejects_garbage() {
        assert!(Row::decode(&[1, 2]).is_err());

        let mut buf = Vec::new();
        row![1i64].encode_into(&mut buf);
        buf.push(0xFF);
        assert!(Row::decode(&buf).is_err());
    }

    #[test]
    fn test_empty_row_round_trip() {
        let mut buf = Vec::new();
        Row::new().encode_into(&mut buf);
        let decoded = Row::decode(&buf).unwrap();
        assert!(decoded.is_empty());
    }
}
