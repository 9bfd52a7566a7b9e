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

//! Row sources and row references
//!
//! A [`RowSource`] supplies the build and probe inputs of a join. Besides
//! sequential reads it must hand out a [`RowReference`] for the row it
//! just produced: an opaque, fixed-length token that stays valid for the
//! lifetime of one logical scan and can be used later to re-fetch that
//! exact row, or to re-position the scan just after it.
//!
//! Sources may swap their internal storage representation mid-scan (for
//! example an in-memory table converting itself to a disk-backed one).
//! A source that can no longer resolve a token must fail with
//! [`Error::ReferenceStale`] rather than return wrong bytes; the engine
//! never silently trusts a reference.

use crate::core::{Error, Result, Row};

/// Opaque, fixed-length token identifying one row in a [`RowSource`]
///
/// The engine treats the bytes as a black box: it stores them (in memory
/// and in spilled chunk records) and hands them back unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowReference(Vec<u8>);

impl RowReference {
    /// Wrap raw reference bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        RowReference(bytes)
    }

    /// The raw bytes of this reference
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the reference is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A sequential supplier of rows for one side of a join
pub trait RowSource {
    /// Initialize the source for a sequential scan
    fn open(&mut self) -> Result<()>;

    /// Read the next row, or `None` at end of data
    fn next(&mut self) -> Result<Option<Row>>;

    /// Release resources; the scan is over
    fn close(&mut self) -> Result<()>;

    /// Fixed byte length of references produced by this source
    fn reference_len(&self) -> usize;

    /// Reference for the row most recently returned by [`RowSource::next`]
    ///
    /// Must be called after a successful `next`; the token stays valid
    /// until the scan ends or the referenced row is revisited.
    fn row_reference(&self) -> Result<RowReference>;

    /// Re-position the scan so the next read yields the row *after* the
    /// referenced one
    fn seek_to_reference(&mut self, reference: &RowReference) -> Result<()>;

    /// Re-materialize the exact row a reference points at
    fn fetch(&mut self, reference: &RowReference) -> Result<Row>;

    /// Estimated total row count, if the source knows it
    fn estimated_rows(&self) -> Option<usize> {
        None
    }
}

/// In-memory row source
///
/// References are 16 bytes: a row index and a generation counter, both
/// little-endian u64. [`MaterializedSource::invalidate_references`] bumps
/// the generation, simulating the storage-engine transition that makes
/// previously captured references unresolvable.
pub struct MaterializedSource {
    rows: Vec<Row>,
    pos: usize,
    generation: u64,
    opened: bool,
}

const MATERIALIZED_REF_LEN: usize = 16;

impl MaterializedSource {
    /// Create a source over the given rows
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            pos: 0,
            generation: 0,
            opened: false,
        }
    }

    /// Invalidate every reference handed out so far
    pub fn invalidate_references(&mut self) {
        self.generation += 1;
    }

    fn decode_reference(&self, reference: &RowReference) -> Result<usize> {
        let bytes = reference.as_bytes();
        if bytes.len() != MATERIALIZED_REF_LEN {
            return Err(Error::ReferenceStale);
        }
        let index =
            u64::from_le_bytes(bytes[..8].try_into().expect("sliced to 8 bytes")) as usize;
        let generation = u64::from_le_bytes(bytes[8..].try_into().expect("sliced to 8 bytes"));
        if generation != self.generation || index >= self.rows.len() {
            return Err(Error::ReferenceStale);
        }
        Ok(index)
    }
}

impl RowSource for MaterializedSource {
    fn open(&mut self) -> Result<()> {
        self.pos = 0;
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>> {
        if !self.opened {
            return Err(Error::internal("MaterializedSource::next before open"));
        }
        match self.rows.get(self.pos) {
            Some(row) => {
                self.pos += 1;
                Ok(Some(row.clone()))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.opened = false;
        Ok(())
    }

    fn reference_len(&self) -> usize {
        MATERIALIZED_REF_LEN
    }

    fn row_reference(&self) -> Result<RowReference> {
        if self.pos == 0 {
            return Err(Error::internal("no row has been read yet"));
        }
        let index = (self.pos - 1) as u64;
        let mut bytes = Vec::with_capacity(MATERIALIZED_REF_LEN);
        bytes.extend_from_slice(&index.to_le_bytes());
        bytes.extend_from_slice(&self.generation.to_le_bytes());
        Ok(RowReference::from_bytes(bytes))
    }

    fn seek_to_reference(&mut self, reference: &RowReference) -> Result<()> {
        let index = self.decode_reference(reference)?;
        self.pos = index + 1;
        Ok(())
    }

    fn fetch(&mut self, reference: &RowReference) -> Result<Row> {
        let index = self.decode_reference(reference)?;
        Ok(self.rows[index].clone())
    }

    fn estimated_rows(&self) -> Option<usize> {
        Some(self.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    fn source(values: &[i64]) -> MaterializedSource {
        MaterializedSource::new(
            values
                .iter()
                .map(|v| Row::from_values(vec![Value::integer(*v)]))
                .collect(),
        )
    }

    #[test]
    fn test_sequential_read() {
        let mut src = source(&[10, 20, 30]);
        src.open().unwrap();
        assert_eq!(src.next().unwrap().unwrap()[0], Value::integer(10));
        assert_eq!(src.next().unwrap().unwrap()[0], Value::integer(20));
        assert_eq!(src.next().unwrap().unwrap()[0], Value::integer(30));
        assert!(src.next().unwrap().is_none());
        assert_eq!(src.estimated_rows(), Some(3));
    }

    #[test]
    fn test_seek_then_read_next_yields_following_row() {
        let mut src = source(&[10, 20, 30]);
        src.open().unwrap();
        src.next().unwrap();
        let first_ref = src.row_reference().unwrap();
        assert_eq!(first_ref.len(), src.reference_len());

        src.next().unwrap();
        src.next().unwrap();

        src.seek_to_reference(&first_ref).unwrap();
        assert_eq!(src.next().unwrap().unwrap()[0], Value::integer(20));
    }

    #[test]
    fn test_fetch_exact_row() {
        let mut src = source(&[10, 20]);
        src.open().unwrap();
        src.next().unwrap();
        src.next().unwrap();
        let second_ref = src.row_reference().unwrap();
        assert_eq!(src.fetch(&second_ref).unwrap()[0], Value::integer(20));
    }

    #[test]
    fn test_stale_after_invalidation() {
        let mut src = source(&[10]);
        src.open().unwrap();
        src.next().unwrap();
        let reference = src.row_reference().unwrap();

        src.invalidate_references();
        assert_eq!(src.fetch(&reference), Err(Error::ReferenceStale));
        assert_eq!(src.seek_to_reference(&reference), Err(Error::ReferenceStale));
    }

    #[test]
    fn test_garbage_reference_is_stale() {
        let mut src = source(&[10]);
        src.open().unwrap();
        let bogus = RowReference::from_bytes(vec![1, 2, 3]);
        assert_eq!(src.fetch(&bogus), Err(Error::ReferenceStale));
    }
}
