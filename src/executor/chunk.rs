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

//! Spilled row containers
//!
//! A [`ChunkFile`] is a strictly append-then-replay container over an
//! anonymous temporary file. Spilling writes rows in arrival order;
//! probing rewinds and reads them back in the same order. FIFO replay is
//! load-bearing: probe-side match flags for outer joins must line up
//! with original row identity across passes. There is no random access
//! and no cross-process format stability; a chunk lives exactly as long
//! as the join that created it.
//!
//! Record layout (all integers little-endian):
//!
//! ```text
//! [u32 payload_len][row payload][u32 key_len][key bytes][u8 null_in_key]
//! [u8 match_flag]?                 // probe chunks of outer/anti joins
//! [reference bytes]?               // fixed length, when references kept
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::core::{Error, Result, Row};
use crate::executor::hash_table::JoinKey;
use crate::executor::source::RowReference;

/// One record read back from a chunk
#[derive(Debug)]
pub struct ChunkRow {
    /// The row payload
    pub row: Row,
    /// Its join key as spilled
    pub key: JoinKey,
    /// Match flag, false when the chunk does not store flags
    pub matched: bool,
    /// Row reference, present when the chunk stores references
    pub reference: Option<RowReference>,
}

enum ChunkState {
    Writing(BufWriter<File>),
    Reading(BufReader<File>),
}

/// An append-then-replay temp file of rows
pub struct ChunkFile {
    state: ChunkState,
    rows_written: u64,
    rows_read: u64,
    bytes_written: u64,
    store_match_flag: bool,
    /// Byte length of stored references; 0 means none are stored.
    ref_len: usize,
    scratch: Vec<u8>,
}

impl ChunkFile {
    /// Create an empty chunk backed by an anonymous file in `dir`
    ///
    /// `store_match_flag` reserves one byte per record for outer-join
    /// match tracking. `ref_len` > 0 makes every record carry a row
    /// reference of exactly that length.
    pub fn create(dir: &Path, store_match_flag: bool, ref_len: usize) -> Result<ChunkFile> {
        let file = tempfile::tempfile_in(dir)
            .map_err(|e| Error::storage_io(format!("creating chunk file: {}", e)))?;
        Ok(ChunkFile {
            state: ChunkState::Writing(BufWriter::new(file)),
            rows_written: 0,
            rows_read: 0,
            bytes_written: 0,
            store_match_flag,
            ref_len,
            scratch: Vec::new(),
        })
    }

    /// Append one record; only valid before the first [`ChunkFile::rewind`]
    pub fn write_row(
        &mut self,
        row: &Row,
        key: &JoinKey,
        matched: bool,
        reference: Option<&RowReference>,
    ) -> Result<()> {
        let writer = match &mut self.state {
            ChunkState::Writing(w) => w,
            ChunkState::Reading(_) => {
                return Err(Error::internal("write to a chunk already rewound for read"))
            }
        };

        self.scratch.clear();
        row.encode_into(&mut self.scratch);

        let key_bytes = key.as_bytes();
        let mut record_len = 4 + self.scratch.len() + 4 + key_bytes.len() + 1;
        writer.write_all(&(self.scratch.len() as u32).to_le_bytes())?;
        writer.write_all(&self.scratch)?;
        writer.write_all(&(key_bytes.len() as u32).to_le_bytes())?;
        writer.write_all(key_bytes)?;
        writer.write_all(&[key.is_null() as u8])?;

        if self.store_match_flag {
            writer.write_all(&[matched as u8])?;
            record_len += 1;
        }
        if self.ref_len > 0 {
            let reference = reference.ok_or_else(|| {
                Error::internal("chunk stores references but none was supplied")
            })?;
            if reference.len() != self.ref_len {
                return Err(Error::internal(format!(
                    "reference length {} does not match chunk reference length {}",
                    reference.len(),
                    self.ref_len
                )));
            }
            writer.write_all(reference.as_bytes())?;
            record_len += self.ref_len;
        }

        self.rows_written += 1;
        self.bytes_written += record_len as u64;
        Ok(())
    }

    /// Reset the read cursor to the first record
    ///
    /// The first call flushes and switches the chunk to read mode;
    /// later calls restart the replay. Writing afterwards is an error.
    pub fn rewind(&mut self) -> Result<()> {
        match &mut self.state {
            ChunkState::Writing(writer) => {
                writer.flush()?;
                // BufWriter::into_inner needs ownership; swap through a
                // dummy writing state built on a throwaway buffer.
                let state = std::mem::replace(
                    &mut self.state,
                    ChunkState::Writing(BufWriter::new(tempfile::tempfile()?)),
                );
                let mut file = match state {
                    ChunkState::Writing(w) => w
                        .into_inner()
                        .map_err(|e| Error::storage_io(format!("flushing chunk: {}", e)))?,
                    ChunkState::Reading(_) => unreachable!(),
                };
                file.seek(SeekFrom::Start(0))?;
                self.state = ChunkState::Reading(BufReader::new(file));
            }
            ChunkState::Reading(reader) => {
                reader.seek(SeekFrom::Start(0))?;
            }
        }
        self.rows_read = 0;
        Ok(())
    }

    /// Read the next record, or `None` past the last one
    pub fn read_row(&mut self) -> Result<Option<ChunkRow>> {
        if self.rows_read == self.rows_written {
            return Ok(None);
        }
        let store_match_flag = self.store_match_flag;
        let ref_len = self.ref_len;
        let reader = match &mut self.state {
            ChunkState::Reading(r) => r,
            ChunkState::Writing(_) => {
                return Err(Error::internal("read from a chunk that was never rewound"))
            }
        };

        let payload_len = read_u32(reader)? as usize;
        self.scratch.clear();
        self.scratch.resize(payload_len, 0);
        reader.read_exact(&mut self.scratch)?;
        let row = Row::decode(&self.scratch)?;

        let key_len = read_u32(reader)? as usize;
        let mut key_bytes = vec![0u8; key_len];
        reader.read_exact(&mut key_bytes)?;
        let null_in_key = read_u8(reader)? != 0;
        let key = JoinKey::from_parts(key_bytes, null_in_key);

        let matched = if store_match_flag {
            read_u8(reader)? != 0
        } else {
            false
        };
        let reference = if ref_len > 0 {
            let mut bytes = vec![0u8; ref_len];
            reader.read_exact(&mut bytes)?;
            Some(RowReference::from_bytes(bytes))
        } else {
            None
        };

        self.rows_read += 1;
        Ok(Some(ChunkRow {
            row,
            key,
            matched,
            reference,
        }))
    }

    /// Number of records written to this chunk
    #[inline]
    pub fn num_rows(&self) -> u64 {
        self.rows_written
    }

    /// Whether no records were written
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows_written == 0
    }

    /// Records not yet read in the current replay
    #[inline]
    pub fn rows_remaining(&self) -> u64 {
        self.rows_written - self.rows_read
    }

    /// Total record bytes written
    #[inline]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

/// The build and probe chunks of one partition
pub struct ChunkPair {
    pub build: ChunkFile,
    pub probe: ChunkFile,
}

impl ChunkPair {
    /// Create an empty pair in `dir`
    ///
    /// Probe chunks carry a match flag when the join needs one; build
    /// chunks never do. References, when preserved, travel on the build
    /// side only (probe rows are streamed, never re-fetched).
    pub fn create(dir: &Path, probe_match_flag: bool, build_ref_len: usize) -> Result<ChunkPair> {
        Ok(ChunkPair {
            build: ChunkFile::create(dir, false, build_ref_len)?,
            probe: ChunkFile::create(dir, probe_match_flag, 0)?,
        })
    }
}

fn read_u32(reader: &mut BufReader<File>) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u8(reader: &mut BufReader<File>) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::row;

    fn keyed(row: &Row) -> JoinKey {
        JoinKey::from_row(row, &[0])
    }

    #[test]
    fn test_write_rewind_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunk = ChunkFile::create(dir.path(), false, 0).unwrap();

        let rows = vec![row![1i64, "a"], row![2i64, "b"], row![3i64, "c"]];
        for r in &rows {
            chunk.write_row(r, &keyed(r), false, None).unwrap();
        }
        assert_eq!(chunk.num_rows(), 3);

        chunk.rewind().unwrap();
        for expected in &rows {
            let record = chunk.read_row().unwrap().unwrap();
            assert_eq!(&record.row, expected);
            assert_eq!(record.key.as_bytes(), keyed(expected).as_bytes());
            assert!(!record.key.is_null());
            assert!(record.reference.is_none());
        }
        assert!(chunk.read_row().unwrap().is_none());
    }

    #[test]
    fn test_rewind_replays_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunk = ChunkFile::create(dir.path(), false, 0).unwrap();
        let r = row![7i64];
        chunk.write_row(&r, &keyed(&r), false, None).unwrap();

        chunk.rewind().unwrap();
        assert!(chunk.read_row().unwrap().is_some());
        assert!(chunk.read_row().unwrap().is_none());

        chunk.rewind().unwrap();
        assert_eq!(chunk.read_row().unwrap().unwrap().row, r);
    }

    #[test]
    fn test_match_flags_survive_replay() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunk = ChunkFile::create(dir.path(), true, 0).unwrap();
        for (i, matched) in [(1i64, false), (2, true), (3, false)] {
            let r = row![i];
            chunk.write_row(&r, &keyed(&r), matched, None).unwrap();
        }

        chunk.rewind().unwrap();
        let flags: Vec<bool> = std::iter::from_fn(|| chunk.read_row().unwrap())
            .map(|rec| rec.matched)
            .collect();
        assert_eq!(flags, vec![false, true, false]);
    }

    #[test]
    fn test_references_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunk = ChunkFile::create(dir.path(), false, 4).unwrap();
        let r = row![1i64];
        let reference = RowReference::from_bytes(vec![9, 8, 7, 6]);
        chunk.write_row(&r, &keyed(&r), false, Some(&reference)).unwrap();

        chunk.rewind().unwrap();
        let record = chunk.read_row().unwrap().unwrap();
        assert_eq!(record.reference, Some(reference));
    }

    #[test]
    fn test_reference_length_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunk = ChunkFile::create(dir.path(), false, 4).unwrap();
        let r = row![1i64];
        let short = RowReference::from_bytes(vec![1]);
        assert!(chunk.write_row(&r, &keyed(&r), false, Some(&short)).is_err());
        assert!(chunk.write_row(&r, &keyed(&r), false, None).is_err());
    }

    #[test]
    fn test_null_in_key_flag_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunk = ChunkFile::create(dir.path(), false, 0).unwrap();
        let r = row![Value::null(crate::core::DataType::Integer), "n"];
        let key = keyed(&r);
        assert!(key.is_null());
        chunk.write_row(&r, &key, false, None).unwrap();

        chunk.rewind().unwrap();
        assert!(chunk.read_row().unwrap().unwrap().key.is_null());
    }

    #[test]
    fn test_write_after_rewind_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunk = ChunkFile::create(dir.path(), false, 0).unwrap();
        chunk.rewind().unwrap();
        let r = row![1i64];
        assert!(chunk.write_row(&r, &keyed(&r), false, None).is_err());
    }

    #[test]
    fn test_empty_chunk_reads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunk = ChunkFile::create(dir.path(), false, 0).unwrap();
        assert!(chunk.is_empty());
        chunk.rewind().unwrap();
        assert!(chunk.read_row().unwrap().is_none());
    }
}
