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

//! Partition sets for disk spill
//!
//! When the row store overflows, the tail of the build input is fanned
//! out into a [`PartitionSet`]: an array of chunk pairs sized as a power
//! of two. Rows are routed by a level-seeded hash of the join key, so
//! equal keys land in the same partition on both sides and a nested set
//! (cascading spill) redistributes keys instead of replaying the parent
//! partitioning.
//!
//! Rows already resident in the store are not flushed; they serve as the
//! in-memory table for the first probe pass, and only unseen input needs
//! routing.

use std::path::{Path, PathBuf};

use crate::core::{Result, Row};
use crate::executor::chunk::{ChunkPair, ChunkRow};
use crate::executor::hash_table::JoinKey;
use crate::executor::source::RowReference;

/// Hard ceiling on partitions per set, independent of configuration.
pub const MAX_CHUNKS: usize = 128;

/// Choose the partition count for a new set
///
/// `rows_stored` / `bytes_used` give the observed average row width;
/// dividing the budget by it estimates how many rows fit in memory at
/// once, and the remaining rows are split into that many chunk-sized
/// partitions. The result is a power of two between 2 and `max_chunks`.
pub fn plan_chunk_count(
    remaining_rows: usize,
    rows_stored: usize,
    bytes_used: usize,
    budget: usize,
    max_chunks: usize,
) -> usize {
    let avg_row_bytes = if rows_stored == 0 {
        1
    } else {
        (bytes_used / rows_stored).max(1)
    };
    let rows_per_chunk = (budget / avg_row_bytes).max(1);
    let raw = remaining_rows.div_ceil(rows_per_chunk);

    let cap = max_chunks.clamp(2, MAX_CHUNKS);
    let cap = if cap.is_power_of_two() {
        cap
    } else {
        cap.next_power_of_two() / 2
    };
    raw.next_power_of_two().clamp(2, cap)
}

/// Partition index for a routing hash; `chunk_count` is a power of two
#[inline]
pub fn partition_index(route_hash: u64, chunk_count: usize) -> usize {
    debug_assert!(chunk_count.is_power_of_two());
    (route_hash & (chunk_count as u64 - 1)) as usize
}

/// An ordered array of chunk pairs created by one spill event
pub struct PartitionSet {
    spill_dir: PathBuf,
    pairs: Vec<ChunkPair>,
    level: u8,
}

impl PartitionSet {
    /// Create `chunk_count` empty pairs in `dir`
    ///
    /// `level` is this set's spill depth; it seeds the routing hash so
    /// nested sets split keys that collided at the enclosing level.
    pub fn create(
        dir: &Path,
        chunk_count: usize,
        level: u8,
        probe_match_flag: bool,
        build_ref_len: usize,
    ) -> Result<PartitionSet> {
        let mut pairs = Vec::with_capacity(chunk_count);
        for _ in 0..chunk_count {
            pairs.push(ChunkPair::create(dir, probe_match_flag, build_ref_len)?);
        }
        Ok(PartitionSet {
            spill_dir: dir.to_path_buf(),
            pairs,
            level,
        })
    }

    /// Spill depth of this set
    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Number of partitions
    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether all pairs have been taken for processing
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Directory the chunk files live in
    #[inline]
    pub fn spill_dir(&self) -> &Path {
        &self.spill_dir
    }

    fn index_for(&self, key: &JoinKey) -> usize {
        partition_index(key.route_hash(self.level), self.pairs.len())
    }

    /// Route a build-side row to its partition's build chunk
    pub fn write_build_row(
        &mut self,
        row: &Row,
        key: &JoinKey,
        reference: Option<&RowReference>,
    ) -> Result<()> {
        let idx = self.index_for(key);
        self.pairs[idx].build.write_row(row, key, false, reference)
    }

    /// Route a probe-side row to its partition's probe chunk
    pub fn write_probe_row(&mut self, record: &ChunkRow) -> Result<()> {
        let idx = self.index_for(&record.key);
        self.pairs[idx]
            .probe
            .write_row(&record.row, &record.key, record.matched, None)
    }

    /// Take the next unprocessed pair, in partition-index order
    ///
    /// Routing into the set must be over before processing begins.
    pub fn take_next_pair(&mut self) -> Option<ChunkPair> {
        if self.pairs.is_empty() {
            None
        } else {
            Some(self.pairs.remove(0))
        }
    }
}
