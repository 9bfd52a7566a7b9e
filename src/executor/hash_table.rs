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

//! Memory-budgeted hash table for the build side of a join
//!
//! The table owns its rows and accounts their encoded size against a
//! byte budget. The watermark is checked **after** each insertion, so a
//! single oversized row is still admitted: the engine never has to spill
//! a buffer containing zero rows, which guarantees forward progress.
//!
//! # Memory Layout
//!
//! ```text
//! RowStore
//! ├── bucket_heads: Vec<i32>     [bucket_count]   // First entry per bucket
//! ├── entries: Vec<HashEntry>    [row_count]      // One per stored row
//! ├── rows: Vec<StoredRow>       [row_count]      // Owned payloads + keys
//! └── bucket_mask: u64                            // For fast modulo
//! ```
//!
//! Entry `i` always describes `rows[i]`; chains are linked through
//! `HashEntry::next` with `EMPTY` as the terminator.

use std::hash::Hasher;

use rustc_hash::FxHasher;

use crate::core::{Error, Result, Row};
use crate::executor::source::RowReference;

/// Sentinel value indicating end of chain.
const EMPTY: u32 = u32::MAX;

/// Minimum number of buckets (must be power of 2).
const MIN_BUCKETS: usize = 16;

/// Accounting overhead per stored row (entry, bookkeeping, allocator slack).
const ENTRY_OVERHEAD: usize = 48;

/// Seeds mixed into the routing hash per spill level, so partition
/// routing bits never correlate with hash-table bucket bits or with the
/// routing of an enclosing level.
const ROUTE_SEEDS: [u64; 8] = [
    0x9e37_79b9_7f4a_7c15,
    0xc2b2_ae3d_27d4_eb4f,
    0x1656_67b1_9e37_79f9,
    0x27d4_eb2f_1656_67c5,
    0x85eb_ca77_c2b2_ae63,
    0x2545_f491_4f6c_dd1d,
    0xff51_afd7_ed55_8ccd,
    0xc4ce_b9fe_1a85_ec53,
];

/// A join key: the serialized key-column bytes plus a NULL marker
///
/// Byte equality of two non-NULL keys implies value equality (the value
/// encoding is injective per type). A key with any NULL column never
/// matches anything, per SQL semantics; the flag survives spilling so
/// outer-join bookkeeping stays correct after a reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinKey {
    bytes: Vec<u8>,
    null: bool,
}

impl JoinKey {
    /// Build a key from the given columns of a row
    ///
    /// A missing column index counts as NULL in the key.
    pub fn from_row(row: &Row, key_indices: &[usize]) -> JoinKey {
        let mut bytes = Vec::new();
        let mut null = false;
        for &idx in key_indices {
            match row.get(idx) {
                Some(value) if !value.is_null() => value.encode_into(&mut bytes),
                _ => {
                    null = true;
                    bytes.clear();
                    break;
                }
            }
        }
        JoinKey { bytes, null }
    }

    /// Reassemble a key deserialized from a chunk record
    pub fn from_parts(bytes: Vec<u8>, null: bool) -> JoinKey {
        JoinKey { bytes, null }
    }

    /// Whether any key column was NULL
    #[inline]
    pub fn is_null(&self) -> bool {
        self.null
    }

    /// The serialized key bytes (empty for NULL keys)
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Hash used for hash-table bucketing
    #[inline]
    pub fn table_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        hasher.write(&self.bytes);
        hasher.finish()
    }

    /// Hash used for partition routing at the given spill level
    #[inline]
    pub fn route_hash(&self, level: u8) -> u64 {
        let mut hasher = FxHasher::default();
        hasher.write_u64(ROUTE_SEEDS[level as usize % ROUTE_SEEDS.len()]);
        hasher.write(&self.bytes);
        hasher.finish()
    }
}

/// One row owned by the store: payload, join key, optional provenance
#[derive(Debug, Clone)]
pub struct StoredRow {
    /// The buffered row payload
    pub row: Row,
    /// Its join key
    pub key: JoinKey,
    /// Reference back into the originating source, when preserved
    pub reference: Option<RowReference>,
}

impl StoredRow {
    fn accounted_size(&self) -> usize {
        self.row.payload_size()
            + self.key.bytes.len()
            + self.reference.as_ref().map_or(0, RowReference::len)
            + ENTRY_OVERHEAD
    }
}

/// Outcome of one insertion attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Row stored; the watermark is still within budget
    Stored,
    /// Row stored, but the post-insertion watermark exceeds the budget.
    /// The caller must stop inserting and spill or refill.
    BufferFull,
    /// Duplicate-rejection mode is on and an equal key was already stored
    DuplicateRejected,
}

/// A hash entry in the row store.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct HashEntry {
    /// Full 64-bit hash for quick rejection during probe.
    hash: u64,
    /// Index of next entry in the chain (EMPTY = end of chain).
    next: u32,
}

/// The in-memory build-side hash table with a byte budget
pub struct RowStore {
    /// First entry index for each bucket (-1 if empty).
    bucket_heads: Vec<i32>,
    /// Flat storage of all entries; entry i describes rows[i].
    entries: Vec<HashEntry>,
    /// Owned row payloads.
    rows: Vec<StoredRow>,
    /// Mask for computing bucket index: bucket = hash & mask
    bucket_mask: u64,
    /// Memory budget in bytes.
    budget: usize,
    /// Accounted bytes currently held.
    bytes_used: usize,
    /// Reject rows whose key is already present.
    reject_duplicates: bool,
}

impl RowStore {
    /// Create an empty store with the given byte budget
    pub fn new(budget: usize, reject_duplicates: bool) -> Self {
        Self {
            bucket_heads: vec![-1; MIN_BUCKETS],
            entries: Vec::new(),
            rows: Vec::new(),
            bucket_mask: (MIN_BUCKETS - 1) as u64,
            budget,
            bytes_used: 0,
            reject_duplicates,
        }
    }

    /// Drop all rows and reset the watermark; the budget is kept
    ///
    /// Called once per partition reload and once per refill batch.
    pub fn reset(&mut self) {
        self.bucket_heads.clear();
        self.bucket_heads.resize(MIN_BUCKETS, -1);
        self.bucket_mask = (MIN_BUCKETS - 1) as u64;
        self.entries.clear();
        self.rows.clear();
        self.bytes_used = 0;
    }

    /// Insert a row under its join key
    ///
    /// The row is always stored unless a duplicate is rejected; the
    /// return value tells the caller whether the budget is now exceeded.
    /// The very first row is reported as `Stored` even when it alone
    /// exceeds the budget, so a single oversized row makes progress.
    pub fn insert(
        &mut self,
        row: Row,
        key: JoinKey,
        reference: Option<RowReference>,
    ) -> Result<InsertOutcome> {
        debug_assert!(!key.is_null(), "NULL keys never participate in matching");

        if self.reject_duplicates && self.lookup(&key).next().is_some() {
            return Ok(InsertOutcome::DuplicateRejected);
        }

        self.rows
            .try_reserve(1)
            .map_err(|e| Error::Allocation(e.to_string()))?;
        self.entries
            .try_reserve(1)
            .map_err(|e| Error::Allocation(e.to_string()))?;

        if self.entries.len() + 1 > self.bucket_heads.len() * 3 / 4 {
            self.grow_buckets()?;
        }

        let hash = key.table_hash();
        let stored = StoredRow {
            row,
            key,
            reference,
        };
        let was_empty = self.rows.is_empty();
        self.bytes_used += stored.accounted_size();

        let bucket = (hash & self.bucket_mask) as usize;
        let old_head = self.bucket_heads[bucket];
        let entry_idx = self.entries.len() as u32;
        let next = if old_head >= 0 { old_head as u32 } else { EMPTY };
        self.entries.push(HashEntry { hash, next });
        self.bucket_heads[bucket] = entry_idx as i32;
        self.rows.push(stored);

        if self.bytes_used > self.budget && !was_empty {
            Ok(InsertOutcome::BufferFull)
        } else {
            Ok(InsertOutcome::Stored)
        }
    }

    /// Whether the watermark currently exceeds the budget
    #[inline]
    pub fn over_budget(&self) -> bool {
        self.bytes_used > self.budget
    }

    /// Iterate indices of stored rows whose key equals `key`
    ///
    /// NULL keys match nothing. Chain order is reverse insertion order;
    /// use [`RowStore::collect_matches`] for insertion order.
    pub fn lookup<'a>(&'a self, key: &'a JoinKey) -> LookupIter<'a> {
        let current = if key.is_null() {
            -1
        } else {
            let bucket = (key.table_hash() & self.bucket_mask) as usize;
            self.bucket_heads[bucket]
        };
        LookupIter {
            store: self,
            key,
            hash: key.table_hash(),
            current,
        }
    }

    /// Fill `out` with matching row indices in insertion order
    pub fn collect_matches(&self, key: &JoinKey, out: &mut Vec<u32>) {
        out.clear();
        out.extend(self.lookup(key).map(|idx| idx as u32));
        out.reverse();
    }

    /// Access a stored row by index
    #[inline]
    pub fn row(&self, idx: usize) -> &StoredRow {
        &self.rows[idx]
    }

    /// The most recently stored row, if any
    ///
    /// After the store is torn down and rebuilt for a new partition or
    /// refill batch, this lets the driver re-present the row that caused
    /// the previous overflow (and re-position the build cursor via its
    /// reference).
    pub fn last_row_stored(&self) -> Option<&StoredRow> {
        self.rows.last()
    }

    /// Number of stored rows
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the store holds no rows
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Accounted bytes currently held
    #[inline]
    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    /// The configured byte budget
    #[inline]
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Double the bucket array and rebuild the chains
    fn grow_buckets(&mut self) -> Result<()> {
        let new_count = (self.bucket_heads.len() * 2).max(MIN_BUCKETS);
        let mut heads = Vec::new();
        heads
            .try_reserve_exact(new_count)
            .map_err(|e| Error::Allocation(e.to_string()))?;
        heads.resize(new_count, -1i32);

        let mask = (new_count - 1) as u64;
        for (idx, entry) in self.entries.iter_mut().enumerate() {
            let bucket = (entry.hash & mask) as usize;
            let old_head = heads[bucket];
            entry.next = if old_head >= 0 { old_head as u32 } else { EMPTY };
            heads[bucket] = idx as i32;
        }
        self.bucket_heads = heads;
        self.bucket_mask = mask;
        Ok(())
    }
}

/// Iterator over stored-row indices with a byte-equal key
pub struct LookupIter<'a> {
    store: &'a RowStore,
    key: &'a JoinKey,
    hash: u64,
    current: i32,
}

impl Iterator for LookupIter<'_> {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        while self.current >= 0 {
            let idx = self.current as usize;
            let entry = &self.store.entries[idx];
            self.current = if entry.next == EMPTY {
                -1
            } else {
                entry.next as i32
            };

            // Hash first for quick rejection, then byte-verify the key
            if entry.hash == self.hash && self.store.rows[idx].key.bytes == self.key.bytes {
                return Some(idx);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::row;

    fn key_of(row: &Row) -> JoinKey {
        JoinKey::from_row(row, &[0])
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut store = RowStore::new(1 << 20, false);

        for (k, v) in [(1, "a"), (2, "b"), (1, "c")] {
            let r = row![k as i64, v];
            let key = key_of(&r);
            assert_eq!(store.insert(r, key, None).unwrap(), InsertOutcome::Stored);
        }

        let probe = key_of(&row![1i64]);
        let mut matches = Vec::new();
        store.collect_matches(&probe, &mut matches);
        assert_eq!(matches.len(), 2);
        // Insertion order: "a" first, then "c"
        assert_eq!(store.row(matches[0] as usize).row[1], Value::text("a"));
        assert_eq!(store.row(matches[1] as usize).row[1], Value::text("c"));

        let missing = key_of(&row![99i64]);
        assert_eq!(store.lookup(&missing).count(), 0);
    }

    #[test]
    fn test_oversized_first_row_is_stored() {
        // Budget smaller than any row: the first insert must still report
        // Stored so the engine makes forward progress.
        let mut store = RowStore::new(1, false);
        let big = row![1i64, "x".repeat(4096).as_str()];
        let key = key_of(&big);
        assert_eq!(store.insert(big, key, None).unwrap(), InsertOutcome::Stored);
        assert_eq!(store.len(), 1);
        assert!(store.over_budget());

        // The second insert reports the overflow; the row is kept anyway.
        let next = row![2i64, "y"];
        let key = key_of(&next);
        assert_eq!(
            store.insert(next, key, None).unwrap(),
            InsertOutcome::BufferFull
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_watermark_checked_after_insert() {
        // Rows of ~30 bytes accounted at ENTRY_OVERHEAD + payload; a
        // budget of 200 admits a couple of rows before reporting full.
        let mut store = RowStore::new(200, false);
        let mut overflow_at = None;
        for i in 0..16i64 {
            let r = row![i, i * 10];
            let key = key_of(&r);
            if store.insert(r, key, None).unwrap() == InsertOutcome::BufferFull {
                overflow_at = Some(i);
                break;
            }
        }
        let overflow_at = overflow_at.expect("budget of 200 bytes must overflow");
        // Every row up to and including the trigger row is retained.
        assert_eq!(store.len(), overflow_at as usize + 1);
    }

    #[test]
    fn test_duplicate_rejection() {
        let mut store = RowStore::new(1 << 20, true);

        let a = row![7i64, "first"];
        let key = key_of(&a);
        assert_eq!(store.insert(a, key, None).unwrap(), InsertOutcome::Stored);

        let b = row![7i64, "second"];
        let key = key_of(&b);
        assert_eq!(
            store.insert(b, key, None).unwrap(),
            InsertOutcome::DuplicateRejected
        );
        assert_eq!(store.len(), 1);

        let probe = key_of(&row![7i64]);
        let matches: Vec<_> = store.lookup(&probe).collect();
        assert_eq!(matches.len(), 1);
        assert_eq!(store.row(matches[0]).row[1], Value::text("first"));
    }

    #[test]
    fn test_duplicates_allowed_by_default() {
        let mut store = RowStore::new(1 << 20, false);
        for _ in 0..3 {
            let r = row![7i64];
            let key = key_of(&r);
            store.insert(r, key, None).unwrap();
        }
        assert_eq!(store.lookup(&key_of(&row![7i64])).count(), 3);
    }

    #[test]
    fn test_reset() {
        let mut store = RowStore::new(1 << 20, false);
        let r = row![1i64];
        let key = key_of(&r);
        store.insert(r, key, None).unwrap();
        assert!(!store.is_empty());
        assert!(store.bytes_used() > 0);
        assert!(store.last_row_stored().is_some());

        store.reset();
        assert!(store.is_empty());
        assert_eq!(store.bytes_used(), 0);
        assert!(store.last_row_stored().is_none());
        assert_eq!(store.lookup(&key_of(&row![1i64])).count(), 0);
    }

    #[test]
    fn test_growth_preserves_chains() {
        let mut store = RowStore::new(1 << 24, false);
        for i in 0..1000i64 {
            let r = row![i % 10, i];
            let key = key_of(&r);
            store.insert(r, key, None).unwrap();
        }
        for k in 0..10i64 {
            assert_eq!(store.lookup(&key_of(&row![k])).count(), 100);
        }
    }

    #[test]
    fn test_null_key_matches_nothing() {
        let mut store = RowStore::new(1 << 20, false);
        let r = row![5i64];
        let key = key_of(&r);
        store.insert(r, key, None).unwrap();

        let null_key = JoinKey::from_row(&row![5i64], &[3]); // missing column
        assert!(null_key.is_null());
        assert_eq!(store.lookup(&null_key).count(), 0);
    }

    #[test]
    fn test_route_hash_differs_per_level() {
        let key = key_of(&row![42i64]);
        assert_ne!(key.route_hash(0), key.route_hash(1));
        assert_ne!(key.table_hash(), key.route_hash(0));
    }

    #[test]
    fn test_multi_column_key() {
        let a = JoinKey::from_row(&row![1i64, "x", 9i64], &[0, 1]);
        let b = JoinKey::from_row(&row![1i64, "x", 7i64], &[0, 1]);
        let c = JoinKey::from_row(&row![1i64, "y", 9i64], &[0, 1]);
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }
}
