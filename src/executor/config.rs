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

//! Join configuration

use std::path::PathBuf;

/// The join variants the driver can execute
///
/// All variants preserve the probe side where preservation applies; the
/// build side is always the buffered side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// Emit one output row per build/probe key match
    Inner,
    /// Inner matches, plus probe rows with no match padded with NULLs
    /// on the build columns
    LeftOuter,
    /// Emit each probe row at most once, on its first match
    Semi,
    /// Emit exactly the probe rows that match nothing
    Anti,
}

impl JoinType {
    /// Whether unmatched probe rows appear in the output
    #[inline]
    pub fn preserves_unmatched_probe(&self) -> bool {
        matches!(self, JoinType::LeftOuter | JoinType::Anti)
    }

    /// Whether a probe row is finished after its first match
    #[inline]
    pub fn first_match_only(&self) -> bool {
        matches!(self, JoinType::Semi | JoinType::Anti)
    }
}

/// Configuration consumed by the driver at construction
#[derive(Debug, Clone)]
pub struct HashJoinConfig {
    /// Join variant to execute.
    pub join_type: JoinType,
    /// Byte budget for the in-memory row store.
    pub memory_budget: usize,
    /// Spill overflow to disk; when false the driver degrades to
    /// multi-pass probing over the in-memory table alone.
    pub allow_spill: bool,
    /// Keep only the first build row per distinct key.
    pub reject_duplicate_keys: bool,
    /// Upper bound on partitions per spill event (power of two; rounded
    /// down otherwise).
    pub max_chunk_count: usize,
    /// Nested spills beyond this depth fall back to multi-pass probing
    /// instead of partitioning further.
    pub max_spill_depth: u8,
    /// Carry build-row references through the store and chunk files, and
    /// re-fetch build rows from their source at emission time.
    pub preserve_references: bool,
    /// Directory for chunk files; the system temp dir when `None`.
    pub spill_dir: Option<PathBuf>,
}

impl Default for HashJoinConfig {
    fn default() -> Self {
        Self {
            join_type: JoinType::Inner,
            memory_budget: 32 * 1024 * 1024,
            allow_spill: true,
            reject_duplicate_keys: false,
            max_chunk_count: 128,
            max_spill_depth: 4,
            preserve_references: false,
            spill_dir: None,
        }
    }
}

impl HashJoinConfig {
    /// Default configuration for the given join type
    pub fn new(join_type: JoinType) -> Self {
        Self {
            join_type,
            ..Self::default()
        }
    }

    /// Set the row-store byte budget
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Enable or disable disk spill
    pub fn with_spill(mut self, allow: bool) -> Self {
        self.allow_spill = allow;
        self
    }

    /// Enable duplicate-key rejection
    pub fn with_reject_duplicate_keys(mut self, reject: bool) -> Self {
        self.reject_duplicate_keys = reject;
        self
    }

    /// Enable build-row reference preservation
    pub fn with_preserve_references(mut self, preserve: bool) -> Self {
        self.preserve_references = preserve;
        self
    }

    /// Set the chunk-file directory
    pub fn with_spill_dir(mut self, dir: PathBuf) -> Self {
        self.spill_dir = Some(dir);
        self
    }

    /// The effective chunk-file directory
    pub fn effective_spill_dir(&self) -> PathBuf {
        self.spill_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
