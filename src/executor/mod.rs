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

//! Join execution
//!
//! The pieces, bottom up:
//! - [`source`] - the [`RowSource`] input contract and row references
//! - [`hash_table`] - the budgeted in-memory [`RowStore`]
//! - [`chunk`] - spilled row containers
//! - [`partition`] - partition sets and overflow routing
//! - [`hash_join`] - the pull-based driver tying them together
//! - [`config`] / [`context`] - construction-time knobs and cancellation

pub mod chunk;
pub mod config;
pub mod context;
pub mod hash_join;
pub mod hash_table;
pub mod partition;
pub mod source;

pub use chunk::{ChunkFile, ChunkPair, ChunkRow};
pub use config::{HashJoinConfig, JoinType};
pub use context::{CancellationHandle, ExecutionContext};
pub use hash_join::{HashJoin, JoinStats};
pub use hash_table::{InsertOutcome, JoinKey, RowStore};
pub use partition::PartitionSet;
pub use source::{MaterializedSource, RowReference, RowSource};
