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

//! # Spilljoin
//!
//! A memory-bounded hash join engine with disk spill. The build side is
//! buffered into a budgeted in-memory hash table; when the budget is
//! exceeded the unread tail is partitioned into temporary chunk files
//! and each partition is joined independently, recursing into nested
//! partition sets when a reloaded partition still does not fit.
//!
//! The driver is single-threaded, synchronous, and pull-based: `open`
//! consumes the build side, then each `next` call yields one output row.
//! Spilling is invisible to the caller except through [`JoinStats`];
//! the output multiset is identical for any memory budget.
//!
//! ```
//! use spilljoin::{
//!     ExecutionContext, HashJoin, HashJoinConfig, JoinType, MaterializedSource, Row, Value,
//! };
//!
//! # fn main() -> spilljoin::Result<()> {
//! let build = MaterializedSource::new(vec![
//!     Row::from_values(vec![Value::integer(1), Value::text("a")]),
//!     Row::from_values(vec![Value::integer(2), Value::text("b")]),
//! ]);
//! let probe = MaterializedSource::new(vec![
//!     Row::from_values(vec![Value::integer(1), Value::text("x")]),
//! ]);
//!
//! let mut join = HashJoin::new(
//!     Box::new(build),
//!     Box::new(probe),
//!     vec![0],            // build key columns
//!     vec![0],            // probe key columns
//!     2,                  // build row width
//!     HashJoinConfig::new(JoinType::Inner),
//!     ExecutionContext::new(),
//! )?;
//!
//! join.open()?;
//! while let Some(row) = join.next()? {
//!     assert_eq!(row.to_string(), "(1, a, 1, x)");
//! }
//! join.close()?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod executor;

pub use crate::core::{DataType, Error, Result, Row, Value};
pub use crate::executor::{
    CancellationHandle, ExecutionContext, HashJoin, HashJoinConfig, JoinStats, JoinType,
    MaterializedSource, RowReference, RowSource,
};
