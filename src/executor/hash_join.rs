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

//! The hash join driver
//!
//! A pull-based state machine: `open` runs the build phase, then each
//! `next` call produces one output row. The build side is buffered in a
//! budgeted [`RowStore`]; on overflow the driver either fans the unread
//! build tail out into a [`PartitionSet`] of chunk pairs (spill enabled)
//! or degrades to multi-pass probing over one in-memory batch at a time
//! (spill disabled, or the cascade depth cap reached).
//!
//! Probe rows seen while a partition set is being filled are probed
//! against the memory-resident build prefix *and* routed to their
//! partition's probe chunk; the chunks only hold the build tail, so the
//! later per-partition passes never repeat a match. Nested overflow
//! while reloading a partition spills the rest of that build chunk into
//! a deeper set, tracked on an explicit stack rather than by recursion.
//!
//! Output order follows probe order until a spill occurs; after that,
//! rows surface in partition-chunk order. Within one partition, probe
//! rows are matched in the order they are read.

use std::path::PathBuf;

use crate::core::{Error, Result, Row};
use crate::executor::chunk::{ChunkFile, ChunkPair, ChunkRow};
use crate::executor::config::{HashJoinConfig, JoinType};
use crate::executor::context::ExecutionContext;
use crate::executor::hash_table::{InsertOutcome, JoinKey, RowStore};
use crate::executor::partition::{plan_chunk_count, PartitionSet};
use crate::executor::source::RowSource;

/// Driver automaton states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unopened,
    /// Streaming probe rows from the probe input.
    ReadingProbeFromInput,
    /// Replaying probe rows from a chunk (a partition's probe chunk, or
    /// a multi-pass save file).
    ReadingProbeFromChunk,
    /// A probe row is pending; emit its first match.
    ReadingFirstMatch,
    /// Emit the pending row's remaining matches.
    ReadingNextMatch,
    /// Advance to the next chunk pair and reload its build side.
    LoadingNextPartition,
    /// Final multi-pass sweep: emit saved probe rows that never matched.
    ReadingUnmatchedProbeRows,
    Done,
    /// A fatal error tore the join down; resources are released.
    Aborted,
}

/// The probe row currently being matched
struct ProbeRow {
    row: Row,
    key: JoinKey,
    /// Match flag carried in from an earlier pass (chunk replay).
    prior_matched: bool,
    /// Matched during the current pass.
    had_match: bool,
}

/// Where refill batches come from in multi-pass mode
enum BuildFeed {
    /// The build input itself (overflow with spill disabled).
    Input,
    /// A partially read build chunk (overflow at the cascade depth cap).
    Chunk(ChunkFile),
}

/// Degraded multi-pass state: one build batch in memory at a time, the
/// surviving probe rows replayed from a save file between batches
struct RefillState {
    feed: BuildFeed,
    /// The feed returned end-of-data while loading the current batch.
    exhausted: bool,
    /// Probe rows that must be replayed against later batches, or swept
    /// for unmatched emission after the last one.
    save: Option<ChunkFile>,
}

/// Counters exposed to the host after (or during) a join
#[derive(Debug, Default, Clone, Copy)]
pub struct JoinStats {
    pub build_rows_read: u64,
    pub probe_rows_read: u64,
    pub rows_emitted: u64,
    pub duplicate_keys_rejected: u64,
    pub build_rows_with_null_key: u64,
    pub spill_events: u64,
    pub partitions_processed: u64,
    pub refill_batches: u64,
    pub peak_spill_depth: u8,
}

/// Memory-bounded hash join over two row sources
pub struct HashJoin {
    build: Box<dyn RowSource>,
    probe: Box<dyn RowSource>,
    build_keys: Vec<usize>,
    probe_keys: Vec<usize>,
    /// Column count of build rows, for NULL extension in outer joins.
    build_column_count: usize,
    config: HashJoinConfig,
    context: ExecutionContext,
    spill_dir: PathBuf,

    state: State,
    store: RowStore,
    /// Pending partition sets, deepest spill level on top.
    set_stack: Vec<PartitionSet>,
    /// Set currently receiving routed rows from the active probe feed.
    current_route: Option<PartitionSet>,
    /// Chunk the probe feed replays from, when not the probe input.
    probe_feed: Option<ChunkFile>,
    refill: Option<RefillState>,
    probe_row: Option<ProbeRow>,
    matches: Vec<u32>,
    match_idx: usize,
    stats: JoinStats,
}

impl HashJoin {
    /// Create a driver joining `build` and `probe` on the given key
    /// columns
    ///
    /// `build_column_count` is the width of build rows; unmatched probe
    /// rows of a left outer join are padded with that many NULLs.
    pub fn new(
        build: Box<dyn RowSource>,
        probe: Box<dyn RowSource>,
        build_keys: Vec<usize>,
        probe_keys: Vec<usize>,
        build_column_count: usize,
        config: HashJoinConfig,
        context: ExecutionContext,
    ) -> Result<Self> {
        if build_keys.is_empty() || build_keys.len() != probe_keys.len() {
            return Err(Error::build_input(
                "join key column lists must be non-empty and of equal length",
            ));
        }
        let store = RowStore::new(config.memory_budget, config.reject_duplicate_keys);
        let spill_dir = config.effective_spill_dir();
        Ok(Self {
            build,
            probe,
            build_keys,
            probe_keys,
            build_column_count,
            config,
            context,
            spill_dir,
            state: State::Unopened,
            store,
            set_stack: Vec::new(),
            current_route: None,
            probe_feed: None,
            refill: None,
            probe_row: None,
            matches: Vec::new(),
            match_idx: 0,
            stats: JoinStats::default(),
        })
    }

    /// Run the build phase
    pub fn open(&mut self) -> Result<()> {
        match self.run_build_phase() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    /// Produce the next output row, or `None` when the join is finished
    pub fn next(&mut self) -> Result<Option<Row>> {
        match self.advance() {
            Ok(out) => Ok(out),
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    /// Release every chunk file and the row store, and close both inputs
    pub fn close(&mut self) -> Result<()> {
        self.release();
        self.state = State::Done;
        let build = self.build.close();
        let probe = self.probe.close();
        build?;
        probe?;
        Ok(())
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> &JoinStats {
        &self.stats
    }

    fn run_build_phase(&mut self) -> Result<()> {
        if self.state != State::Unopened {
            return Err(Error::internal("HashJoin opened twice"));
        }
        self.build.open()?;
        self.probe.open()?;

        loop {
            self.context.check_cancelled()?;
            let row = match self.build.next()? {
                Some(row) => row,
                None => break,
            };
            self.stats.build_rows_read += 1;
            let key = JoinKey::from_row(&row, &self.build_keys);
            if key.is_null() {
                // A NULL key matches nothing, and the build side is
                // never preserved, so the row cannot reach the output.
                self.stats.build_rows_with_null_key += 1;
                continue;
            }
            // Capture the reference before the insert: if the store
            // reports overflow the row's identity is already pinned.
            let reference = if self.config.preserve_references {
                Some(self.build.row_reference()?)
            } else {
                None
            };
            match self.store.insert(row, key, reference)? {
                InsertOutcome::Stored => {}
                InsertOutcome::DuplicateRejected => self.stats.duplicate_keys_rejected += 1,
                InsertOutcome::BufferFull => {
                    if self.config.allow_spill {
                        self.spill_build_input()?;
                    } else {
                        log::debug!(
                            "row store over {} byte budget with spill disabled; \
                             switching to multi-pass probing",
                            self.config.memory_budget
                        );
                        self.refill = Some(RefillState {
                            feed: BuildFeed::Input,
                            exhausted: false,
                            save: None,
                        });
                    }
                    break;
                }
            }
        }
        self.state = State::ReadingProbeFromInput;
        Ok(())
    }

    /// Fan the unread build tail out into a fresh partition set
    fn spill_build_input(&mut self) -> Result<()> {
        let estimated_remaining = self
            .build
            .estimated_rows()
            .map(|total| total.saturating_sub(self.stats.build_rows_read as usize))
            .unwrap_or_else(|| self.store.len().saturating_mul(4).max(2));
        let chunk_count = plan_chunk_count(
            estimated_remaining,
            self.store.len(),
            self.store.bytes_used(),
            self.config.memory_budget,
            self.config.max_chunk_count,
        );
        log::debug!(
            "row store over {} byte budget after {} rows; spilling to {} partitions",
            self.config.memory_budget,
            self.store.len(),
            chunk_count
        );
        self.stats.spill_events += 1;
        self.stats.peak_spill_depth = self.stats.peak_spill_depth.max(1);

        let mut set = PartitionSet::create(
            &self.spill_dir,
            chunk_count,
            0,
            self.probe_chunks_need_flag(),
            self.build_ref_len(),
        )?;
        loop {
            self.context.check_cancelled()?;
            let row = match self.build.next()? {
                Some(row) => row,
                None => break,
            };
            self.stats.build_rows_read += 1;
            let key = JoinKey::from_row(&row, &self.build_keys);
            if key.is_null() {
                self.stats.build_rows_with_null_key += 1;
                continue;
            }
            let reference = if self.config.preserve_references {
                Some(self.build.row_reference()?)
            } else {
                None
            };
            set.write_build_row(&row, &key, reference.as_ref())?;
        }
        self.current_route = Some(set);
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<Row>> {
        loop {
            self.context.check_cancelled()?;
            match self.state {
                State::Unopened => {
                    return Err(Error::internal("HashJoin::next before open"));
                }
                State::Aborted => {
                    return Err(Error::internal("HashJoin::next after abort"));
                }
                State::Done => return Ok(None),
                State::ReadingProbeFromInput | State::ReadingProbeFromChunk => {
                    if let Some(row) = self.read_probe_row()? {
                        return Ok(Some(row));
                    }
                }
                State::ReadingFirstMatch | State::ReadingNextMatch => {
                    if let Some(row) = self.step_match()? {
                        return Ok(Some(row));
                    }
                }
                State::LoadingNextPartition => self.load_next_partition()?,
                State::ReadingUnmatchedProbeRows => {
                    if let Some(row) = self.read_unmatched_row()? {
                        return Ok(Some(row));
                    }
                }
            }
        }
    }

    /// Pull one row from the active probe feed
    ///
    /// Emits directly only for NULL-key rows, which are resolved on
    /// sight; everything else moves to the match states.
    fn read_probe_row(&mut self) -> Result<Option<Row>> {
        let next = if self.state == State::ReadingProbeFromInput {
            match self.probe.next()? {
                None => None,
                Some(row) => {
                    self.stats.probe_rows_read += 1;
                    let key = JoinKey::from_row(&row, &self.probe_keys);
                    Some(ProbeRow {
                        row,
                        key,
                        prior_matched: false,
                        had_match: false,
                    })
                }
            }
        } else {
            let chunk = self
                .probe_feed
                .as_mut()
                .ok_or_else(|| Error::internal("probe chunk feed missing"))?;
            match chunk.read_row()? {
                None => None,
                Some(rec) => Some(ProbeRow {
                    row: rec.row,
                    key: rec.key,
                    prior_matched: rec.matched,
                    had_match: false,
                }),
            }
        };

        let pr = match next {
            Some(pr) => pr,
            None => {
                self.finish_probe_feed()?;
                return Ok(None);
            }
        };

        if pr.key.is_null() {
            // SQL NULL never matches; resolve immediately, never route.
            return Ok(match self.config.join_type {
                JoinType::Inner | JoinType::Semi => None,
                JoinType::LeftOuter => {
                    self.stats.rows_emitted += 1;
                    Some(Row::nulls(self.build_column_count).concat(&pr.row))
                }
                JoinType::Anti => {
                    self.stats.rows_emitted += 1;
                    Some(pr.row)
                }
            });
        }

        self.store.collect_matches(&pr.key, &mut self.matches);
        self.match_idx = 0;
        self.probe_row = Some(pr);
        self.state = State::ReadingFirstMatch;
        Ok(None)
    }

    /// Emit one match for the pending probe row, or complete the row
    fn step_match(&mut self) -> Result<Option<Row>> {
        if self.match_idx >= self.matches.len() {
            return self.complete_probe_row();
        }

        let idx = self.matches[self.match_idx] as usize;
        self.match_idx += 1;
        self.state = State::ReadingNextMatch;
        {
            let pr = self
                .probe_row
                .as_mut()
                .ok_or_else(|| Error::internal("match step without a probe row"))?;
            pr.had_match = true;
        }

        match self.config.join_type {
            JoinType::Semi => {
                // One emission per probe row; skip its other matches.
                self.match_idx = self.matches.len();
                let row = self.probe_row.as_ref().map(|pr| pr.row.clone());
                self.stats.rows_emitted += 1;
                Ok(row)
            }
            JoinType::Anti => {
                // Matched anti rows never reach the output.
                self.match_idx = self.matches.len();
                Ok(None)
            }
            JoinType::Inner | JoinType::LeftOuter => {
                let build_row = self.materialize_build_row(idx)?;
                let probe_row = self
                    .probe_row
                    .as_ref()
                    .ok_or_else(|| Error::internal("match step without a probe row"))?;
                self.stats.rows_emitted += 1;
                Ok(Some(build_row.concat(&probe_row.row)))
            }
        }
    }

    /// Rebuild the emitted build row, re-fetching from the source when
    /// references are preserved
    fn materialize_build_row(&mut self, idx: usize) -> Result<Row> {
        if self.config.preserve_references {
            let reference = self
                .store
                .row(idx)
                .reference
                .clone()
                .ok_or_else(|| Error::internal("stored row is missing its reference"))?;
            self.build.fetch(&reference)
        } else {
            Ok(self.store.row(idx).row.clone())
        }
    }

    /// The pending probe row has no more matches; route, save, or emit
    /// its unmatched form, then resume the feed
    fn complete_probe_row(&mut self) -> Result<Option<Row>> {
        let pr = self
            .probe_row
            .take()
            .ok_or_else(|| Error::internal("completing a probe row that was never read"))?;
        let matched = pr.prior_matched || pr.had_match;
        let resolved = self.config.join_type.first_match_only() && matched;
        self.state = if self.probe_feed.is_some() {
            State::ReadingProbeFromChunk
        } else {
            State::ReadingProbeFromInput
        };

        if let Some(route) = &mut self.current_route {
            // The in-memory table only held the build prefix; the row
            // may still match the spilled tail of its partition.
            if !resolved {
                route.write_probe_row(&ChunkRow {
                    row: pr.row,
                    key: pr.key,
                    matched,
                    reference: None,
                })?;
            }
            return Ok(None);
        }

        if let Some(refill) = &mut self.refill {
            if resolved {
                return Ok(None);
            }
            let last_batch = refill.exhausted;
            if last_batch && !self.config.join_type.preserves_unmatched_probe() {
                // Nothing will replay this row; drop it.
                return Ok(None);
            }
            if refill.save.is_none() {
                let flag = self.config.join_type.preserves_unmatched_probe();
                let save = ChunkFile::create(&self.spill_dir, flag, 0).map_err(|e| {
                    if self.config.allow_spill {
                        e
                    } else {
                        Error::ResourceExhausted {
                            budget: self.config.memory_budget,
                        }
                    }
                })?;
                refill.save = Some(save);
            }
            let save = refill.save.as_mut().ok_or_else(|| {
                Error::internal("multi-pass save file missing after creation")
            })?;
            save.write_row(&pr.row, &pr.key, matched, None)?;
            return Ok(None);
        }

        // Fully resolved in memory.
        if !matched {
            match self.config.join_type {
                JoinType::LeftOuter => {
                    self.stats.rows_emitted += 1;
                    return Ok(Some(Row::nulls(self.build_column_count).concat(&pr.row)));
                }
                JoinType::Anti => {
                    self.stats.rows_emitted += 1;
                    return Ok(Some(pr.row));
                }
                JoinType::Inner | JoinType::Semi => {}
            }
        }
        Ok(None)
    }

    /// The active probe feed hit end-of-data
    fn finish_probe_feed(&mut self) -> Result<()> {
        if let Some(set) = self.current_route.take() {
            // Routing is over; process the set before anything older.
            self.probe_feed = None;
            self.set_stack.push(set);
            self.state = State::LoadingNextPartition;
            return Ok(());
        }
        if self.refill.is_some() {
            return self.advance_refill();
        }
        if self.probe_feed.take().is_some() {
            self.stats.partitions_processed += 1;
            self.state = State::LoadingNextPartition;
            return Ok(());
        }
        self.state = State::Done;
        Ok(())
    }

    /// Move multi-pass probing to the next build batch, the final
    /// unmatched sweep, or completion
    fn advance_refill(&mut self) -> Result<()> {
        self.probe_feed = None;
        let mut refill = self
            .refill
            .take()
            .ok_or_else(|| Error::internal("refill state missing"))?;

        if refill.exhausted {
            match refill.save.take() {
                Some(mut save) if self.config.join_type.preserves_unmatched_probe() => {
                    save.rewind()?;
                    self.probe_feed = Some(save);
                    self.state = State::ReadingUnmatchedProbeRows;
                }
                _ => self.finish_refill_scope(),
            }
            return Ok(());
        }

        let mut prev_save = match refill.save.take() {
            Some(save) => save,
            None => {
                // Every probe row resolved already; the unread build
                // tail cannot contribute output.
                self.finish_refill_scope();
                return Ok(());
            }
        };

        // Reload the store with the next batch. When references are
        // preserved the input cursor is restored from the last stored
        // row first, since emission-time fetches may have moved it.
        let last_reference = self
            .store
            .last_row_stored()
            .and_then(|stored| stored.reference.clone());
        self.store.reset();
        self.stats.refill_batches += 1;
        if self.config.preserve_references && matches!(refill.feed, BuildFeed::Input) {
            if let Some(reference) = &last_reference {
                self.build.seek_to_reference(reference)?;
            }
        }
        loop {
            self.context.check_cancelled()?;
            let (row, key, reference) = match &mut refill.feed {
                BuildFeed::Input => match self.build.next()? {
                    None => {
                        refill.exhausted = true;
                        break;
                    }
                    Some(row) => {
                        self.stats.build_rows_read += 1;
                        let key = JoinKey::from_row(&row, &self.build_keys);
                        if key.is_null() {
                            self.stats.build_rows_with_null_key += 1;
                            continue;
                        }
                        let reference = if self.config.preserve_references {
                            Some(self.build.row_reference()?)
                        } else {
                            None
                        };
                        (row, key, reference)
                    }
                },
                BuildFeed::Chunk(chunk) => match chunk.read_row()? {
                    None => {
                        refill.exhausted = true;
                        break;
                    }
                    Some(rec) => {
                        if rec.key.is_null() {
                            continue;
                        }
                        (rec.row, rec.key, rec.reference)
                    }
                },
            };
            match self.store.insert(row, key, reference)? {
                InsertOutcome::Stored => {}
                InsertOutcome::DuplicateRejected => self.stats.duplicate_keys_rejected += 1,
                InsertOutcome::BufferFull => break,
            }
        }

        prev_save.rewind()?;
        self.probe_feed = Some(prev_save);
        self.refill = Some(refill);
        self.state = State::ReadingProbeFromChunk;
        Ok(())
    }

    fn finish_refill_scope(&mut self) {
        self.refill = None;
        self.state = if self.set_stack.is_empty() {
            State::Done
        } else {
            State::LoadingNextPartition
        };
    }

    /// Take the next chunk pair off the deepest pending set and reload
    /// its build chunk into the store
    fn load_next_partition(&mut self) -> Result<()> {
        let set = match self.set_stack.last_mut() {
            Some(set) => set,
            None => {
                self.state = State::Done;
                return Ok(());
            }
        };
        let level = set.level();
        let pair = match set.take_next_pair() {
            Some(pair) => pair,
            None => {
                self.set_stack.pop();
                return Ok(());
            }
        };
        let ChunkPair { mut build, probe } = pair;
        if probe.is_empty() {
            // No probe rows landed here; no join variant we execute can
            // produce output from the build side alone.
            self.stats.partitions_processed += 1;
            return Ok(());
        }

        log::trace!(
            "loading partition at level {}: {} build rows, {} probe rows",
            level,
            build.num_rows(),
            probe.num_rows()
        );
        build.rewind()?;
        self.store.reset();
        loop {
            self.context.check_cancelled()?;
            let rec = match build.read_row()? {
                Some(rec) => rec,
                None => break,
            };
            if rec.key.is_null() {
                continue;
            }
            match self.store.insert(rec.row, rec.key, rec.reference)? {
                InsertOutcome::Stored => {}
                InsertOutcome::DuplicateRejected => self.stats.duplicate_keys_rejected += 1,
                InsertOutcome::BufferFull => {
                    return self.overflow_during_reload(build, probe, level);
                }
            }
        }

        let mut probe = probe;
        probe.rewind()?;
        self.probe_feed = Some(probe);
        self.state = State::ReadingProbeFromChunk;
        Ok(())
    }

    /// A reloaded partition still does not fit: cascade into a nested
    /// set, or fall back to multi-pass probing at the depth cap
    fn overflow_during_reload(
        &mut self,
        mut build_chunk: ChunkFile,
        probe_chunk: ChunkFile,
        parent_level: u8,
    ) -> Result<()> {
        let next_level = parent_level.saturating_add(1);
        if next_level > self.config.max_spill_depth {
            log::warn!(
                "partition overflow at spill depth {} exceeds the cap of {}; \
                 switching to multi-pass probing",
                next_level,
                self.config.max_spill_depth
            );
            self.refill = Some(RefillState {
                feed: BuildFeed::Chunk(build_chunk),
                exhausted: false,
                save: None,
            });
        } else {
            self.stats.spill_events += 1;
            // Depth is 1-based: the initial spill is depth 1, a set at
            // nesting level L is depth L + 1.
            self.stats.peak_spill_depth =
                self.stats.peak_spill_depth.max(next_level.saturating_add(1));
            let remaining = build_chunk.rows_remaining() as usize;
            let chunk_count = plan_chunk_count(
                remaining,
                self.store.len(),
                self.store.bytes_used(),
                self.config.memory_budget,
                self.config.max_chunk_count,
            );
            log::debug!(
                "cascading spill to level {}: {} remaining rows into {} partitions",
                next_level,
                remaining,
                chunk_count
            );
            let mut set = PartitionSet::create(
                &self.spill_dir,
                chunk_count,
                next_level,
                self.probe_chunks_need_flag(),
                self.build_ref_len(),
            )?;
            loop {
                self.context.check_cancelled()?;
                let rec = match build_chunk.read_row()? {
                    Some(rec) => rec,
                    None => break,
                };
                if rec.key.is_null() {
                    continue;
                }
                set.write_build_row(&rec.row, &rec.key, rec.reference.as_ref())?;
            }
            self.current_route = Some(set);
        }

        let mut probe = probe_chunk;
        probe.rewind()?;
        self.probe_feed = Some(probe);
        self.state = State::ReadingProbeFromChunk;
        Ok(())
    }

    /// Final multi-pass sweep: emit every saved probe row whose flag
    /// never got set
    fn read_unmatched_row(&mut self) -> Result<Option<Row>> {
        let chunk = self
            .probe_feed
            .as_mut()
            .ok_or_else(|| Error::internal("unmatched sweep without a save file"))?;
        let rec = match chunk.read_row()? {
            Some(rec) => rec,
            None => {
                self.probe_feed = None;
                self.finish_refill_scope();
                return Ok(None);
            }
        };
        if rec.matched {
            return Ok(None);
        }
        self.stats.rows_emitted += 1;
        match self.config.join_type {
            JoinType::LeftOuter => Ok(Some(Row::nulls(self.build_column_count).concat(&rec.row))),
            JoinType::Anti => Ok(Some(rec.row)),
            JoinType::Inner | JoinType::Semi => {
                Err(Error::internal("unmatched sweep in a non-preserving join"))
            }
        }
    }

    fn probe_chunks_need_flag(&self) -> bool {
        self.config.join_type.preserves_unmatched_probe()
    }

    fn build_ref_len(&self) -> usize {
        if self.config.preserve_references {
            self.build.reference_len()
        } else {
            0
        }
    }

    fn abort(&mut self) {
        self.release();
        self.state = State::Aborted;
    }

    /// Drop chunk files and buffered rows on every exit path
    fn release(&mut self) {
        self.set_stack.clear();
        self.current_route = None;
        self.probe_feed = None;
        self.refill = None;
        self.probe_row = None;
        self.matches.clear();
        self.store.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::source::MaterializedSource;
    use crate::row;

    fn kv_rows(pairs: &[(i64, &str)]) -> Vec<Row> {
        pairs.iter().map(|(k, v)| row![*k, *v]).collect()
    }

    fn make_join(build: Vec<Row>, probe: Vec<Row>, config: HashJoinConfig) -> HashJoin {
        HashJoin::new(
            Box::new(MaterializedSource::new(build)),
            Box::new(MaterializedSource::new(probe)),
            vec![0],
            vec![0],
            2,
            config,
            ExecutionContext::new(),
        )
        .unwrap()
    }

    fn run(join: &mut HashJoin) -> Vec<Row> {
        join.open().unwrap();
        let mut out = Vec::new();
        while let Some(row) = join.next().unwrap() {
            out.push(row);
        }
        join.close().unwrap();
        out
    }

    fn sorted(rows: &[Row]) -> Vec<String> {
        let mut out: Vec<String> = rows.iter().map(Row::to_string).collect();
        out.sort();
        out
    }

    #[test]
    fn test_inner_join_in_memory() {
        let build = kv_rows(&[(1, "a"), (2, "b"), (1, "c")]);
        let probe = kv_rows(&[(1, "x"), (3, "y"), (2, "z")]);
        let mut join = make_join(build, probe, HashJoinConfig::default());
        let out = run(&mut join);
        assert_eq!(
            sorted(&out),
            vec!["(1, a, 1, x)", "(1, c, 1, x)", "(2, b, 2, z)"]
        );
        assert_eq!(join.stats().spill_events, 0);
    }

    #[test]
    fn test_duplicate_keys_fan_out_in_probe_order() {
        let build = kv_rows(&[(1, "first"), (1, "second")]);
        let probe = kv_rows(&[(1, "x")]);
        let mut join = make_join(build, probe, HashJoinConfig::default());
        let out = run(&mut join);
        // Matches surface in build insertion order.
        assert_eq!(out[0].to_string(), "(1, first, 1, x)");
        assert_eq!(out[1].to_string(), "(1, second, 1, x)");
    }

    #[test]
    fn test_left_outer_join_in_memory() {
        let build = kv_rows(&[(1, "a"), (2, "b")]);
        let probe = kv_rows(&[(1, "x"), (3, "y")]);
        let mut join = make_join(build, probe, HashJoinConfig::new(JoinType::LeftOuter));
        let out = run(&mut join);
        assert_eq!(sorted(&out), vec!["(1, a, 1, x)", "(NULL, NULL, 3, y)"]);
    }

    #[test]
    fn test_semi_join_emits_each_probe_row_once() {
        let build = kv_rows(&[(1, "a"), (1, "b"), (2, "c")]);
        let probe = kv_rows(&[(1, "x"), (2, "y"), (3, "z")]);
        let mut join = make_join(build, probe, HashJoinConfig::new(JoinType::Semi));
        let out = run(&mut join);
        assert_eq!(sorted(&out), vec!["(1, x)", "(2, y)"]);
    }

    #[test]
    fn test_anti_join_emits_unmatched_probe_rows() {
        let build = kv_rows(&[(1, "a")]);
        let probe = kv_rows(&[(1, "x"), (3, "y")]);
        let mut join = make_join(build, probe, HashJoinConfig::new(JoinType::Anti));
        let out = run(&mut join);
        assert_eq!(sorted(&out), vec!["(3, y)"]);
    }

    #[test]
    fn test_null_probe_keys() {
        use crate::core::{DataType, Value};
        let build = kv_rows(&[(1, "a")]);
        let probe = vec![
            row![1i64, "x"],
            Row::from_values(vec![Value::null(DataType::Integer), Value::text("n")]),
        ];

        // Inner: the NULL-key row vanishes.
        let mut join = make_join(build.clone(), probe.clone(), HashJoinConfig::default());
        assert_eq!(sorted(&run(&mut join)), vec!["(1, a, 1, x)"]);

        // Left outer: it surfaces NULL-extended.
        let mut join = make_join(build.clone(), probe.clone(), HashJoinConfig::new(JoinType::LeftOuter));
        assert_eq!(
            sorted(&run(&mut join)),
            vec!["(1, a, 1, x)", "(NULL, NULL, NULL, n)"]
        );

        // Anti: it is unmatched by definition.
        let mut join = make_join(build, probe, HashJoinConfig::new(JoinType::Anti));
        assert_eq!(sorted(&run(&mut join)), vec!["(NULL, n)"]);
    }

    #[test]
    fn test_null_build_keys_never_match() {
        use crate::core::{DataType, Value};
        let build = vec![
            Row::from_values(vec![Value::null(DataType::Integer), Value::text("n")]),
            row![1i64, "a"],
        ];
        let probe = kv_rows(&[(1, "x")]);
        let mut join = make_join(build, probe, HashJoinConfig::default());
        assert_eq!(sorted(&run(&mut join)), vec!["(1, a, 1, x)"]);
        assert_eq!(join.stats().build_rows_with_null_key, 1);
    }

    #[test]
    fn test_reject_duplicate_keys_end_to_end() {
        let build = kv_rows(&[(1, "first"), (1, "second")]);
        let probe = kv_rows(&[(1, "x")]);
        let config = HashJoinConfig::default().with_reject_duplicate_keys(true);
        let mut join = make_join(build, probe, config);
        let out = run(&mut join);
        assert_eq!(sorted(&out), vec!["(1, first, 1, x)"]);
        assert_eq!(join.stats().duplicate_keys_rejected, 1);
    }

    #[test]
    fn test_forced_spill_matches_in_memory_result() {
        let build = kv_rows(&[(1, "a"), (2, "b"), (1, "c")]);
        let probe = kv_rows(&[(1, "x"), (3, "y"), (2, "z")]);
        // A budget of one byte forces the spill path immediately.
        let config = HashJoinConfig::default().with_memory_budget(1);
        let mut join = make_join(build, probe, config);
        let out = run(&mut join);
        assert_eq!(
            sorted(&out),
            vec!["(1, a, 1, x)", "(1, c, 1, x)", "(2, b, 2, z)"]
        );
        assert!(join.stats().spill_events > 0);
    }

    #[test]
    fn test_spill_disabled_falls_back_to_multi_pass() {
        let build = kv_rows(&[(1, "a"), (2, "b"), (1, "c"), (3, "d")]);
        let probe = kv_rows(&[(1, "x"), (3, "y"), (2, "z")]);
        let config = HashJoinConfig::default()
            .with_memory_budget(1)
            .with_spill(false);
        let mut join = make_join(build, probe, config);
        let out = run(&mut join);
        assert_eq!(
            sorted(&out),
            vec!["(1, a, 1, x)", "(1, c, 1, x)", "(2, b, 2, z)", "(3, d, 3, y)"]
        );
        assert_eq!(join.stats().spill_events, 0);
        assert!(join.stats().refill_batches > 0);
    }

    #[test]
    fn test_cancellation_aborts_the_join() {
        let build = kv_rows(&[(1, "a")]);
        let probe = kv_rows(&[(1, "x")]);
        let context = ExecutionContext::new();
        let mut join = HashJoin::new(
            Box::new(MaterializedSource::new(build)),
            Box::new(MaterializedSource::new(probe)),
            vec![0],
            vec![0],
            2,
            HashJoinConfig::default(),
            context.clone(),
        )
        .unwrap();
        join.open().unwrap();
        context.cancel();
        assert_eq!(join.next(), Err(Error::Cancelled));
    }

    #[test]
    fn test_next_before_open_is_an_error() {
        let mut join = make_join(vec![], vec![], HashJoinConfig::default());
        assert!(join.next().is_err());
    }

    #[test]
    fn test_mismatched_key_lists_rejected() {
        let result = HashJoin::new(
            Box::new(MaterializedSource::new(vec![])),
            Box::new(MaterializedSource::new(vec![])),
            vec![0, 1],
            vec![0],
            2,
            HashJoinConfig::default(),
            ExecutionContext::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_inputs() {
        let mut join = make_join(vec![], vec![], HashJoinConfig::default());
        assert!(run(&mut join).is_empty());

        let mut join = make_join(
            vec![],
            kv_rows(&[(1, "x")]),
            HashJoinConfig::new(JoinType::LeftOuter),
        );
        assert_eq!(sorted(&run(&mut join)), vec!["(NULL, NULL, 1, x)"]);
    }
}
