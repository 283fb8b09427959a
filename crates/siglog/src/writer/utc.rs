//! UTC timestamp track: (sample_id, timestamp) anchors with their own
//! summary cascade.
//!
//! Leaves accumulate `utc_decimate_factor` at a time into level-0 chunks.
//! Each flushed chunk contributes one (first, last) pair to the level
//! above, so a level-k entry brackets `utc_decimate_factor^k` anchors.

use crate::chunk::{index_meta, track_meta, ChunkTag, ChunkWriter, IndexEntry, TrackKind, LEVEL_MAX};
use crate::def::UtcEntry;
use crate::error::{LogError, Result};

/// Per-signal UTC writer state.
pub(crate) struct UtcTrack {
    signal_id: u16,
    factor: usize,
    last_sample_id: Option<i64>,
    leaves: Vec<UtcEntry>,
    /// Pending (first, last) pairs per level ≥ 1.
    levels: Vec<Vec<(UtcEntry, UtcEntry)>>,
    indexes: Vec<Vec<IndexEntry>>,
}

impl UtcTrack {
    pub(crate) fn new(signal_id: u16, utc_decimate_factor: u32) -> Self {
        Self {
            signal_id,
            factor: utc_decimate_factor.max(2) as usize,
            last_sample_id: None,
            leaves: Vec::new(),
            levels: Vec::new(),
            indexes: vec![Vec::new()],
        }
    }

    /// Appends one anchor. Sample ids must strictly increase.
    pub(crate) fn push(&mut self, io: &mut ChunkWriter, entry: UtcEntry) -> Result<()> {
        if let Some(last) = self.last_sample_id {
            if entry.sample_id <= last {
                return Err(LogError::ParameterInvalid(format!(
                    "signal {}: utc sample_id {} does not advance past {}",
                    self.signal_id, entry.sample_id, last
                )));
            }
        }
        self.last_sample_id = Some(entry.sample_id);
        self.leaves.push(entry);
        if self.leaves.len() >= self.factor {
            self.flush_leaves(io)?;
        }
        Ok(())
    }

    fn flush_leaves(&mut self, io: &mut ChunkWriter) -> Result<()> {
        if self.leaves.is_empty() {
            return Ok(());
        }
        let mut payload = Vec::with_capacity(8 + self.leaves.len() * 16);
        payload.extend_from_slice(&(self.leaves.len() as u32).to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        for e in &self.leaves {
            payload.extend_from_slice(&e.sample_id.to_le_bytes());
            payload.extend_from_slice(&e.timestamp.to_le_bytes());
        }
        let offset = io.write_chunk(ChunkTag::Utc, track_meta(self.signal_id, 0), &payload)?;
        let first = self.leaves[0];
        let last = *self.leaves.last().expect("leaves not empty");
        self.indexes[0].push(IndexEntry { offset, first_key: first.sample_id });
        self.leaves.clear();
        self.push_summary(io, 1, (first, last))
    }

    fn push_summary(
        &mut self,
        io: &mut ChunkWriter,
        level: usize,
        pair: (UtcEntry, UtcEntry),
    ) -> Result<()> {
        if level > LEVEL_MAX as usize {
            return Ok(());
        }
        while self.levels.len() < level {
            self.levels.push(Vec::new());
        }
        while self.indexes.len() <= level {
            self.indexes.push(Vec::new());
        }
        self.levels[level - 1].push(pair);
        if self.levels[level - 1].len() >= self.factor {
            self.flush_summary(io, level, true)?;
        }
        Ok(())
    }

    fn flush_summary(&mut self, io: &mut ChunkWriter, level: usize, cascade: bool) -> Result<()> {
        let pending = std::mem::take(&mut self.levels[level - 1]);
        if pending.is_empty() {
            return Ok(());
        }
        let mut payload = Vec::with_capacity(8 + pending.len() * 32);
        payload.extend_from_slice(&(pending.len() as u32).to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        for (first, last) in &pending {
            payload.extend_from_slice(&first.sample_id.to_le_bytes());
            payload.extend_from_slice(&first.timestamp.to_le_bytes());
            payload.extend_from_slice(&last.sample_id.to_le_bytes());
            payload.extend_from_slice(&last.timestamp.to_le_bytes());
        }
        let offset =
            io.write_chunk(ChunkTag::Utc, track_meta(self.signal_id, level as u8), &payload)?;
        let first = pending[0].0;
        let last = pending.last().expect("pending not empty").1;
        self.indexes[level].push(IndexEntry { offset, first_key: first.sample_id });
        if cascade {
            self.push_summary(io, level + 1, (first, last))?;
        }
        Ok(())
    }

    /// Flushes partial buffers bottom-up and writes the index chunks.
    ///
    /// A partial top level is written without cascading: a parent entry
    /// would only bracket anchors the level already brackets.
    pub(crate) fn close(&mut self, io: &mut ChunkWriter) -> Result<()> {
        self.flush_leaves(io)?;
        let mut level = 1;
        while level <= self.levels.len() {
            let cascade = level < self.levels.len();
            self.flush_summary(io, level, cascade)?;
            level += 1;
        }

        for (level, entries) in self.indexes.iter().enumerate() {
            if entries.is_empty() {
                continue;
            }
            let mut payload = Vec::with_capacity(8 + entries.len() * 16);
            payload.extend_from_slice(&(entries.len() as u32).to_le_bytes());
            payload.extend_from_slice(&0u32.to_le_bytes());
            for e in entries {
                payload.extend_from_slice(&e.offset.to_le_bytes());
                payload.extend_from_slice(&e.first_key.to_le_bytes());
            }
            io.write_chunk(
                ChunkTag::Index,
                index_meta(self.signal_id, level as u8, TrackKind::Utc),
                &payload,
            )?;
        }
        Ok(())
    }
}
