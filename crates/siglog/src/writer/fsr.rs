//! Fixed-sample-rate track: the level-0 sample buffer and the summary
//! cascade above it.
//!
//! Samples append into a level-0 buffer of `samples_per_data` samples.
//! Every `sample_decimate_factor` samples close one level-1 summary entry;
//! every `summary_decimate_factor` entries at level k close one entry at
//! level k+1. Full buffers flush as data/summary chunks and are recorded in
//! the per-level index written at close.
//!
//! A write at a sample id beyond the expected next id triggers the skip
//! protocol: the gap is stored as explicit fill (NaN for floats, the zero
//! bit pattern for integers). For float signals non-finite values are
//! excluded from summary statistics, so a fully skipped window reads back
//! as NaN statistics.

use crate::chunk::{index_meta, track_meta, ChunkTag, ChunkWriter, IndexEntry, TrackKind, LEVEL_MAX};
use crate::datatype::BaseType;
use crate::def::SignalDef;
use crate::error::{LogError, Result};
use crate::stats::Statistics;
use tracing::debug;

/// State of one summary level (level k ≥ 1).
struct LevelState {
    /// Pending entries, flushed as one summary chunk at `entries_per_summary`.
    entries: Vec<Statistics>,
    /// Sample id at which `entries[0]`'s window starts.
    first: i64,
    /// Accumulator toward one entry of the level above.
    group: Statistics,
    /// Entries merged into `group` so far.
    group_count: u32,
    /// Sample id at which the current group's window starts.
    group_first: i64,
}

impl LevelState {
    fn new(first: i64) -> Self {
        Self {
            entries: Vec::new(),
            first,
            group: Statistics::new(),
            group_count: 0,
            group_first: first,
        }
    }
}

/// Per-signal FSR writer state.
pub(crate) struct FsrTrack {
    def: SignalDef,
    omit_data: bool,
    ever_omitted: bool,
    /// Next expected absolute sample id.
    next_sample_id: i64,
    /// Level-0 packed sample buffer, always `bytes_for_samples(samples_per_data)`.
    buf: Vec<u8>,
    buf_count: u32,
    buf_first: i64,
    /// Level-1 entry accumulator over raw samples.
    acc: Statistics,
    acc_count: u32,
    acc_first: i64,
    levels: Vec<LevelState>,
    /// `indexes[0]` lists data chunks, `indexes[k]` level-k summary chunks.
    indexes: Vec<Vec<IndexEntry>>,
}

impl FsrTrack {
    pub(crate) fn new(def: SignalDef) -> Self {
        let first = def.sample_id_offset;
        let buf_bytes = def.data_type.bytes_for_samples(def.samples_per_data as usize);
        Self {
            def,
            omit_data: false,
            ever_omitted: false,
            next_sample_id: first,
            buf: vec![0u8; buf_bytes],
            buf_count: 0,
            buf_first: first,
            acc: Statistics::new(),
            acc_count: 0,
            acc_first: first,
            levels: Vec::new(),
            indexes: vec![Vec::new()],
        }
    }

    pub(crate) fn def(&self) -> &SignalDef {
        &self.def
    }

    /// Number of samples covered so far, gaps included.
    pub(crate) fn sample_count(&self) -> i64 {
        self.next_sample_id - self.def.sample_id_offset
    }

    pub(crate) fn ever_omitted(&self) -> bool {
        self.ever_omitted
    }

    pub(crate) fn set_omit_data(&mut self, omit: bool) {
        self.omit_data = omit;
        self.ever_omitted |= omit;
    }

    /// Samples covered by one entry at `level` (1-based).
    fn span(&self, level: usize) -> i64 {
        let mut span = self.def.sample_decimate_factor as i64;
        for _ in 1..level {
            span *= self.def.summary_decimate_factor as i64;
        }
        span
    }

    /// Appends `sample_count` samples starting at `sample_id`.
    pub(crate) fn fsr(
        &mut self,
        io: &mut ChunkWriter,
        sample_id: i64,
        data: &[u8],
        sample_count: u32,
    ) -> Result<()> {
        if sample_id < self.next_sample_id {
            return Err(LogError::ParameterInvalid(format!(
                "signal {}: sample_id {} precedes expected {}",
                self.def.signal_id, sample_id, self.next_sample_id
            )));
        }
        let mut gap = sample_id - self.next_sample_id;
        if gap > 0 {
            debug!(
                signal_id = self.def.signal_id,
                gap, sample_id, "sample skip, storing fill"
            );
        }
        while gap > 0 {
            let room = (self.def.samples_per_data - self.buf_count) as i64;
            let n = gap.min(room) as u32;
            self.append_fill(io, n)?;
            gap -= i64::from(n);
        }

        let mut src_start = 0usize;
        let mut remaining = sample_count;
        while remaining > 0 {
            let room = self.def.samples_per_data - self.buf_count;
            let n = remaining.min(room);
            self.append_data(io, data, src_start, n)?;
            src_start += n as usize;
            remaining -= n;
        }
        Ok(())
    }

    fn append_data(
        &mut self,
        io: &mut ChunkWriter,
        src: &[u8],
        src_start: usize,
        n: u32,
    ) -> Result<()> {
        let dt = self.def.data_type;
        dt.copy_samples(src, src_start, &mut self.buf, self.buf_count as usize, n as usize);
        let float = dt.base_type() == BaseType::Float;
        for i in 0..n as usize {
            let v = dt.read_sample(src, src_start + i);
            let sid = self.next_sample_id + i as i64;
            self.feed(io, if float && !v.is_finite() { None } else { Some(v) }, sid)?;
        }
        self.after_append(io, n)
    }

    fn append_fill(&mut self, io: &mut ChunkWriter, n: u32) -> Result<()> {
        let dt = self.def.data_type;
        dt.write_fill(&mut self.buf, self.buf_count as usize, n as usize);
        let value = match dt.base_type() {
            BaseType::Float => None,
            _ => Some(0.0),
        };
        for i in 0..n {
            let sid = self.next_sample_id + i64::from(i);
            self.feed(io, value, sid)?;
        }
        self.after_append(io, n)
    }

    /// Advances the level-1 accumulator by one sample position.
    fn feed(&mut self, io: &mut ChunkWriter, value: Option<f64>, sample_id: i64) -> Result<()> {
        if self.acc_count == 0 {
            self.acc_first = sample_id;
        }
        if let Some(v) = value {
            self.acc.add(v);
        }
        self.acc_count += 1;
        if self.acc_count == self.def.sample_decimate_factor {
            let stat = self.acc;
            let first = self.acc_first;
            self.acc = Statistics::new();
            self.acc_count = 0;
            self.push_entry(io, 1, stat, first)?;
        }
        Ok(())
    }

    fn after_append(&mut self, io: &mut ChunkWriter, n: u32) -> Result<()> {
        self.buf_count += n;
        self.next_sample_id += i64::from(n);
        if self.buf_count == self.def.samples_per_data {
            self.flush_data_chunk(io)?;
        }
        Ok(())
    }

    fn flush_data_chunk(&mut self, io: &mut ChunkWriter) -> Result<()> {
        if self.buf_count == 0 {
            return Ok(());
        }
        if !self.omit_data {
            let dt = self.def.data_type;
            let byte_count = dt.bytes_for_samples(self.buf_count as usize);
            let mut payload = Vec::with_capacity(16 + byte_count);
            payload.extend_from_slice(&self.buf_first.to_le_bytes());
            payload.extend_from_slice(&self.buf_count.to_le_bytes());
            payload.extend_from_slice(&0u32.to_le_bytes());
            payload.extend_from_slice(&self.buf[..byte_count]);
            let offset =
                io.write_chunk(ChunkTag::Data, track_meta(self.def.signal_id, 0), &payload)?;
            self.indexes[0].push(IndexEntry { offset, first_key: self.buf_first });
        }
        self.buf_first += i64::from(self.buf_count);
        self.buf_count = 0;
        self.buf.fill(0);
        Ok(())
    }

    /// Inserts one summary entry at `level` (1-based), cascading upward.
    fn push_entry(
        &mut self,
        io: &mut ChunkWriter,
        level: usize,
        stat: Statistics,
        first: i64,
    ) -> Result<()> {
        if level > LEVEL_MAX as usize {
            return Ok(());
        }
        while self.levels.len() < level {
            self.levels.push(LevelState::new(first));
        }
        while self.indexes.len() <= level {
            self.indexes.push(Vec::new());
        }

        let factor = self.def.summary_decimate_factor;
        let capacity = self.def.entries_per_summary as usize;
        let (flush, carry) = {
            let ls = &mut self.levels[level - 1];
            if ls.entries.is_empty() {
                ls.first = first;
            }
            if ls.group_count == 0 {
                ls.group_first = first;
            }
            ls.entries.push(stat);
            ls.group.merge(&stat);
            ls.group_count += 1;
            let carry = if ls.group_count == factor {
                let c = (ls.group, ls.group_first);
                ls.group = Statistics::new();
                ls.group_count = 0;
                Some(c)
            } else {
                None
            };
            (ls.entries.len() >= capacity, carry)
        };

        if flush {
            self.flush_summary_chunk(io, level)?;
        }
        if let Some((group, group_first)) = carry {
            self.push_entry(io, level + 1, group, group_first)?;
        }
        Ok(())
    }

    fn flush_summary_chunk(&mut self, io: &mut ChunkWriter, level: usize) -> Result<()> {
        let span = self.span(level);
        let ls = &mut self.levels[level - 1];
        if ls.entries.is_empty() {
            return Ok(());
        }
        let mut payload = Vec::with_capacity(16 + ls.entries.len() * 32);
        payload.extend_from_slice(&ls.first.to_le_bytes());
        payload.extend_from_slice(&(ls.entries.len() as u32).to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        for stat in &ls.entries {
            stat.summary().write_to(&mut payload);
        }
        let first = ls.first;
        let count = ls.entries.len() as i64;
        ls.entries.clear();
        ls.first = first + count * span;
        let offset = io.write_chunk(
            ChunkTag::Summary,
            track_meta(self.def.signal_id, level as u8),
            &payload,
        )?;
        self.indexes[level].push(IndexEntry { offset, first_key: first });
        Ok(())
    }

    /// Flushes every partial buffer bottom-up and writes the per-level
    /// index chunks.
    pub(crate) fn close(&mut self, io: &mut ChunkWriter) -> Result<()> {
        self.flush_data_chunk(io)?;
        if self.acc_count > 0 {
            let stat = self.acc;
            let first = self.acc_first;
            self.acc = Statistics::new();
            self.acc_count = 0;
            self.push_entry(io, 1, stat, first)?;
        }
        let mut level = 1;
        while level <= self.levels.len() {
            if level < self.levels.len() {
                let ls = &mut self.levels[level - 1];
                if ls.group_count > 0 {
                    let group = ls.group;
                    let group_first = ls.group_first;
                    ls.group = Statistics::new();
                    ls.group_count = 0;
                    self.push_entry(io, level + 1, group, group_first)?;
                }
            }
            self.flush_summary_chunk(io, level)?;
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
                index_meta(self.def.signal_id, level as u8, TrackKind::Samples),
                &payload,
            )?;
        }
        Ok(())
    }
}
