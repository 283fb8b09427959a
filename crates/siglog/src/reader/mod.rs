//! Log file reader: chunk index, range reads with gap regeneration, the
//! multi-resolution statistics resolver, and the UTC time map.
//!
//! Opening a file walks the chain heads recorded in the root index chunk.
//! When the root index is missing or corrupt (a torn tail), the reader
//! falls back to a forward scan that collects every complete chunk and
//! reconstructs the per-signal indexes from the chunks themselves.
//!
//! The statistics resolver serves each output window by recomputing the
//! raw-sample head and tail exactly and merging stored summary entries at
//! the highest fully-covered level in between. Windows narrower than one
//! level-1 entry are always served from raw samples.

use crate::chunk::{
    self, chunk_span, meta_kind, meta_level, meta_signal_id, ChunkHeader, ChunkTag, FileHeader,
    IndexEntry, RootIndex, TrackKind, FILE_HEADER_SIZE, ROOT_SIGNAL_FLAG_DATA_OMITTED,
};
use crate::datatype::{BaseType, DataType};
use crate::def::{Annotation, AnnotationType, SignalDef, SourceDef, StorageType, UtcEntry};
use crate::error::{LogError, Result};
use crate::stats::{Statistics, SummaryEntry};
use crate::writer::USER_DATA_META_MAX;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use tracing::{debug, warn};

/// Per-signal reader state.
struct SignalState {
    def: SignalDef,
    sample_count: i64,
    data_omitted: bool,
    /// Samples track: `indexes[0]` data chunks, `indexes[k]` level-k
    /// summary chunks, keyed by first sample id.
    indexes: Vec<Vec<IndexEntry>>,
    /// UTC leaf chunks, keyed by first sample id.
    utc_index: Vec<IndexEntry>,
    /// Annotation leaf chunks, keyed by timestamp.
    anno_index: Vec<IndexEntry>,
    /// Lazily built (sample_id, timestamp) table.
    tmap: Option<Vec<UtcEntry>>,
}

impl SignalState {
    fn new(def: SignalDef) -> Self {
        Self {
            def,
            sample_count: 0,
            data_omitted: false,
            indexes: vec![Vec::new()],
            utc_index: Vec::new(),
            anno_index: Vec::new(),
            tmap: None,
        }
    }

    /// Samples covered by one summary entry at `level` (1-based).
    fn span(&self, level: usize) -> i64 {
        let mut span = self.def.sample_decimate_factor as i64;
        for _ in 1..level {
            span *= self.def.summary_decimate_factor as i64;
        }
        span
    }

    fn sample_end(&self) -> i64 {
        self.def.sample_id_offset + self.sample_count
    }
}

/// One-slot cache of the most recently parsed summary chunk.
struct SummaryCache {
    signal_id: u16,
    level: usize,
    first: i64,
    entries: Vec<SummaryEntry>,
}

/// Log file reader. All operations are synchronous and single-threaded.
pub struct Reader {
    file: File,
    header: FileHeader,
    sources: Vec<SourceDef>,
    signals: Vec<SignalDef>,
    tracks: BTreeMap<u16, SignalState>,
    user_data_head: u64,
    summary_cache: Option<SummaryCache>,
}

impl Reader {
    /// Opens a log file.
    ///
    /// # Errors
    ///
    /// Returns `Truncated` if no complete chunk exists, `Unsupported` for a
    /// foreign file, `UnsupportedVersion` for a newer format.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let header = chunk::read_file_header(&mut file)?;
        let mut reader = Self {
            file,
            header,
            sources: Vec::new(),
            signals: Vec::new(),
            tracks: BTreeMap::new(),
            user_data_head: 0,
            summary_cache: None,
        };
        if header.root_index_offset != 0 {
            match reader.load_from_root() {
                Ok(()) => {
                    reader.finish_tables();
                    return Ok(reader);
                }
                Err(e) => {
                    warn!(%e, "root index unreadable, falling back to forward scan");
                    reader.reset_tables();
                }
            }
        }
        reader.load_from_scan()?;
        reader.finish_tables();
        Ok(reader)
    }

    fn reset_tables(&mut self) {
        self.sources.clear();
        self.signals.clear();
        self.tracks.clear();
        self.user_data_head = 0;
    }

    /// Prepends the implicit id-0 source/signal and sorts the tables.
    fn finish_tables(&mut self) {
        if !self.sources.iter().any(|s| s.source_id == 0) {
            self.sources.push(SourceDef::global_default());
        }
        if !self.signals.iter().any(|s| s.signal_id == 0) {
            self.signals.push(SignalDef::global_default());
        }
        self.sources.sort_by_key(|s| s.source_id);
        self.signals.sort_by_key(|s| s.signal_id);
        for def in &self.signals {
            self.tracks
                .entry(def.signal_id)
                .or_insert_with(|| SignalState::new(def.clone()));
        }
    }

    fn load_from_root(&mut self) -> Result<()> {
        let (header, payload) = chunk::read_chunk(&mut self.file, self.header.root_index_offset)?;
        if header.tag != ChunkTag::End {
            return Err(LogError::ParameterInvalid("root pointer is not an end chunk".into()));
        }
        let root = RootIndex::decode_payload(&payload)?;

        let mut index_chains: Vec<(u16, u64)> = Vec::new();
        let mut source_head = 0u64;
        let mut signal_head = 0u64;
        for c in &root.chains {
            match c.tag {
                ChunkTag::SourceDef => source_head = c.head,
                ChunkTag::SignalDef => signal_head = c.head,
                ChunkTag::UserData => self.user_data_head = c.head,
                ChunkTag::Index => index_chains.push((c.chunk_meta, c.tail)),
                _ => {}
            }
        }

        let mut offset = source_head;
        while offset != 0 {
            let (h, payload) = chunk::read_chunk(&mut self.file, offset)?;
            self.sources.push(SourceDef::decode_payload(&payload)?);
            offset = h.offset_next;
        }
        let mut offset = signal_head;
        while offset != 0 {
            let (h, payload) = chunk::read_chunk(&mut self.file, offset)?;
            let def = SignalDef::decode_payload(&payload)?;
            self.tracks
                .insert(def.signal_id, SignalState::new(def.clone()));
            self.signals.push(def);
            offset = h.offset_next;
        }

        for s in &root.signals {
            if let Some(st) = self.tracks.get_mut(&s.signal_id) {
                st.sample_count = s.sample_count;
                st.data_omitted = s.flags & ROOT_SIGNAL_FLAG_DATA_OMITTED != 0;
            }
        }

        for (meta, chunk_offset) in index_chains {
            let (_, payload) = chunk::read_chunk(&mut self.file, chunk_offset)?;
            let entries = parse_index_payload(&payload)?;
            let signal_id = meta_signal_id(meta);
            let level = meta_level(meta) as usize;
            let kind = meta_kind(meta).ok_or_else(|| {
                LogError::ParameterInvalid(format!("bad index chunk meta {meta:#06x}"))
            })?;
            // Missing entries cover the implicit global signal's annotations.
            let st = self
                .tracks
                .entry(signal_id)
                .or_insert_with(|| SignalState::new(SignalDef::global_default()));
            match kind {
                TrackKind::Samples => {
                    while st.indexes.len() <= level {
                        st.indexes.push(Vec::new());
                    }
                    st.indexes[level] = entries;
                }
                TrackKind::Utc => {
                    if level == 0 {
                        st.utc_index = entries;
                    }
                }
                TrackKind::Annotation => {
                    if level == 0 {
                        st.anno_index = entries;
                    }
                }
            }
        }
        Ok(())
    }

    /// Forward scan: collect every complete chunk, skipping torn payloads,
    /// and rebuild the tables the root index would have provided.
    fn load_from_scan(&mut self) -> Result<()> {
        let mut offset = FILE_HEADER_SIZE;
        let mut chunk_count = 0u64;
        let mut index_chunks: Vec<(u16, Vec<IndexEntry>)> = Vec::new();
        let mut rebuilt: BTreeMap<(u16, u8, u8), Vec<IndexEntry>> = BTreeMap::new();
        let mut data_end: BTreeMap<u16, i64> = BTreeMap::new();
        let mut summary_end: BTreeMap<u16, i64> = BTreeMap::new();

        loop {
            let header = match chunk::read_chunk_header(&mut self.file, offset) {
                Ok(h) => h,
                Err(_) => break,
            };
            let next = offset + chunk_span(header.payload_length);
            match chunk::read_chunk(&mut self.file, offset) {
                Ok((_, payload)) => {
                    chunk_count += 1;
                    self.scan_chunk(
                        &header,
                        offset,
                        &payload,
                        &mut index_chunks,
                        &mut rebuilt,
                        &mut data_end,
                        &mut summary_end,
                    );
                }
                Err(e) => {
                    warn!(offset, %e, "skipping torn chunk payload");
                }
            }
            offset = next;
        }
        if chunk_count == 0 {
            return Err(LogError::Truncated);
        }
        debug!(chunk_count, "forward scan complete");

        // Prefer written index chunks; fall back to per-chunk reconstruction.
        let mut have_index: BTreeMap<(u16, u8, u8), Vec<IndexEntry>> = BTreeMap::new();
        for (meta, entries) in index_chunks {
            let kind = match meta_kind(meta) {
                Some(k) => k,
                None => continue,
            };
            have_index.insert((meta_signal_id(meta), kind as u8, meta_level(meta)), entries);
        }
        for (key, entries) in rebuilt {
            have_index.entry(key).or_insert(entries);
        }
        for ((signal_id, kind, level), entries) in have_index {
            let st = self
                .tracks
                .entry(signal_id)
                .or_insert_with(|| SignalState::new(SignalDef::global_default()));
            match kind {
                k if k == TrackKind::Samples as u8 => {
                    while st.indexes.len() <= level as usize {
                        st.indexes.push(Vec::new());
                    }
                    st.indexes[level as usize] = entries;
                }
                k if k == TrackKind::Utc as u8 => {
                    if level == 0 {
                        st.utc_index = entries;
                    }
                }
                _ => {
                    if level == 0 {
                        st.anno_index = entries;
                    }
                }
            }
        }

        for (signal_id, st) in self.tracks.iter_mut() {
            if let Some(end) = data_end.get(signal_id) {
                st.sample_count = end - st.def.sample_id_offset;
            } else if let Some(end) = summary_end.get(signal_id) {
                st.sample_count = end - st.def.sample_id_offset;
                st.data_omitted = true;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_chunk(
        &mut self,
        header: &ChunkHeader,
        offset: u64,
        payload: &[u8],
        index_chunks: &mut Vec<(u16, Vec<IndexEntry>)>,
        rebuilt: &mut BTreeMap<(u16, u8, u8), Vec<IndexEntry>>,
        data_end: &mut BTreeMap<u16, i64>,
        summary_end: &mut BTreeMap<u16, i64>,
    ) {
        let meta = header.chunk_meta;
        match header.tag {
            ChunkTag::SourceDef => {
                if let Ok(def) = SourceDef::decode_payload(payload) {
                    self.sources.push(def);
                }
            }
            ChunkTag::SignalDef => {
                if let Ok(def) = SignalDef::decode_payload(payload) {
                    self.tracks
                        .insert(def.signal_id, SignalState::new(def.clone()));
                    self.signals.push(def);
                }
            }
            ChunkTag::UserData => {
                if self.user_data_head == 0 {
                    self.user_data_head = offset;
                }
            }
            ChunkTag::Index => {
                if let Ok(entries) = parse_index_payload(payload) {
                    index_chunks.push((meta, entries));
                }
            }
            ChunkTag::Data => {
                if payload.len() >= 16 {
                    let first = i64::from_le_bytes(payload[0..8].try_into().unwrap());
                    let count = u32::from_le_bytes(payload[8..12].try_into().unwrap());
                    let signal_id = meta_signal_id(meta);
                    rebuilt
                        .entry((signal_id, TrackKind::Samples as u8, 0))
                        .or_default()
                        .push(IndexEntry { offset, first_key: first });
                    let end = first + i64::from(count);
                    data_end
                        .entry(signal_id)
                        .and_modify(|e| *e = (*e).max(end))
                        .or_insert(end);
                }
            }
            ChunkTag::Summary => {
                if payload.len() >= 16 {
                    let first = i64::from_le_bytes(payload[0..8].try_into().unwrap());
                    let count = u32::from_le_bytes(payload[8..12].try_into().unwrap());
                    let signal_id = meta_signal_id(meta);
                    let level = meta_level(meta);
                    rebuilt
                        .entry((signal_id, TrackKind::Samples as u8, level))
                        .or_default()
                        .push(IndexEntry { offset, first_key: first });
                    if level == 1 {
                        if let Some(st) = self.tracks.get(&signal_id) {
                            let end = first + i64::from(count) * st.span(1);
                            summary_end
                                .entry(signal_id)
                                .and_modify(|e| *e = (*e).max(end))
                                .or_insert(end);
                        }
                    }
                }
            }
            ChunkTag::Utc => {
                if meta_level(meta) == 0 && payload.len() >= 24 {
                    let first = i64::from_le_bytes(payload[8..16].try_into().unwrap());
                    rebuilt
                        .entry((meta_signal_id(meta), TrackKind::Utc as u8, 0))
                        .or_default()
                        .push(IndexEntry { offset, first_key: first });
                }
            }
            ChunkTag::Annotation => {
                if meta_level(meta) == 0 && payload.len() >= 20 {
                    let ts = i64::from_le_bytes(payload[0..8].try_into().unwrap());
                    rebuilt
                        .entry((meta_signal_id(meta), TrackKind::Annotation as u8, 0))
                        .or_default()
                        .push(IndexEntry { offset, first_key: ts });
                }
            }
            ChunkTag::End => {}
        }
    }

    /// File creation time, fixed-point UTC.
    pub fn created(&self) -> i64 {
        self.header.created
    }

    /// Source table, ascending by id, with the implicit source 0.
    pub fn sources(&self) -> &[SourceDef] {
        &self.sources
    }

    /// Signal table, ascending by id, with the implicit signal 0.
    pub fn signals(&self) -> &[SignalDef] {
        &self.signals
    }

    fn track(&self, signal_id: u16) -> Result<&SignalState> {
        self.tracks
            .get(&signal_id)
            .ok_or_else(|| LogError::NotFound(format!("signal {signal_id}")))
    }

    /// Number of samples stored for an FSR signal, gaps included.
    pub fn fsr_length(&self, signal_id: u16) -> Result<i64> {
        Ok(self.track(signal_id)?.sample_count)
    }

    /// Reads `length` packed samples starting at absolute id `start`.
    ///
    /// Gaps regenerate as NaN for float signals and zero bits for integer
    /// signals.
    pub fn fsr(&mut self, signal_id: u16, start: i64, length: i64) -> Result<Vec<u8>> {
        let Self { file, tracks, .. } = self;
        let st = tracks
            .get(&signal_id)
            .ok_or_else(|| LogError::NotFound(format!("signal {signal_id}")))?;
        if st.data_omitted {
            return Err(LogError::Unsupported(format!(
                "signal {signal_id} was recorded without raw data"
            )));
        }
        validate_range(st, start, length)?;
        read_range_bytes(file, st, start, length)
    }

    /// Reads f32 samples from an F32 signal.
    pub fn fsr_f32(&mut self, signal_id: u16, start: i64, length: i64) -> Result<Vec<f32>> {
        if self.track(signal_id)?.def.data_type != DataType::F32 {
            return Err(LogError::ParameterInvalid(format!(
                "signal {signal_id} is not F32"
            )));
        }
        let bytes = self.fsr(signal_id, start, length)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes(b.try_into().unwrap()))
            .collect())
    }

    /// Reads f64 samples from an F64 signal.
    pub fn fsr_f64(&mut self, signal_id: u16, start: i64, length: i64) -> Result<Vec<f64>> {
        if self.track(signal_id)?.def.data_type != DataType::F64 {
            return Err(LogError::ParameterInvalid(format!(
                "signal {signal_id} is not F64"
            )));
        }
        let bytes = self.fsr(signal_id, start, length)?;
        Ok(bytes
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes(b.try_into().unwrap()))
            .collect())
    }

    /// Computes `length` windows of {mean, std, min, max}, each covering
    /// `increment` samples starting at `start`.
    ///
    /// Windows narrower than one level-1 summary entry are always computed
    /// from raw samples. Wider windows recompute their raw head and tail
    /// exactly and merge whole summary entries at the highest feasible
    /// level in between.
    pub fn fsr_statistics(
        &mut self,
        signal_id: u16,
        start: i64,
        increment: i64,
        length: i64,
    ) -> Result<Vec<SummaryEntry>> {
        let Self {
            file,
            tracks,
            summary_cache,
            ..
        } = self;
        let st = tracks
            .get(&signal_id)
            .ok_or_else(|| LogError::NotFound(format!("signal {signal_id}")))?;
        if increment < 1 || length < 1 {
            return Err(LogError::ParameterInvalid(
                "increment and length must be positive".into(),
            ));
        }
        validate_range(st, start, increment * length)?;

        let sdf = st.def.sample_decimate_factor as i64;
        let top = st.indexes.len().saturating_sub(1);
        let mut out = Vec::with_capacity(length as usize);
        for i in 0..length {
            let s = start + i * increment;
            let e = s + increment;
            let stats = if increment < sdf && !st.data_omitted {
                raw_stats(file, st, s, e)?
            } else {
                cover_level(file, st, summary_cache, signal_id, top, s, e)?
            };
            out.push(stats.summary());
        }
        Ok(out)
    }

    /// Streams annotations with timestamp ≥ `from_timestamp` in write
    /// order. The callback returns true to continue.
    pub fn annotations<F>(&mut self, signal_id: u16, from_timestamp: i64, mut cbk: F) -> Result<()>
    where
        F: FnMut(&Annotation) -> bool,
    {
        let Self { file, tracks, .. } = self;
        let st = tracks
            .get(&signal_id)
            .ok_or_else(|| LogError::NotFound(format!("signal {signal_id}")))?;
        let start = st.anno_index.partition_point(|e| e.first_key < from_timestamp);
        for entry in &st.anno_index[start..] {
            let (_, payload) = chunk::read_chunk(file, entry.offset)?;
            let annotation = parse_annotation_payload(&payload)?;
            if !cbk(&annotation) {
                break;
            }
        }
        Ok(())
    }

    /// Iterates user data in write order. The callback receives the
    /// caller's chunk_meta, the storage type and the payload, and returns
    /// true to continue.
    pub fn user_data<F>(&mut self, mut cbk: F) -> Result<()>
    where
        F: FnMut(u16, StorageType, &[u8]) -> bool,
    {
        let mut offset = self.user_data_head;
        while offset != 0 {
            let (header, payload) = chunk::read_chunk(&mut self.file, offset)?;
            let storage = StorageType::from_u8((header.chunk_meta >> 12) as u8)
                .unwrap_or(StorageType::Binary);
            if !cbk(header.chunk_meta & USER_DATA_META_MAX, storage, &payload) {
                break;
            }
            offset = header.offset_next;
        }
        Ok(())
    }

    /// Streams UTC entries with sample_id ≥ `from_sample_id` in batches.
    /// The callback returns true to continue.
    pub fn utc<F>(&mut self, signal_id: u16, from_sample_id: i64, mut cbk: F) -> Result<()>
    where
        F: FnMut(&[UtcEntry]) -> bool,
    {
        let Self { file, tracks, .. } = self;
        let st = tracks
            .get(&signal_id)
            .ok_or_else(|| LogError::NotFound(format!("signal {signal_id}")))?;
        let pos = st.utc_index.partition_point(|e| e.first_key <= from_sample_id);
        let start = pos.saturating_sub(1);
        for entry in &st.utc_index[start..] {
            let (_, payload) = chunk::read_chunk(file, entry.offset)?;
            let entries = parse_utc_payload(&payload)?;
            let skip = entries.partition_point(|e| e.sample_id < from_sample_id);
            if skip < entries.len() && !cbk(&entries[skip..]) {
                break;
            }
        }
        Ok(())
    }

    fn tmap(&mut self, signal_id: u16) -> Result<&[UtcEntry]> {
        let Self { file, tracks, .. } = self;
        let st = tracks
            .get_mut(&signal_id)
            .ok_or_else(|| LogError::NotFound(format!("signal {signal_id}")))?;
        if st.tmap.is_none() {
            let mut entries = Vec::new();
            for e in &st.utc_index {
                let (_, payload) = chunk::read_chunk(file, e.offset)?;
                entries.extend(parse_utc_payload(&payload)?);
            }
            st.tmap = Some(entries);
        }
        Ok(st.tmap.as_deref().expect("tmap just built"))
    }

    /// Number of UTC anchors recorded for a signal.
    pub fn tmap_length(&mut self, signal_id: u16) -> Result<i64> {
        Ok(self.tmap(signal_id)?.len() as i64)
    }

    /// Returns UTC anchor `index`.
    pub fn tmap_get(&mut self, signal_id: u16, index: i64) -> Result<UtcEntry> {
        let tmap = self.tmap(signal_id)?;
        if index < 0 || index as usize >= tmap.len() {
            return Err(LogError::ParameterInvalid(format!(
                "tmap index {index} outside 0..{}",
                tmap.len()
            )));
        }
        Ok(tmap[index as usize])
    }

    /// Maps an absolute sample id to a UTC timestamp by piecewise-linear
    /// interpolation over the time map.
    pub fn sample_id_to_timestamp(&mut self, signal_id: u16, sample_id: i64) -> Result<i64> {
        let rate = self.track(signal_id)?.def.sample_rate;
        let tmap = self.tmap(signal_id)?;
        match tmap {
            [] => Err(LogError::NotFound(format!("signal {signal_id} has no utc entries"))),
            [only] => Ok(only.timestamp + crate::time::counter_to_time(sample_id - only.sample_id, rate)),
            _ => {
                let i = segment_index(tmap.len(), tmap.partition_point(|e| e.sample_id <= sample_id));
                let (a, b) = (tmap[i], tmap[i + 1]);
                Ok(interpolate(
                    sample_id - a.sample_id,
                    b.timestamp - a.timestamp,
                    b.sample_id - a.sample_id,
                    a.timestamp,
                ))
            }
        }
    }

    /// Maps a UTC timestamp to an absolute sample id, the inverse of
    /// [`sample_id_to_timestamp`](Reader::sample_id_to_timestamp).
    pub fn timestamp_to_sample_id(&mut self, signal_id: u16, timestamp: i64) -> Result<i64> {
        let rate = self.track(signal_id)?.def.sample_rate;
        let tmap = self.tmap(signal_id)?;
        match tmap {
            [] => Err(LogError::NotFound(format!("signal {signal_id} has no utc entries"))),
            [only] => Ok(only.sample_id + crate::time::time_to_counter(timestamp - only.timestamp, rate)),
            _ => {
                let i = segment_index(tmap.len(), tmap.partition_point(|e| e.timestamp <= timestamp));
                let (a, b) = (tmap[i], tmap[i + 1]);
                Ok(interpolate(
                    timestamp - a.timestamp,
                    b.sample_id - a.sample_id,
                    b.timestamp - a.timestamp,
                    a.sample_id,
                ))
            }
        }
    }
}

/// Clamps a partition point to a valid interpolation segment start.
fn segment_index(len: usize, partition: usize) -> usize {
    partition.saturating_sub(1).min(len - 2)
}

/// Computes `base + delta * num / den` with 128-bit intermediates and
/// round-half-up, so sample-id/timestamp products cannot overflow i64.
///
/// A zero `den` (a flat segment) collapses to `base`.
fn interpolate(delta: i64, num: i64, den: i64, base: i64) -> i64 {
    if den == 0 {
        return base;
    }
    let product = (delta as i128) * (num as i128);
    let den = den as i128;
    let rounded = if (product >= 0) == (den > 0) {
        (2 * product + den) / (2 * den)
    } else {
        (2 * product - den) / (2 * den)
    };
    base + rounded as i64
}

fn validate_range(st: &SignalState, start: i64, length: i64) -> Result<()> {
    let first = st.def.sample_id_offset;
    let end = st.sample_end();
    if length < 1 || start < first || start + length > end {
        return Err(LogError::ParameterInvalid(format!(
            "range [{start}, {}) outside stored samples [{first}, {end})",
            start + length
        )));
    }
    Ok(())
}

/// Parses a data chunk payload into (first_sample_id, count, bytes).
fn parse_data_payload(payload: &[u8]) -> Result<(i64, u32, &[u8])> {
    if payload.len() < 16 {
        return Err(LogError::Truncated);
    }
    let first = i64::from_le_bytes(payload[0..8].try_into().unwrap());
    let count = u32::from_le_bytes(payload[8..12].try_into().unwrap());
    Ok((first, count, &payload[16..]))
}

fn parse_index_payload(payload: &[u8]) -> Result<Vec<IndexEntry>> {
    if payload.len() < 8 {
        return Err(LogError::Truncated);
    }
    let count = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    if payload.len() < 8 + count * 16 {
        return Err(LogError::Truncated);
    }
    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let pos = 8 + i * 16;
        entries.push(IndexEntry {
            offset: u64::from_le_bytes(payload[pos..pos + 8].try_into().unwrap()),
            first_key: i64::from_le_bytes(payload[pos + 8..pos + 16].try_into().unwrap()),
        });
    }
    Ok(entries)
}

fn parse_utc_payload(payload: &[u8]) -> Result<Vec<UtcEntry>> {
    if payload.len() < 8 {
        return Err(LogError::Truncated);
    }
    let count = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    if payload.len() < 8 + count * 16 {
        return Err(LogError::Truncated);
    }
    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let pos = 8 + i * 16;
        entries.push(UtcEntry {
            sample_id: i64::from_le_bytes(payload[pos..pos + 8].try_into().unwrap()),
            timestamp: i64::from_le_bytes(payload[pos + 8..pos + 16].try_into().unwrap()),
        });
    }
    Ok(entries)
}

fn parse_annotation_payload(payload: &[u8]) -> Result<Annotation> {
    if payload.len() < 20 {
        return Err(LogError::Truncated);
    }
    let data_size = u32::from_le_bytes(payload[16..20].try_into().unwrap()) as usize;
    if payload.len() < 20 + data_size {
        return Err(LogError::Truncated);
    }
    Ok(Annotation {
        timestamp: i64::from_le_bytes(payload[0..8].try_into().unwrap()),
        y: f32::from_le_bytes(payload[8..12].try_into().unwrap()),
        annotation_type: AnnotationType::from_u8(payload[12])
            .ok_or_else(|| LogError::ParameterInvalid(format!("bad annotation type {}", payload[12])))?,
        storage_type: StorageType::from_u8(payload[13])
            .ok_or_else(|| LogError::ParameterInvalid(format!("bad storage type {}", payload[13])))?,
        group_id: payload[14],
        data: payload[20..20 + data_size].to_vec(),
    })
}

/// Reads `[start, start + length)` into a packed buffer, regenerating
/// missing regions as fill.
fn read_range_bytes(file: &mut File, st: &SignalState, start: i64, length: i64) -> Result<Vec<u8>> {
    let dt = st.def.data_type;
    let mut out = vec![0u8; dt.bytes_for_samples(length as usize)];
    if dt.base_type() == BaseType::Float {
        dt.write_fill(&mut out, 0, length as usize);
    }
    let index = &st.indexes[0];
    let pos = index.partition_point(|e| e.first_key <= start);
    let mut i = pos.saturating_sub(1);
    while i < index.len() {
        if index[i].first_key >= start + length {
            break;
        }
        let (_, payload) = chunk::read_chunk(file, index[i].offset)?;
        let (first, count, bytes) = parse_data_payload(&payload)?;
        if bytes.len() < dt.bytes_for_samples(count as usize) {
            return Err(LogError::Truncated);
        }
        let a = start.max(first);
        let b = (start + length).min(first + i64::from(count));
        if b > a {
            dt.copy_samples(
                bytes,
                (a - first) as usize,
                &mut out,
                (a - start) as usize,
                (b - a) as usize,
            );
        }
        i += 1;
    }
    Ok(out)
}

/// Computes exact statistics over `[s, e)` from raw samples. Non-finite
/// values of float signals are excluded.
fn raw_stats(file: &mut File, st: &SignalState, s: i64, e: i64) -> Result<Statistics> {
    let bytes = read_range_bytes(file, st, s, e - s)?;
    let dt = st.def.data_type;
    let float = dt.base_type() == BaseType::Float;
    let mut stats = Statistics::new();
    for i in 0..(e - s) as usize {
        let v = dt.read_sample(&bytes, i);
        if float && !v.is_finite() {
            continue;
        }
        stats.add(v);
    }
    Ok(stats)
}

/// Approximates statistics over `[s, e)` from level-1 entries when raw
/// data was omitted, prorating each entry's count by its overlap.
fn approx_stats_from_summaries(
    file: &mut File,
    st: &SignalState,
    cache: &mut Option<SummaryCache>,
    signal_id: u16,
    s: i64,
    e: i64,
) -> Result<Statistics> {
    if st.indexes.len() < 2 {
        return Ok(Statistics::new());
    }
    let span = st.span(1);
    let offset = st.def.sample_id_offset;
    let mut acc = Statistics::new();
    let mut pos = offset + (s - offset).div_euclid(span) * span;
    while pos < e {
        let overlap = (pos + span).min(e) - pos.max(s);
        if overlap > 0 {
            if let Some(entry) = summary_entry_at(file, st, cache, signal_id, 1, pos)? {
                acc.merge(&Statistics::from_summary(&entry, overlap as u64));
            }
        }
        pos += span;
    }
    Ok(acc)
}

/// Merges statistics over `[s, e)` using summary entries down from `level`,
/// recomputing the sub-entry edges from raw samples.
fn cover_level(
    file: &mut File,
    st: &SignalState,
    cache: &mut Option<SummaryCache>,
    signal_id: u16,
    level: usize,
    s: i64,
    e: i64,
) -> Result<Statistics> {
    if s >= e {
        return Ok(Statistics::new());
    }
    if level == 0 {
        if st.data_omitted {
            return approx_stats_from_summaries(file, st, cache, signal_id, s, e);
        }
        return raw_stats(file, st, s, e);
    }
    let span = st.span(level);
    let offset = st.def.sample_id_offset;
    // Only whole entries that cover a full span of stored samples are
    // usable; the tail entry of each level may cover fewer.
    let full_end = offset + (st.sample_count / span) * span;
    let a = offset + (s - offset + span - 1).div_euclid(span) * span;
    let b = (offset + (e - offset).div_euclid(span) * span).min(full_end);
    if a >= b {
        return cover_level(file, st, cache, signal_id, level - 1, s, e);
    }
    let mut acc = cover_level(file, st, cache, signal_id, level - 1, s, a)?;
    let mut pos = a;
    while pos < b {
        match summary_entry_at(file, st, cache, signal_id, level, pos)? {
            Some(entry) => acc.merge(&Statistics::from_summary(&entry, span as u64)),
            None => acc.merge(&cover_level(
                file,
                st,
                cache,
                signal_id,
                level - 1,
                pos,
                pos + span,
            )?),
        }
        pos += span;
    }
    acc.merge(&cover_level(file, st, cache, signal_id, level - 1, b, e)?);
    Ok(acc)
}

/// Fetches the summary entry whose window starts at `pos`, reading and
/// caching its chunk.
fn summary_entry_at(
    file: &mut File,
    st: &SignalState,
    cache: &mut Option<SummaryCache>,
    signal_id: u16,
    level: usize,
    pos: i64,
) -> Result<Option<SummaryEntry>> {
    if st.indexes.len() <= level {
        return Ok(None);
    }
    let span = st.span(level);
    let hit = cache
        .as_ref()
        .filter(|c| c.signal_id == signal_id && c.level == level)
        .map(|c| (c.first, c.entries.len() as i64))
        .filter(|(first, n)| pos >= *first && pos < first + n * span);
    let (first, _) = match hit {
        Some(h) => h,
        None => {
            let index = &st.indexes[level];
            let at = index.partition_point(|e| e.first_key <= pos);
            if at == 0 {
                return Ok(None);
            }
            let entry = index[at - 1];
            let (_, payload) = chunk::read_chunk(file, entry.offset)?;
            if payload.len() < 16 {
                return Err(LogError::Truncated);
            }
            let chunk_first = i64::from_le_bytes(payload[0..8].try_into().unwrap());
            let count = u32::from_le_bytes(payload[8..12].try_into().unwrap()) as usize;
            if payload.len() < 16 + count * 32 {
                return Err(LogError::Truncated);
            }
            let entries = (0..count)
                .map(|i| SummaryEntry::read_from(&payload[16 + i * 32..16 + (i + 1) * 32]))
                .collect::<Vec<_>>();
            *cache = Some(SummaryCache {
                signal_id,
                level,
                first: chunk_first,
                entries,
            });
            (chunk_first, count as i64)
        }
    };
    let cached = cache.as_ref().expect("summary cache just filled");
    let idx = (pos - first).div_euclid(span);
    if idx < 0 || idx as usize >= cached.entries.len() || (pos - first) % span != 0 {
        return Ok(None);
    }
    Ok(Some(cached.entries[idx as usize]))
}
