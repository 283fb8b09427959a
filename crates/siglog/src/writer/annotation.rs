//! Annotation track: one leaf chunk per annotation plus a timestamp-keyed
//! summary cascade that lets readers seek without scanning every leaf.

use crate::chunk::{index_meta, track_meta, ChunkTag, ChunkWriter, IndexEntry, TrackKind, LEVEL_MAX};
use crate::def::{AnnotationType, StorageType};
use crate::error::Result;

/// Per-signal annotation writer state.
pub(crate) struct AnnoTrack {
    signal_id: u16,
    factor: usize,
    /// Pending {timestamp, offset} summary entries per level ≥ 1.
    levels: Vec<Vec<(i64, u64)>>,
    indexes: Vec<Vec<IndexEntry>>,
}

impl AnnoTrack {
    pub(crate) fn new(signal_id: u16, annotation_decimate_factor: u32) -> Self {
        Self {
            signal_id,
            factor: annotation_decimate_factor.max(2) as usize,
            levels: Vec::new(),
            indexes: vec![Vec::new()],
        }
    }

    /// Writes one annotation leaf chunk and records it in the cascade.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn add(
        &mut self,
        io: &mut ChunkWriter,
        timestamp: i64,
        y: f32,
        annotation_type: AnnotationType,
        group_id: u8,
        storage_type: StorageType,
        data: &[u8],
    ) -> Result<()> {
        let mut payload = Vec::with_capacity(20 + data.len());
        payload.extend_from_slice(&timestamp.to_le_bytes());
        payload.extend_from_slice(&y.to_le_bytes());
        payload.push(annotation_type as u8);
        payload.push(storage_type as u8);
        payload.push(group_id);
        payload.push(0);
        payload.extend_from_slice(&(data.len() as u32).to_le_bytes());
        payload.extend_from_slice(data);
        let offset =
            io.write_chunk(ChunkTag::Annotation, track_meta(self.signal_id, 0), &payload)?;
        self.indexes[0].push(IndexEntry { offset, first_key: timestamp });
        self.push_summary(io, 1, (timestamp, offset))
    }

    fn push_summary(&mut self, io: &mut ChunkWriter, level: usize, entry: (i64, u64)) -> Result<()> {
        if level > LEVEL_MAX as usize {
            return Ok(());
        }
        while self.levels.len() < level {
            self.levels.push(Vec::new());
        }
        while self.indexes.len() <= level {
            self.indexes.push(Vec::new());
        }
        self.levels[level - 1].push(entry);
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
        let mut payload = Vec::with_capacity(8 + pending.len() * 16);
        payload.extend_from_slice(&(pending.len() as u32).to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        for (timestamp, offset) in &pending {
            payload.extend_from_slice(&timestamp.to_le_bytes());
            payload.extend_from_slice(&offset.to_le_bytes());
        }
        let offset = io.write_chunk(
            ChunkTag::Annotation,
            track_meta(self.signal_id, level as u8),
            &payload,
        )?;
        let first_ts = pending[0].0;
        self.indexes[level].push(IndexEntry { offset, first_key: first_ts });
        if cascade {
            self.push_summary(io, level + 1, (first_ts, offset))?;
        }
        Ok(())
    }

    /// Flushes partial summary levels and writes the index chunks.
    pub(crate) fn close(&mut self, io: &mut ChunkWriter) -> Result<()> {
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
                index_meta(self.signal_id, level as u8, TrackKind::Annotation),
                &payload,
            )?;
        }
        Ok(())
    }
}
