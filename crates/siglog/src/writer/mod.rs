//! Writer façade: sources, signals, sample data, annotations, UTC anchors
//! and user data, routed to per-signal tracks and the raw chunk layer.
//!
//! Ordering rules enforced here:
//! - a source must be defined before any signal referencing it;
//! - a signal must be defined before any samples, annotations or UTC
//!   anchors for it (annotations on the implicit signal 0 are exempt);
//! - duplicate source/signal definitions are rejected.
//!
//! `close` flushes every partial buffer at every level bottom-up, writes
//! the per-level index chunks and the end-of-file root index, then patches
//! the file header's root pointer as the very last write so a crash
//! beforehand leaves a readable-but-incomplete file.

mod annotation;
mod fsr;
mod utc;

use crate::chunk::{
    ChunkTag, ChunkWriter, RootChain, RootIndex, RootSignal, ROOT_SIGNAL_FLAG_DATA_OMITTED,
};
use crate::def::{AnnotationType, SignalDef, SignalKind, SourceDef, StorageType, UtcEntry};
use crate::error::{LogError, Result};
use annotation::AnnoTrack;
use fsr::FsrTrack;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;
use utc::UtcTrack;

/// Maximum caller-visible user-data chunk_meta (upper bits carry the
/// storage type on disk).
pub const USER_DATA_META_MAX: u16 = 0x0fff;

/// Annotation decimate factor for the implicit signal 0.
const GLOBAL_ANNOTATION_DECIMATE: u32 = 100;

/// Synchronous log file writer.
pub struct Writer {
    io: ChunkWriter,
    sources: BTreeMap<u16, SourceDef>,
    signals: BTreeMap<u16, SignalDef>,
    fsr_tracks: BTreeMap<u16, FsrTrack>,
    utc_tracks: BTreeMap<u16, UtcTrack>,
    anno_tracks: BTreeMap<u16, AnnoTrack>,
    flags: u32,
}

impl Writer {
    /// Creates a new log file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let io = ChunkWriter::create(path)?;
        Ok(Self {
            io,
            sources: BTreeMap::new(),
            signals: BTreeMap::new(),
            fsr_tracks: BTreeMap::new(),
            utc_tracks: BTreeMap::new(),
            anno_tracks: BTreeMap::new(),
            flags: 0,
        })
    }

    /// Returns the writer flags.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Replaces the writer flags.
    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    /// Defines a source. Source id 0 is reserved.
    pub fn source_def(&mut self, source: &SourceDef) -> Result<()> {
        if source.source_id == 0 {
            return Err(LogError::ParameterInvalid("source_id 0 is reserved".into()));
        }
        if self.sources.contains_key(&source.source_id) {
            return Err(LogError::AlreadyExists(format!("source {}", source.source_id)));
        }
        self.io
            .write_chunk(ChunkTag::SourceDef, 0, &source.encode_payload())?;
        self.sources.insert(source.source_id, source.clone());
        Ok(())
    }

    /// Defines a signal. The definition is validated, auto-filled and
    /// aligned; the aligned form is what the file stores.
    pub fn signal_def(&mut self, signal: &SignalDef) -> Result<()> {
        let mut def = signal.clone();
        def.validate_and_align()?;
        if !self.sources.contains_key(&def.source_id) {
            return Err(LogError::NotFound(format!(
                "source {} for signal {}",
                def.source_id, def.signal_id
            )));
        }
        if self.signals.contains_key(&def.signal_id) {
            return Err(LogError::AlreadyExists(format!("signal {}", def.signal_id)));
        }
        self.io
            .write_chunk(ChunkTag::SignalDef, 0, &def.encode_payload())?;
        debug!(
            signal_id = def.signal_id,
            samples_per_data = def.samples_per_data,
            sample_decimate_factor = def.sample_decimate_factor,
            "signal defined"
        );
        if def.kind == SignalKind::Fsr {
            self.fsr_tracks.insert(def.signal_id, FsrTrack::new(def.clone()));
            self.utc_tracks
                .insert(def.signal_id, UtcTrack::new(def.signal_id, def.utc_decimate_factor));
        }
        self.anno_tracks.insert(
            def.signal_id,
            AnnoTrack::new(def.signal_id, def.annotation_decimate_factor),
        );
        self.signals.insert(def.signal_id, def);
        Ok(())
    }

    /// Appends caller-opaque user data. `chunk_meta` is limited to 12 bits.
    pub fn user_data(&mut self, chunk_meta: u16, storage_type: StorageType, data: &[u8]) -> Result<()> {
        if chunk_meta > USER_DATA_META_MAX {
            return Err(LogError::ParameterInvalid(format!(
                "user data chunk_meta {chunk_meta:#06x} exceeds {USER_DATA_META_MAX:#06x}"
            )));
        }
        let meta = chunk_meta | (u16::from(storage_type as u8) << 12);
        self.io.write_chunk(ChunkTag::UserData, meta, data)?;
        Ok(())
    }

    /// Appends an annotation. Signal 0 accepts annotations without a prior
    /// definition; other signals must be defined.
    #[allow(clippy::too_many_arguments)]
    pub fn annotation(
        &mut self,
        signal_id: u16,
        timestamp: i64,
        y: f32,
        annotation_type: AnnotationType,
        group_id: u8,
        storage_type: StorageType,
        data: &[u8],
    ) -> Result<()> {
        if signal_id != 0 && !self.signals.contains_key(&signal_id) {
            return Err(LogError::NotFound(format!("signal {signal_id}")));
        }
        let track = self
            .anno_tracks
            .entry(signal_id)
            .or_insert_with(|| AnnoTrack::new(signal_id, GLOBAL_ANNOTATION_DECIMATE));
        track.add(&mut self.io, timestamp, y, annotation_type, group_id, storage_type, data)
    }

    /// Appends a UTC time anchor for an FSR signal. Sample ids must
    /// strictly increase within the signal.
    pub fn utc(&mut self, signal_id: u16, sample_id: i64, timestamp: i64) -> Result<()> {
        self.ensure_fsr(signal_id)?;
        let track = self.utc_tracks.get_mut(&signal_id).expect("presence checked");
        track.push(&mut self.io, UtcEntry { sample_id, timestamp })
    }

    fn ensure_fsr(&self, signal_id: u16) -> Result<()> {
        if self.fsr_tracks.contains_key(&signal_id) {
            Ok(())
        } else if self.signals.contains_key(&signal_id) {
            Err(LogError::ParameterInvalid(format!("signal {signal_id} is not FSR")))
        } else {
            Err(LogError::NotFound(format!("signal {signal_id}")))
        }
    }

    /// Appends FSR sample data at an absolute sample id.
    ///
    /// `sample_id` must be at or beyond the signal's next expected id; a
    /// gap is stored as fill (NaN for floats, zero bits for integers).
    pub fn fsr(&mut self, signal_id: u16, sample_id: i64, data: &[u8], sample_count: u32) -> Result<()> {
        self.ensure_fsr(signal_id)?;
        let track = self.fsr_tracks.get_mut(&signal_id).expect("presence checked");
        if sample_count == 0 {
            return Err(LogError::ParameterInvalid("sample_count must be > 0".into()));
        }
        let needed = track.def().data_type.bytes_for_samples(sample_count as usize);
        if data.len() < needed {
            return Err(LogError::ParameterInvalid(format!(
                "{} bytes hold fewer than {sample_count} samples",
                data.len()
            )));
        }
        track.fsr(&mut self.io, sample_id, data, sample_count)
    }

    /// Appends f32 samples to an F32 signal.
    pub fn fsr_f32(&mut self, signal_id: u16, sample_id: i64, samples: &[f32]) -> Result<()> {
        let mut data = Vec::with_capacity(samples.len() * 4);
        for s in samples {
            data.extend_from_slice(&s.to_le_bytes());
        }
        self.fsr(signal_id, sample_id, &data, samples.len() as u32)
    }

    /// Appends f64 samples to an F64 signal.
    pub fn fsr_f64(&mut self, signal_id: u16, sample_id: i64, samples: &[f64]) -> Result<()> {
        let mut data = Vec::with_capacity(samples.len() * 8);
        for s in samples {
            data.extend_from_slice(&s.to_le_bytes());
        }
        self.fsr(signal_id, sample_id, &data, samples.len() as u32)
    }

    /// Enables or disables level-0 data chunk emission for a signal.
    /// Summaries continue regardless; readers report data as not stored.
    pub fn fsr_omit_data(&mut self, signal_id: u16, omit: bool) -> Result<()> {
        self.ensure_fsr(signal_id)?;
        self.fsr_tracks
            .get_mut(&signal_id)
            .expect("presence checked")
            .set_omit_data(omit);
        Ok(())
    }

    /// Forces buffered file data to disk. In-memory track buffers are kept;
    /// they only drain at close.
    pub fn flush(&mut self) -> Result<()> {
        self.io.sync()
    }

    /// Flushes every track bottom-up, writes the root index and closes the
    /// file.
    pub fn close(mut self) -> Result<()> {
        for track in self.fsr_tracks.values_mut() {
            track.close(&mut self.io)?;
        }
        for track in self.utc_tracks.values_mut() {
            track.close(&mut self.io)?;
        }
        for track in self.anno_tracks.values_mut() {
            track.close(&mut self.io)?;
        }

        let mut root = RootIndex::default();
        for (signal_id, track) in &self.fsr_tracks {
            let mut flags = 0;
            if track.ever_omitted() {
                flags |= ROOT_SIGNAL_FLAG_DATA_OMITTED;
            }
            root.signals.push(RootSignal {
                signal_id: *signal_id,
                flags,
                sample_count: track.sample_count(),
            });
        }
        for (tag, chunk_meta, state) in self.io.chains() {
            root.chains.push(RootChain {
                tag,
                chunk_meta,
                head: state.head,
                tail: state.tail,
            });
        }
        let offset = self
            .io
            .write_chunk(ChunkTag::End, 0, &root.encode_payload())?;
        self.io.sync()?;
        self.io.patch_root_index(offset)?;
        self.io.sync_all()?;
        debug!(root_index_offset = offset, "log file closed");
        Ok(())
    }
}
