//! Source and signal definitions plus the small record types shared by the
//! writer and reader.
//!
//! A [`SignalDef`] is finalized when it is defined: structural parameters
//! left at zero are auto-filled from the sample rate, then aligned so the
//! summary tree geometry is internally consistent (see
//! [`SignalDef::validate_and_align`]). The aligned definition is what gets
//! written to disk and what readers report back.

use crate::datatype::DataType;
use crate::error::{LogError, Result};

/// Signal sampling discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignalKind {
    /// Fixed sample rate: sample_id increments by one per sample.
    Fsr = 0,
    /// Variable sample rate: each sample carries its own timestamp.
    Vsr = 1,
}

impl SignalKind {
    /// Creates a SignalKind from its wire encoding.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Fsr),
            1 => Some(Self::Vsr),
            _ => None,
        }
    }
}

/// Annotation rendering type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AnnotationType {
    /// Application-defined payload.
    User = 0,
    /// Text label anchored at a time and y position.
    Text = 1,
    /// Vertical marker at a time.
    VerticalMarker = 2,
    /// Horizontal marker at a y value.
    HorizontalMarker = 3,
}

impl AnnotationType {
    /// Creates an AnnotationType from its wire encoding.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::User),
            1 => Some(Self::Text),
            2 => Some(Self::VerticalMarker),
            3 => Some(Self::HorizontalMarker),
            _ => None,
        }
    }
}

/// Payload interpretation for annotations and user data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StorageType {
    /// Opaque bytes.
    Binary = 1,
    /// UTF-8 text.
    String = 2,
    /// UTF-8 JSON document.
    Json = 3,
}

impl StorageType {
    /// Creates a StorageType from its wire encoding.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Binary),
            2 => Some(Self::String),
            3 => Some(Self::Json),
            _ => None,
        }
    }
}

/// One (sample_id, timestamp) time anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcEntry {
    /// Absolute sample id within the signal.
    pub sample_id: i64,
    /// Fixed-point UTC timestamp (see [`crate::time`]).
    pub timestamp: i64,
}

/// One annotation as delivered by the reader.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Sample id (FSR signals) or UTC timestamp (VSR / signal 0).
    pub timestamp: i64,
    /// Vertical position hint; NaN requests automatic placement.
    pub y: f32,
    /// Annotation rendering type.
    pub annotation_type: AnnotationType,
    /// Application-defined grouping id.
    pub group_id: u8,
    /// Payload interpretation.
    pub storage_type: StorageType,
    /// Payload bytes.
    pub data: Vec<u8>,
}

/// Instrument or data-producer description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceDef {
    /// Unique source id; 0 is reserved for the implicit global source.
    pub source_id: u16,
    /// Display name.
    pub name: String,
    /// Vendor string.
    pub vendor: String,
    /// Model string.
    pub model: String,
    /// Version string.
    pub version: String,
    /// Serial number string.
    pub serial_number: String,
}

impl SourceDef {
    /// The implicit source 0 every file carries.
    pub(crate) fn global_default() -> Self {
        Self {
            source_id: 0,
            name: "global".to_string(),
            ..Default::default()
        }
    }

    /// Encodes the chunk payload.
    pub(crate) fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            4 + self.name.len()
                + self.vendor.len()
                + self.model.len()
                + self.version.len()
                + self.serial_number.len()
                + 5,
        );
        out.extend_from_slice(&self.source_id.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        write_cstr(&mut out, &self.name);
        write_cstr(&mut out, &self.vendor);
        write_cstr(&mut out, &self.model);
        write_cstr(&mut out, &self.version);
        write_cstr(&mut out, &self.serial_number);
        out
    }

    /// Decodes a chunk payload.
    pub(crate) fn decode_payload(buf: &[u8]) -> Result<Self> {
        if buf.len() < 4 {
            return Err(LogError::Truncated);
        }
        let source_id = u16::from_le_bytes(buf[0..2].try_into().unwrap());
        let mut pos = 4;
        Ok(Self {
            source_id,
            name: read_cstr(buf, &mut pos)?,
            vendor: read_cstr(buf, &mut pos)?,
            model: read_cstr(buf, &mut pos)?,
            version: read_cstr(buf, &mut pos)?,
            serial_number: read_cstr(buf, &mut pos)?,
        })
    }
}

/// Maximum signal id (ids are 1..=255; 0 is the implicit global signal).
pub const SIGNAL_ID_MAX: u16 = 255;

/// Signal description including the summary tree geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDef {
    /// Signal id in 1..=255.
    pub signal_id: u16,
    /// Owning source; must be defined first.
    pub source_id: u16,
    /// Sampling discipline.
    pub kind: SignalKind,
    /// Sample data type.
    pub data_type: DataType,
    /// Sample rate in Hz; 0 for VSR signals.
    pub sample_rate: u32,
    /// Samples held in one level-0 data chunk.
    pub samples_per_data: u32,
    /// Raw samples summarized per level-1 entry.
    pub sample_decimate_factor: u32,
    /// Entries held in one summary chunk.
    pub entries_per_summary: u32,
    /// Lower-level entries summarized per entry at levels ≥ 2.
    pub summary_decimate_factor: u32,
    /// Annotations per annotation summary entry.
    pub annotation_decimate_factor: u32,
    /// UTC entries per UTC summary entry.
    pub utc_decimate_factor: u32,
    /// Absolute sample id of the first sample.
    pub sample_id_offset: i64,
    /// Display name.
    pub name: String,
    /// Measurement units.
    pub units: String,
}

impl Default for SignalDef {
    fn default() -> Self {
        Self {
            signal_id: 0,
            source_id: 0,
            kind: SignalKind::Fsr,
            data_type: DataType::F32,
            sample_rate: 0,
            samples_per_data: 0,
            sample_decimate_factor: 0,
            entries_per_summary: 0,
            summary_decimate_factor: 0,
            annotation_decimate_factor: 0,
            utc_decimate_factor: 0,
            sample_id_offset: 0,
            name: String::new(),
            units: String::new(),
        }
    }
}

fn round_up(value: u32, multiple: u32) -> u32 {
    value.div_ceil(multiple) * multiple
}

impl SignalDef {
    /// The implicit signal 0 every file carries (VSR, source 0).
    pub(crate) fn global_default() -> Self {
        Self {
            kind: SignalKind::Vsr,
            name: "global".to_string(),
            annotation_decimate_factor: 100,
            utc_decimate_factor: 100,
            ..Default::default()
        }
    }

    /// Validates the definition, auto-fills zeroed structural parameters,
    /// and aligns the summary tree geometry.
    ///
    /// Alignment rules:
    /// - `sample_decimate_factor` rounds up to a multiple of 8, so packed
    ///   level-0 buffers always flush on byte boundaries;
    /// - `samples_per_data` rounds up to a multiple of the aligned
    ///   `sample_decimate_factor`;
    /// - `entries_per_summary` rounds up to a multiple of
    ///   `summary_decimate_factor`.
    pub fn validate_and_align(&mut self) -> Result<()> {
        if self.signal_id == 0 || self.signal_id > SIGNAL_ID_MAX {
            return Err(LogError::ParameterInvalid(format!(
                "signal_id {} outside 1..={SIGNAL_ID_MAX}",
                self.signal_id
            )));
        }
        match self.kind {
            SignalKind::Fsr if self.sample_rate == 0 => {
                return Err(LogError::ParameterInvalid(format!(
                    "FSR signal {} requires a sample rate",
                    self.signal_id
                )));
            }
            SignalKind::Vsr if self.sample_rate != 0 => {
                return Err(LogError::ParameterInvalid(format!(
                    "VSR signal {} cannot carry a sample rate",
                    self.signal_id
                )));
            }
            _ => {}
        }

        // Auto-fill: one level-1 entry per ~1 s, one level-2 entry per ~1 min.
        if self.sample_decimate_factor == 0 {
            self.sample_decimate_factor = match self.kind {
                SignalKind::Fsr => self.sample_rate.clamp(8, 1 << 20),
                SignalKind::Vsr => 128,
            };
        }
        if self.samples_per_data == 0 {
            self.samples_per_data = self.sample_decimate_factor;
        }
        if self.summary_decimate_factor == 0 {
            self.summary_decimate_factor = 60;
        }
        if self.entries_per_summary == 0 {
            self.entries_per_summary = 2 * self.summary_decimate_factor;
        }
        if self.annotation_decimate_factor == 0 {
            self.annotation_decimate_factor = 100;
        }
        if self.utc_decimate_factor == 0 {
            self.utc_decimate_factor = 100;
        }

        self.sample_decimate_factor = round_up(self.sample_decimate_factor, 8);
        self.samples_per_data = round_up(self.samples_per_data, self.sample_decimate_factor);
        self.entries_per_summary =
            round_up(self.entries_per_summary, self.summary_decimate_factor);
        Ok(())
    }

    /// Encodes the chunk payload.
    pub(crate) fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(48 + self.name.len() + self.units.len() + 2);
        out.extend_from_slice(&self.signal_id.to_le_bytes());
        out.extend_from_slice(&self.source_id.to_le_bytes());
        out.push(self.kind as u8);
        out.push(0);
        out.extend_from_slice(&self.data_type.as_raw().to_le_bytes());
        out.extend_from_slice(&self.sample_rate.to_le_bytes());
        out.extend_from_slice(&self.samples_per_data.to_le_bytes());
        out.extend_from_slice(&self.sample_decimate_factor.to_le_bytes());
        out.extend_from_slice(&self.entries_per_summary.to_le_bytes());
        out.extend_from_slice(&self.summary_decimate_factor.to_le_bytes());
        out.extend_from_slice(&self.annotation_decimate_factor.to_le_bytes());
        out.extend_from_slice(&self.utc_decimate_factor.to_le_bytes());
        out.extend_from_slice(&self.sample_id_offset.to_le_bytes());
        write_cstr(&mut out, &self.name);
        write_cstr(&mut out, &self.units);
        out
    }

    /// Decodes a chunk payload.
    pub(crate) fn decode_payload(buf: &[u8]) -> Result<Self> {
        if buf.len() < 46 {
            return Err(LogError::Truncated);
        }
        let kind = SignalKind::from_u8(buf[4])
            .ok_or_else(|| LogError::ParameterInvalid(format!("bad signal kind {}", buf[4])))?;
        let u32_at = |off: usize| u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        let mut pos = 46;
        Ok(Self {
            signal_id: u16::from_le_bytes(buf[0..2].try_into().unwrap()),
            source_id: u16::from_le_bytes(buf[2..4].try_into().unwrap()),
            kind,
            data_type: DataType::from_raw(u32_at(6))?,
            sample_rate: u32_at(10),
            samples_per_data: u32_at(14),
            sample_decimate_factor: u32_at(18),
            entries_per_summary: u32_at(22),
            summary_decimate_factor: u32_at(26),
            annotation_decimate_factor: u32_at(30),
            utc_decimate_factor: u32_at(34),
            sample_id_offset: i64::from_le_bytes(buf[38..46].try_into().unwrap()),
            name: read_cstr(buf, &mut pos)?,
            units: read_cstr(buf, &mut pos)?,
        })
    }
}

/// Appends a NUL-terminated UTF-8 string.
pub(crate) fn write_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

/// Reads a NUL-terminated UTF-8 string, advancing `pos` past the NUL.
pub(crate) fn read_cstr(buf: &[u8], pos: &mut usize) -> Result<String> {
    let start = *pos;
    let end = buf[start..]
        .iter()
        .position(|&b| b == 0)
        .map(|i| start + i)
        .ok_or(LogError::Truncated)?;
    *pos = end + 1;
    String::from_utf8(buf[start..end].to_vec())
        .map_err(|_| LogError::ParameterInvalid("string is not valid UTF-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_payload_roundtrip() {
        let src = SourceDef {
            source_id: 3,
            name: "source 3".into(),
            vendor: "vendor 3".into(),
            model: String::new(),
            version: "version 3".into(),
            serial_number: "serial_number 3".into(),
        };
        let payload = src.encode_payload();
        assert_eq!(src, SourceDef::decode_payload(&payload).unwrap());
    }

    #[test]
    fn test_signal_payload_roundtrip() {
        let mut sig = SignalDef {
            signal_id: 5,
            source_id: 3,
            sample_rate: 100_000,
            samples_per_data: 1000,
            sample_decimate_factor: 100,
            entries_per_summary: 200,
            summary_decimate_factor: 100,
            annotation_decimate_factor: 100,
            utc_decimate_factor: 100,
            sample_id_offset: 100_000_000,
            name: "signal 5".into(),
            units: "A".into(),
            ..Default::default()
        };
        sig.validate_and_align().unwrap();
        let payload = sig.encode_payload();
        assert_eq!(sig, SignalDef::decode_payload(&payload).unwrap());
    }

    #[test]
    fn test_alignment_of_reference_geometry() {
        let mut sig = SignalDef {
            signal_id: 5,
            source_id: 3,
            sample_rate: 100_000,
            samples_per_data: 1000,
            sample_decimate_factor: 100,
            entries_per_summary: 200,
            summary_decimate_factor: 100,
            ..Default::default()
        };
        sig.validate_and_align().unwrap();
        assert_eq!(0x68, sig.sample_decimate_factor);
        assert_eq!(0x410, sig.samples_per_data);
        assert_eq!(200, sig.entries_per_summary);
        assert_eq!(100, sig.summary_decimate_factor);
    }

    #[test]
    fn test_auto_fill_defaults() {
        let mut sig = SignalDef {
            signal_id: 1,
            source_id: 1,
            sample_rate: 100_000,
            ..Default::default()
        };
        sig.validate_and_align().unwrap();
        assert_eq!(100_000, sig.sample_decimate_factor);
        assert_eq!(100_000, sig.samples_per_data);
        assert_eq!(60, sig.summary_decimate_factor);
        assert_eq!(120, sig.entries_per_summary);
        assert_eq!(100, sig.annotation_decimate_factor);
        assert_eq!(100, sig.utc_decimate_factor);
    }

    #[test]
    fn test_invalid_definitions() {
        let mut sig = SignalDef { signal_id: 0, source_id: 1, sample_rate: 1000, ..Default::default() };
        assert!(matches!(sig.validate_and_align(), Err(LogError::ParameterInvalid(_))));

        let mut sig = SignalDef { signal_id: 300, source_id: 1, sample_rate: 1000, ..Default::default() };
        assert!(sig.validate_and_align().is_err());

        let mut sig = SignalDef { signal_id: 2, source_id: 1, sample_rate: 0, ..Default::default() };
        assert!(sig.validate_and_align().is_err());

        let mut sig = SignalDef {
            signal_id: 2,
            source_id: 1,
            kind: SignalKind::Vsr,
            sample_rate: 1000,
            ..Default::default()
        };
        assert!(sig.validate_and_align().is_err());
    }

    #[test]
    fn test_cstr_missing_nul_is_truncated() {
        let mut pos = 0;
        assert!(matches!(read_cstr(b"abc", &mut pos), Err(LogError::Truncated)));
    }
}
