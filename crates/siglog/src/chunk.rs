//! Raw chunk I/O: the lowest layer of the log file format.
//!
//! A log file is a 32-byte file header followed by 8-byte-aligned chunks.
//! Every chunk carries a 32-byte header with its own CRC32C, then the
//! payload, a payload CRC32C, and zero padding to the next 8-byte boundary:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ File header (32 bytes)                                       │
//! │  - Magic: "siglog\r\n" (8 bytes)                             │
//! │  - Version: u16, reserved: u16                               │
//! │  - Root index offset: u64 (patched at close)                 │
//! │  - Creation time: i64 fixed-point UTC, reserved: u32         │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Chunk header (32 bytes)                                      │
//! │  - payload_length: u32, payload_prev_length: u32             │
//! │  - tag: u8, reserved: u8, chunk_meta: u16                    │
//! │  - offset_next: u64 (back-patched), offset_prev: u64         │
//! │  - header_crc: u32 (CRC32C over the preceding 28 bytes)      │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload, payload_crc: u32, padding to 8-byte alignment       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Chunks of the same tag (and, for signal-owned tags, the same
//! signal/level/kind) form doubly linked chains. Appending a chunk
//! back-patches the previous chunk's `offset_next` in place; this is the
//! only non-append write in the format besides the root index pointer.

use crate::error::{LogError, Result};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Magic bytes at the start of every log file.
pub const FILE_MAGIC: [u8; 8] = *b"siglog\r\n";

/// Current file format version.
pub const FORMAT_VERSION: u16 = 1;

/// File header size in bytes.
pub const FILE_HEADER_SIZE: u64 = 32;

/// Chunk header size in bytes.
pub const CHUNK_HEADER_SIZE: usize = 32;

/// File offset of the root index pointer within the file header.
const ROOT_OFFSET_FIELD: u64 = 12;

/// Chunk type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ChunkTag {
    /// Source definition.
    SourceDef = 1,
    /// Signal definition.
    SignalDef = 2,
    /// Caller-opaque user data.
    UserData = 3,
    /// Per-signal per-level chunk offset index.
    Index = 4,
    /// Level-0 raw sample data.
    Data = 5,
    /// Level ≥ 1 statistical summaries.
    Summary = 6,
    /// Annotation leaves and annotation summaries.
    Annotation = 7,
    /// UTC time anchors and their summaries.
    Utc = 8,
    /// End-of-file root index.
    End = 9,
}

impl ChunkTag {
    /// Creates a ChunkTag from its wire encoding.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::SourceDef),
            2 => Some(Self::SignalDef),
            3 => Some(Self::UserData),
            4 => Some(Self::Index),
            5 => Some(Self::Data),
            6 => Some(Self::Summary),
            7 => Some(Self::Annotation),
            8 => Some(Self::Utc),
            9 => Some(Self::End),
            _ => None,
        }
    }
}

/// Which per-signal track an index chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TrackKind {
    /// Sample data and its summaries.
    Samples = 0,
    /// UTC time anchors.
    Utc = 1,
    /// Annotations.
    Annotation = 2,
}

impl TrackKind {
    /// Creates a TrackKind from its wire encoding.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Samples),
            1 => Some(Self::Utc),
            2 => Some(Self::Annotation),
            _ => None,
        }
    }
}

/// Maximum summary tree depth representable in chunk_meta.
pub const LEVEL_MAX: u8 = 15;

/// Builds chunk_meta for a signal-owned chunk: bits 0..8 signal id,
/// bits 8..12 level.
pub fn track_meta(signal_id: u16, level: u8) -> u16 {
    debug_assert!(signal_id <= 0xff && level <= LEVEL_MAX);
    signal_id | (u16::from(level) << 8)
}

/// Builds chunk_meta for an index chunk: [`track_meta`] plus the track kind
/// in bits 12..14.
pub fn index_meta(signal_id: u16, level: u8, kind: TrackKind) -> u16 {
    track_meta(signal_id, level) | (u16::from(kind as u8) << 12)
}

/// Extracts the signal id from chunk_meta.
pub fn meta_signal_id(meta: u16) -> u16 {
    meta & 0xff
}

/// Extracts the level from chunk_meta.
pub fn meta_level(meta: u16) -> u8 {
    ((meta >> 8) & 0x0f) as u8
}

/// Extracts the track kind from an index chunk's chunk_meta.
pub fn meta_kind(meta: u16) -> Option<TrackKind> {
    TrackKind::from_u8(((meta >> 12) & 0x03) as u8)
}

/// One {offset, first_key} pair of an index chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// File offset of the referenced chunk.
    pub offset: u64,
    /// First sample id (sample/UTC tracks) or timestamp (annotations) of
    /// the referenced chunk.
    pub first_key: i64,
}

/// Log file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version.
    pub version: u16,
    /// Offset of the root index chunk, 0 while the file is open.
    pub root_index_offset: u64,
    /// Creation time, fixed-point UTC.
    pub created: i64,
}

impl FileHeader {
    /// Encodes the 32-byte header.
    pub fn encode(&self) -> [u8; FILE_HEADER_SIZE as usize] {
        let mut buf = [0u8; FILE_HEADER_SIZE as usize];
        buf[0..8].copy_from_slice(&FILE_MAGIC);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[12..20].copy_from_slice(&self.root_index_offset.to_le_bytes());
        buf[20..28].copy_from_slice(&self.created.to_le_bytes());
        buf
    }

    /// Decodes and validates a 32-byte header.
    pub fn decode(buf: &[u8; FILE_HEADER_SIZE as usize]) -> Result<Self> {
        if buf[0..8] != FILE_MAGIC {
            return Err(LogError::Unsupported("not a siglog file".into()));
        }
        let version = u16::from_le_bytes(buf[8..10].try_into().unwrap());
        if version > FORMAT_VERSION {
            return Err(LogError::UnsupportedVersion(version));
        }
        Ok(Self {
            version,
            root_index_offset: u64::from_le_bytes(buf[12..20].try_into().unwrap()),
            created: i64::from_le_bytes(buf[20..28].try_into().unwrap()),
        })
    }
}

/// Decoded chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Payload length in bytes (padding excluded).
    pub payload_length: u32,
    /// Payload length of the previous chunk in the same chain.
    pub payload_prev_length: u32,
    /// Chunk type tag.
    pub tag: ChunkTag,
    /// Tag-specific metadata.
    pub chunk_meta: u16,
    /// Offset of the next chunk in the same chain, 0 until patched.
    pub offset_next: u64,
    /// Offset of the previous chunk in the same chain, 0 for the head.
    pub offset_prev: u64,
}

impl ChunkHeader {
    /// Encodes the 32-byte header, computing the header CRC.
    pub fn encode(&self) -> [u8; CHUNK_HEADER_SIZE] {
        let mut buf = [0u8; CHUNK_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.payload_length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.payload_prev_length.to_le_bytes());
        buf[8] = self.tag as u8;
        buf[10..12].copy_from_slice(&self.chunk_meta.to_le_bytes());
        buf[12..20].copy_from_slice(&self.offset_next.to_le_bytes());
        buf[20..28].copy_from_slice(&self.offset_prev.to_le_bytes());
        let crc = crc32c::crc32c(&buf[0..28]);
        buf[28..32].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a 32-byte header, verifying the header CRC.
    pub fn decode(buf: &[u8; CHUNK_HEADER_SIZE]) -> Result<Self> {
        let expected = u32::from_le_bytes(buf[28..32].try_into().unwrap());
        let actual = crc32c::crc32c(&buf[0..28]);
        if expected != actual {
            return Err(LogError::CrcMismatch { expected, actual });
        }
        let tag = ChunkTag::from_u8(buf[8])
            .ok_or_else(|| LogError::ParameterInvalid(format!("unknown chunk tag {}", buf[8])))?;
        Ok(Self {
            payload_length: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            payload_prev_length: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            tag,
            chunk_meta: u16::from_le_bytes(buf[10..12].try_into().unwrap()),
            offset_next: u64::from_le_bytes(buf[12..20].try_into().unwrap()),
            offset_prev: u64::from_le_bytes(buf[20..28].try_into().unwrap()),
        })
    }
}

fn align8(n: u64) -> u64 {
    (n + 7) & !7
}

/// Returns the total file span of a chunk with the given payload length.
pub fn chunk_span(payload_length: u32) -> u64 {
    CHUNK_HEADER_SIZE as u64 + align8(u64::from(payload_length) + 4)
}

/// Chain identity: chunks of these keys are doubly linked together.
///
/// Definition, user-data and end chunks chain per tag; signal-owned chunks
/// chain per (tag, chunk_meta), which separates signals, levels and track
/// kinds.
fn chain_key(tag: ChunkTag, meta: u16) -> (u8, u16) {
    match tag {
        ChunkTag::SourceDef | ChunkTag::SignalDef | ChunkTag::UserData | ChunkTag::End => {
            (tag as u8, 0)
        }
        _ => (tag as u8, meta),
    }
}

/// Head and tail of one chunk chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainState {
    /// Offset of the first chunk in the chain.
    pub head: u64,
    /// Offset of the last chunk in the chain.
    pub tail: u64,
    /// Header of the last chunk (kept for back-patching).
    header: ChunkHeader,
}

/// Append-only chunk writer with per-chain back-patching.
pub struct ChunkWriter {
    file: File,
    position: u64,
    chains: BTreeMap<(u8, u16), ChainState>,
}

impl ChunkWriter {
    /// Creates a new log file, writing the file header.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let header = FileHeader {
            version: FORMAT_VERSION,
            root_index_offset: 0,
            created: crate::time::now(),
        };
        file.write_all(&header.encode())?;
        Ok(Self {
            file,
            position: FILE_HEADER_SIZE,
            chains: BTreeMap::new(),
        })
    }

    /// Returns the current append position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Appends a chunk and links it into its chain.
    ///
    /// Returns the chunk's file offset. If the chain already has a tail,
    /// that chunk's header is back-patched in place with the new offset
    /// before the new chunk is appended.
    pub fn write_chunk(&mut self, tag: ChunkTag, chunk_meta: u16, payload: &[u8]) -> Result<u64> {
        let offset = self.position;
        let key = chain_key(tag, chunk_meta);

        let (offset_prev, payload_prev_length) = match self.chains.get_mut(&key) {
            Some(chain) => {
                chain.header.offset_next = offset;
                self.file.seek(SeekFrom::Start(chain.tail))?;
                self.file.write_all(&chain.header.encode())?;
                (chain.tail, chain.header.payload_length)
            }
            None => (0, 0),
        };

        let header = ChunkHeader {
            payload_length: payload.len() as u32,
            payload_prev_length,
            tag,
            chunk_meta,
            offset_next: 0,
            offset_prev,
        };
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&header.encode())?;
        self.file.write_all(payload)?;
        self.file.write_all(&crc32c::crc32c(payload).to_le_bytes())?;
        let span = chunk_span(payload.len() as u32);
        let pad = span - CHUNK_HEADER_SIZE as u64 - payload.len() as u64 - 4;
        if pad > 0 {
            self.file.write_all(&[0u8; 8][..pad as usize])?;
        }
        self.position += span;

        let chain = self.chains.entry(key).or_insert(ChainState {
            head: offset,
            tail: offset,
            header,
        });
        chain.tail = offset;
        chain.header = header;
        Ok(offset)
    }

    /// Patches the file header's root index pointer. Called last at close so
    /// a crash beforehand leaves a scannable file with a zero pointer.
    pub fn patch_root_index(&mut self, offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(ROOT_OFFSET_FIELD))?;
        self.file.write_all(&offset.to_le_bytes())?;
        self.file.seek(SeekFrom::Start(self.position))?;
        Ok(())
    }

    /// Forces buffered data to the operating system and disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Flushes and durably syncs all data including metadata.
    pub fn sync_all(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Returns all chains as (tag, chunk_meta, state) for the root index.
    pub fn chains(&self) -> impl Iterator<Item = (ChunkTag, u16, &ChainState)> + '_ {
        self.chains.iter().map(|((tag, meta), state)| {
            (ChunkTag::from_u8(*tag).expect("chain keys hold valid tags"), *meta, state)
        })
    }
}

/// Root-index flag: the signal's level-0 data chunks were omitted.
pub const ROOT_SIGNAL_FLAG_DATA_OMITTED: u32 = 1;

/// Per-signal entry of the root index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootSignal {
    /// Signal id.
    pub signal_id: u16,
    /// Signal flags (see `ROOT_SIGNAL_FLAG_*`).
    pub flags: u32,
    /// Total samples covered, gaps included.
    pub sample_count: i64,
}

/// Per-chain entry of the root index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootChain {
    /// Chain tag.
    pub tag: ChunkTag,
    /// Chain chunk_meta key.
    pub chunk_meta: u16,
    /// Offset of the first chunk.
    pub head: u64,
    /// Offset of the last chunk.
    pub tail: u64,
}

/// The end-of-file root index: per-signal totals plus every chain's head
/// and tail offset. Written as the final chunk at close; the file header's
/// root pointer is patched to it afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootIndex {
    /// Per-signal entries, ascending by id.
    pub signals: Vec<RootSignal>,
    /// One entry per chunk chain.
    pub chains: Vec<RootChain>,
}

impl RootIndex {
    /// Encodes the End chunk payload.
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.signals.len() * 16 + self.chains.len() * 24);
        out.extend_from_slice(&(self.signals.len() as u16).to_le_bytes());
        out.extend_from_slice(&[0u8; 6]);
        for s in &self.signals {
            out.extend_from_slice(&s.signal_id.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&s.flags.to_le_bytes());
            out.extend_from_slice(&s.sample_count.to_le_bytes());
        }
        out.extend_from_slice(&(self.chains.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        for c in &self.chains {
            out.push(c.tag as u8);
            out.push(0);
            out.extend_from_slice(&c.chunk_meta.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&c.head.to_le_bytes());
            out.extend_from_slice(&c.tail.to_le_bytes());
        }
        out
    }

    /// Decodes an End chunk payload.
    pub fn decode_payload(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(LogError::Truncated);
        }
        let signal_count = u16::from_le_bytes(buf[0..2].try_into().unwrap()) as usize;
        let mut pos = 8;
        let mut signals = Vec::with_capacity(signal_count);
        for _ in 0..signal_count {
            if buf.len() < pos + 16 {
                return Err(LogError::Truncated);
            }
            signals.push(RootSignal {
                signal_id: u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap()),
                flags: u32::from_le_bytes(buf[pos + 4..pos + 8].try_into().unwrap()),
                sample_count: i64::from_le_bytes(buf[pos + 8..pos + 16].try_into().unwrap()),
            });
            pos += 16;
        }
        if buf.len() < pos + 8 {
            return Err(LogError::Truncated);
        }
        let chain_count = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 8;
        let mut chains = Vec::with_capacity(chain_count);
        for _ in 0..chain_count {
            if buf.len() < pos + 24 {
                return Err(LogError::Truncated);
            }
            let tag = ChunkTag::from_u8(buf[pos]).ok_or_else(|| {
                LogError::ParameterInvalid(format!("unknown chain tag {}", buf[pos]))
            })?;
            chains.push(RootChain {
                tag,
                chunk_meta: u16::from_le_bytes(buf[pos + 2..pos + 4].try_into().unwrap()),
                head: u64::from_le_bytes(buf[pos + 8..pos + 16].try_into().unwrap()),
                tail: u64::from_le_bytes(buf[pos + 16..pos + 24].try_into().unwrap()),
            });
            pos += 24;
        }
        Ok(Self { signals, chains })
    }
}

fn eof_as_truncated(e: io::Error) -> LogError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        LogError::Truncated
    } else {
        LogError::Io(e)
    }
}

/// Reads and validates the file header.
pub fn read_file_header(file: &mut File) -> Result<FileHeader> {
    let mut buf = [0u8; FILE_HEADER_SIZE as usize];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut buf).map_err(eof_as_truncated)?;
    FileHeader::decode(&buf)
}

/// Reads and validates a chunk header at `offset`.
pub fn read_chunk_header(file: &mut File, offset: u64) -> Result<ChunkHeader> {
    let mut buf = [0u8; CHUNK_HEADER_SIZE];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf).map_err(eof_as_truncated)?;
    ChunkHeader::decode(&buf)
}

/// Reads a complete chunk at `offset`, validating both CRCs.
pub fn read_chunk(file: &mut File, offset: u64) -> Result<(ChunkHeader, Vec<u8>)> {
    let header = read_chunk_header(file, offset)?;
    let mut payload = vec![0u8; header.payload_length as usize + 4];
    file.read_exact(&mut payload).map_err(eof_as_truncated)?;
    let expected =
        u32::from_le_bytes(payload[header.payload_length as usize..].try_into().unwrap());
    payload.truncate(header.payload_length as usize);
    let actual = crc32c::crc32c(&payload);
    if expected != actual {
        return Err(LogError::CrcMismatch { expected, actual });
    }
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_header_roundtrip() {
        let header = FileHeader {
            version: FORMAT_VERSION,
            root_index_offset: 4096,
            created: 12345,
        };
        let buf = header.encode();
        assert_eq!(header, FileHeader::decode(&buf).unwrap());
    }

    #[test]
    fn test_file_header_bad_magic() {
        let mut buf = FileHeader { version: 1, root_index_offset: 0, created: 0 }.encode();
        buf[0] = b'X';
        assert!(matches!(FileHeader::decode(&buf), Err(LogError::Unsupported(_))));
    }

    #[test]
    fn test_chunk_header_roundtrip() {
        let header = ChunkHeader {
            payload_length: 100,
            payload_prev_length: 50,
            tag: ChunkTag::Data,
            chunk_meta: track_meta(5, 2),
            offset_next: 0,
            offset_prev: 64,
        };
        let buf = header.encode();
        assert_eq!(header, ChunkHeader::decode(&buf).unwrap());
    }

    #[test]
    fn test_chunk_header_crc_detected() {
        let mut buf = ChunkHeader {
            payload_length: 1,
            payload_prev_length: 0,
            tag: ChunkTag::Data,
            chunk_meta: 0,
            offset_next: 0,
            offset_prev: 0,
        }
        .encode();
        buf[0] ^= 0xff;
        assert!(matches!(
            ChunkHeader::decode(&buf),
            Err(LogError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_meta_fields() {
        let meta = index_meta(17, 3, TrackKind::Utc);
        assert_eq!(17, meta_signal_id(meta));
        assert_eq!(3, meta_level(meta));
        assert_eq!(Some(TrackKind::Utc), meta_kind(meta));
    }

    #[test]
    fn test_chunk_span_alignment() {
        assert_eq!(40, chunk_span(0)); // header + crc padded to 8
        assert_eq!(40, chunk_span(4));
        assert_eq!(48, chunk_span(5));
        assert_eq!(48, chunk_span(12));
    }

    #[test]
    fn test_write_and_read_chain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain.sgl");
        let mut writer = ChunkWriter::create(&path).unwrap();

        let o1 = writer.write_chunk(ChunkTag::UserData, 1, b"one").unwrap();
        let o2 = writer.write_chunk(ChunkTag::UserData, 2, b"two two").unwrap();
        let o3 = writer.write_chunk(ChunkTag::UserData, 3, b"three").unwrap();
        writer.sync_all().unwrap();

        let mut file = File::open(&path).unwrap();
        let (h1, p1) = read_chunk(&mut file, o1).unwrap();
        assert_eq!(b"one", &p1[..]);
        assert_eq!(o2, h1.offset_next);
        assert_eq!(0, h1.offset_prev);

        let (h2, _) = read_chunk(&mut file, o2).unwrap();
        assert_eq!(o3, h2.offset_next);
        assert_eq!(o1, h2.offset_prev);
        assert_eq!(3, h2.payload_prev_length);

        let (h3, p3) = read_chunk(&mut file, o3).unwrap();
        assert_eq!(b"three", &p3[..]);
        assert_eq!(0, h3.offset_next);
        assert_eq!(o2, h3.offset_prev);
    }

    #[test]
    fn test_separate_chains_do_not_link() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chains.sgl");
        let mut writer = ChunkWriter::create(&path).unwrap();

        let d = writer.write_chunk(ChunkTag::Data, track_meta(1, 0), b"data").unwrap();
        let s = writer.write_chunk(ChunkTag::Summary, track_meta(1, 1), b"summary!").unwrap();
        let d2 = writer.write_chunk(ChunkTag::Data, track_meta(1, 0), b"data2").unwrap();
        writer.sync_all().unwrap();

        let mut file = File::open(&path).unwrap();
        let (hd, _) = read_chunk(&mut file, d).unwrap();
        assert_eq!(d2, hd.offset_next);
        let (hs, _) = read_chunk(&mut file, s).unwrap();
        assert_eq!(0, hs.offset_next);
    }

    #[test]
    fn test_payload_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrupt.sgl");
        let mut writer = ChunkWriter::create(&path).unwrap();
        let off = writer.write_chunk(ChunkTag::UserData, 0, b"payload bytes").unwrap();
        writer.sync_all().unwrap();

        let mut contents = std::fs::read(&path).unwrap();
        contents[off as usize + CHUNK_HEADER_SIZE] ^= 0xff;
        std::fs::write(&path, &contents).unwrap();

        let mut file = File::open(&path).unwrap();
        assert!(read_chunk_header(&mut file, off).is_ok());
        assert!(matches!(
            read_chunk(&mut file, off),
            Err(LogError::CrcMismatch { .. })
        ));
    }
}
