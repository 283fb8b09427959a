//! siglog - self-describing binary time-series log files.
//!
//! This crate archives long recordings from instruments at fixed sample
//! rates together with annotations and UTC time anchors, and serves fast
//! range reads and multi-resolution statistical summaries over them
//! without rescanning the raw data.
//!
//! # Components
//!
//! - [`writer::Writer`]: synchronous writer façade (sources, signals,
//!   samples, annotations, UTC anchors, user data)
//! - [`threaded::ThreadedWriter`]: the same surface decoupled from disk
//!   I/O by a bounded SPSC command ring and a worker thread
//! - [`reader::Reader`]: chunk index, range reads with gap regeneration,
//!   the statistics resolver and the bidirectional time map
//! - [`copy::copy`]: rewrites a log by replaying reads into a fresh writer
//!
//! # Example
//!
//! ```rust,ignore
//! use siglog::def::{SignalDef, SourceDef};
//! use siglog::writer::Writer;
//! use siglog::reader::Reader;
//!
//! let mut writer = Writer::open("recording.sgl")?;
//! writer.source_def(&SourceDef { source_id: 1, name: "meter".into(), ..Default::default() })?;
//! writer.signal_def(&SignalDef {
//!     signal_id: 1,
//!     source_id: 1,
//!     sample_rate: 100_000,
//!     name: "current".into(),
//!     units: "A".into(),
//!     ..Default::default()
//! })?;
//! writer.fsr_f32(1, 0, &samples)?;
//! writer.close()?;
//!
//! let mut reader = Reader::open("recording.sgl")?;
//! let first_second = reader.fsr_f32(1, 0, 100_000)?;
//! let minute_view = reader.fsr_statistics(1, 0, 100_000, 60)?;
//! ```

#![deny(missing_docs)]

pub mod chunk;
pub mod copy;
pub mod datatype;
pub mod def;
pub mod error;
pub mod reader;
pub mod ring;
pub mod stats;
pub mod threaded;
pub mod time;
pub mod writer;

pub use datatype::{BaseType, DataType};
pub use def::{Annotation, AnnotationType, SignalDef, SignalKind, SourceDef, StorageType, UtcEntry};
pub use error::{error_code_description, error_code_name, LogError, Result};
pub use reader::Reader;
pub use stats::{Statistics, SummaryEntry};
pub use threaded::{ThreadedWriter, FLAG_DROP_ON_OVERFLOW};
pub use writer::Writer;
