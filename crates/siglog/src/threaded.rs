//! Threaded writer: a worker thread drains the command ring and applies
//! commands to the [`Writer`] façade.
//!
//! The file handle is owned by the worker exclusively; the producer only
//! touches the ring. The worker captures the first non-OK error and
//! short-circuits subsequent sample writes for the failing signal;
//! producer-side calls return the captured error on their next interaction.

use crate::def::{AnnotationType, SignalDef, SourceDef, StorageType};
use crate::error::{LogError, Result};
use crate::ring::{Command, CommandRing, FlushGate, DEFAULT_RING_CAPACITY};
use crate::writer::Writer;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Flag: drop sample data instead of blocking when the ring is full.
pub const FLAG_DROP_ON_OVERFLOW: u32 = 1 << 0;

struct Shared {
    flags: AtomicU32,
    first_error: Mutex<Option<LogError>>,
}

impl Shared {
    fn record(&self, error: &LogError) {
        let mut slot = self.first_error.lock().expect("error slot poisoned");
        if slot.is_none() {
            warn!(code = error.code(), %error, "writer thread captured error");
            *slot = Some(error.duplicate());
        }
    }

    fn peek(&self) -> Option<LogError> {
        self.first_error
            .lock()
            .expect("error slot poisoned")
            .as_ref()
            .map(LogError::duplicate)
    }
}

/// Writer whose disk I/O runs on a dedicated worker thread.
pub struct ThreadedWriter {
    ring: Arc<CommandRing>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadedWriter {
    /// Creates a new log file and starts the worker thread.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_capacity(path, DEFAULT_RING_CAPACITY)
    }

    /// Creates a new log file with an explicit ring capacity.
    pub fn open_with_capacity<P: AsRef<Path>>(path: P, ring_capacity: usize) -> Result<Self> {
        let writer = Writer::open(path)?;
        let ring = CommandRing::with_capacity(ring_capacity);
        let shared = Arc::new(Shared {
            flags: AtomicU32::new(0),
            first_error: Mutex::new(None),
        });
        let worker_ring = Arc::clone(&ring);
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("siglog-writer".into())
            .spawn(move || run_worker(writer, worker_ring, worker_shared))?;
        Ok(Self {
            ring,
            shared,
            worker: Some(worker),
        })
    }

    /// Returns the writer flags.
    pub fn flags(&self) -> u32 {
        self.shared.flags.load(Ordering::Acquire)
    }

    /// Replaces the writer flags. Takes effect for subsequent submissions.
    pub fn set_flags(&mut self, flags: u32) -> Result<()> {
        self.shared.flags.store(flags, Ordering::Release);
        self.submit(Command::FlagsSet(flags))
    }

    /// Number of sample-data commands dropped under `FLAG_DROP_ON_OVERFLOW`.
    pub fn dropped(&self) -> u64 {
        self.ring.dropped()
    }

    fn submit(&self, command: Command) -> Result<()> {
        if let Some(error) = self.shared.peek() {
            return Err(error);
        }
        let drop_on_overflow = self.flags() & FLAG_DROP_ON_OVERFLOW != 0;
        self.ring.push(command, drop_on_overflow);
        Ok(())
    }

    /// Defines a source.
    pub fn source_def(&mut self, source: &SourceDef) -> Result<()> {
        self.submit(Command::SourceDef(source.clone()))
    }

    /// Defines a signal.
    pub fn signal_def(&mut self, signal: &SignalDef) -> Result<()> {
        self.submit(Command::SignalDef(signal.clone()))
    }

    /// Appends caller-opaque user data.
    pub fn user_data(&mut self, chunk_meta: u16, storage_type: StorageType, data: &[u8]) -> Result<()> {
        self.submit(Command::UserData {
            chunk_meta,
            storage_type,
            data: data.to_vec(),
        })
    }

    /// Appends an annotation.
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
        self.submit(Command::Annotation {
            signal_id,
            timestamp,
            y,
            annotation_type,
            group_id,
            storage_type,
            data: data.to_vec(),
        })
    }

    /// Appends a UTC time anchor.
    pub fn utc(&mut self, signal_id: u16, sample_id: i64, timestamp: i64) -> Result<()> {
        self.submit(Command::Utc {
            signal_id,
            sample_id,
            timestamp,
        })
    }

    /// Appends FSR sample data. The only submission that may be dropped
    /// under `FLAG_DROP_ON_OVERFLOW`.
    pub fn fsr(&mut self, signal_id: u16, sample_id: i64, data: &[u8], sample_count: u32) -> Result<()> {
        self.submit(Command::FsrData {
            signal_id,
            sample_id,
            data: data.to_vec(),
            sample_count,
        })
    }

    /// Appends f32 samples to an F32 signal.
    pub fn fsr_f32(&mut self, signal_id: u16, sample_id: i64, samples: &[f32]) -> Result<()> {
        let mut data = Vec::with_capacity(samples.len() * 4);
        for s in samples {
            data.extend_from_slice(&s.to_le_bytes());
        }
        self.fsr(signal_id, sample_id, &data, samples.len() as u32)
    }

    /// Enables or disables level-0 data emission for a signal.
    pub fn fsr_omit_data(&mut self, signal_id: u16, omit: bool) -> Result<()> {
        self.submit(Command::FsrOmitData { signal_id, omit })
    }

    /// Blocks until every previously submitted command reached the file.
    pub fn flush(&mut self) -> Result<()> {
        let gate = FlushGate::new();
        self.submit(Command::Flush(Arc::clone(&gate)))?;
        gate.wait();
        match self.shared.peek() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Drains the ring, closes the file, joins the worker and returns the
    /// first captured error, if any.
    pub fn close(mut self) -> Result<()> {
        self.ring.push(Command::Close, false);
        if let Some(worker) = self.worker.take() {
            worker.join().map_err(|_| LogError::Abort)?;
        }
        match self.shared.peek() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Drop for ThreadedWriter {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.ring.push(Command::Close, false);
            let _ = worker.join();
        }
    }
}

fn run_worker(mut writer: Writer, ring: Arc<CommandRing>, shared: Arc<Shared>) {
    let mut failed_signals: HashSet<u16> = HashSet::new();
    loop {
        match ring.pop() {
            Command::Close => break,
            Command::Flush(gate) => {
                if let Err(e) = writer.flush() {
                    shared.record(&e);
                }
                gate.open();
            }
            Command::FlagsSet(flags) => writer.set_flags(flags),
            Command::FsrData {
                signal_id,
                sample_id,
                data,
                sample_count,
            } => {
                if failed_signals.contains(&signal_id) {
                    continue;
                }
                if let Err(e) = writer.fsr(signal_id, sample_id, &data, sample_count) {
                    failed_signals.insert(signal_id);
                    shared.record(&e);
                }
            }
            Command::SourceDef(source) => {
                if let Err(e) = writer.source_def(&source) {
                    shared.record(&e);
                }
            }
            Command::SignalDef(signal) => {
                if let Err(e) = writer.signal_def(&signal) {
                    shared.record(&e);
                }
            }
            Command::UserData {
                chunk_meta,
                storage_type,
                data,
            } => {
                if let Err(e) = writer.user_data(chunk_meta, storage_type, &data) {
                    shared.record(&e);
                }
            }
            Command::Annotation {
                signal_id,
                timestamp,
                y,
                annotation_type,
                group_id,
                storage_type,
                data,
            } => {
                if let Err(e) = writer.annotation(
                    signal_id,
                    timestamp,
                    y,
                    annotation_type,
                    group_id,
                    storage_type,
                    &data,
                ) {
                    shared.record(&e);
                }
            }
            Command::Utc {
                signal_id,
                sample_id,
                timestamp,
            } => {
                if let Err(e) = writer.utc(signal_id, sample_id, timestamp) {
                    shared.record(&e);
                }
            }
            Command::FsrOmitData { signal_id, omit } => {
                if let Err(e) = writer.fsr_omit_data(signal_id, omit) {
                    shared.record(&e);
                }
            }
        }
    }
    debug!("writer thread draining complete, closing file");
    if let Err(e) = writer.close() {
        shared.record(&e);
    }
}
