//! Bounded single-producer/single-consumer command ring.
//!
//! The producer (caller) enqueues [`Command`]s; the writer thread dequeues
//! and applies them in FIFO order. Head/tail indices are synchronized with
//! acquire/release atomics; a mutex/condvar pair is used only to sleep and
//! wake blocked sides, never to guard the slots themselves.
//!
//! When the ring is full the producer blocks, unless drop-on-overflow is
//! requested for a droppable command: sample-data commands are then counted
//! and discarded, while control commands (definitions, flush, close, ...)
//! always block until space frees up.

use crate::def::{AnnotationType, SignalDef, SourceDef, StorageType};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Default number of ring slots.
pub const DEFAULT_RING_CAPACITY: usize = 1024;

/// A command submitted by the producer to the writer thread.
#[derive(Debug)]
pub enum Command {
    /// Define a source.
    SourceDef(SourceDef),
    /// Define a signal.
    SignalDef(SignalDef),
    /// Append user data.
    UserData {
        /// Caller-opaque chunk metadata (12 bits).
        chunk_meta: u16,
        /// Payload interpretation.
        storage_type: StorageType,
        /// Payload bytes.
        data: Vec<u8>,
    },
    /// Append an annotation.
    Annotation {
        /// Target signal (0 = global).
        signal_id: u16,
        /// Sample id (FSR) or UTC timestamp.
        timestamp: i64,
        /// Vertical position hint, NaN for automatic.
        y: f32,
        /// Annotation rendering type.
        annotation_type: AnnotationType,
        /// Application-defined grouping id.
        group_id: u8,
        /// Payload interpretation.
        storage_type: StorageType,
        /// Payload bytes.
        data: Vec<u8>,
    },
    /// Append a UTC time anchor.
    Utc {
        /// Target signal.
        signal_id: u16,
        /// Absolute sample id.
        sample_id: i64,
        /// Fixed-point UTC timestamp.
        timestamp: i64,
    },
    /// Append fixed-sample-rate sample data. The only droppable command.
    FsrData {
        /// Target signal.
        signal_id: u16,
        /// Absolute sample id of the first sample.
        sample_id: i64,
        /// Packed sample bytes.
        data: Vec<u8>,
        /// Number of samples in `data`.
        sample_count: u32,
    },
    /// Enable or disable level-0 data emission for a signal.
    FsrOmitData {
        /// Target signal.
        signal_id: u16,
        /// True to stop writing raw data chunks.
        omit: bool,
    },
    /// Update the writer flags.
    FlagsSet(u32),
    /// Flush to disk, then open the gate.
    Flush(Arc<FlushGate>),
    /// Drain, close the file and exit the worker.
    Close,
}

impl Command {
    /// Returns true if this command may be discarded under overflow.
    pub fn is_droppable(&self) -> bool {
        matches!(self, Command::FsrData { .. })
    }
}

/// Completion gate for [`Command::Flush`].
#[derive(Debug, Default)]
pub struct FlushGate {
    done: Mutex<bool>,
    cv: Condvar,
}

impl FlushGate {
    /// Creates a closed gate.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Opens the gate, waking all waiters.
    pub fn open(&self) {
        *self.done.lock().expect("flush gate poisoned") = true;
        self.cv.notify_all();
    }

    /// Blocks until the gate opens.
    pub fn wait(&self) {
        let mut done = self.done.lock().expect("flush gate poisoned");
        while !*done {
            done = self.cv.wait(done).expect("flush gate poisoned");
        }
    }
}

/// Outcome of a producer push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The command was enqueued.
    Pushed,
    /// The command was discarded under the drop-on-overflow policy.
    Dropped,
}

struct Slot(UnsafeCell<Option<Command>>);

// Slots are only touched by the single producer (before the tail release
// store) or the single consumer (after the tail acquire load), never both.
unsafe impl Sync for Slot {}

/// Bounded SPSC ring of commands.
pub struct CommandRing {
    slots: Box<[Slot]>,
    head: AtomicUsize,
    tail: AtomicUsize,
    dropped: AtomicU64,
    sleep: Mutex<()>,
    wake: Condvar,
}

impl CommandRing {
    /// Creates a ring with the given slot count (minimum 2).
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(2);
        let slots = (0..capacity)
            .map(|_| Slot(UnsafeCell::new(None)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Arc::new(Self {
            slots,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            sleep: Mutex::new(()),
            wake: Condvar::new(),
        })
    }

    /// Creates a ring with [`DEFAULT_RING_CAPACITY`] slots.
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_RING_CAPACITY)
    }

    /// Number of commands dropped under the overflow policy.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn is_full(&self) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head) >= self.slots.len()
    }

    /// Attempts to enqueue without blocking. Returns the command back when
    /// the ring is full.
    ///
    /// Must only be called from the single producer thread.
    pub fn try_push(&self, command: Command) -> std::result::Result<(), Command> {
        if self.is_full() {
            return Err(command);
        }
        let tail = self.tail.load(Ordering::Relaxed);
        let slot = &self.slots[tail % self.slots.len()];
        // Safety: the slot is past head and before tail, so only the
        // producer can touch it until the release store below.
        unsafe {
            *slot.0.get() = Some(command);
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        let _guard = self.sleep.lock().expect("ring lock poisoned");
        self.wake.notify_all();
        Ok(())
    }

    /// Enqueues a command, honoring the overflow policy.
    ///
    /// With `drop_on_overflow` set and a droppable command, a full ring
    /// discards the command and counts it. Otherwise the producer blocks
    /// until the consumer frees a slot.
    pub fn push(&self, command: Command, drop_on_overflow: bool) -> PushOutcome {
        let droppable = command.is_droppable();
        let mut command = command;
        loop {
            match self.try_push(command) {
                Ok(()) => return PushOutcome::Pushed,
                Err(back) => {
                    if drop_on_overflow && droppable {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(dropped = self.dropped(), "ring full, sample data dropped");
                        return PushOutcome::Dropped;
                    }
                    command = back;
                    let guard = self.sleep.lock().expect("ring lock poisoned");
                    if self.is_full() {
                        let _ = self
                            .wake
                            .wait_timeout(guard, Duration::from_millis(10))
                            .expect("ring lock poisoned");
                    }
                }
            }
        }
    }

    /// Attempts to dequeue without blocking.
    ///
    /// Must only be called from the single consumer thread.
    pub fn try_pop(&self) -> Option<Command> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let slot = &self.slots[head % self.slots.len()];
        // Safety: the slot is before tail and at head, so only the consumer
        // can touch it until the release store below.
        let command = unsafe { (*slot.0.get()).take() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        let _guard = self.sleep.lock().expect("ring lock poisoned");
        self.wake.notify_all();
        command
    }

    /// Dequeues the next command, blocking until one arrives.
    pub fn pop(&self) -> Command {
        loop {
            if let Some(command) = self.try_pop() {
                return command;
            }
            let guard = self.sleep.lock().expect("ring lock poisoned");
            let head = self.head.load(Ordering::Relaxed);
            if self.tail.load(Ordering::Acquire) == head {
                let _ = self
                    .wake
                    .wait_timeout(guard, Duration::from_millis(10))
                    .expect("ring lock poisoned");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(signal_id: u16, sample_id: i64) -> Command {
        Command::FsrData {
            signal_id,
            sample_id,
            data: vec![0u8; 4],
            sample_count: 1,
        }
    }

    #[test]
    fn test_fifo_order() {
        let ring = CommandRing::with_capacity(8);
        for i in 0..5 {
            ring.try_push(sample(1, i)).unwrap();
        }
        for i in 0..5 {
            match ring.try_pop().unwrap() {
                Command::FsrData { sample_id, .. } => assert_eq!(i, sample_id),
                other => panic!("unexpected command {other:?}"),
            }
        }
        assert!(ring.try_pop().is_none());
    }

    #[test]
    fn test_full_ring_rejects() {
        let ring = CommandRing::with_capacity(2);
        ring.try_push(sample(1, 0)).unwrap();
        ring.try_push(sample(1, 1)).unwrap();
        assert!(ring.try_push(sample(1, 2)).is_err());
        ring.try_pop().unwrap();
        ring.try_push(sample(1, 2)).unwrap();
    }

    #[test]
    fn test_drop_on_overflow_counts_samples_only() {
        let ring = CommandRing::with_capacity(2);
        assert_eq!(PushOutcome::Pushed, ring.push(sample(1, 0), true));
        assert_eq!(PushOutcome::Pushed, ring.push(sample(1, 1), true));
        assert_eq!(PushOutcome::Dropped, ring.push(sample(1, 2), true));
        assert_eq!(PushOutcome::Dropped, ring.push(sample(1, 3), true));
        assert_eq!(2, ring.dropped());
    }

    #[test]
    fn test_cross_thread_handoff() {
        let ring = CommandRing::with_capacity(4);
        let producer_ring = Arc::clone(&ring);
        let producer = std::thread::spawn(move || {
            for i in 0..1000 {
                producer_ring.push(sample(1, i), false);
            }
            producer_ring.push(Command::Close, false);
        });
        let mut next = 0i64;
        loop {
            match ring.pop() {
                Command::FsrData { sample_id, .. } => {
                    assert_eq!(next, sample_id);
                    next += 1;
                }
                Command::Close => break,
                other => panic!("unexpected command {other:?}"),
            }
        }
        assert_eq!(1000, next);
        producer.join().unwrap();
    }
}
