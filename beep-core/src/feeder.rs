//! Lazy payload producers integrated with the sequencer.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

/// Observable feeder state, per the pause/resume design note: transitions
/// are `Idle -> Running -> Paused -> Running -> Finished`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeederState {
    Idle,
    Running,
    Paused,
    Finished,
}

/// A lazy sequence producer yielding chunks on demand.
///
/// Implementors are responsible for their own internal buffering; the
/// sequencer only calls `poll_chunk` with a maximum size and reads back the
/// reported progress via `total_size`/`bytes_transferred`.
pub trait PayloadFeeder: Send {
    /// Produce up to `max_len` bytes. Returns an empty `Bytes` if paused or
    /// finished; the sequencer treats an empty, non-finished return as "no
    /// data ready yet" and leaves the feeder in the ready set.
    fn poll_chunk(&mut self, max_len: usize) -> Bytes;

    /// Total size if known in advance, for progress reporting.
    fn total_size(&self) -> Option<u64>;

    /// Bytes handed out so far.
    fn bytes_transferred(&self) -> u64;

    /// Whether the feeder has no more data to produce.
    fn is_finished(&self) -> bool;

    /// Whether the feeder is currently paused.
    fn is_paused(&self) -> bool;

    /// Pause the feeder. The sequencer detaches it from the ready set after
    /// observing this.
    fn pause(&mut self);

    /// Resume a paused feeder. The caller (sequencer) re-arms it at the
    /// back of the round-robin queue, never ahead of channels that were
    /// already waiting.
    fn resume(&mut self);
}

/// A feeder backed by an in-memory byte buffer, useful for tests and for
/// bridging bytes-shaped payloads into the feeder interface.
pub struct BytesFeeder {
    inner: Arc<Mutex<BytesFeederInner>>,
}

struct BytesFeederInner {
    remaining: Bytes,
    total: u64,
    transferred: u64,
    paused: bool,
}

impl BytesFeeder {
    pub fn new(data: Bytes) -> Self {
        let total = data.len() as u64;
        BytesFeeder {
            inner: Arc::new(Mutex::new(BytesFeederInner {
                remaining: data,
                total,
                transferred: 0,
                paused: false,
            })),
        }
    }

    /// A cloneable handle used by tests to pause/resume from outside the
    /// sequencer.
    pub fn handle(&self) -> BytesFeederHandle {
        BytesFeederHandle {
            inner: self.inner.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BytesFeederHandle {
    inner: Arc<Mutex<BytesFeederInner>>,
}

impl BytesFeederHandle {
    pub fn pause(&self) {
        self.inner.lock().paused = true;
    }

    pub fn resume(&self) {
        self.inner.lock().paused = false;
    }
}

impl PayloadFeeder for BytesFeeder {
    fn poll_chunk(&mut self, max_len: usize) -> Bytes {
        let mut inner = self.inner.lock();
        if inner.paused || inner.remaining.is_empty() {
            return Bytes::new();
        }
        let take = max_len.min(inner.remaining.len());
        let chunk = inner.remaining.split_to(take);
        inner.transferred += chunk.len() as u64;
        chunk
    }

    fn total_size(&self) -> Option<u64> {
        Some(self.inner.lock().total)
    }

    fn bytes_transferred(&self) -> u64 {
        self.inner.lock().transferred
    }

    fn is_finished(&self) -> bool {
        self.inner.lock().remaining.is_empty()
    }

    fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    fn pause(&mut self) {
        self.inner.lock().paused = true;
    }

    fn resume(&mut self) {
        self.inner.lock().paused = false;
    }
}
