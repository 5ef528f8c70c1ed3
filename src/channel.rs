//! Shared byte channel between a transport's receive loop and the decode loop
//!
//! The channel is single-producer/single-consumer. The writer pushes
//! timestamped chunks onto an unbounded crossbeam channel and tracks the
//! number of bytes not yet taken by the reader. Once that backlog crosses the
//! high-water mark, [`ChannelWriter::write`] waits a bounded amount of time
//! for the decode loop to catch up and then appends anyway, so a transport
//! loop is never parked indefinitely.
//!
//! # Architecture
//!
//! ```text
//! transport thread ──write()──► [Chunk, Chunk, ...] ──fill()──► ChannelReader buffer ──► decoder
//!                        pending bytes (AtomicUsize) ◄──────────────┘
//! ```
//!
//! Every chunk carries the wall-clock time it was received (or, for file
//! imports, the recorded timestamp). The reader keeps a list of chunk
//! boundaries so a decoded frame can be stamped with the time its last byte
//! arrived.
//!
//! Dropping (or [`ChannelWriter::close`]-ing) the writer is end-of-stream:
//! the reader drains what is left and then reports [`FillStatus::Closed`].

use crate::types::now_millis;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest time a single write waits for the backlog to drain
const BACKPRESSURE_WAIT: Duration = Duration::from_millis(250);

/// A run of received bytes and their arrival time
#[derive(Debug, Clone)]
struct Chunk {
    bytes: Vec<u8>,
    timestamp: i64,
}

/// Create a connected writer/reader pair
pub fn byte_channel(high_water_bytes: usize) -> (ChannelWriter, ChannelReader) {
    let (tx, rx) = unbounded();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        ChannelWriter {
            tx,
            pending: pending.clone(),
            high_water_bytes,
        },
        ChannelReader {
            rx,
            pending,
            buffer: Vec::new(),
            marks: VecDeque::new(),
            closed: false,
        },
    )
}

/// Producer half, owned by a transport's receive loop
#[derive(Debug)]
pub struct ChannelWriter {
    tx: Sender<Chunk>,
    pending: Arc<AtomicUsize>,
    high_water_bytes: usize,
}

impl ChannelWriter {
    /// Append bytes stamped with the current time.
    ///
    /// Returns false if the reader is gone.
    pub fn write(&self, bytes: &[u8]) -> bool {
        self.write_stamped(bytes.to_vec(), now_millis())
    }

    /// Append bytes with an explicit timestamp
    pub fn write_stamped(&self, bytes: Vec<u8>, timestamp: i64) -> bool {
        if bytes.is_empty() {
            return true;
        }
        self.wait_for_backlog();
        let len = bytes.len();
        self.pending.fetch_add(len, Ordering::AcqRel);
        if self.tx.send(Chunk { bytes, timestamp }).is_err() {
            self.pending.fetch_sub(len, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Bytes written but not yet taken by the reader
    pub fn pending_bytes(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Signal end-of-stream
    pub fn close(self) {}

    fn wait_for_backlog(&self) {
        if self.pending_bytes() <= self.high_water_bytes {
            return;
        }
        let deadline = Instant::now() + BACKPRESSURE_WAIT;
        while self.pending_bytes() > self.high_water_bytes && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Result of waiting for more input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
    /// New bytes were appended to the buffer
    Data,
    /// Nothing arrived before the timeout
    Idle,
    /// The writer is gone and every chunk has been taken
    Closed,
}

/// Consumer half, owned by the decode loop
#[derive(Debug)]
pub struct ChannelReader {
    rx: Receiver<Chunk>,
    pending: Arc<AtomicUsize>,
    buffer: Vec<u8>,
    /// (end offset in `buffer`, timestamp) for every chunk still in the buffer
    marks: VecDeque<(usize, i64)>,
    closed: bool,
}

impl ChannelReader {
    /// Wait up to `timeout` for bytes, then take everything already queued
    pub fn fill(&mut self, timeout: Duration) -> FillStatus {
        if self.closed {
            return FillStatus::Closed;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) => self.push(chunk),
            Err(RecvTimeoutError::Timeout) => return FillStatus::Idle,
            Err(RecvTimeoutError::Disconnected) => {
                self.closed = true;
                return FillStatus::Closed;
            }
        }
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => self.push(chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        FillStatus::Data
    }

    fn push(&mut self, chunk: Chunk) {
        self.pending.fetch_sub(chunk.bytes.len(), Ordering::AcqRel);
        self.buffer.extend_from_slice(&chunk.bytes);
        self.marks.push_back((self.buffer.len(), chunk.timestamp));
    }

    /// Bytes received but not yet consumed
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Discard the first `n` buffered bytes
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buffer.len());
        if n == 0 {
            return;
        }
        self.buffer.drain(..n);
        while self.marks.front().is_some_and(|&(end, _)| end <= n) {
            self.marks.pop_front();
        }
        for mark in self.marks.iter_mut() {
            mark.0 -= n;
        }
    }

    /// Arrival time of the byte just before offset `end`
    pub fn timestamp_at(&self, end: usize) -> Option<i64> {
        let index = self.marks.partition_point(|&(mark_end, _)| mark_end < end);
        self.marks.get(index).map(|&(_, ts)| ts)
    }

    /// True once the writer is gone and the queue is drained
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
