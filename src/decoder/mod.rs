//! Frame decoding
//!
//! A [`FrameDecoder`] turns a window of received bytes into one sample per
//! dataset field per valid frame. Decoders hold no I/O and no threads; the
//! decode loop in [`crate::connection`] feeds them whatever the byte channel
//! has buffered and carries the unconsumed remainder over to the next call.
//!
//! # Frame boundaries
//!
//! - **Binary**: fixed-length frames, optionally led by a sync byte and
//!   ended by a checksum ([`binary::BinaryDecoder`]).
//! - **CSV** and **vendor ASCII**: one record per line
//!   ([`text::TextDecoder`]).
//!
//! # Failure handling
//!
//! Malformed input is dropped and counted in [`DecodeStats`], never
//! accepted. After a drop the decoder scans forward for the next valid
//! boundary.

pub mod binary;
pub mod checksum;
pub mod encode;
pub mod text;

pub use binary::BinaryDecoder;
pub use encode::FrameEncoder;
pub use text::TextDecoder;

use crate::config::FrameLayout;
use crate::types::Protocol;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by a decoder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Valid frames emitted
    pub frames: u64,
    /// Frames dropped because the checksum did not match
    pub checksum_failures: u64,
    /// Times the decoder had to skip bytes to find a sync word
    pub sync_losses: u64,
    /// Bytes discarded while searching for a sync word
    pub skipped_bytes: u64,
    /// Text records that could not be parsed
    pub malformed: u64,
    /// Incomplete frames left over at end of stream
    pub truncated: u64,
}

impl DecodeStats {
    /// Total frames dropped for any reason. Sync losses are not included:
    /// they count skipped byte runs, which need not have held a frame.
    pub fn dropped(&self) -> u64 {
        self.checksum_failures + self.malformed + self.truncated
    }
}

/// Decoder counters readable from other threads
#[derive(Debug, Default)]
pub struct SharedDecodeStats {
    frames: AtomicU64,
    checksum_failures: AtomicU64,
    sync_losses: AtomicU64,
    skipped_bytes: AtomicU64,
    malformed: AtomicU64,
    truncated: AtomicU64,
}

impl SharedDecodeStats {
    pub fn store(&self, stats: &DecodeStats) {
        self.frames.store(stats.frames, Ordering::Relaxed);
        self.checksum_failures
            .store(stats.checksum_failures, Ordering::Relaxed);
        self.sync_losses.store(stats.sync_losses, Ordering::Relaxed);
        self.skipped_bytes.store(stats.skipped_bytes, Ordering::Relaxed);
        self.malformed.store(stats.malformed, Ordering::Relaxed);
        self.truncated.store(stats.truncated, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DecodeStats {
        DecodeStats {
            frames: self.frames.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            sync_losses: self.sync_losses.load(Ordering::Relaxed),
            skipped_bytes: self.skipped_bytes.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            truncated: self.truncated.load(Ordering::Relaxed),
        }
    }
}

/// Callback receiving one decoded frame: dataset values in column order and
/// the window offset one past the frame's last byte.
pub type FrameSink<'a> = dyn FnMut(&[f64], usize) + 'a;

/// Stateful frame splitter for one connection's byte stream
pub trait FrameDecoder: Send {
    /// Decode every complete frame in `window`, calling `emit` for each.
    ///
    /// Returns the number of bytes consumed. Bytes past that offset form an
    /// incomplete frame and must be passed again, followed by new data.
    fn decode(&mut self, window: &[u8], emit: &mut FrameSink<'_>) -> usize;

    /// Account for bytes left over when the stream ends
    fn finish(&mut self, remainder: &[u8]);

    fn stats(&self) -> DecodeStats;
}

/// Build the decoder matching a layout's protocol
pub fn decoder_for(layout: &FrameLayout) -> Box<dyn FrameDecoder> {
    match layout.protocol {
        Protocol::Binary => Box::new(BinaryDecoder::new(layout)),
        Protocol::Csv | Protocol::Ascii => Box::new(TextDecoder::new(layout)),
    }
}

/// Decode a complete byte sequence, collecting frames. Mostly useful for
/// tests and offline tools.
pub fn decode_all(layout: &FrameLayout, bytes: &[u8]) -> (Vec<Vec<f64>>, DecodeStats) {
    let mut decoder = decoder_for(layout);
    let mut frames = Vec::new();
    let consumed = decoder.decode(bytes, &mut |values, _| frames.push(values.to_vec()));
    decoder.finish(&bytes[consumed..]);
    (frames, decoder.stats())
}
