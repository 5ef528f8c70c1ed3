//! Lock-free append-only column of 64-bit words
//!
//! Storage is split into segments whose sizes double (1024, 2048, 4096, ...),
//! each allocated on first use through a [`OnceLock`]. Existing segments are
//! never moved, so a reader can index any slot below the published length
//! while the writer keeps appending.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

const BASE_BITS: u32 = 10;
const BASE: usize = 1 << BASE_BITS;

/// Growable array of `u64` slots with one writer and many readers.
///
/// The column does not track its own length; the owner publishes lengths
/// with release/acquire ordering and only reads slots below them.
#[derive(Debug)]
pub struct AppendColumn {
    segments: Box<[OnceLock<Box<[AtomicU64]>>]>,
}

/// (segment, offset) of a slot index
fn locate(index: usize) -> (usize, usize) {
    let adjusted = index + BASE;
    let bit = usize::BITS - 1 - adjusted.leading_zeros();
    let segment = (bit - BASE_BITS) as usize;
    (segment, adjusted - (1usize << bit))
}

fn segment_len(segment: usize) -> usize {
    BASE << segment
}

impl AppendColumn {
    /// Column able to hold at least `capacity` slots
    pub fn new(capacity: usize) -> Self {
        let segments = if capacity == 0 {
            0
        } else {
            locate(capacity - 1).0 + 1
        };
        Self {
            segments: (0..segments).map(|_| OnceLock::new()).collect(),
        }
    }

    /// Number of slots the column can ever hold
    pub fn capacity(&self) -> usize {
        (0..self.segments.len()).map(segment_len).sum()
    }

    /// Write a slot. Returns false if `index` is past the capacity.
    pub fn store(&self, index: usize, bits: u64) -> bool {
        let (segment, offset) = locate(index);
        let Some(cell) = self.segments.get(segment) else {
            return false;
        };
        let slots = cell.get_or_init(|| {
            (0..segment_len(segment))
                .map(|_| AtomicU64::new(0))
                .collect()
        });
        slots[offset].store(bits, Ordering::Relaxed);
        true
    }

    /// Read a slot, or None if its segment was never written
    pub fn load(&self, index: usize) -> Option<u64> {
        let (segment, offset) = locate(index);
        let slots = self.segments.get(segment)?.get()?;
        Some(slots[offset].load(Ordering::Relaxed))
    }

    /// Read `len` consecutive slots starting at `first` into `out`
    pub fn load_range(&self, first: usize, len: usize, out: &mut Vec<u64>) {
        out.reserve(len);
        let mut index = first;
        let end = first + len;
        while index < end {
            let (segment, offset) = locate(index);
            let Some(slots) = self.segments.get(segment).and_then(OnceLock::get) else {
                return;
            };
            let take = (slots.len() - offset).min(end - index);
            out.extend(
                slots[offset..offset + take]
                    .iter()
                    .map(|s| s.load(Ordering::Relaxed)),
            );
            index += take;
        }
    }
}
