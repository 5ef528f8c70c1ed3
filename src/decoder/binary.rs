//! Fixed-length binary frame decoder

use super::checksum;
use super::{DecodeStats, FrameDecoder, FrameSink};
use crate::config::{Conversion, FrameLayout};
use crate::types::{ChecksumKind, FieldType};

/// Decoder for [`crate::types::Protocol::Binary`] layouts.
///
/// With a sync word, every frame must start with it; bytes in front of the
/// next sync byte are skipped and counted as one sync loss per frame length
/// of skipped bytes. A frame
/// whose checksum does not match is dropped whole and scanning resumes right
/// after it.
#[derive(Debug, Clone)]
pub struct BinaryDecoder {
    sync: Option<u8>,
    sync_len: usize,
    frame_len: usize,
    checksum: Option<(usize, ChecksumKind)>,
    datasets: Vec<(usize, FieldType, Conversion)>,
    values: Vec<f64>,
    in_resync: bool,
    resync_skipped: usize,
    stats: DecodeStats,
}

impl BinaryDecoder {
    pub fn new(layout: &FrameLayout) -> Self {
        let sync = layout.sync_word();
        let datasets: Vec<_> = layout
            .datasets()
            .map(|f| (f.location, f.field_type, f.conversion()))
            .collect();
        Self {
            sync,
            sync_len: usize::from(sync.is_some()),
            frame_len: layout.frame_len(),
            checksum: layout.checksum().map(|(f, kind)| (f.location, kind)),
            values: vec![0.0; datasets.len()],
            datasets,
            in_resync: false,
            resync_skipped: 0,
            stats: DecodeStats::default(),
        }
    }

    /// Skip to the next sync byte at or after `pos`. Returns the new position.
    ///
    /// The search window is one frame long: every further frame length of
    /// bytes without a sync byte is counted as another loss.
    fn resync(&mut self, window: &[u8], mut pos: usize) -> usize {
        let Some(sync) = self.sync else {
            return pos;
        };
        while pos < window.len() && window[pos] != sync {
            if !self.in_resync || self.resync_skipped >= self.frame_len {
                self.stats.sync_losses += 1;
                self.resync_skipped = 0;
                tracing::debug!("Lost sync, scanning for 0x{:02X}", sync);
            }
            self.in_resync = true;
            self.resync_skipped += 1;
            self.stats.skipped_bytes += 1;
            pos += 1;
        }
        pos
    }

    fn checksum_ok(&self, frame: &[u8]) -> bool {
        match self.checksum {
            Some((location, kind)) => checksum::verify(
                kind,
                &frame[self.sync_len..location],
                &frame[location..],
            ),
            None => true,
        }
    }

    fn parse(&mut self, frame: &[u8]) -> bool {
        for (slot, (location, ty, conversion)) in self.values.iter_mut().zip(&self.datasets) {
            match ty.parse_to_f64(&frame[*location..]) {
                Some(v) => *slot = conversion.apply(v),
                None => return false,
            }
        }
        true
    }
}

impl FrameDecoder for BinaryDecoder {
    fn decode(&mut self, window: &[u8], emit: &mut FrameSink<'_>) -> usize {
        if self.frame_len == 0 {
            return window.len();
        }
        let mut pos = 0;
        loop {
            pos = self.resync(window, pos);
            if window.len() - pos < self.frame_len {
                return pos;
            }
            let end = pos + self.frame_len;
            let frame = &window[pos..end];
            if !self.checksum_ok(frame) {
                self.stats.checksum_failures += 1;
                tracing::debug!("Checksum mismatch, dropping frame");
                pos = end;
                continue;
            }
            if self.parse(frame) {
                self.in_resync = false;
                self.resync_skipped = 0;
                self.stats.frames += 1;
                emit(&self.values, end);
            }
            pos = end;
        }
    }

    fn finish(&mut self, remainder: &[u8]) {
        if !remainder.is_empty() {
            self.stats.truncated += 1;
            tracing::debug!("Stream ended inside a frame ({} bytes)", remainder.len());
        }
    }

    fn stats(&self) -> DecodeStats {
        self.stats
    }
}
