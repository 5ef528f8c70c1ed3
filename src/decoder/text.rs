//! Line-oriented decoder for the CSV and vendor ASCII protocols

use super::{DecodeStats, FrameDecoder, FrameSink};
use crate::config::{Conversion, FrameLayout};
use crate::types::{FieldType, Protocol};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineFormat {
    /// Comma separated columns, fields indexed by column
    Csv,
    /// Fixed-width ASCII fields, indexed by byte offset
    FixedWidth,
}

/// Decoder for [`Protocol::Csv`] and [`Protocol::Ascii`] layouts.
///
/// Every `\n` terminated line is one frame; a trailing `\r` is ignored and
/// blank lines are skipped. A line that does not yield a value for every
/// dataset is dropped and counted as malformed.
#[derive(Debug, Clone)]
pub struct TextDecoder {
    format: LineFormat,
    datasets: Vec<(usize, FieldType, Conversion)>,
    min_line_len: usize,
    values: Vec<f64>,
    stats: DecodeStats,
}

impl TextDecoder {
    pub fn new(layout: &FrameLayout) -> Self {
        let datasets: Vec<_> = layout
            .datasets()
            .map(|f| (f.location, f.field_type, f.conversion()))
            .collect();
        let format = match layout.protocol {
            Protocol::Ascii => LineFormat::FixedWidth,
            _ => LineFormat::Csv,
        };
        Self {
            format,
            min_line_len: if format == LineFormat::FixedWidth {
                layout.frame_len()
            } else {
                0
            },
            values: vec![0.0; datasets.len()],
            datasets,
            stats: DecodeStats::default(),
        }
    }

    fn parse_line(&mut self, line: &[u8]) -> bool {
        let Ok(text) = std::str::from_utf8(line) else {
            return false;
        };
        match self.format {
            LineFormat::Csv => {
                let columns: Vec<&str> = text.split(',').collect();
                for (slot, (location, _, conversion)) in self.values.iter_mut().zip(&self.datasets) {
                    match columns.get(*location).and_then(|c| c.trim().parse::<f64>().ok()) {
                        Some(v) => *slot = conversion.apply(v),
                        None => return false,
                    }
                }
                true
            }
            LineFormat::FixedWidth => {
                if line.len() < self.min_line_len {
                    return false;
                }
                for (slot, (location, ty, conversion)) in self.values.iter_mut().zip(&self.datasets) {
                    match ty.parse_to_f64(&line[*location..]) {
                        Some(v) => *slot = conversion.apply(v),
                        None => return false,
                    }
                }
                true
            }
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

impl FrameDecoder for TextDecoder {
    fn decode(&mut self, window: &[u8], emit: &mut FrameSink<'_>) -> usize {
        let mut pos = 0;
        while let Some(newline) = window[pos..].iter().position(|&b| b == b'\n') {
            let end = pos + newline + 1;
            let line = trim_line(&window[pos..pos + newline]);
            pos = end;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            if self.parse_line(line) {
                self.stats.frames += 1;
                emit(&self.values, end);
            } else {
                self.stats.malformed += 1;
                tracing::debug!(
                    "Dropping corrupt or incomplete telemetry line: {:?}",
                    String::from_utf8_lossy(line)
                );
            }
        }
        pos
    }

    fn finish(&mut self, remainder: &[u8]) {
        if !remainder.iter().all(u8::is_ascii_whitespace) {
            self.stats.truncated += 1;
            tracing::debug!("Stream ended inside a line ({} bytes)", remainder.len());
        }
    }

    fn stats(&self) -> DecodeStats {
        self.stats
    }
}
