//! Frame encoding, the inverse of decoding for valid frames.
//!
//! Used by the synthetic generators and by the importer, which re-emits
//! recorded samples as wire bytes so the decode loop cannot tell a file from
//! a live source.

use super::checksum;
use crate::config::{Conversion, FrameLayout};
use crate::types::{ChecksumKind, FieldType, Protocol};

/// Encoder for one layout
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    protocol: Protocol,
    frame_len: usize,
    sync: Option<u8>,
    checksum: Option<(usize, ChecksumKind)>,
    datasets: Vec<(usize, FieldType, Conversion)>,
    columns: usize,
}

impl FrameEncoder {
    pub fn new(layout: &FrameLayout) -> Self {
        let datasets: Vec<_> = layout
            .datasets()
            .map(|f| (f.location, f.field_type, f.conversion()))
            .collect();
        Self {
            protocol: layout.protocol,
            frame_len: layout.frame_len(),
            sync: layout.sync_word(),
            checksum: layout.checksum().map(|(f, kind)| (f.location, kind)),
            columns: datasets.iter().map(|(loc, _, _)| loc + 1).max().unwrap_or(0),
            datasets,
        }
    }

    /// Append one frame holding `values` (dataset column order) to `out`.
    ///
    /// Values are in units; each field's conversion is undone before the
    /// raw value is written.
    pub fn encode(&self, values: &[f64], out: &mut Vec<u8>) {
        match self.protocol {
            Protocol::Binary => self.encode_binary(values, out),
            Protocol::Csv => self.encode_csv(values, out),
            Protocol::Ascii => self.encode_fixed_width(values, out),
        }
    }

    fn encode_binary(&self, values: &[f64], out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + self.frame_len, 0);
        let frame = &mut out[start..];
        if let Some(sync) = self.sync {
            frame[0] = sync;
        }
        for ((location, ty, conversion), value) in self.datasets.iter().zip(values) {
            ty.write_f64(conversion.invert(*value, *ty), &mut frame[*location..]);
        }
        if let Some((location, kind)) = self.checksum {
            let sync_len = usize::from(self.sync.is_some());
            let sum = checksum::compute(kind, &frame[sync_len..location]);
            FieldType::Checksum(kind).write_f64(sum as f64, &mut frame[location..]);
        }
    }

    fn encode_csv(&self, values: &[f64], out: &mut Vec<u8>) {
        let mut columns = vec![String::new(); self.columns];
        for ((location, ty, conversion), value) in self.datasets.iter().zip(values) {
            columns[*location] = conversion.invert(*value, *ty).to_string();
        }
        out.extend_from_slice(columns.join(",").as_bytes());
        out.push(b'\n');
    }

    fn encode_fixed_width(&self, values: &[f64], out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + self.frame_len, b' ');
        for ((location, ty, conversion), value) in self.datasets.iter().zip(values) {
            let raw = conversion.invert(*value, *ty);
            if !ty.write_f64(raw, &mut out[start + location..]) {
                tracing::warn!(
                    "{} does not fit the {} byte field at location {}, leaving it blank",
                    raw,
                    ty.size_bytes(),
                    location
                );
            }
        }
        out.push(b'\n');
    }
}
