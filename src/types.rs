//! Core data types for the telemetry core
//!
//! This module contains the fundamental value types shared by the layout,
//! decoder, storage and connection modules.
//!
//! # Main Types
//!
//! - [`FieldType`] - Enum of supported wire types (u8, i16 LE, f32 BE, checksums, ...)
//! - [`Protocol`] - How frames are delimited on the wire
//! - [`ConnectionStatus`] - The lifecycle state of one connection
//! - [`Rgba`] - Display color attached to fields and bitfield states
//!
//! # Field Types
//!
//! Supports the common embedded encodings:
//! - Unsigned integers: u8, u16, u32 (both byte orders for 16/32 bit)
//! - Signed integers: i8, i16, i32 (both byte orders for 16/32 bit)
//! - Floating point: f32 (both byte orders)
//! - Fixed-width ASCII numbers for the vendor ASCII protocol
//! - Markers that carry no sample: sync word and checksums

use serde::{Deserialize, Serialize};
use std::fmt;

/// RGBA display color
pub type Rgba = [u8; 4];

/// Wire protocol used to delimit frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Fixed-width binary frames, optionally led by a sync word and ended by a checksum
    #[default]
    Binary,
    /// One comma separated line per frame, fields indexed by column
    Csv,
    /// Vendor ASCII: fixed-width ASCII numbers, one line per frame
    Ascii,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Binary => write!(f, "Binary"),
            Protocol::Csv => write!(f, "CSV"),
            Protocol::Ascii => write!(f, "ASCII"),
        }
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            ConnectionStatus::Disconnected => 0,
            ConnectionStatus::Connecting => 1,
            ConnectionStatus::Connected => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionStatus::Connecting,
            2 => ConnectionStatus::Connected,
            _ => ConnectionStatus::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Connecting => write!(f, "Connecting"),
            ConnectionStatus::Connected => write!(f, "Connected"),
        }
    }
}

/// Checksum accumulation rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumKind {
    /// Byte sum of everything between the sync word and the checksum, truncated to u8
    U8Sum,
    /// Sum of little-endian u16 words between the sync word and the checksum, truncated to u16
    U16LeSum,
}

/// Wire type of one field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Frame sync marker with its expected byte value
    SyncWord(u8),
    U8,
    I8,
    U16Le,
    U16Be,
    I16Le,
    I16Be,
    U32Le,
    U32Be,
    I32Le,
    I32Be,
    F32Le,
    F32Be,
    /// u8 container whose bit ranges are described by the field's bitfields
    Bitfield,
    /// ASCII encoded number occupying the given number of bytes
    AsciiNumber(u8),
    Checksum(ChecksumKind),
}

impl FieldType {
    /// Returns the width in bytes of this type on the wire
    pub fn size_bytes(&self) -> usize {
        match self {
            FieldType::SyncWord(_) | FieldType::U8 | FieldType::I8 | FieldType::Bitfield => 1,
            FieldType::U16Le | FieldType::U16Be | FieldType::I16Le | FieldType::I16Be => 2,
            FieldType::U32Le
            | FieldType::U32Be
            | FieldType::I32Le
            | FieldType::I32Be
            | FieldType::F32Le
            | FieldType::F32Be => 4,
            FieldType::AsciiNumber(width) => *width as usize,
            FieldType::Checksum(ChecksumKind::U8Sum) => 1,
            FieldType::Checksum(ChecksumKind::U16LeSum) => 2,
        }
    }

    /// Returns true if this field produces a sample per frame
    pub fn is_dataset(&self) -> bool {
        !matches!(self, FieldType::SyncWord(_) | FieldType::Checksum(_))
    }

    pub fn is_checksum(&self) -> bool {
        matches!(self, FieldType::Checksum(_))
    }

    pub fn is_sync_word(&self) -> bool {
        matches!(self, FieldType::SyncWord(_))
    }

    /// Returns true if samples of this type are integral
    pub fn is_integer(&self) -> bool {
        !matches!(
            self,
            FieldType::F32Le | FieldType::F32Be | FieldType::AsciiNumber(_)
        )
    }

    /// Parse raw bytes into a f64 sample
    pub fn parse_to_f64(&self, bytes: &[u8]) -> Option<f64> {
        if bytes.len() < self.size_bytes() {
            return None;
        }

        Some(match self {
            FieldType::U8 | FieldType::Bitfield | FieldType::SyncWord(_) => bytes[0] as f64,
            FieldType::I8 => bytes[0] as i8 as f64,
            FieldType::U16Le => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            FieldType::U16Be => u16::from_be_bytes([bytes[0], bytes[1]]) as f64,
            FieldType::I16Le => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            FieldType::I16Be => i16::from_be_bytes([bytes[0], bytes[1]]) as f64,
            FieldType::U32Le => {
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            FieldType::U32Be => {
                u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            FieldType::I32Le => {
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            FieldType::I32Be => {
                i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            FieldType::F32Le => {
                f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            FieldType::F32Be => {
                f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            FieldType::AsciiNumber(width) => {
                let text = std::str::from_utf8(&bytes[..*width as usize]).ok()?;
                text.trim().parse::<f64>().ok()?
            }
            FieldType::Checksum(ChecksumKind::U8Sum) => bytes[0] as f64,
            FieldType::Checksum(ChecksumKind::U16LeSum) => {
                u16::from_le_bytes([bytes[0], bytes[1]]) as f64
            }
        })
    }

    /// Write `value` into `out` using this type's wire encoding.
    ///
    /// Integer types saturate at their range. Returns false if `out` is too short.
    pub fn write_f64(&self, value: f64, out: &mut [u8]) -> bool {
        let width = self.size_bytes();
        if out.len() < width {
            return false;
        }
        let out = &mut out[..width];
        match self {
            FieldType::U8 | FieldType::Bitfield => out[0] = value as u8,
            FieldType::SyncWord(v) => out[0] = *v,
            FieldType::I8 => out[0] = value as i8 as u8,
            FieldType::U16Le => out.copy_from_slice(&(value as u16).to_le_bytes()),
            FieldType::U16Be => out.copy_from_slice(&(value as u16).to_be_bytes()),
            FieldType::I16Le => out.copy_from_slice(&(value as i16).to_le_bytes()),
            FieldType::I16Be => out.copy_from_slice(&(value as i16).to_be_bytes()),
            FieldType::U32Le => out.copy_from_slice(&(value as u32).to_le_bytes()),
            FieldType::U32Be => out.copy_from_slice(&(value as u32).to_be_bytes()),
            FieldType::I32Le => out.copy_from_slice(&(value as i32).to_le_bytes()),
            FieldType::I32Be => out.copy_from_slice(&(value as i32).to_be_bytes()),
            FieldType::F32Le => out.copy_from_slice(&(value as f32).to_le_bytes()),
            FieldType::F32Be => out.copy_from_slice(&(value as f32).to_be_bytes()),
            FieldType::AsciiNumber(w) => match fit_ascii(value, *w as usize) {
                Some(text) => out.copy_from_slice(text.as_bytes()),
                None => return false,
            },
            FieldType::Checksum(ChecksumKind::U8Sum) => out[0] = value as u8,
            FieldType::Checksum(ChecksumKind::U16LeSum) => {
                out.copy_from_slice(&(value as u16).to_le_bytes())
            }
        }
        true
    }
}

/// Right-aligned rendering of `value` in exactly `width` characters, dropping
/// decimals until it fits. None if even the integer part is too wide.
fn fit_ascii(value: f64, width: usize) -> Option<String> {
    let text = format!("{:>width$}", value);
    if text.len() == width {
        return Some(text);
    }
    (0..width)
        .rev()
        .map(|precision| format!("{:>width$.precision$}", value))
        .find(|text| text.len() == width)
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::SyncWord(v) => write!(f, "Sync Word 0x{:02X}", v),
            FieldType::U8 => write!(f, "uint8"),
            FieldType::I8 => write!(f, "int8"),
            FieldType::U16Le => write!(f, "uint16 LSB First"),
            FieldType::U16Be => write!(f, "uint16 MSB First"),
            FieldType::I16Le => write!(f, "int16 LSB First"),
            FieldType::I16Be => write!(f, "int16 MSB First"),
            FieldType::U32Le => write!(f, "uint32 LSB First"),
            FieldType::U32Be => write!(f, "uint32 MSB First"),
            FieldType::I32Le => write!(f, "int32 LSB First"),
            FieldType::I32Be => write!(f, "int32 MSB First"),
            FieldType::F32Le => write!(f, "float32 LSB First"),
            FieldType::F32Be => write!(f, "float32 MSB First"),
            FieldType::Bitfield => write!(f, "uint8 Bitfield"),
            FieldType::AsciiNumber(w) => write!(f, "ASCII Number ({} bytes)", w),
            FieldType::Checksum(ChecksumKind::U8Sum) => write!(f, "uint8 Checksum"),
            FieldType::Checksum(ChecksumKind::U16LeSum) => write!(f, "uint16 Checksum LSB First"),
        }
    }
}

/// Current wall-clock time in milliseconds since the UNIX epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
