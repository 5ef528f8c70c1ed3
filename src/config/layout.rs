//! Frame layout schema
//!
//! A [`FrameLayout`] is the ordered list of [`Field`]s that describes one
//! connection's wire format. For the binary and vendor ASCII protocols a
//! field's `location` is its byte offset inside the frame; for CSV it is the
//! column index.
//!
//! Layouts are validated once with [`FrameLayout::validate`] before a
//! connection arms its pipeline and are immutable afterwards.

use crate::types::{ChecksumKind, FieldType, Protocol, Rgba};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a layout is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("The data structure does not define any fields.")]
    NoFields,

    #[error("The field at location {location} needs a name.")]
    MissingName { location: usize },

    #[error("A sync word is only allowed in the binary protocol.")]
    SyncWordNotAllowed,

    #[error("The sync word must be at location 0, not {location}.")]
    SyncWordLocation { location: usize },

    #[error("Only one sync word is allowed.")]
    DuplicateSyncWord,

    #[error("A checksum is only allowed in the binary protocol.")]
    ChecksumNotAllowed,

    #[error("Only one checksum is allowed.")]
    DuplicateChecksum,

    #[error("The checksum at location {location} must be after every field.")]
    ChecksumNotLast { location: usize },

    #[error("The checksum at location {location} is not aligned to its width.")]
    ChecksumMisaligned { location: usize },

    #[error("The field at location {location} overlaps the field at location {other}.")]
    Overlap { location: usize, other: usize },

    #[error("Column {location} is used more than once.")]
    DuplicateColumn { location: usize },

    #[error("The field at location {location} ({field_type}) cannot be used with the {protocol} protocol.")]
    TypeNotAllowed {
        location: usize,
        field_type: FieldType,
        protocol: Protocol,
    },

    #[error("The field at location {location} has an invalid bit range.")]
    BitfieldRange { location: usize },

    #[error("The field at location {location} has overlapping bit ranges.")]
    BitfieldOverlap { location: usize },

    #[error("The field at location {location} has bit ranges but is not a bitfield.")]
    NotABitfield { location: usize },

    #[error("The field at location {location} needs finite, non-zero conversion factors.")]
    ConversionFactor { location: usize },

    #[error("The bitfield at location {location} cannot be scaled.")]
    BitfieldConversion { location: usize },
}

/// A named range of bits inside a bitfield container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bitfield {
    /// Least significant bit of the range
    pub lsb: u8,
    /// Most significant bit of the range (inclusive)
    pub msb: u8,
    /// Optional per-state names, indexed by state value
    #[serde(default)]
    pub names: Vec<String>,
    /// Optional per-state colors, indexed by state value
    #[serde(default)]
    pub colors: Vec<Rgba>,
}

impl Bitfield {
    pub fn new(lsb: u8, msb: u8) -> Self {
        Self {
            lsb,
            msb,
            names: Vec::new(),
            colors: Vec::new(),
        }
    }

    pub fn with_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Number of distinct states this range can hold
    pub fn state_count(&self) -> u32 {
        1u32 << (self.msb - self.lsb + 1)
    }

    fn mask(&self) -> u32 {
        self.state_count() - 1
    }

    /// Extract this range's state from a raw container value
    pub fn state_of(&self, raw: f64) -> u32 {
        ((raw as i64 as u32) >> self.lsb) & self.mask()
    }

    /// Display name of a state
    pub fn state_name(&self, state: u32) -> String {
        if let Some(name) = self.names.get(state as usize).filter(|n| !n.is_empty()) {
            return name.clone();
        }
        if self.lsb == self.msb {
            format!("Bit {} = {}", self.lsb, state)
        } else {
            format!("Bits [{}:{}] = {}", self.msb, self.lsb, state)
        }
    }

    /// Display color of a state
    pub fn state_color(&self, state: u32, fallback: Rgba) -> Rgba {
        self.colors.get(state as usize).copied().unwrap_or(fallback)
    }
}

fn default_color() -> Rgba {
    [255, 255, 255, 255]
}

fn default_factor() -> f64 {
    1.0
}

/// Linear scaling from raw wire values to units: `a` raw counts equal `b` units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    a: f64,
    b: f64,
}

impl Conversion {
    pub const IDENTITY: Conversion = Conversion { a: 1.0, b: 1.0 };

    pub fn new(a: f64, b: f64) -> Self {
        Self { a, b }
    }

    pub fn is_identity(&self) -> bool {
        self.a == self.b
    }

    fn is_valid(&self) -> bool {
        self.a.is_finite() && self.b.is_finite() && self.a != 0.0 && self.b != 0.0
    }

    /// Raw decoded value to units
    pub fn apply(&self, raw: f64) -> f64 {
        if self.is_identity() {
            raw
        } else {
            raw * self.b / self.a
        }
    }

    /// Units back to the raw value written on the wire. Integer fields are
    /// rounded so that a scaled sample re-encodes to the count it came from.
    pub fn invert(&self, value: f64, field_type: FieldType) -> f64 {
        if self.is_identity() {
            return value;
        }
        let raw = value * self.a / self.b;
        if field_type.is_integer() {
            raw.round()
        } else {
            raw
        }
    }
}

/// One field of a frame layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Byte offset (binary, ASCII) or column index (CSV)
    pub location: usize,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub unit: String,
    #[serde(default = "default_color")]
    pub color: Rgba,
    /// Raw counts side of the scaling, `a` counts = `b` units
    #[serde(default = "default_factor")]
    pub conversion_factor_a: f64,
    #[serde(default = "default_factor")]
    pub conversion_factor_b: f64,
    #[serde(default)]
    pub bitfields: Vec<Bitfield>,
}

impl Field {
    pub fn new(location: usize, name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            location,
            name: name.into(),
            field_type,
            unit: String::new(),
            color: default_color(),
            conversion_factor_a: 1.0,
            conversion_factor_b: 1.0,
            bitfields: Vec::new(),
        }
    }

    /// Scale decoded values so that `a` raw counts read as `b` units
    pub fn with_conversion(mut self, a: f64, b: f64) -> Self {
        self.conversion_factor_a = a;
        self.conversion_factor_b = b;
        self
    }

    pub fn conversion(&self) -> Conversion {
        Conversion::new(self.conversion_factor_a, self.conversion_factor_b)
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_color(mut self, color: Rgba) -> Self {
        self.color = color;
        self
    }

    pub fn with_bitfield(mut self, bitfield: Bitfield) -> Self {
        self.bitfields.push(bitfield);
        self
    }

    /// Byte width on the wire
    pub fn width(&self) -> usize {
        self.field_type.size_bytes()
    }

    /// Exclusive end offset on the wire
    pub fn end(&self) -> usize {
        self.location + self.width()
    }

    /// Column label used by the export header, `name (unit)`
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.unit)
    }
}

/// Ordered field schema for one connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameLayout {
    pub protocol: Protocol,
    pub fields: Vec<Field>,
}

impl FrameLayout {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            fields: Vec::new(),
        }
    }

    /// Add a field, keeping the list sorted by location
    pub fn with_field(mut self, field: Field) -> Self {
        self.insert(field);
        self
    }

    pub fn insert(&mut self, field: Field) {
        let index = self.fields.partition_point(|f| f.location <= field.location);
        self.fields.insert(index, field);
    }

    /// Sync word value, if the layout has one
    pub fn sync_word(&self) -> Option<u8> {
        self.fields.iter().find_map(|f| match f.field_type {
            FieldType::SyncWord(v) => Some(v),
            _ => None,
        })
    }

    /// Checksum field, if the layout has one
    pub fn checksum(&self) -> Option<(&Field, ChecksumKind)> {
        self.fields.iter().find_map(|f| match f.field_type {
            FieldType::Checksum(kind) => Some((f, kind)),
            _ => None,
        })
    }

    /// Fields that produce samples, in location order
    pub fn datasets(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.field_type.is_dataset())
    }

    pub fn dataset_count(&self) -> usize {
        self.datasets().count()
    }

    /// Storage column index of the dataset at `location`
    pub fn column_of(&self, location: usize) -> Option<usize> {
        self.datasets().position(|f| f.location == location)
    }

    /// Dataset at storage column `column`
    pub fn dataset(&self, column: usize) -> Option<&Field> {
        self.datasets().nth(column)
    }

    /// Byte length of one frame (binary and ASCII protocols)
    pub fn frame_len(&self) -> usize {
        match self.checksum() {
            Some((field, _)) => field.end(),
            None => self.fields.iter().map(Field::end).max().unwrap_or(0),
        }
    }

    /// Check every placement rule for the layout's protocol
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.datasets().next().is_none() {
            return Err(LayoutError::NoFields);
        }

        for field in &self.fields {
            if field.name.trim().is_empty() && field.field_type.is_dataset() {
                return Err(LayoutError::MissingName {
                    location: field.location,
                });
            }
            self.validate_type(field)?;
            validate_conversion(field)?;
            validate_bitfields(field)?;
        }

        match self.protocol {
            Protocol::Csv => self.validate_columns(),
            Protocol::Binary | Protocol::Ascii => self.validate_bytes(),
        }
    }

    fn validate_type(&self, field: &Field) -> Result<(), LayoutError> {
        let allowed = match (self.protocol, field.field_type) {
            (Protocol::Binary, FieldType::AsciiNumber(_)) => false,
            (Protocol::Binary, _) => true,
            (Protocol::Ascii, FieldType::AsciiNumber(w)) => w > 0,
            (_, FieldType::SyncWord(_)) => return Err(LayoutError::SyncWordNotAllowed),
            (_, FieldType::Checksum(_)) => return Err(LayoutError::ChecksumNotAllowed),
            (Protocol::Ascii, _) => false,
            (Protocol::Csv, _) => true,
        };
        if allowed {
            Ok(())
        } else {
            Err(LayoutError::TypeNotAllowed {
                location: field.location,
                field_type: field.field_type,
                protocol: self.protocol,
            })
        }
    }

    fn validate_columns(&self) -> Result<(), LayoutError> {
        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|f| f.location == field.location) {
                return Err(LayoutError::DuplicateColumn {
                    location: field.location,
                });
            }
        }
        Ok(())
    }

    fn validate_bytes(&self) -> Result<(), LayoutError> {
        let mut sync_bytes = 0;
        let mut checksum = None;
        for field in &self.fields {
            match field.field_type {
                FieldType::SyncWord(_) => {
                    if sync_bytes > 0 {
                        return Err(LayoutError::DuplicateSyncWord);
                    }
                    if field.location != 0 {
                        return Err(LayoutError::SyncWordLocation {
                            location: field.location,
                        });
                    }
                    sync_bytes = field.width();
                }
                FieldType::Checksum(_) => {
                    if checksum.is_some() {
                        return Err(LayoutError::DuplicateChecksum);
                    }
                    checksum = Some(field);
                }
                _ => {}
            }
        }

        for (i, field) in self.fields.iter().enumerate() {
            for other in &self.fields[..i] {
                if field.location < other.end() && other.location < field.end() {
                    return Err(LayoutError::Overlap {
                        location: field.location,
                        other: other.location,
                    });
                }
            }
        }

        if let Some(cs) = checksum {
            if self.fields.iter().any(|f| f.end() > cs.location && f.location != cs.location) {
                return Err(LayoutError::ChecksumNotLast {
                    location: cs.location,
                });
            }
            if (cs.location - sync_bytes) % cs.width() != 0 {
                return Err(LayoutError::ChecksumMisaligned {
                    location: cs.location,
                });
            }
        }
        Ok(())
    }

    /// The 11-byte frame used by the stress test: sync 0xAA, four i16 LE
    /// fields `a`..`d` and a u16 LE checksum.
    pub fn stress_test() -> Self {
        FrameLayout::new(Protocol::Binary)
            .with_field(Field::new(0, "", FieldType::SyncWord(0xAA)))
            .with_field(Field::new(1, "a", FieldType::I16Le).with_color([255, 0, 0, 255]))
            .with_field(Field::new(3, "b", FieldType::I16Le).with_color([0, 255, 0, 255]))
            .with_field(Field::new(5, "c", FieldType::I16Le).with_color([0, 0, 255, 255]))
            .with_field(Field::new(7, "d", FieldType::I16Le).with_color([0, 255, 255, 255]))
            .with_field(Field::new(
                9,
                "",
                FieldType::Checksum(ChecksumKind::U16LeSum),
            ))
    }

    /// Four CSV columns produced by the demo waveform generator
    pub fn demo() -> Self {
        let volts = |location, name: &str, color| {
            Field::new(location, name, FieldType::F32Le)
                .with_unit("Volts")
                .with_color(color)
        };
        FrameLayout::new(Protocol::Csv)
            .with_field(volts(0, "Low Quality Noise", [255, 0, 0, 255]))
            .with_field(volts(1, "Noisey Sine Wave 100-500Hz", [0, 255, 0, 255]))
            .with_field(volts(2, "Intermittent Sawtooth Wave 100Hz", [0, 0, 255, 255]))
            .with_field(volts(3, "Clean Sine Wave 1kHz", [0, 255, 255, 255]))
    }
}

fn validate_conversion(field: &Field) -> Result<(), LayoutError> {
    let conversion = field.conversion();
    if !conversion.is_valid() {
        return Err(LayoutError::ConversionFactor {
            location: field.location,
        });
    }
    if field.field_type == FieldType::Bitfield && !conversion.is_identity() {
        return Err(LayoutError::BitfieldConversion {
            location: field.location,
        });
    }
    Ok(())
}

fn validate_bitfields(field: &Field) -> Result<(), LayoutError> {
    if field.bitfields.is_empty() {
        return Ok(());
    }
    if field.field_type != FieldType::Bitfield {
        return Err(LayoutError::NotABitfield {
            location: field.location,
        });
    }
    let bits = field.width() as u8 * 8;
    let mut used = 0u32;
    for bf in &field.bitfields {
        if bf.msb < bf.lsb || bf.msb >= bits {
            return Err(LayoutError::BitfieldRange {
                location: field.location,
            });
        }
        let range = ((1u32 << (bf.msb - bf.lsb + 1)) - 1) << bf.lsb;
        if used & range != 0 {
            return Err(LayoutError::BitfieldOverlap {
                location: field.location,
            });
        }
        used |= range;
    }
    Ok(())
}
