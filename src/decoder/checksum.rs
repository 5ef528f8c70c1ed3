//! Checksum accumulation rules
//!
//! The checksum covers the bytes between the sync word (if any) and the
//! checksum field itself.

use crate::types::ChecksumKind;

/// Compute the checksum of `payload`
pub fn compute(kind: ChecksumKind, payload: &[u8]) -> u16 {
    match kind {
        ChecksumKind::U8Sum => payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) as u16,
        ChecksumKind::U16LeSum => payload
            .chunks_exact(2)
            .map(|w| u16::from_le_bytes([w[0], w[1]]))
            .fold(0u16, u16::wrapping_add),
    }
}

/// Check `payload` against the checksum bytes found on the wire
pub fn verify(kind: ChecksumKind, payload: &[u8], checksum: &[u8]) -> bool {
    let expected = match kind {
        ChecksumKind::U8Sum => match checksum.first() {
            Some(&b) => b as u16,
            None => return false,
        },
        ChecksumKind::U16LeSum => {
            if payload.len() % 2 != 0 || checksum.len() < 2 {
                return false;
            }
            u16::from_le_bytes([checksum[0], checksum[1]])
        }
    };
    compute(kind, payload) == expected
}
