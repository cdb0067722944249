//! Byte/bit offset addressing inside a data block.
//!
//! Offsets are written as `"<byte>"` (whole bytes) or `"<byte>.<bit>"`
//! (a single bit). Both parts are one to five decimal digits.

use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::error::MirrorError;

/// Bit offset marking a whole-byte address.
pub const WHOLE_BYTE: i8 = -1;

const MAX_DIGITS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OffsetAddress {
    byte_offset: i64,
    bit_offset: i8,
}

impl Default for OffsetAddress {
    fn default() -> Self {
        Self {
            byte_offset: 0,
            bit_offset: WHOLE_BYTE,
        }
    }
}

impl OffsetAddress {
    pub const fn bytes(byte_offset: i64) -> Self {
        Self {
            byte_offset: if byte_offset < 0 { 0 } else { byte_offset },
            bit_offset: WHOLE_BYTE,
        }
    }

    pub const fn bit(byte_offset: i64, bit_offset: u8) -> Self {
        Self {
            byte_offset: if byte_offset < 0 { 0 } else { byte_offset },
            bit_offset: if bit_offset > 7 { 7 } else { bit_offset as i8 },
        }
    }

    pub fn byte_offset(&self) -> i64 {
        self.byte_offset
    }

    pub fn bit_offset(&self) -> i8 {
        self.bit_offset
    }

    pub fn is_bit(&self) -> bool {
        self.bit_offset != WHOLE_BYTE
    }

    /// Byte offset as a buffer index.
    pub fn index(&self) -> usize {
        self.byte_offset as usize
    }

    /// Parses an offset string. The compound `byte.bit` form is tried first
    /// so that `"12.3"` never resolves as the plain byte `12`.
    pub fn parse(text: &str) -> Option<Self> {
        if let Some((byte, bit)) = text.split_once('.') {
            let byte = parse_digits(byte)?;
            let bit = parse_digits(bit)?;
            if bit > 7 {
                return None;
            }
            return Some(Self {
                byte_offset: byte,
                bit_offset: bit as i8,
            });
        }

        parse_digits(text).map(Self::bytes)
    }

    /// Places a record-relative field offset on top of this base offset.
    /// Byte offsets add up. The bit always comes from the field: records
    /// span whole bytes, so a bit on the base is ignored.
    pub fn relative_to(&self, base: &OffsetAddress) -> OffsetAddress {
        OffsetAddress {
            byte_offset: base.byte_offset + self.byte_offset,
            bit_offset: self.bit_offset,
        }
    }
}

fn parse_digits(text: &str) -> Option<i64> {
    if text.is_empty() || text.len() > MAX_DIGITS || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse::<i64>().ok()
}

/// Resolves `text` into `target`. Malformed input leaves `target` untouched
/// and returns `false`.
pub fn resolve_into(text: &str, target: &mut OffsetAddress) -> bool {
    match OffsetAddress::parse(text) {
        Some(resolved) => {
            *target = resolved;
            true
        }
        None => {
            warn!("⚠️  Ignoring malformed offset '{}', keeping {}", text, target);
            false
        }
    }
}

impl FromStr for OffsetAddress {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OffsetAddress::parse(s)
            .ok_or_else(|| MirrorError::ConfigError(format!("Malformed offset address '{}'", s)))
    }
}

impl fmt::Display for OffsetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bit() {
            write!(f, "{}.{}", self.byte_offset, self.bit_offset)
        } else {
            write!(f, "{}", self.byte_offset)
        }
    }
}
