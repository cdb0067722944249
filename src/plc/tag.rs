use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address::OffsetAddress;

/// A contiguous byte range of one data block, read as a single item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemTag {
    pub db_number: u16,
    pub start: u32,
    pub length: usize,
}

impl ItemTag {
    pub fn new(db_number: u16, start: u32, length: usize) -> Self {
        Self {
            db_number,
            start,
            length,
        }
    }

    /// Whether `[start, start + len)` of the data block lies inside this item.
    pub fn covers(&self, start: u32, len: usize) -> bool {
        start >= self.start && (start as usize + len) <= self.start as usize + self.length
    }
}

impl fmt::Display for ItemTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DB{}.DBB{}[{}]", self.db_number, self.start, self.length)
    }
}

/// Write target: an item plus an offset inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagHandle {
    pub item: ItemTag,
    pub offset: OffsetAddress,
}

impl TagHandle {
    pub fn new(item: ItemTag, offset: OffsetAddress) -> Self {
        Self { item, offset }
    }

    /// Byte address inside the data block.
    pub fn absolute_byte(&self) -> u32 {
        self.item.start + self.offset.byte_offset() as u32
    }

    pub fn bit(&self) -> Option<u8> {
        self.offset.is_bit().then(|| self.offset.bit_offset() as u8)
    }
}

impl fmt::Display for TagHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bit() {
            Some(bit) => write!(
                f,
                "DB{}.DBX{}.{}",
                self.item.db_number,
                self.absolute_byte(),
                bit
            ),
            None => write!(f, "DB{}.DBB{}", self.item.db_number, self.absolute_byte()),
        }
    }
}
