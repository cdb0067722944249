//! Scalar kinds that can be written to a data block field.

use bytes::{Buf, BufMut, Bytes};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of the scratch buffer used to serialize one scalar.
pub const SCRATCH_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Bool,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl ScalarKind {
    /// Encoded width in bytes.
    pub fn width(self) -> usize {
        match self {
            ScalarKind::Bool | ScalarKind::Byte => 1,
            ScalarKind::Short => 2,
            ScalarKind::Int | ScalarKind::Float => 4,
            ScalarKind::Long | ScalarKind::Double => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ScalarValue {
    Bool(bool),
    Byte(u8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

impl ScalarValue {
    pub fn kind(&self) -> ScalarKind {
        match self {
            ScalarValue::Bool(_) => ScalarKind::Bool,
            ScalarValue::Byte(_) => ScalarKind::Byte,
            ScalarValue::Short(_) => ScalarKind::Short,
            ScalarValue::Int(_) => ScalarKind::Int,
            ScalarValue::Long(_) => ScalarKind::Long,
            ScalarValue::Float(_) => ScalarKind::Float,
            ScalarValue::Double(_) => ScalarKind::Double,
        }
    }

    /// Serializes big-endian into `scratch` and returns the number of bytes
    /// written.
    pub fn encode_into(&self, scratch: &mut [u8; SCRATCH_CAPACITY]) -> usize {
        let mut dst = &mut scratch[..];
        match self {
            ScalarValue::Bool(v) => dst.put_u8(u8::from(*v)),
            ScalarValue::Byte(v) => dst.put_u8(*v),
            ScalarValue::Short(v) => dst.put_i16(*v),
            ScalarValue::Int(v) => dst.put_i32(*v),
            ScalarValue::Long(v) => dst.put_i64(*v),
            ScalarValue::Float(v) => dst.put_f32(*v),
            ScalarValue::Double(v) => dst.put_f64(*v),
        }
        self.kind().width()
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut scratch = [0u8; SCRATCH_CAPACITY];
        let len = self.encode_into(&mut scratch);
        Bytes::copy_from_slice(&scratch[..len])
    }

    /// Reads a scalar of `kind` from the start of `src`. Returns `None` when
    /// `src` is too short.
    pub fn decode(kind: ScalarKind, mut src: &[u8]) -> Option<Self> {
        if src.len() < kind.width() {
            return None;
        }
        let value = match kind {
            ScalarKind::Bool => ScalarValue::Bool(src.get_u8() != 0),
            ScalarKind::Byte => ScalarValue::Byte(src.get_u8()),
            ScalarKind::Short => ScalarValue::Short(src.get_i16()),
            ScalarKind::Int => ScalarValue::Int(src.get_i32()),
            ScalarKind::Long => ScalarValue::Long(src.get_i64()),
            ScalarKind::Float => ScalarValue::Float(src.get_f32()),
            ScalarKind::Double => ScalarValue::Double(src.get_f64()),
        };
        Some(value)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view of integral variants.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Byte(v) => Some(*v as i64),
            ScalarValue::Short(v) => Some(*v as i64),
            ScalarValue::Int(v) => Some(*v as i64),
            ScalarValue::Long(v) => Some(*v),
            ScalarValue::Bool(_) | ScalarValue::Float(_) | ScalarValue::Double(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Float(v) => Some(*v as f64),
            ScalarValue::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(v) => write!(f, "{}", v),
            ScalarValue::Byte(v) => write!(f, "{}", v),
            ScalarValue::Short(v) => write!(f, "{}", v),
            ScalarValue::Int(v) => write!(f, "{}", v),
            ScalarValue::Long(v) => write!(f, "{}", v),
            ScalarValue::Float(v) => write!(f, "{}", v),
            ScalarValue::Double(v) => write!(f, "{}", v),
        }
    }
}

pub fn is_bit_set(byte: u8, bit: u8) -> bool {
    ((byte >> bit) & 1) == 1
}

/// Returns `byte` with `bit` set or cleared.
pub fn with_bit(byte: u8, bit: u8, value: bool) -> u8 {
    if value {
        byte | (1 << bit)
    } else {
        byte & !(1 << bit)
    }
}
