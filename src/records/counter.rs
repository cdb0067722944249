use bytes::BytesMut;
use serde_json::{json, Value};

use super::binding::{assign, RecordBinding};
use super::schema::{FieldBinding, FieldMask, RecordSchema, WRITE_ENABLE};
use super::traits::Record;
use crate::codec::{bcd_word_to_int, int_to_bcd, ScalarKind, ScalarValue};
use crate::utils::error::MirrorError;

const FIELDS: [FieldBinding; 5] = [
    FieldBinding::structure(0, ""),
    FieldBinding::scalar(1, "count", ScalarKind::Short, 0),
    FieldBinding::flag(2, WRITE_ENABLE),
    FieldBinding::structure(3, "out"),
    FieldBinding::scalar(4, "out.preset", ScalarKind::Short, 2),
];

pub static SCHEMA: RecordSchema = RecordSchema {
    type_name: "Counter",
    byte_width: 4,
    fields: &FIELDS,
    monitor: "write_enable, out{preset}",
};

/// S5-style counter. Both words hold three BCD digits; field values are the
/// raw words, the struct fields are decimal.
#[derive(Debug)]
pub struct Counter {
    binding: RecordBinding,
    pub count: u16,
    pub out_preset: u16,
}

impl Counter {
    pub fn new(name: impl Into<String>, offset: impl Into<String>) -> Self {
        Self {
            binding: RecordBinding::new(name, offset),
            count: 0,
            out_preset: 0,
        }
    }

    /// Sets the preset from a decimal value (clamped to 0..=999).
    pub fn set_preset(&mut self, preset: i32) -> Result<(), MirrorError> {
        self.set_field("out.preset", ScalarValue::Short(int_to_bcd(preset) as i16))
    }
}

impl Record for Counter {
    fn schema(&self) -> &'static RecordSchema {
        &SCHEMA
    }

    fn binding(&self) -> &RecordBinding {
        &self.binding
    }

    fn binding_mut(&mut self) -> &mut RecordBinding {
        &mut self.binding
    }

    fn decode(&mut self, view: &[u8]) -> FieldMask {
        let mut mask = FieldMask::new();
        if view.len() < SCHEMA.byte_width {
            return mask;
        }
        let word = u16::from_be_bytes([view[0], view[1]]);
        assign(&mut self.count, bcd_word_to_int(word), 1, &mut mask);
        mask
    }

    fn encode_outputs(&self, out: &mut BytesMut) {
        out[2..4].copy_from_slice(&int_to_bcd(self.out_preset as i32).to_be_bytes());
    }

    fn field_value(&self, index: usize) -> Option<ScalarValue> {
        match index {
            1 => Some(ScalarValue::Short(int_to_bcd(self.count as i32) as i16)),
            2 => Some(ScalarValue::Bool(self.write_enabled())),
            4 => Some(ScalarValue::Short(int_to_bcd(self.out_preset as i32) as i16)),
            _ => None,
        }
    }

    fn assign_output(&mut self, path: &str, value: ScalarValue) -> Result<(), MirrorError> {
        match (path, value) {
            ("out.preset", ScalarValue::Short(raw)) => {
                self.out_preset = bcd_word_to_int(raw as u16).min(999);
                Ok(())
            }
            _ => Err(MirrorError::InvalidData(format!(
                "Counter cannot assign {} to '{}'",
                value, path
            ))),
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "type": SCHEMA.type_name,
            "name": self.name(),
            "count": self.count,
            "write_enable": self.write_enabled(),
            "out": { "preset": self.out_preset },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::Item;
    use crate::plc::ItemTag;
    use bytes::Bytes;
    use std::sync::Arc;

    #[test]
    fn decodes_raw_nibble_fixture() {
        let item = Arc::new(Item::new("counters", ItemTag::new(40, 0, 4)));
        item.replace_buffer(Bytes::from_static(&[250, 15, 0, 0])).unwrap();

        let mut counter = Counter::new("C1", "0");
        counter.attach(&item).unwrap();
        counter.update();
        assert_eq!(counter.count, 1015);
    }

    #[test]
    fn preset_is_written_as_bcd() {
        let item = Arc::new(Item::new("counters", ItemTag::new(40, 0, 4)));
        item.replace_buffer(Bytes::from_static(&[0x01, 0x23, 0, 0])).unwrap();

        let mut counter = Counter::new("C1", "0");
        counter.attach(&item).unwrap();
        counter.update();
        assert_eq!(counter.count, 123);

        counter.set_field(WRITE_ENABLE, ScalarValue::Bool(true)).unwrap();
        counter.set_preset(456).unwrap();
        assert_eq!(counter.out_preset, 456);
        assert_eq!(counter.field_value(4), Some(ScalarValue::Short(0x0456)));

        let write = counter.process().unwrap();
        assert_eq!(write.payload.as_ref(), &[0x01, 0x23, 0x04, 0x56]);
    }
}
