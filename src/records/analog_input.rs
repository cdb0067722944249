use bytes::{Buf, BytesMut};
use serde_json::{json, Value};

use super::binding::{assign, assign_f32, RecordBinding};
use super::schema::{FieldBinding, FieldMask, RecordSchema};
use super::traits::Record;
use crate::codec::{ScalarKind, ScalarValue};
use crate::utils::error::MirrorError;

const FIELDS: [FieldBinding; 7] = [
    FieldBinding::structure(0, ""),
    FieldBinding::scalar(1, "i_mode", ScalarKind::Short, 0),
    FieldBinding::scalar(2, "i_error_code", ScalarKind::Short, 2),
    FieldBinding::scalar(3, "i_status", ScalarKind::Short, 4),
    FieldBinding::scalar(4, "r_value", ScalarKind::Float, 6),
    FieldBinding::scalar(5, "r_low_limit", ScalarKind::Float, 10),
    FieldBinding::scalar(6, "r_high_limit", ScalarKind::Float, 14),
];

pub static SCHEMA: RecordSchema = RecordSchema {
    type_name: "AnalogInput",
    byte_width: 18,
    fields: &FIELDS,
    monitor: "",
};

/// Read-only analog measurement with its limits.
#[derive(Debug)]
pub struct AnalogInput {
    binding: RecordBinding,
    pub i_mode: i16,
    pub i_error_code: i16,
    pub i_status: i16,
    pub r_value: f32,
    pub r_low_limit: f32,
    pub r_high_limit: f32,
}

impl AnalogInput {
    pub fn new(name: impl Into<String>, offset: impl Into<String>) -> Self {
        Self {
            binding: RecordBinding::new(name, offset),
            i_mode: 0,
            i_error_code: 0,
            i_status: 0,
            r_value: 0.0,
            r_low_limit: 0.0,
            r_high_limit: 0.0,
        }
    }
}

impl Record for AnalogInput {
    fn schema(&self) -> &'static RecordSchema {
        &SCHEMA
    }

    fn binding(&self) -> &RecordBinding {
        &self.binding
    }

    fn binding_mut(&mut self) -> &mut RecordBinding {
        &mut self.binding
    }

    fn decode(&mut self, mut view: &[u8]) -> FieldMask {
        let mut mask = FieldMask::new();
        if view.len() < SCHEMA.byte_width {
            return mask;
        }
        assign(&mut self.i_mode, view.get_i16(), 1, &mut mask);
        assign(&mut self.i_error_code, view.get_i16(), 2, &mut mask);
        assign(&mut self.i_status, view.get_i16(), 3, &mut mask);
        assign_f32(&mut self.r_value, view.get_f32(), 4, &mut mask);
        assign_f32(&mut self.r_low_limit, view.get_f32(), 5, &mut mask);
        assign_f32(&mut self.r_high_limit, view.get_f32(), 6, &mut mask);
        mask
    }

    fn encode_outputs(&self, _out: &mut BytesMut) {}

    fn field_value(&self, index: usize) -> Option<ScalarValue> {
        match index {
            1 => Some(ScalarValue::Short(self.i_mode)),
            2 => Some(ScalarValue::Short(self.i_error_code)),
            3 => Some(ScalarValue::Short(self.i_status)),
            4 => Some(ScalarValue::Float(self.r_value)),
            5 => Some(ScalarValue::Float(self.r_low_limit)),
            6 => Some(ScalarValue::Float(self.r_high_limit)),
            _ => None,
        }
    }

    fn assign_output(&mut self, path: &str, _value: ScalarValue) -> Result<(), MirrorError> {
        Err(MirrorError::InvalidData(format!("AnalogInput field '{}' is read-only", path)))
    }

    fn to_json(&self) -> Value {
        json!({
            "type": SCHEMA.type_name,
            "name": self.name(),
            "i_mode": self.i_mode,
            "i_error_code": self.i_error_code,
            "i_status": self.i_status,
            "r_value": self.r_value,
            "r_low_limit": self.r_low_limit,
            "r_high_limit": self.r_high_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::Item;
    use crate::plc::ItemTag;
    use bytes::{BufMut, Bytes};
    use std::sync::Arc;

    fn fixture() -> Bytes {
        let mut buf = BytesMut::with_capacity(18);
        buf.put_i16(1234);
        buf.put_i16(4321);
        buf.put_i16(1010);
        buf.put_f32(3.1416);
        buf.put_f32(6.2832);
        buf.put_f32(12.5664);
        buf.freeze()
    }

    #[test]
    fn decodes_fixture_after_attach_and_update() {
        let item = Arc::new(Item::new("ai", ItemTag::new(20, 0, 18)));
        item.replace_buffer(fixture()).unwrap();

        let mut record = AnalogInput::new("TT101", "0");
        record.attach(&item).unwrap();
        let changed = record.update();

        assert_eq!(record.i_mode, 1234);
        assert_eq!(record.i_error_code, 4321);
        assert_eq!(record.i_status, 1010);
        assert_eq!(record.r_value, 3.1416);
        assert_eq!(record.r_low_limit, 6.2832);
        assert_eq!(record.r_high_limit, 12.5664);
        assert_eq!(changed.len(), 6);

        // Same image again: nothing changes.
        assert!(record.update().is_empty());
    }

    #[test]
    fn update_is_noop_while_detached() {
        let mut record = AnalogInput::new("TT101", "0");
        assert!(record.update().is_empty());
        assert!(record.process().is_none());
        assert!(record.set_field("r_value", ScalarValue::Float(1.0)).is_err());
        assert!(matches!(
            record.restore_state(&json!({})),
            Err(MirrorError::NotImplemented(_))
        ));
    }
}
