use bytes::{Buf, BytesMut};
use serde_json::{json, Value};

use super::binding::{assign, assign_f32, RecordBinding};
use super::schema::{FieldBinding, FieldMask, RecordSchema, WRITE_ENABLE};
use super::traits::Record;
use crate::codec::{ScalarKind, ScalarValue};
use crate::utils::error::MirrorError;

const FIELDS: [FieldBinding; 8] = [
    FieldBinding::structure(0, ""),
    FieldBinding::scalar(1, "i_mode", ScalarKind::Short, 0),
    FieldBinding::scalar(2, "i_status", ScalarKind::Short, 2),
    FieldBinding::scalar(3, "r_value", ScalarKind::Float, 4),
    FieldBinding::flag(4, WRITE_ENABLE),
    FieldBinding::structure(5, "out"),
    FieldBinding::scalar(6, "out.i_mode", ScalarKind::Short, 8),
    FieldBinding::scalar(7, "out.r_setpoint", ScalarKind::Float, 10),
];

pub static SCHEMA: RecordSchema = RecordSchema {
    type_name: "AnalogOutput",
    byte_width: 14,
    fields: &FIELDS,
    monitor: "write_enable, out{i_mode, r_setpoint}",
};

#[derive(Debug)]
pub struct AnalogOutput {
    binding: RecordBinding,
    pub i_mode: i16,
    pub i_status: i16,
    pub r_value: f32,
    pub out_i_mode: i16,
    pub out_r_setpoint: f32,
}

impl AnalogOutput {
    pub fn new(name: impl Into<String>, offset: impl Into<String>) -> Self {
        Self {
            binding: RecordBinding::new(name, offset),
            i_mode: 0,
            i_status: 0,
            r_value: 0.0,
            out_i_mode: 0,
            out_r_setpoint: 0.0,
        }
    }
}

impl Record for AnalogOutput {
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
        assign(&mut self.i_status, view.get_i16(), 2, &mut mask);
        assign_f32(&mut self.r_value, view.get_f32(), 3, &mut mask);
        mask
    }

    fn encode_outputs(&self, out: &mut BytesMut) {
        out[8..10].copy_from_slice(&self.out_i_mode.to_be_bytes());
        out[10..14].copy_from_slice(&self.out_r_setpoint.to_be_bytes());
    }

    fn field_value(&self, index: usize) -> Option<ScalarValue> {
        match index {
            1 => Some(ScalarValue::Short(self.i_mode)),
            2 => Some(ScalarValue::Short(self.i_status)),
            3 => Some(ScalarValue::Float(self.r_value)),
            4 => Some(ScalarValue::Bool(self.write_enabled())),
            6 => Some(ScalarValue::Short(self.out_i_mode)),
            7 => Some(ScalarValue::Float(self.out_r_setpoint)),
            _ => None,
        }
    }

    fn assign_output(&mut self, path: &str, value: ScalarValue) -> Result<(), MirrorError> {
        match (path, value) {
            ("out.i_mode", ScalarValue::Short(v)) => self.out_i_mode = v,
            ("out.r_setpoint", ScalarValue::Float(v)) => self.out_r_setpoint = v,
            _ => {
                return Err(MirrorError::InvalidData(format!(
                    "AnalogOutput cannot assign {} to '{}'",
                    value, path
                )))
            }
        }
        Ok(())
    }

    fn to_json(&self) -> Value {
        json!({
            "type": SCHEMA.type_name,
            "name": self.name(),
            "i_mode": self.i_mode,
            "i_status": self.i_status,
            "r_value": self.r_value,
            "write_enable": self.write_enabled(),
            "out": {
                "i_mode": self.out_i_mode,
                "r_setpoint": self.out_r_setpoint,
            },
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
    fn process_requires_write_enable() {
        let item = Arc::new(Item::new("ao", ItemTag::new(21, 100, 14)));
        let mut record = AnalogOutput::new("FV201", "0");
        record.attach(&item).unwrap();

        record.set_field("out.r_setpoint", ScalarValue::Float(42.5)).unwrap();
        assert!(record.process().is_none());

        record.set_field(WRITE_ENABLE, ScalarValue::Bool(true)).unwrap();
        let write = record.process().unwrap();
        assert_eq!(write.tag.to_string(), "DB21.DBB100");
        assert_eq!(write.payload.len(), 14);
        assert_eq!(&write.payload[10..14], &42.5f32.to_be_bytes());
        assert_eq!(
            write.values,
            vec![ScalarValue::Short(0), ScalarValue::Float(42.5)]
        );
    }

    #[test]
    fn process_keeps_current_input_bytes() {
        let item = Arc::new(Item::new("ao", ItemTag::new(21, 0, 14)));
        let mut image = vec![0u8; 14];
        image[0..2].copy_from_slice(&7i16.to_be_bytes());
        item.replace_buffer(Bytes::from(image)).unwrap();

        let mut record = AnalogOutput::new("FV201", "0");
        record.attach(&item).unwrap();
        record.set_field(WRITE_ENABLE, ScalarValue::Bool(true)).unwrap();
        record.set_field("out.i_mode", ScalarValue::Short(3)).unwrap();

        let write = record.process().unwrap();
        assert_eq!(&write.payload[0..2], &[0, 7]);
        assert_eq!(&write.payload[8..10], &[0, 3]);
    }

    #[test]
    fn rejects_input_and_mistyped_edits() {
        let mut record = AnalogOutput::new("FV201", "0");
        assert!(record.set_field("r_value", ScalarValue::Float(1.0)).is_err());
        assert!(record.set_field("out.i_mode", ScalarValue::Float(1.0)).is_err());
        assert!(record.take_changes().is_none());
    }
}
