use bytes::BytesMut;
use chrono::Duration;
use serde_json::{json, Value};

use super::binding::{assign, RecordBinding};
use super::schema::{FieldBinding, FieldMask, RecordSchema, WRITE_ENABLE};
use super::traits::Record;
use crate::codec::{duration_to_s5time, is_bit_set, s5time_to_duration, ScalarKind, ScalarValue};
use crate::utils::error::MirrorError;

const FIELDS: [FieldBinding; 6] = [
    FieldBinding::structure(0, ""),
    FieldBinding::scalar(1, "elapsed", ScalarKind::Short, 0),
    FieldBinding::bit(2, "running", 4, 0),
    FieldBinding::flag(3, WRITE_ENABLE),
    FieldBinding::structure(4, "out"),
    FieldBinding::scalar(5, "out.preset", ScalarKind::Short, 2),
];

pub static SCHEMA: RecordSchema = RecordSchema {
    type_name: "Timer",
    byte_width: 5,
    fields: &FIELDS,
    monitor: "write_enable, out{preset}",
};

/// S5TIME based timer.
#[derive(Debug)]
pub struct Timer {
    binding: RecordBinding,
    pub elapsed: Duration,
    pub running: bool,
    pub out_preset: Duration,
}

impl Timer {
    pub fn new(name: impl Into<String>, offset: impl Into<String>) -> Self {
        Self {
            binding: RecordBinding::new(name, offset),
            elapsed: Duration::zero(),
            running: false,
            out_preset: Duration::zero(),
        }
    }

    pub fn set_preset(&mut self, preset: Duration) -> Result<(), MirrorError> {
        self.set_field("out.preset", ScalarValue::Short(duration_to_s5time(preset) as i16))
    }
}

impl Record for Timer {
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
        let elapsed = s5time_to_duration(u16::from_be_bytes([view[0], view[1]]));
        assign(&mut self.elapsed, elapsed, 1, &mut mask);
        assign(&mut self.running, is_bit_set(view[4], 0), 2, &mut mask);
        mask
    }

    fn encode_outputs(&self, out: &mut BytesMut) {
        out[2..4].copy_from_slice(&duration_to_s5time(self.out_preset).to_be_bytes());
    }

    fn field_value(&self, index: usize) -> Option<ScalarValue> {
        match index {
            1 => Some(ScalarValue::Short(duration_to_s5time(self.elapsed) as i16)),
            2 => Some(ScalarValue::Bool(self.running)),
            3 => Some(ScalarValue::Bool(self.write_enabled())),
            5 => Some(ScalarValue::Short(duration_to_s5time(self.out_preset) as i16)),
            _ => None,
        }
    }

    fn assign_output(&mut self, path: &str, value: ScalarValue) -> Result<(), MirrorError> {
        match (path, value) {
            ("out.preset", ScalarValue::Short(raw)) => {
                self.out_preset = s5time_to_duration(raw as u16);
                Ok(())
            }
            _ => Err(MirrorError::InvalidData(format!(
                "Timer cannot assign {} to '{}'",
                value, path
            ))),
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "type": SCHEMA.type_name,
            "name": self.name(),
            "elapsed_ms": self.elapsed.num_milliseconds(),
            "running": self.running,
            "write_enable": self.write_enabled(),
            "out": { "preset_ms": self.out_preset.num_milliseconds() },
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
    fn decodes_elapsed_and_running() {
        let item = Arc::new(Item::new("timers", ItemTag::new(50, 0, 5)));
        item.replace_buffer(Bytes::from_static(&[0x21, 0x23, 0, 0, 0x01])).unwrap();

        let mut timer = Timer::new("T1", "0");
        timer.attach(&item).unwrap();
        timer.update();
        assert_eq!(timer.elapsed, Duration::seconds(123));
        assert!(timer.running);
    }

    #[test]
    fn preset_truncates_to_time_base() {
        let item = Arc::new(Item::new("timers", ItemTag::new(50, 0, 5)));
        let mut timer = Timer::new("T1", "0");
        timer.attach(&item).unwrap();
        timer.set_field(WRITE_ENABLE, ScalarValue::Bool(true)).unwrap();
        timer.set_preset(Duration::milliseconds(12_345)).unwrap();
        assert_eq!(timer.out_preset, Duration::milliseconds(12_300));

        let write = timer.process().unwrap();
        assert_eq!(&write.payload[2..4], &[0x11, 0x23]);
    }
}
