use bytes::BytesMut;
use serde_json::{json, Value};

use super::binding::{assign, RecordBinding};
use super::schema::{FieldBinding, FieldMask, RecordSchema, WRITE_ENABLE};
use super::traits::Record;
use crate::codec::{is_bit_set, with_bit, ScalarKind, ScalarValue};
use crate::utils::error::MirrorError;

const FIELDS: [FieldBinding; 12] = [
    FieldBinding::structure(0, ""),
    FieldBinding::bit(1, "opened", 0, 0),
    FieldBinding::bit(2, "closed", 0, 1),
    FieldBinding::bit(3, "fault", 0, 2),
    FieldBinding::bit(4, "local", 0, 3),
    FieldBinding::scalar(5, "i_mode", ScalarKind::Byte, 1),
    FieldBinding::flag(6, WRITE_ENABLE),
    FieldBinding::structure(7, "out"),
    FieldBinding::scalar(8, "out.mode", ScalarKind::Byte, 2),
    FieldBinding::bit(9, "out.open_cmd", 3, 0),
    FieldBinding::bit(10, "out.close_cmd", 3, 1),
    FieldBinding::bit(11, "out.reset", 3, 2),
];

pub static SCHEMA: RecordSchema = RecordSchema {
    type_name: "Valve",
    byte_width: 4,
    fields: &FIELDS,
    monitor: "write_enable, out{mode, open_cmd, close_cmd, reset}",
};

/// On/off valve: status bits in byte 0, mode in byte 1, commands in bytes 2..3.
#[derive(Debug)]
pub struct Valve {
    binding: RecordBinding,
    pub opened: bool,
    pub closed: bool,
    pub fault: bool,
    pub local: bool,
    pub i_mode: u8,
    pub out_mode: u8,
    pub out_open_cmd: bool,
    pub out_close_cmd: bool,
    pub out_reset: bool,
}

impl Valve {
    pub fn new(name: impl Into<String>, offset: impl Into<String>) -> Self {
        Self {
            binding: RecordBinding::new(name, offset),
            opened: false,
            closed: false,
            fault: false,
            local: false,
            i_mode: 0,
            out_mode: 0,
            out_open_cmd: false,
            out_close_cmd: false,
            out_reset: false,
        }
    }
}

impl Record for Valve {
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
        let status = view[0];
        assign(&mut self.opened, is_bit_set(status, 0), 1, &mut mask);
        assign(&mut self.closed, is_bit_set(status, 1), 2, &mut mask);
        assign(&mut self.fault, is_bit_set(status, 2), 3, &mut mask);
        assign(&mut self.local, is_bit_set(status, 3), 4, &mut mask);
        assign(&mut self.i_mode, view[1], 5, &mut mask);
        mask
    }

    fn encode_outputs(&self, out: &mut BytesMut) {
        out[2] = self.out_mode;
        let mut commands = out[3];
        commands = with_bit(commands, 0, self.out_open_cmd);
        commands = with_bit(commands, 1, self.out_close_cmd);
        commands = with_bit(commands, 2, self.out_reset);
        out[3] = commands;
    }

    fn field_value(&self, index: usize) -> Option<ScalarValue> {
        let value = match index {
            1 => ScalarValue::Bool(self.opened),
            2 => ScalarValue::Bool(self.closed),
            3 => ScalarValue::Bool(self.fault),
            4 => ScalarValue::Bool(self.local),
            5 => ScalarValue::Byte(self.i_mode),
            6 => ScalarValue::Bool(self.write_enabled()),
            8 => ScalarValue::Byte(self.out_mode),
            9 => ScalarValue::Bool(self.out_open_cmd),
            10 => ScalarValue::Bool(self.out_close_cmd),
            11 => ScalarValue::Bool(self.out_reset),
            _ => return None,
        };
        Some(value)
    }

    fn assign_output(&mut self, path: &str, value: ScalarValue) -> Result<(), MirrorError> {
        match (path, value) {
            ("out.mode", ScalarValue::Byte(v)) => self.out_mode = v,
            ("out.open_cmd", ScalarValue::Bool(v)) => self.out_open_cmd = v,
            ("out.close_cmd", ScalarValue::Bool(v)) => self.out_close_cmd = v,
            ("out.reset", ScalarValue::Bool(v)) => self.out_reset = v,
            _ => {
                return Err(MirrorError::InvalidData(format!(
                    "Valve cannot assign {} to '{}'",
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
            "opened": self.opened,
            "closed": self.closed,
            "fault": self.fault,
            "local": self.local,
            "i_mode": self.i_mode,
            "write_enable": self.write_enabled(),
            "out": {
                "mode": self.out_mode,
                "open_cmd": self.out_open_cmd,
                "close_cmd": self.out_close_cmd,
                "reset": self.out_reset,
            },
        })
    }
}
