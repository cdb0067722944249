use bytes::BytesMut;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{json, Value};

use super::binding::{assign, RecordBinding};
use super::schema::{FieldBinding, FieldMask, RecordSchema, WRITE_ENABLE};
use super::traits::Record;
use crate::codec::{
    decode_date_and_time, duration_to_s7_time, encode_date_and_time, naive_date_to_s7_date,
    naive_time_to_tod, s7_date_to_naive_date, s7_epoch, s7_time_to_duration, tod_to_naive_time,
    ScalarKind, ScalarValue,
};
use crate::utils::error::MirrorError;

const FIELDS: [FieldBinding; 8] = [
    FieldBinding::structure(0, ""),
    FieldBinding::scalar(1, "timestamp", ScalarKind::Long, 0),
    FieldBinding::scalar(2, "date", ScalarKind::Short, 8),
    FieldBinding::scalar(3, "time_of_day", ScalarKind::Int, 10),
    FieldBinding::scalar(4, "uptime", ScalarKind::Int, 14),
    FieldBinding::flag(5, WRITE_ENABLE),
    FieldBinding::structure(6, "out"),
    FieldBinding::scalar(7, "out.timestamp", ScalarKind::Long, 18),
];

pub static SCHEMA: RecordSchema = RecordSchema {
    type_name: "Clock",
    byte_width: 26,
    fields: &FIELDS,
    monitor: "write_enable, out{timestamp}",
};

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Device clock block. DATE_AND_TIME fields travel as the 8 raw bytes packed
/// into a big-endian `Long`.
#[derive(Debug)]
pub struct Clock {
    binding: RecordBinding,
    pub timestamp: Option<NaiveDateTime>,
    pub date: NaiveDate,
    pub time_of_day: NaiveTime,
    pub uptime: Duration,
    pub out_timestamp: NaiveDateTime,
}

impl Clock {
    pub fn new(name: impl Into<String>, offset: impl Into<String>) -> Self {
        Self {
            binding: RecordBinding::new(name, offset),
            timestamp: None,
            date: s7_epoch(),
            time_of_day: NaiveTime::MIN,
            uptime: Duration::zero(),
            out_timestamp: s7_epoch().and_time(NaiveTime::MIN),
        }
    }

    pub fn set_timestamp(&mut self, timestamp: NaiveDateTime) -> Result<(), MirrorError> {
        let raw = i64::from_be_bytes(encode_date_and_time(&timestamp));
        self.set_field("out.timestamp", ScalarValue::Long(raw))
    }
}

impl Record for Clock {
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
        assign(&mut self.timestamp, decode_date_and_time(&view[0..8]), 1, &mut mask);
        let days = i16::from_be_bytes([view[8], view[9]]);
        assign(&mut self.date, s7_date_to_naive_date(days), 2, &mut mask);
        assign(&mut self.time_of_day, tod_to_naive_time(be_u32(&view[10..14])), 3, &mut mask);
        assign(&mut self.uptime, s7_time_to_duration(be_u32(&view[14..18])), 4, &mut mask);
        mask
    }

    fn encode_outputs(&self, out: &mut BytesMut) {
        out[18..26].copy_from_slice(&encode_date_and_time(&self.out_timestamp));
    }

    fn field_value(&self, index: usize) -> Option<ScalarValue> {
        match index {
            1 => self
                .timestamp
                .map(|ts| ScalarValue::Long(i64::from_be_bytes(encode_date_and_time(&ts)))),
            2 => Some(ScalarValue::Short(naive_date_to_s7_date(self.date))),
            3 => Some(ScalarValue::Int(naive_time_to_tod(self.time_of_day) as i32)),
            4 => Some(ScalarValue::Int(duration_to_s7_time(self.uptime) as i32)),
            5 => Some(ScalarValue::Bool(self.write_enabled())),
            7 => Some(ScalarValue::Long(i64::from_be_bytes(encode_date_and_time(
                &self.out_timestamp,
            )))),
            _ => None,
        }
    }

    fn assign_output(&mut self, path: &str, value: ScalarValue) -> Result<(), MirrorError> {
        match (path, value) {
            ("out.timestamp", ScalarValue::Long(raw)) => {
                let timestamp = decode_date_and_time(&raw.to_be_bytes()).ok_or_else(|| {
                    MirrorError::InvalidData(format!("{:#018x} is not a DATE_AND_TIME", raw))
                })?;
                self.out_timestamp = timestamp;
                Ok(())
            }
            _ => Err(MirrorError::InvalidData(format!(
                "Clock cannot assign {} to '{}'",
                value, path
            ))),
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "type": SCHEMA.type_name,
            "name": self.name(),
            "timestamp": self.timestamp.map(|ts| ts.to_string()),
            "date": self.date.to_string(),
            "time_of_day": self.time_of_day.to_string(),
            "uptime_ms": self.uptime.num_milliseconds(),
            "write_enable": self.write_enabled(),
            "out": { "timestamp": self.out_timestamp.to_string() },
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

    fn image() -> Bytes {
        let mut bytes = vec![0x24, 0x05, 0x19, 0x13, 0x45, 0x27, 0x12, 0x31];
        bytes.extend_from_slice(&12_345i16.to_be_bytes());
        bytes.extend_from_slice(&43_200_000u32.to_be_bytes());
        bytes.extend_from_slice(&(-1_500i32).to_be_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        Bytes::from(bytes)
    }

    #[test]
    fn decodes_all_temporal_fields() {
        let item = Arc::new(Item::new("clock", ItemTag::new(60, 0, 26)));
        item.replace_buffer(image()).unwrap();

        let mut clock = Clock::new("CLK", "0");
        clock.attach(&item).unwrap();
        let mask = clock.update();

        let expected = NaiveDate::from_ymd_opt(2024, 5, 19)
            .unwrap()
            .and_hms_milli_opt(13, 45, 27, 123)
            .unwrap();
        assert_eq!(clock.timestamp, Some(expected));
        assert_eq!(clock.date, s7_epoch() + Duration::days(12_345));
        assert_eq!(clock.time_of_day, NaiveTime::from_hms_opt(12, 0, 0).unwrap());
        assert_eq!(clock.uptime, Duration::milliseconds(-1_500));
        assert_eq!(mask.len(), 4);
    }

    #[test]
    fn writes_out_timestamp() {
        let item = Arc::new(Item::new("clock", ItemTag::new(60, 0, 26)));
        let mut clock = Clock::new("CLK", "0");
        clock.attach(&item).unwrap();
        clock.set_field(WRITE_ENABLE, ScalarValue::Bool(true)).unwrap();

        let target = NaiveDate::from_ymd_opt(2024, 5, 20)
            .unwrap()
            .and_hms_opt(6, 30, 0)
            .unwrap();
        clock.set_timestamp(target).unwrap();
        assert_eq!(clock.out_timestamp, target);

        let write = clock.process().unwrap();
        assert_eq!(&write.payload[18..26], &encode_date_and_time(&target));
        assert!(clock
            .set_field("out.timestamp", ScalarValue::Long(-1))
            .is_err());
    }
}
