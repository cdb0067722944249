//! IEC 61131-3 temporal literals (`T#1h2m`, `D#2024-05-19`, ...).
//!
//! Used by configuration and the command line to turn human-written values
//! into device bytes. Malformed literals are logged and yield `None`.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use log::warn;

use super::temporal::{
    duration_to_s5time, duration_to_s7_time, encode_date_and_time, naive_date_to_s7_date,
    naive_time_to_tod,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalLiteral {
    S5Time(Duration),
    Time(Duration),
    Date(NaiveDate),
    TimeOfDay(NaiveTime),
    DateAndTime(NaiveDateTime),
}

impl TemporalLiteral {
    pub fn type_name(&self) -> &'static str {
        match self {
            TemporalLiteral::S5Time(_) => "S5TIME",
            TemporalLiteral::Time(_) => "TIME",
            TemporalLiteral::Date(_) => "DATE",
            TemporalLiteral::TimeOfDay(_) => "TIME_OF_DAY",
            TemporalLiteral::DateAndTime(_) => "DATE_AND_TIME",
        }
    }

    /// Device representation, big-endian.
    pub fn to_device_bytes(&self) -> Vec<u8> {
        match self {
            TemporalLiteral::S5Time(d) => duration_to_s5time(*d).to_be_bytes().to_vec(),
            TemporalLiteral::Time(d) => duration_to_s7_time(*d).to_be_bytes().to_vec(),
            TemporalLiteral::Date(d) => naive_date_to_s7_date(*d).to_be_bytes().to_vec(),
            TemporalLiteral::TimeOfDay(t) => naive_time_to_tod(*t).to_be_bytes().to_vec(),
            TemporalLiteral::DateAndTime(dt) => encode_date_and_time(dt).to_vec(),
        }
    }
}

pub fn parse_literal(text: &str) -> Option<TemporalLiteral> {
    let parsed = text.trim().split_once('#').and_then(|(prefix, body)| {
        match prefix.to_ascii_uppercase().as_str() {
            "S5T" | "S5TIME" => parse_duration(body).map(TemporalLiteral::S5Time),
            "T" | "TIME" => parse_duration(body).map(TemporalLiteral::Time),
            "D" | "DATE" => parse_date(body).map(TemporalLiteral::Date),
            "TOD" | "TIME_OF_DAY" => parse_time(body).map(TemporalLiteral::TimeOfDay),
            "DT" | "DATE_AND_TIME" => parse_date_time(body).map(TemporalLiteral::DateAndTime),
            _ => None,
        }
    });

    if parsed.is_none() {
        warn!("⚠️  Malformed temporal literal '{}'", text);
    }
    parsed
}

/// Parses `[-]<n><unit>...` with units `d`, `h`, `m`, `s`, `ms`.
fn parse_duration(body: &str) -> Option<Duration> {
    let (negative, body) = match body.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, body),
    };
    let body = body.replace('_', "").to_ascii_lowercase();
    if body.is_empty() {
        return None;
    }

    let mut total_ms: i64 = 0;
    let mut rest = body.as_str();
    while !rest.is_empty() {
        let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
        if digits_end == 0 {
            return None;
        }
        let value: i64 = rest[..digits_end].parse().ok()?;
        rest = &rest[digits_end..];

        let unit_end = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let factor = match &rest[..unit_end] {
            "d" => 86_400_000,
            "h" => 3_600_000,
            "m" => 60_000,
            "s" => 1_000,
            "ms" => 1,
            _ => return None,
        };
        rest = &rest[unit_end..];
        total_ms = total_ms.checked_add(value.checked_mul(factor)?)?;
    }

    let total_ms = if negative { -total_ms } else { total_ms };
    Some(Duration::milliseconds(total_ms))
}

fn parse_date(body: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(body, "%Y-%m-%d").ok()
}

fn parse_time(body: &str) -> Option<NaiveTime> {
    ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(body, fmt).ok())
}

/// `DT#2024-05-19-13:45:27.123`
fn parse_date_time(body: &str) -> Option<NaiveDateTime> {
    if body.len() < 12 || !body.is_char_boundary(10) {
        return None;
    }
    let (date, time) = body.split_at(10);
    let time = time.strip_prefix('-')?;
    Some(parse_date(date)?.and_time(parse_time(time)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_literals() {
        assert_eq!(
            parse_literal("T#1h2m3s4ms"),
            Some(TemporalLiteral::Time(Duration::milliseconds(3_723_004)))
        );
        assert_eq!(
            parse_literal("t#-250ms"),
            Some(TemporalLiteral::Time(Duration::milliseconds(-250)))
        );
        assert_eq!(
            parse_literal("S5T#2s_500ms"),
            Some(TemporalLiteral::S5Time(Duration::milliseconds(2_500)))
        );
    }

    #[test]
    fn parses_calendar_literals() {
        assert_eq!(
            parse_literal("D#1990-01-01").map(|l| l.to_device_bytes()),
            Some(vec![0x00, 0x00])
        );
        assert_eq!(
            parse_literal("TOD#12:00:00"),
            Some(TemporalLiteral::TimeOfDay(NaiveTime::from_hms_opt(12, 0, 0).unwrap()))
        );
        let dt = parse_literal("DT#2024-05-19-13:45:27.123").unwrap();
        assert_eq!(
            dt.to_device_bytes(),
            vec![0x24, 0x05, 0x19, 0x13, 0x45, 0x27, 0x12, 0x31]
        );
        assert_eq!(dt.type_name(), "DATE_AND_TIME");
    }

    #[test]
    fn malformed_literals_yield_none() {
        for text in ["", "T#", "T#5x", "X#1s", "D#2024-13-01", "DT#2024-05-19", "T#ms", "1s"] {
            assert!(parse_literal(text).is_none(), "'{}' should be rejected", text);
        }
    }

    #[test]
    fn s5time_literal_encodes_to_word() {
        let literal = parse_literal("S5T#12s300ms").unwrap();
        assert_eq!(literal.to_device_bytes(), vec![0x11, 0x23]);
    }
}
