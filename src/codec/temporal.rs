//! S5/S7 temporal encodings mapped onto `chrono` types.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};

use super::bcd::{bcd_to_int, bcd_word_to_int, int_to_bcd, int_to_bcd_byte};

/// Largest duration an S5TIME can hold: 999 units of the 10 s time base.
pub const S5TIME_MAX_MS: i64 = 9_990_000;

/// Last millisecond of a day (23:59:59.999).
pub const TOD_MAX_MS: u32 = 0x0526_5BFF;

/// S5TIME time bases, indexed by the 2-bit exponent in bits 12..13.
const S5TIME_BASES_MS: [(u16, i64); 4] = [(0, 10), (1, 100), (2, 1_000), (3, 10_000)];

/// Epoch of the S7 DATE type.
pub fn s7_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or_default()
}

// ===== S5TIME =====

/// Decodes a 16-bit S5TIME: time base in bits 12..13, three BCD digits below.
pub fn s5time_to_duration(raw: u16) -> Duration {
    let exponent = ((raw >> 12) & 0x0003) as usize;
    let units = bcd_word_to_int(raw & 0x0FFF) as i64;
    let base_ms = S5TIME_BASES_MS[exponent].1;
    Duration::milliseconds((units * base_ms).min(S5TIME_MAX_MS))
}

/// Encodes a duration as S5TIME using the finest time base whose unit count
/// still fits three BCD digits. Negative durations encode as zero, longer
/// ones clamp to [`S5TIME_MAX_MS`]; sub-unit remainders are truncated.
pub fn duration_to_s5time(duration: Duration) -> u16 {
    let total_ms = duration.num_milliseconds().clamp(0, S5TIME_MAX_MS);

    let (code, base_ms) = S5TIME_BASES_MS
        .iter()
        .copied()
        .find(|(_, base_ms)| total_ms / base_ms <= 999)
        .unwrap_or(S5TIME_BASES_MS[3]);

    let units = (total_ms / base_ms) as i32;
    (code << 12) | int_to_bcd(units)
}

// ===== DATE =====

/// Decodes an S7 DATE (signed day count from 1990-01-01).
pub fn s7_date_to_naive_date(days: i16) -> NaiveDate {
    let epoch = s7_epoch();
    epoch
        .checked_add_signed(Duration::days(days as i64))
        .unwrap_or(epoch)
}

/// Encodes a date as S7 DATE day count, clamped to the 16-bit signed range.
pub fn naive_date_to_s7_date(date: NaiveDate) -> i16 {
    let days = date.signed_duration_since(s7_epoch()).num_days();
    days.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

// ===== TIME =====

/// Decodes an S7 TIME (32-bit signed milliseconds). When bit 31 is set the
/// magnitude is recovered from the two's-complement bit pattern.
pub fn s7_time_to_duration(raw: u32) -> Duration {
    if raw & 0x8000_0000 != 0 {
        let magnitude = (!raw).wrapping_add(1) as i64;
        Duration::milliseconds(-magnitude)
    } else {
        Duration::milliseconds(raw as i64)
    }
}

/// Encodes a duration as S7 TIME, saturating at the signed 32-bit range.
pub fn duration_to_s7_time(duration: Duration) -> u32 {
    let ms = duration
        .num_milliseconds()
        .clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    ms as u32
}

// ===== TIME_OF_DAY =====

/// Decodes TIME_OF_DAY (milliseconds since midnight), clamping to 23:59:59.999.
pub fn tod_to_naive_time(raw: u32) -> NaiveTime {
    let ms = raw.min(TOD_MAX_MS);
    NaiveTime::from_num_seconds_from_midnight_opt(ms / 1000, (ms % 1000) * 1_000_000)
        .unwrap_or_default()
}

pub fn naive_time_to_tod(time: NaiveTime) -> u32 {
    let millis = (time.nanosecond() / 1_000_000).min(999);
    (time.num_seconds_from_midnight() * 1000 + millis).min(TOD_MAX_MS)
}

// ===== DATE_AND_TIME =====

/// Maps a calendar weekday (Monday=1..Sunday=7) onto the device convention
/// (Sunday=1..Saturday=7).
pub fn device_day_of_week(weekday: Weekday) -> u8 {
    (weekday.number_from_monday() % 7 + 1) as u8
}

/// Decodes the 8-byte BCD DATE_AND_TIME layout:
/// `yy mm dd hh mi ss | ms(hundreds,tens) | ms(ones) dow`.
///
/// Returns `None` for short input or fields that do not form a valid
/// timestamp.
pub fn decode_date_and_time(bytes: &[u8]) -> Option<NaiveDateTime> {
    if bytes.len() < 8 {
        return None;
    }
    let yy = bcd_to_int(bytes[0]) as i32;
    let year = if yy >= 90 { 1900 + yy } else { 2000 + yy };
    let month = bcd_to_int(bytes[1]) as u32;
    let day = bcd_to_int(bytes[2]) as u32;
    let hour = bcd_to_int(bytes[3]) as u32;
    let minute = bcd_to_int(bytes[4]) as u32;
    let second = bcd_to_int(bytes[5]) as u32;
    let millis = bcd_to_int(bytes[6]) as u32 * 10 + (bytes[7] >> 4) as u32;
    if millis > 999 {
        return None;
    }

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_milli_opt(hour, minute, second, millis)
}

/// Encodes a timestamp into the 8-byte BCD DATE_AND_TIME layout. Years are
/// clamped to the representable 1990..=2089 window.
pub fn encode_date_and_time(timestamp: &NaiveDateTime) -> [u8; 8] {
    let year = timestamp.year().clamp(1990, 2089);
    let yy = (if year >= 2000 { year - 2000 } else { year - 1900 }) as u8;
    let millis = (timestamp.nanosecond() / 1_000_000).min(999);
    let dow = device_day_of_week(timestamp.weekday());

    [
        int_to_bcd_byte(yy),
        int_to_bcd_byte(timestamp.month() as u8),
        int_to_bcd_byte(timestamp.day() as u8),
        int_to_bcd_byte(timestamp.hour() as u8),
        int_to_bcd_byte(timestamp.minute() as u8),
        int_to_bcd_byte(timestamp.second().min(59) as u8),
        int_to_bcd_byte((millis / 10) as u8),
        (((millis % 10) as u8) << 4) | (dow & 0x07),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_milli_opt(h, mi, s, ms)
            .unwrap()
    }

    #[test]
    fn s5time_round_trip_across_time_bases() {
        let cases = [
            (120, 0x0012),          // 10 ms base
            (12_300, 0x1123),       // 100 ms base
            (123_000, 0x2123),      // 1 s base
            (1_230_000, 0x3123),    // 10 s base
            (9_990_000, 0x3999),
        ];
        for (ms, raw) in cases {
            assert_eq!(duration_to_s5time(Duration::milliseconds(ms)), raw, "{} ms", ms);
            assert_eq!(s5time_to_duration(raw), Duration::milliseconds(ms));
        }
    }

    #[test]
    fn s5time_clamps_at_ceiling() {
        assert_eq!(duration_to_s5time(Duration::milliseconds(20_000_000)), 0x3999);
        assert_eq!(duration_to_s5time(Duration::milliseconds(-50)), 0x0000);
        assert_eq!(
            s5time_to_duration(0x3999),
            Duration::milliseconds(S5TIME_MAX_MS)
        );
    }

    #[test]
    fn s5time_truncates_to_unit() {
        // 12 345 ms does not fit the 10 ms base; 100 ms base keeps 123 units.
        assert_eq!(duration_to_s5time(Duration::milliseconds(12_345)), 0x1123);
    }

    #[test]
    fn s7_date_from_epoch() {
        assert_eq!(s7_date_to_naive_date(0), NaiveDate::from_ymd_opt(1990, 1, 1).unwrap());
        let date = s7_date_to_naive_date(12_345);
        assert_eq!(date, NaiveDate::from_ymd_opt(1990, 1, 1).unwrap() + Duration::days(12_345));
        assert_eq!(naive_date_to_s7_date(date), 12_345);
        assert_eq!(naive_date_to_s7_date(s7_date_to_naive_date(-200)), -200);
    }

    #[test]
    fn s7_time_sign_handling() {
        assert_eq!(s7_time_to_duration(1_500), Duration::milliseconds(1_500));
        assert_eq!(s7_time_to_duration(0xFFFF_FFFF), Duration::milliseconds(-1));
        assert_eq!(
            s7_time_to_duration(0x8000_0000),
            Duration::milliseconds(i32::MIN as i64)
        );
        assert_eq!(duration_to_s7_time(Duration::milliseconds(-1)), 0xFFFF_FFFF);
        assert_eq!(duration_to_s7_time(Duration::days(30)), i32::MAX as u32);
    }

    #[test]
    fn time_of_day_clamps() {
        let noon = tod_to_naive_time(43_200_000);
        assert_eq!(noon, NaiveTime::from_hms_opt(12, 0, 0).unwrap());
        assert_eq!(naive_time_to_tod(noon), 43_200_000);
        let last = tod_to_naive_time(u32::MAX);
        assert_eq!(last, NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap());
        assert_eq!(naive_time_to_tod(last), TOD_MAX_MS);
    }

    #[test]
    fn date_and_time_layout_round_trip() {
        // 2024-05-19 is a Sunday: device day 1.
        let sunday = ts(2024, 5, 19, 13, 45, 27, 123);
        let bytes = encode_date_and_time(&sunday);
        assert_eq!(bytes, [0x24, 0x05, 0x19, 0x13, 0x45, 0x27, 0x12, 0x31]);
        assert_eq!(decode_date_and_time(&bytes), Some(sunday));

        // Monday maps to device day 2.
        let monday = ts(2024, 5, 20, 0, 0, 0, 0);
        assert_eq!(encode_date_and_time(&monday)[7] & 0x07, 2);
    }

    #[test]
    fn date_and_time_century_pivot() {
        let last_century = ts(1995, 12, 31, 23, 59, 59, 999);
        let bytes = encode_date_and_time(&last_century);
        assert_eq!(bytes[0], 0x95);
        assert_eq!(bytes[7], 0x91);
        assert_eq!(decode_date_and_time(&bytes), Some(last_century));
    }

    #[test]
    fn date_and_time_tail_digits() {
        // ss | ms hundreds, tens | ms ones, day of week
        let sunday = ts(2024, 5, 19, 10, 0, 25, 140);
        let bytes = encode_date_and_time(&sunday);
        assert_eq!(hex::encode(&bytes[5..]), "251401");
        assert_eq!(decode_date_and_time(&bytes), Some(sunday));

        let tuesday = ts(2024, 5, 21, 10, 0, 25, 140);
        assert_eq!(hex::encode(&encode_date_and_time(&tuesday)[5..]), "251403");

        let mut bytes = encode_date_and_time(&ts(2024, 5, 19, 10, 0, 25, 0));
        bytes[6] = 0x14;
        bytes[7] = 0x13;
        assert_eq!(decode_date_and_time(&bytes), Some(ts(2024, 5, 19, 10, 0, 25, 141)));
    }

    #[test]
    fn date_and_time_rejects_garbage() {
        assert_eq!(decode_date_and_time(&[0x24, 0x13, 0x01, 0, 0, 0, 0, 0]), None);
        assert_eq!(decode_date_and_time(&[0x24, 0x01]), None);
    }

    #[test]
    fn weekday_remap() {
        assert_eq!(device_day_of_week(Weekday::Sun), 1);
        assert_eq!(device_day_of_week(Weekday::Mon), 2);
        assert_eq!(device_day_of_week(Weekday::Sat), 7);
    }
}
