//! PLC-native value encodings.
//!
//! Everything here is pure and stateless. All multi-byte values are
//! big-endian, as laid out in S7 data blocks.

pub mod bcd;
pub mod literal;
pub mod scalar;
pub mod temporal;

pub use bcd::{bcd_to_int, bcd_word_to_int, int_to_bcd, int_to_bcd_byte};
pub use literal::{parse_literal, TemporalLiteral};
pub use scalar::{is_bit_set, with_bit, ScalarKind, ScalarValue, SCRATCH_CAPACITY};
pub use temporal::{
    decode_date_and_time, device_day_of_week, duration_to_s5time, duration_to_s7_time,
    encode_date_and_time, naive_date_to_s7_date, naive_time_to_tod, s5time_to_duration,
    s7_date_to_naive_date, s7_epoch, s7_time_to_duration, tod_to_naive_time, S5TIME_MAX_MS,
    TOD_MAX_MS,
};
