//! Binary-coded decimal helpers.

/// Decodes one BCD byte: high nibble tens, low nibble ones.
///
/// Nibbles above 9 are not rejected; they contribute their raw value.
pub fn bcd_to_int(byte: u8) -> u8 {
    (byte >> 4) * 10 + (byte & 0x0F)
}

/// Encodes `value` (clamped to 0..=99) as one BCD byte.
pub fn int_to_bcd_byte(value: u8) -> u8 {
    let value = value.min(99);
    ((value / 10) << 4) | (value % 10)
}

/// Decodes the three BCD digits held in the low 12 bits of a word
/// (digit `i` at nibble `i`). The top nibble is ignored.
pub fn bcd_word_to_int(word: u16) -> u16 {
    let d0 = word & 0x000F;
    let d1 = (word >> 4) & 0x000F;
    let d2 = (word >> 8) & 0x000F;
    d2 * 100 + d1 * 10 + d0
}

/// Encodes `decimal` as three BCD digits in a 12-bit field, clamping to 0..=999.
pub fn int_to_bcd(decimal: i32) -> u16 {
    let value = decimal.clamp(0, 999) as u16;
    let d0 = value % 10;
    let d1 = (value / 10) % 10;
    let d2 = value / 100;
    (d2 << 8) | (d1 << 4) | d0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_bcd_byte() {
        assert_eq!(bcd_to_int(0x00), 0);
        assert_eq!(bcd_to_int(0x42), 42);
        assert_eq!(bcd_to_int(0x99), 99);
        assert_eq!(bcd_to_int(0x0F), 15);
    }

    #[test]
    fn counter_bytes_decode_to_literal_fixture() {
        // [0] = 250 (0xFA), [1] = 15 (0x0F): digits 0xA, 0x0, 0xF.
        let word = u16::from_be_bytes([250, 15]);
        assert_eq!(bcd_word_to_int(word), 1015);
    }

    #[test]
    fn int_to_bcd_clamps() {
        assert_eq!(int_to_bcd(-5), 0x000);
        assert_eq!(int_to_bcd(1234), 0x999);
        assert_eq!(int_to_bcd(507), 0x507);
        assert_eq!(int_to_bcd_byte(130), 0x99);
    }

    #[test]
    fn bcd_round_trip_for_every_valid_word() {
        for d2 in 0..10u16 {
            for d1 in 0..10u16 {
                for d0 in 0..10u16 {
                    let word = (d2 << 8) | (d1 << 4) | d0;
                    assert_eq!(int_to_bcd(bcd_word_to_int(word) as i32), word);
                }
            }
        }
    }

    #[test]
    fn byte_round_trip() {
        for value in 0..=99u8 {
            assert_eq!(bcd_to_int(int_to_bcd_byte(value)), value);
        }
    }
}
