//! CRC-8 checksum used by the envelope wire format.
//!
//! The polynomial is given in the shifted 16-bit form `0x1070 << 3`, the same
//! formulation as the SMBus packet-error-code. Processing one byte shifts it
//! into the high half of a 16-bit register and reduces eight times. This is
//! CRC-8 with generator `x^8 + x^2 + x + 1` (0x07), initial value 0, no
//! reflection and no final xor.
//!
//! ```
//! use wisp_transport::crc8;
//!
//! assert_eq!(crc8(b"123456789"), 0xF4);
//! ```

/// Generator polynomial in the 16-bit shifted form.
pub const POLYNOMIAL: u16 = 0x1070 << 3;

/// Precomputed lookup table (256 entries), generated at compile time.
const CRC8_TABLE: [u8; 256] = generate_table();

const fn reduce(mut data: u16) -> u8 {
    let mut i = 0;
    while i < 8 {
        if data & 0x8000 != 0 {
            data ^= POLYNOMIAL;
        }
        data <<= 1;
        i += 1;
    }
    (data >> 8) as u8
}

const fn generate_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = reduce((i as u16) << 8);
        i += 1;
    }
    table
}

/// Computes the CRC-8 of `data` in one shot.
pub fn crc8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |crc, &byte| CRC8_TABLE[usize::from(crc ^ byte)])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bit-at-a-time reference, straight from the polynomial definition.
    fn crc8_bitwise(data: &[u8]) -> u8 {
        data.iter()
            .fold(0u8, |crc, &byte| reduce(u16::from(crc ^ byte) << 8))
    }

    #[test]
    fn test_check_value() {
        assert_eq!(crc8(b"123456789"), 0xF4);
    }

    #[test]
    fn test_empty_input_is_zero() {
        assert_eq!(crc8(&[]), 0);
    }

    #[test]
    fn test_table_matches_bitwise() {
        let data: Vec<u8> = (0..=255u8).chain((0..=255u8).rev()).collect();
        assert_eq!(crc8(&data), crc8_bitwise(&data));
        assert_eq!(crc8(b"hello"), 0x92);
    }

    #[test]
    fn test_single_bit_flips_change_checksum() {
        let original = b"wisp envelope payload".to_vec();
        let expected = crc8(&original);
        for byte in 0..original.len() {
            for bit in 0..8 {
                let mut corrupted = original.clone();
                corrupted[byte] ^= 1 << bit;
                assert_ne!(crc8(&corrupted), expected, "flip at {byte}:{bit}");
            }
        }
    }
}
