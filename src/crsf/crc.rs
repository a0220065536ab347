//! # CRC8-DVB-S2 Implementation
//!
//! CRC-8-DVB-S2 checksum used by every CRSF frame.
//!
//! **Polynomial**: 0xD5 (x^8 + x^7 + x^6 + x^4 + x^2 + 1)
//! **Initial Value**: 0x00
//! **Final XOR**: none
//!
//! The checksum covers the frame type byte and the payload. The sync/address
//! byte and the length byte are not part of the checksum domain.

/// CRC-8-DVB-S2 polynomial
const CRC8_POLY: u8 = 0xD5;

/// Precomputed CRC8 lookup table
const CRC8_TABLE: [u8; 256] = generate_crc8_table();

/// Generate CRC8 lookup table at compile time
const fn generate_crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u8;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ CRC8_POLY;
            } else {
                crc <<= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Calculate the CRSF checksum of a byte span
///
/// # Arguments
///
/// * `data` - Frame type byte followed by the payload
///
/// # Examples
///
/// ```
/// use simlink::crsf::crc::crc8;
///
/// assert_eq!(crc8(b"123456789"), 0xBC);
/// ```
#[must_use]
pub fn crc8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |crc, &byte| CRC8_TABLE[(crc ^ byte) as usize])
}

/// Bitwise CRC8, kept as the reference the lookup table is checked against.
#[cfg(test)]
fn crc8_bitwise(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;

    for &byte in data {
        crc ^= byte;

        for _ in 0..8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ CRC8_POLY;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}
