//! The 8-bit frame check value appended to every command frame.
//!
//! This is the reflected CRC-8 with polynomial `0x31` (written reflected as
//! `0x8C`, decimal 140), initial value zero and no final xor. Input bits are
//! consumed least-significant first, one byte at a time.

/// Reflected polynomial constant
const POLYNOMIAL: u8 = 140;

/// Compute the checksum of `bytes`.
///
/// The function is pure; checking received frames is the device's job, the
/// host only ever authors them.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |crc, &byte| {
        let mut crc = crc;
        let mut extract = byte;
        for _ in 0..8 {
            let sum = (crc ^ extract) & 0x01;
            crc >>= 1;
            if sum != 0 {
                crc ^= POLYNOMIAL;
            }
            extract >>= 1;
        }
        crc
    })
}
