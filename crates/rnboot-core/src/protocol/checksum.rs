//! Local checksum calculation matching what the bootloader reports.

use byteorder::{ByteOrder, LittleEndian};

use super::constants::CONFIG_ROW_LENGTH;

/// Writable bits of CONFIG1..CONFIG7, from table 24-1 of the PIC18LF46K22
/// datasheet. Bits outside the masks read back as undefined.
pub const CONFIG_WORD_MASKS: [u16; 7] = [0xFF00, 0x3F1F, 0xBF00, 0x00C5, 0xC00F, 0xE00F, 0x400F];

/// Sum of little-endian 16-bit words, modulo 2^16. An odd trailing byte is
/// paired with a 0xFF high byte (erased flash).
pub fn calc_checksum(data: &[u8]) -> u16 {
    data.chunks(2).fold(0u16, |sum, pair| {
        let word = match pair {
            [lo, hi] => u16::from_le_bytes([*lo, *hi]),
            [lo] => u16::from_le_bytes([*lo, 0xFF]),
            _ => 0,
        };
        sum.wrapping_add(word)
    })
}

/// Checksum of the configuration row, with each word masked to its
/// writable bits before summing.
pub fn calc_config_checksum(data: &[u8; CONFIG_ROW_LENGTH]) -> u16 {
    data.chunks_exact(2)
        .zip(CONFIG_WORD_MASKS)
        .fold(0u16, |sum, (word, mask)| {
            sum.wrapping_add(LittleEndian::read_u16(word) & mask)
        })
}
