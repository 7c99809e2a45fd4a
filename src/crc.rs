//! CRC and checksum utilities used by C12.18 framing (spec §4.1).

use crc::{Crc, CRC_16_XMODEM};

/// The CCITT-style CRC16 algorithm C12.18 frames are checksummed with:
/// polynomial 0x1021, initial value 0, no input/output reflection, no final
/// XOR. Must stay bit-exact so that real meters accept our frames and ACK.
static C1218_CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Computes the 16-bit CRC over `bytes` (everything from the start byte
/// through the payload, per spec §3).
pub fn crc16(bytes: &[u8]) -> u16 {
    C1218_CRC16.checksum(bytes)
}

/// Additive two's-complement checksum of `bytes`, modulo 256. Used by
/// table-read responses (spec §3, §4.1).
pub fn data_checksum(bytes: &[u8]) -> u8 {
    let sum: u8 = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    sum.wrapping_neg()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_is_zero_for_empty_input() {
        assert_eq!(crc16(&[]), 0);
    }

    #[test]
    fn crc16_matches_known_xmodem_check_value() {
        // The `crc` crate's own XMODEM catalog check value for ASCII "123456789".
        assert_eq!(crc16(b"123456789"), 0x31C3);
    }

    #[test]
    fn data_checksum_is_twos_complement_of_sum() {
        let payload = [0x01u8, 0x02, 0x03];
        let chk = data_checksum(&payload);
        let sum: u8 = payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        assert_eq!(sum.wrapping_add(chk), 0);
    }

    #[test]
    fn data_checksum_of_empty_is_zero() {
        assert_eq!(data_checksum(&[]), 0);
    }
}
