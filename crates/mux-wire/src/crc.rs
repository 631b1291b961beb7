//! CRC algorithms used on the wire.
//!
//! The byte-stream frame carrier uses CRC-16/CCITT-FALSE (matches
//! `boost::crc_ccitt_type` in the original). The telemetry log uses
//! CRC-32/ISO-HDLC (matches `boost::crc_32_type`).

use crc::{Crc, CRC_16_IBM_3740, CRC_32_ISO_HDLC};

static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);
static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-16/CCITT-FALSE over `data`.
pub fn crc16_ccitt_false(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// CRC-32/ISO-HDLC over `data`.
pub fn crc32_ieee(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ccitt_false_check_value() {
        // The standard CRC-16/CCITT-FALSE check value for ASCII "123456789".
        assert_eq!(crc16_ccitt_false(b"123456789"), 0x29B1);
    }

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32_ieee(b"123456789"), 0xCBF4_3926);
    }
}
