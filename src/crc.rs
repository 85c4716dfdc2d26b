use crc::{Crc, Digest, CRC_16_XMODEM};

/// CRC-16/CCITT as BinHex, MacBinary, StuffIt and Compact Pro use it:
/// polynomial 0x1021, initial value 0, no reflection, no final xor. The
/// table-driven form already folds in the two zero bytes the original
/// bit-serial BinHex algorithm pushes through at the end.
pub static CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

pub type Crc16 = Digest<'static, u16>;

#[must_use]
pub fn digest() -> Crc16 {
    CCITT.digest()
}

#[must_use]
pub fn checksum(data: &[u8]) -> u16 {
    CCITT.checksum(data)
}
