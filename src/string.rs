use encoding::{all::MAC_ROMAN, DecoderTrap, Encoding};

/// Decodes a MacRoman byte string the way the Finder would have shown it.
pub(crate) fn decode_mac_roman(bytes: &[u8]) -> String {
    MAC_ROMAN
        .decode(bytes, DecoderTrap::Replace)
        .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned())
}
