pub(crate) mod arsenic;
pub(crate) mod huffman;
pub(crate) mod lzh;
pub(crate) mod lzw;
pub(crate) mod rle90;

use crate::{Error, Result};

/// StuffIt per-fork compression codes shared by the SIT and SIT5 layers.
pub(crate) const METHOD_STORE: u8 = 0;
pub(crate) const METHOD_RLE90: u8 = 1;
pub(crate) const METHOD_LZW: u8 = 2;
pub(crate) const METHOD_HUFFMAN: u8 = 3;

/// Decodes one fork: exactly `input.len()` compressed bytes in, exactly
/// `out_len` bytes out, or an error.
pub(crate) fn decode_fork(
    component: &'static str,
    method: u8,
    input: &[u8],
    out_len: usize,
) -> Result<Vec<u8>> {
    match method {
        METHOD_STORE => {
            if input.len() != out_len {
                return Err(Error::corrupt(
                    component,
                    format!("stored fork is {} bytes, expected {}", input.len(), out_len),
                ));
            }
            Ok(input.to_vec())
        }
        METHOD_RLE90 => rle90::decode(component, input, out_len),
        METHOD_LZW => lzw::decode(component, input, out_len),
        METHOD_HUFFMAN => huffman::decode(component, input, out_len),
        13 | 14 | 15 => arsenic::decode(component, input, out_len),
        method => Err(Error::Unsupported { component, method }),
    }
}
