//! StuffIt's static Huffman method: a canonical code over raw bytes, with
//! an RLE-90 pass over the decoded stream. The fork opens with 256 5-bit
//! code lengths (zero marks an absent symbol); codes are assigned
//! canonically in (length, symbol) order and read MSB-first.

use super::rle90;
use crate::{Error, Result};
use bitstream_io::{BigEndian, BitReader};
use std::io::{self, Read};

const MAX_LENGTH: usize = 31;

pub(crate) struct Canonical {
    // per code length: first canonical code, index of its first symbol
    first_code: [u32; MAX_LENGTH + 1],
    first_index: [usize; MAX_LENGTH + 1],
    counts: [usize; MAX_LENGTH + 1],
    symbols: Vec<u8>,
}

impl Canonical {
    pub(crate) fn from_lengths(component: &'static str, lengths: &[u8; 256]) -> Result<Self> {
        let mut counts = [0_usize; MAX_LENGTH + 1];
        for &len in lengths.iter() {
            counts[usize::from(len)] += 1;
        }
        counts[0] = 0;

        // canonical numbering, with an over-subscription check
        let mut first_code = [0_u32; MAX_LENGTH + 1];
        let mut code = 0_u32;
        for len in 1..=MAX_LENGTH {
            code = (code + counts[len - 1] as u32) << 1;
            first_code[len] = code;
            if code + counts[len] as u32 > 1 << len {
                return Err(Error::corrupt(component, "over-subscribed Huffman code"));
            }
        }

        let mut first_index = [0_usize; MAX_LENGTH + 1];
        let mut index = 0;
        for len in 1..=MAX_LENGTH {
            first_index[len] = index;
            index += counts[len];
        }

        let mut symbols = vec![0; index];
        let mut next = first_index;
        for (symbol, &len) in lengths.iter().enumerate() {
            if len > 0 {
                symbols[next[usize::from(len)]] = symbol as u8;
                next[usize::from(len)] += 1;
            }
        }

        Ok(Self {
            first_code,
            first_index,
            counts,
            symbols,
        })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub(crate) fn decode_symbol<R: Read>(
        &self,
        component: &'static str,
        bits: &mut BitReader<R, BigEndian>,
    ) -> Result<u8> {
        let mut acc = 0_u32;
        for len in 1..=MAX_LENGTH {
            acc = (acc << 1)
                | u32::from(bits.read_bit().map_err(|_| Error::Truncated(component))?);
            let offset = acc.wrapping_sub(self.first_code[len]);
            if (offset as usize) < self.counts[len] {
                return Ok(self.symbols[self.first_index[len] + offset as usize]);
            }
        }
        Err(Error::corrupt(component, "invalid Huffman code"))
    }
}

/// `io::Read` over the Huffman-decoded byte stream, feeding the RLE pass.
struct SymbolReader<'a> {
    component: &'static str,
    code: &'a Canonical,
    bits: BitReader<&'a [u8], BigEndian>,
}

impl Read for SymbolReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        for (filled, slot) in buf.iter_mut().enumerate() {
            match self.code.decode_symbol(self.component, &mut self.bits) {
                Ok(symbol) => *slot = symbol,
                Err(Error::Truncated(_)) => return Ok(filled),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(buf.len())
    }
}

pub(crate) fn decode(component: &'static str, input: &[u8], out_len: usize) -> Result<Vec<u8>> {
    let mut bits = BitReader::endian(input, BigEndian);
    let mut lengths = [0_u8; 256];
    for len in lengths.iter_mut() {
        *len = bits.read(5).map_err(|_| Error::Truncated(component))?;
    }
    let code = Canonical::from_lengths(component, &lengths)?;
    if code.is_empty() {
        return if out_len == 0 {
            Ok(Vec::new())
        } else {
            Err(Error::corrupt(component, "empty Huffman table"))
        };
    }

    let symbols = SymbolReader {
        component,
        code: &code,
        bits,
    };
    let mut out = Vec::with_capacity(out_len);
    let mut rle = rle90::Reader::new(component, symbols);
    let mut chunk = [0; 512];
    while out.len() < out_len {
        let want = chunk.len().min(out_len - out.len());
        let n = rle.read(&mut chunk[..want]).map_err(Error::from_io)?;
        if n == 0 {
            return Err(Error::Truncated(component));
        }
        out.extend_from_slice(&chunk[..n]);
    }
    Ok(out)
}
