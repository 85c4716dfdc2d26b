//! The StuffIt "arsenic" family: an adaptive order-0 arithmetic coder,
//! optionally fed through Burrows-Wheeler + move-to-front preprocessing.
//!
//! The stream opens with a raw two-byte `As` tag and a flags byte (bit 0:
//! BWT+MTF in use). Without BWT the payload is the arithmetic-coded bytes
//! themselves. With BWT the payload is a sequence of blocks, each a 24-bit
//! length (zero terminates), a 24-bit transform index, and the MTF-coded
//! last column; both the lengths and the column bytes run through the same
//! adaptive byte model. The coder is the classic 16-bit incremental
//! arithmetic coder with underflow handling at the quarter marks.

use crate::{Error, Result};
use bitstream_io::{BigEndian, BitReader};

const TAG: [u8; 2] = *b"As";
const FLAG_BWT: u8 = 0x01;

const TOP: u32 = 0xffff;
const FIRST_QTR: u32 = 0x4000;
const HALF: u32 = 0x8000;
const THIRD_QTR: u32 = 0xc000;

const INCREMENT: u32 = 8;
const MAX_TOTAL: u32 = 0x3fff;

/// Adaptive order-0 frequency model over the byte alphabet.
struct Model {
    freq: [u32; 256],
    total: u32,
}

impl Model {
    fn new() -> Self {
        Self {
            freq: [1; 256],
            total: 256,
        }
    }

    /// Symbol whose cumulative range contains `value`, with that range.
    fn lookup(&self, value: u32) -> (u8, u32, u32) {
        let mut low = 0;
        for (symbol, &freq) in self.freq.iter().enumerate() {
            if value < low + freq {
                return (symbol as u8, low, low + freq);
            }
            low += freq;
        }
        unreachable!("value below total by construction")
    }

    fn range(&self, symbol: u8) -> (u32, u32) {
        let low: u32 = self.freq[..usize::from(symbol)].iter().sum();
        (low, low + self.freq[usize::from(symbol)])
    }

    fn update(&mut self, symbol: u8) {
        self.freq[usize::from(symbol)] += INCREMENT;
        self.total += INCREMENT;
        if self.total > MAX_TOTAL {
            self.total = 0;
            for freq in self.freq.iter_mut() {
                *freq = (*freq + 1) / 2;
                self.total += *freq;
            }
        }
    }
}

struct Decoder<'a> {
    bits: BitReader<&'a [u8], BigEndian>,
    low: u32,
    high: u32,
    code: u32,
}

impl<'a> Decoder<'a> {
    fn new(mut bits: BitReader<&'a [u8], BigEndian>) -> Self {
        let mut code = 0;
        for _ in 0..16 {
            code = (code << 1) | next_bit(&mut bits);
        }
        Self {
            bits,
            low: 0,
            high: TOP,
            code,
        }
    }

    fn decode(&mut self, model: &mut Model) -> u8 {
        let range = self.high - self.low + 1;
        let value = ((self.code - self.low + 1) * model.total - 1) / range;
        let (symbol, cum_low, cum_high) = model.lookup(value);
        self.high = self.low + range * cum_high / model.total - 1;
        self.low += range * cum_low / model.total;
        loop {
            if self.high < HALF {
                // nothing to subtract
            } else if self.low >= HALF {
                self.low -= HALF;
                self.high -= HALF;
                self.code -= HALF;
            } else if self.low >= FIRST_QTR && self.high < THIRD_QTR {
                self.low -= FIRST_QTR;
                self.high -= FIRST_QTR;
                self.code -= FIRST_QTR;
            } else {
                break;
            }
            self.low <<= 1;
            self.high = (self.high << 1) | 1;
            self.code = (self.code << 1) | next_bit(&mut self.bits);
        }
        model.update(symbol);
        symbol
    }

    fn decode_u24(&mut self, model: &mut Model) -> u32 {
        let mut value = 0;
        for _ in 0..3 {
            value = (value << 8) | u32::from(self.decode(model));
        }
        value
    }
}

/// Exhausted input pads with zero bits, like the original coder.
fn next_bit(bits: &mut BitReader<&[u8], BigEndian>) -> u32 {
    match bits.read_bit() {
        Ok(bit) => u32::from(bit),
        Err(_) => 0,
    }
}

fn mtf_decode(symbols: &[u8]) -> Vec<u8> {
    let mut table: Vec<u8> = (0..=255).collect();
    let mut out = Vec::with_capacity(symbols.len());
    for &symbol in symbols {
        let value = table.remove(usize::from(symbol));
        out.push(value);
        table.insert(0, value);
    }
    out
}

fn bwt_inverse(component: &'static str, last: &[u8], index: usize) -> Result<Vec<u8>> {
    let n = last.len();
    if index >= n {
        return Err(Error::corrupt(component, "transform index outside block"));
    }

    // rank of each byte among equal bytes before it, and the first row of
    // the sorted column holding each byte value
    let mut seen = [0_usize; 256];
    let mut ranks = vec![0_usize; n];
    for (i, &byte) in last.iter().enumerate() {
        ranks[i] = seen[usize::from(byte)];
        seen[usize::from(byte)] += 1;
    }
    let mut first_row = [0_usize; 256];
    let mut row = 0;
    for value in 0..256 {
        first_row[value] = row;
        row += seen[value];
    }

    let mut out = vec![0; n];
    let mut pos = index;
    for slot in out.iter_mut().rev() {
        *slot = last[pos];
        pos = first_row[usize::from(last[pos])] + ranks[pos];
    }
    Ok(out)
}

pub(crate) fn decode(component: &'static str, input: &[u8], out_len: usize) -> Result<Vec<u8>> {
    let mut bits = BitReader::endian(input, BigEndian);
    let mut tag = [0_u8; 2];
    for byte in tag.iter_mut() {
        *byte = bits.read(8).map_err(|_| Error::Truncated(component))?;
    }
    if tag != TAG {
        return Err(Error::corrupt(component, "bad arsenic stream tag"));
    }
    let flags: u8 = bits.read(8).map_err(|_| Error::Truncated(component))?;

    let mut decoder = Decoder::new(bits);
    let mut model = Model::new();
    let mut out = Vec::with_capacity(out_len);

    if flags & FLAG_BWT == 0 {
        for _ in 0..out_len {
            out.push(decoder.decode(&mut model));
        }
    } else {
        loop {
            let block_len = decoder.decode_u24(&mut model) as usize;
            if block_len == 0 {
                break;
            }
            let index = decoder.decode_u24(&mut model) as usize;
            if out.len() + block_len > out_len {
                return Err(Error::corrupt(
                    component,
                    format!("blocks exceed the expected {} bytes", out_len),
                ));
            }
            let mut symbols = Vec::with_capacity(block_len);
            for _ in 0..block_len {
                symbols.push(decoder.decode(&mut model));
            }
            out.extend_from_slice(&bwt_inverse(component, &mtf_decode(&symbols), index)?);
        }
        if out.len() != out_len {
            return Err(Error::corrupt(
                component,
                format!("arsenic produced {} bytes, expected {}", out.len(), out_len),
            ));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitstream_io::{BitWriter, BigEndian as BE};

    struct Encoder {
        writer: BitWriter<Vec<u8>, BE>,
        low: u32,
        high: u32,
        pending: u32,
    }

    impl Encoder {
        fn new(flags: u8) -> Self {
            let mut writer = BitWriter::endian(Vec::new(), BE);
            writer.write(8, u32::from(TAG[0])).unwrap();
            writer.write(8, u32::from(TAG[1])).unwrap();
            writer.write(8, u32::from(flags)).unwrap();
            Self {
                writer,
                low: 0,
                high: TOP,
                pending: 0,
            }
        }

        fn emit(&mut self, bit: u32) {
            self.writer.write_bit(bit != 0).unwrap();
            while self.pending > 0 {
                self.writer.write_bit(bit == 0).unwrap();
                self.pending -= 1;
            }
        }

        fn encode(&mut self, model: &mut Model, symbol: u8) {
            let range = self.high - self.low + 1;
            let (cum_low, cum_high) = model.range(symbol);
            self.high = self.low + range * cum_high / model.total - 1;
            self.low += range * cum_low / model.total;
            loop {
                if self.high < HALF {
                    self.emit(0);
                } else if self.low >= HALF {
                    self.emit(1);
                    self.low -= HALF;
                    self.high -= HALF;
                } else if self.low >= FIRST_QTR && self.high < THIRD_QTR {
                    self.pending += 1;
                    self.low -= FIRST_QTR;
                    self.high -= FIRST_QTR;
                } else {
                    break;
                }
                self.low <<= 1;
                self.high = (self.high << 1) | 1;
            }
            model.update(symbol);
        }

        fn encode_u24(&mut self, model: &mut Model, value: u32) {
            for shift in &[16, 8, 0] {
                self.encode(model, (value >> shift) as u8);
            }
        }

        fn finish(mut self) -> Vec<u8> {
            self.pending += 1;
            if self.low < FIRST_QTR {
                self.emit(0);
            } else {
                self.emit(1);
            }
            self.writer.byte_align().unwrap();
            self.writer.into_writer()
        }
    }

    fn mtf_encode(data: &[u8]) -> Vec<u8> {
        let mut table: Vec<u8> = (0..=255).collect();
        let mut out = Vec::with_capacity(data.len());
        for &byte in data {
            let index = table.iter().position(|&v| v == byte).unwrap();
            out.push(index as u8);
            let value = table.remove(index);
            table.insert(0, value);
        }
        out
    }

    fn bwt_forward(data: &[u8]) -> (Vec<u8>, usize) {
        let n = data.len();
        let mut rows: Vec<usize> = (0..n).collect();
        rows.sort_by(|&a, &b| {
            (0..n)
                .map(|i| data[(a + i) % n])
                .cmp((0..n).map(|i| data[(b + i) % n]))
        });
        let last = rows.iter().map(|&r| data[(r + n - 1) % n]).collect();
        let index = rows.iter().position(|&r| r == 0).unwrap();
        (last, index)
    }

    fn encode_plain(data: &[u8]) -> Vec<u8> {
        let mut encoder = Encoder::new(0);
        let mut model = Model::new();
        for &byte in data {
            encoder.encode(&mut model, byte);
        }
        encoder.finish()
    }

    fn encode_bwt(data: &[u8], block_size: usize) -> Vec<u8> {
        let mut encoder = Encoder::new(FLAG_BWT);
        let mut model = Model::new();
        for block in data.chunks(block_size) {
            let (last, index) = bwt_forward(block);
            encoder.encode_u24(&mut model, block.len() as u32);
            encoder.encode_u24(&mut model, index as u32);
            for &symbol in &mtf_encode(&last) {
                encoder.encode(&mut model, symbol);
            }
        }
        encoder.encode_u24(&mut model, 0);
        encoder.finish()
    }

    #[test]
    fn bwt_inverse_known_block() {
        let (last, index) = bwt_forward(b"banana");
        assert_eq!(bwt_inverse("test", &last, index).unwrap(), b"banana");
    }

    #[test]
    fn mtf_round_trip() {
        let data = b"abcabczzz";
        assert_eq!(mtf_decode(&mtf_encode(data)), data);
    }

    #[test]
    fn plain_stream() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let input = encode_plain(data);
        assert_eq!(decode("test", &input, data.len()).unwrap(), data.to_vec());
    }

    #[test]
    fn bwt_stream_multiple_blocks() {
        let mut data = Vec::new();
        for i in 0..600_u32 {
            data.push((i % 7) as u8 * 31);
        }
        let input = encode_bwt(&data, 256);
        assert_eq!(decode("test", &input, data.len()).unwrap(), data);
    }

    #[test]
    fn bad_tag_is_corrupt() {
        assert!(matches!(
            decode("test", b"Xs\x00\x00\x00", 1),
            Err(Error::Corrupt(..))
        ));
    }

    #[test]
    fn block_overrun_is_corrupt() {
        let data = [0x41_u8; 32];
        let input = encode_bwt(&data, 32);
        assert!(matches!(
            decode("test", &input, 16),
            Err(Error::Corrupt(..))
        ));
    }
}
