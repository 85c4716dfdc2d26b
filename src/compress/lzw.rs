//! StuffIt's LZW variant: the classic Unix-compress decoder with codes
//! growing from 9 to at most 13 bits, packed LSB-first, and code 256
//! reserved as the dictionary reset.

use crate::{Error, Result};
use bitstream_io::{BitReader, LittleEndian};

const CLEAR: u16 = 256;
const FIRST_FREE: u16 = 257;
const MIN_WIDTH: u32 = 9;
const MAX_WIDTH: u32 = 13;
const TABLE_SIZE: usize = 1 << MAX_WIDTH;

struct Dictionary {
    // entry i (i >= 257): prefix code and suffix byte
    prefixes: Vec<u16>,
    suffixes: Vec<u8>,
    next: u16,
    width: u32,
}

impl Dictionary {
    fn new() -> Self {
        Self {
            prefixes: Vec::with_capacity(TABLE_SIZE - usize::from(FIRST_FREE)),
            suffixes: Vec::with_capacity(TABLE_SIZE - usize::from(FIRST_FREE)),
            next: FIRST_FREE,
            width: MIN_WIDTH,
        }
    }

    fn reset(&mut self) {
        self.prefixes.clear();
        self.suffixes.clear();
        self.next = FIRST_FREE;
        self.width = MIN_WIDTH;
    }

    fn add(&mut self, prefix: u16, suffix: u8) {
        if usize::from(self.next) == TABLE_SIZE {
            return;
        }
        self.prefixes.push(prefix);
        self.suffixes.push(suffix);
        self.next += 1;
        if u32::from(self.next) == 1 << self.width && self.width < MAX_WIDTH {
            self.width += 1;
        }
    }

    /// First byte of the string a code expands to.
    fn first_byte(&self, mut code: u16) -> u8 {
        while code >= FIRST_FREE {
            code = self.prefixes[usize::from(code - FIRST_FREE)];
        }
        code as u8
    }

    /// Expands a code onto `out`, most recent byte first unwound via stack.
    fn expand(&self, mut code: u16, out: &mut Vec<u8>, stack: &mut Vec<u8>) {
        stack.clear();
        while code >= FIRST_FREE {
            let index = usize::from(code - FIRST_FREE);
            stack.push(self.suffixes[index]);
            code = self.prefixes[index];
        }
        out.push(code as u8);
        while let Some(byte) = stack.pop() {
            out.push(byte);
        }
    }
}

pub(crate) fn decode(component: &'static str, input: &[u8], out_len: usize) -> Result<Vec<u8>> {
    let mut bits = BitReader::endian(input, LittleEndian);
    let mut dict = Dictionary::new();
    let mut out = Vec::with_capacity(out_len);
    let mut stack = Vec::new();
    let mut prev: Option<u16> = None;

    while out.len() < out_len {
        let code: u16 = bits
            .read(dict.width)
            .map_err(|_| Error::Truncated(component))?;
        if code == CLEAR {
            dict.reset();
            prev = None;
            continue;
        }
        if code > dict.next || (code == dict.next && prev.is_none()) {
            return Err(Error::corrupt(
                component,
                format!("LZW code {} outside dictionary", code),
            ));
        }
        if let Some(prev) = prev {
            // when code == next this defines the entry the encoder emitted
            // one step ahead of us; its first byte is prev's first byte
            let first = if code == dict.next {
                dict.first_byte(prev)
            } else {
                dict.first_byte(code)
            };
            dict.add(prev, first);
        }
        dict.expand(code, &mut out, &mut stack);
        prev = Some(code);
    }

    if out.len() != out_len {
        return Err(Error::corrupt(
            component,
            format!("LZW produced {} bytes, expected {}", out.len(), out_len),
        ));
    }
    Ok(out)
}
