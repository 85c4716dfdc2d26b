//! The Mac-era run-length scheme shared by BinHex, StuffIt and Compact
//! Pro: `0x90` marks a repeat of the previously emitted byte. A count of
//! zero is an escaped literal `0x90`; a count of N repeats the previous
//! byte N-1 more times.

use crate::{Error, Result};
use std::io::{self, Read};

const MARKER: u8 = 0x90;

/// Streaming RLE-90 decoder over any byte source.
pub(crate) struct Reader<R: Read> {
    inner: R,
    component: &'static str,
    last: Option<u8>,
    pending: u32,
}

impl<R: Read> Reader<R> {
    pub(crate) fn new(component: &'static str, inner: R) -> Self {
        Self {
            inner,
            component,
            last: None,
            pending: 0,
        }
    }

    fn next_input_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

impl<R: Read> Read for Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.pending > 0 {
                // last is always set once a repeat is pending
                buf[filled] = self.last.unwrap();
                self.pending -= 1;
                filled += 1;
                continue;
            }
            let byte = match self.next_input_byte()? {
                Some(b) => b,
                None => break,
            };
            if byte == MARKER {
                let count = self
                    .next_input_byte()?
                    .ok_or(Error::Truncated(self.component))?;
                if count == 0 {
                    buf[filled] = MARKER;
                    filled += 1;
                    self.last = Some(MARKER);
                } else if self.last.is_some() {
                    self.pending = u32::from(count) - 1;
                } else {
                    return Err(Error::corrupt(
                        self.component,
                        "repeat marker with no preceding byte",
                    )
                    .into());
                }
            } else {
                buf[filled] = byte;
                filled += 1;
                self.last = Some(byte);
            }
        }
        Ok(filled)
    }
}

/// Decodes a complete buffer, requiring exactly `out_len` output bytes.
pub(crate) fn decode(component: &'static str, input: &[u8], out_len: usize) -> Result<Vec<u8>> {
    let out = decode_to_end(component, input)?;
    if out.len() != out_len {
        return Err(Error::corrupt(
            component,
            format!("RLE produced {} bytes, expected {}", out.len(), out_len),
        ));
    }
    Ok(out)
}

/// Decodes a complete buffer until the input runs out.
pub(crate) fn decode_to_end(component: &'static str, input: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::new(component, input);
    let mut out = Vec::with_capacity(input.len());
    reader.read_to_end(&mut out).map_err(Error::from_io)?;
    Ok(out)
}
