//! BinHex 4.0: a binary payload framed in 7-bit ASCII. Everything before
//! the marker line is ignored; the payload sits between two colons as a
//! 64-character-alphabet 6-bit encoding, is RLE-90 compressed, and carries
//! a header, a data fork and a resource fork, each with a CRC-16 trailer.

use crate::{
    compress::rle90,
    crc::{self, Crc16},
    layer::{Advance, FileInfo, FinderFlags, ForkType, Layer, LayerReader, Prefetch},
    string::decode_mac_roman,
    Error, OsType, Result,
};
use byteorder::{BigEndian, ByteOrder};
use std::io::{self, Read};

const COMPONENT: &str = "hqx";
const MARKER: &[u8] = b"(This file must be converted with BinHex 4.0)";
const ALPHABET: &[u8; 64] = b"!\"#$%&'()*+,-012345689@ABCDEFGHIJKLMNPQRSTUVXYZ[`abcdefhijklmpqr";

/// How far into the stream the marker line may start.
const SCAN_LIMIT: usize = 64 * 1024;
const SNIFF_WINDOW: usize = 8192;

/// Decodes the 6-bit text region into bytes, stopping at the closing colon.
struct SixBit<R: Read> {
    inner: R,
    table: [u8; 256],
    acc: u32,
    nbits: u32,
    done: bool,
}

impl<R: Read> SixBit<R> {
    fn new(inner: R) -> Self {
        let mut table = [0xff_u8; 256];
        for (value, &ch) in ALPHABET.iter().enumerate() {
            table[usize::from(ch)] = value as u8;
        }
        Self {
            inner,
            table,
            acc: 0,
            nbits: 0,
            done: false,
        }
    }

    fn next_text_byte(&mut self) -> io::Result<Option<u8>> {
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

impl<R: Read> Read for SixBit<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        'outer: while filled < buf.len() {
            while self.nbits < 8 {
                if self.done {
                    break 'outer;
                }
                let byte = match self.next_text_byte()? {
                    Some(b) => b,
                    None => {
                        return Err(Error::corrupt(COMPONENT, "unterminated text block").into())
                    }
                };
                match byte {
                    b'\r' | b'\n' | b' ' => {}
                    b':' => self.done = true,
                    _ => {
                        let value = self.table[usize::from(byte)];
                        if value == 0xff {
                            return Err(Error::corrupt(
                                COMPONENT,
                                format!("byte {:#04x} outside the BinHex alphabet", byte),
                            )
                            .into());
                        }
                        self.acc = (self.acc << 6) | u32::from(value);
                        self.nbits += 6;
                    }
                }
            }
            if self.nbits >= 8 {
                self.nbits -= 8;
                buf[filled] = ((self.acc >> self.nbits) & 0xff) as u8;
                filled += 1;
            }
        }
        Ok(filled)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Position {
    Start,
    InFork(ForkType),
    Done,
}

pub struct HqxLayer {
    chain: rle90::Reader<SixBit<LayerReader>>,
    name: String,
    file_type: OsType,
    creator: OsType,
    finder_flags: FinderFlags,
    data_len: u32,
    rsrc_len: u32,
    position: Position,
    remaining: u32,
    verified: bool,
    digest: Crc16,
    poisoned: bool,
}

impl HqxLayer {
    pub fn new(mut input: Box<dyn Layer>) -> Result<Self> {
        if input.open(Advance::First)?.is_none() {
            return Err(Error::Truncated(COMPONENT));
        }
        scan_past_marker(input.as_mut())?;

        let mut chain = rle90::Reader::new(COMPONENT, SixBit::new(LayerReader::new(input)));

        // name length, name, version, type, creator, flags, lengths, CRC
        let mut header = Vec::with_capacity(26);
        header.resize(1, 0);
        read_exact(&mut chain, &mut header[0..1])?;
        let name_len = usize::from(header[0]);
        header.resize(1 + name_len + 21, 0);
        read_exact(&mut chain, &mut header[1..])?;

        let stored = BigEndian::read_u16(&header[header.len() - 2..]);
        let computed = crc::checksum(&header[..header.len() - 2]);
        if stored != computed {
            return Err(Error::Checksum {
                component: COMPONENT,
                stored,
                computed,
            });
        }

        let fields = &header[1 + name_len..];
        Ok(Self {
            chain,
            name: decode_mac_roman(&header[1..1 + name_len]),
            file_type: OsType::from_bytes(&fields[1..5]),
            creator: OsType::from_bytes(&fields[5..9]),
            finder_flags: FinderFlags::from_bits_truncate(BigEndian::read_u16(&fields[9..11])),
            data_len: BigEndian::read_u32(&fields[11..15]),
            rsrc_len: BigEndian::read_u32(&fields[15..19]),
            position: Position::Start,
            remaining: 0,
            verified: false,
            digest: crc::digest(),
            poisoned: false,
        })
    }

    pub(crate) fn sniff(input: &mut Prefetch) -> Result<bool> {
        let head = crate::detect::peek(input, SNIFF_WINDOW)?;
        Ok(head.windows(MARKER.len()).any(|w| w == MARKER))
    }

    fn info(&self, fork: ForkType, len: u32) -> FileInfo {
        FileInfo {
            name: self.name.clone(),
            file_type: self.file_type,
            creator: self.creator,
            finder_flags: self.finder_flags,
            fork,
            len,
            has_metadata: true,
        }
    }

    fn start_fork(&mut self, fork: ForkType, len: u32) -> Option<FileInfo> {
        self.position = Position::InFork(fork);
        self.remaining = len;
        self.verified = false;
        self.digest = crc::digest();
        Some(self.info(fork, len))
    }

    /// At fork end the stream carries the fork's CRC-16.
    fn verify_fork_crc(&mut self) -> Result<()> {
        if self.verified {
            return Ok(());
        }
        let mut trailer = [0; 2];
        read_exact(&mut self.chain, &mut trailer)?;
        let stored = BigEndian::read_u16(&trailer);
        let digest = std::mem::replace(&mut self.digest, crc::digest());
        let computed = digest.finalize();
        if stored != computed {
            return Err(Error::Checksum {
                component: COMPONENT,
                stored,
                computed,
            });
        }
        self.verified = true;
        Ok(())
    }

    fn open_inner(&mut self, advance: Advance) -> Result<Option<FileInfo>> {
        match advance {
            Advance::First => {
                if self.position != Position::Start {
                    return Err(Error::Usage("open(FIRST) after iteration began"));
                }
                Ok(self.start_fork(ForkType::Data, self.data_len))
            }
            Advance::Next => match self.position {
                Position::Start => Err(Error::Usage("open(NEXT) before open(FIRST)")),
                Position::Done => Ok(None),
                Position::InFork(fork) => {
                    let mut scratch = [0; 512];
                    while self.remaining > 0 {
                        self.read_inner(&mut scratch)?;
                    }
                    self.verify_fork_crc()?;
                    if fork == ForkType::Data && self.rsrc_len > 0 {
                        Ok(self.start_fork(ForkType::Resource, self.rsrc_len))
                    } else {
                        self.position = Position::Done;
                        Ok(None)
                    }
                }
            },
        }
    }

    fn read_inner(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.position {
            Position::Start => Err(Error::Usage("read before open")),
            Position::Done => Ok(0),
            Position::InFork(_) => {
                if self.remaining == 0 || buf.is_empty() {
                    if self.remaining == 0 {
                        self.verify_fork_crc()?;
                    }
                    return Ok(0);
                }
                let want = buf.len().min(self.remaining as usize);
                let n = self.chain.read(&mut buf[..want]).map_err(Error::from_io)?;
                if n == 0 {
                    return Err(Error::Truncated(COMPONENT));
                }
                self.digest.update(&buf[..n]);
                self.remaining -= n as u32;
                Ok(n)
            }
        }
    }
}

impl Layer for HqxLayer {
    fn open(&mut self, advance: Advance) -> Result<Option<FileInfo>> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        let result = self.open_inner(advance);
        if matches!(result, Err(ref e) if !matches!(e, Error::Usage(_))) {
            self.poisoned = true;
        }
        result
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        let result = self.read_inner(buf);
        if matches!(result, Err(ref e) if !matches!(e, Error::Usage(_))) {
            self.poisoned = true;
        }
        result
    }
}

/// Consumes input up to and including the opening colon of the text block.
fn scan_past_marker(input: &mut dyn Layer) -> Result<()> {
    let mut matched = 0;
    let mut scanned = 0;
    let mut byte = [0; 1];
    while matched < MARKER.len() {
        if scanned >= SCAN_LIMIT {
            return Err(Error::corrupt(COMPONENT, "marker line not found"));
        }
        if input.read(&mut byte)? == 0 {
            return Err(Error::corrupt(COMPONENT, "marker line not found"));
        }
        scanned += 1;
        if byte[0] == MARKER[matched] {
            matched += 1;
        } else {
            matched = usize::from(byte[0] == MARKER[0]);
        }
    }
    loop {
        if scanned >= SCAN_LIMIT {
            return Err(Error::corrupt(COMPONENT, "text block does not start"));
        }
        if input.read(&mut byte)? == 0 {
            return Err(Error::corrupt(COMPONENT, "text block does not start"));
        }
        scanned += 1;
        if byte[0] == b':' {
            return Ok(());
        }
    }
}

fn read_exact(reader: &mut impl Read, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).map_err(Error::from_io)?;
        if n == 0 {
            return Err(Error::Truncated(COMPONENT));
        }
        filled += n;
    }
    Ok(())
}
