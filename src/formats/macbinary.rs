//! MacBinary I/II/III: a 128-byte header followed by the data fork and the
//! resource fork, each padded to a 128-byte boundary. Version III carries
//! an `mBIN` signature; II a header CRC; I is recognized by its zero
//! fields and plausible lengths only.

use crate::{
    crc,
    layer::{self, Advance, FileInfo, FinderFlags, ForkType, Layer, Prefetch},
    string::decode_mac_roman,
    Error, OsType, Result,
};
use byteorder::{BigEndian, ByteOrder};

const COMPONENT: &str = "bin";
const HEADER_SIZE: usize = 128;
const BLOCK_SIZE: u32 = 128;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Version {
    I,
    II,
    III,
}

/// The recognition ladder over a raw 128-byte header.
fn recognize(header: &[u8; HEADER_SIZE]) -> Option<Version> {
    if header[0] != 0 || header[74] != 0 {
        return None;
    }
    if header[1] < 1 || header[1] > 63 {
        return None;
    }

    if &header[102..106] == b"mBIN" {
        return Some(Version::III);
    }

    // some MacBinary II encoders left the checksum empty, so a matching
    // nonzero checksum is a true positive and zero falls through to the
    // version bytes
    let stored = BigEndian::read_u16(&header[124..126]);
    if stored != 0 && crc::checksum(&header[0..124]) == stored {
        return Some(Version::II);
    }
    if stored == 0 && header[122] == 129 && header[123] == 129 {
        return Some(Version::II);
    }

    if header[82] != 0 {
        return None;
    }
    for &byte in &header[101..=125] {
        if byte != 0 {
            return None;
        }
    }
    let data_len = BigEndian::read_u32(&header[83..87]);
    let rsrc_len = BigEndian::read_u32(&header[87..91]);
    if data_len > 0x7f_ffff || rsrc_len > 0x7f_ffff || (data_len == 0 && rsrc_len == 0) {
        return None;
    }
    Some(Version::I)
}

#[derive(Clone, Copy, PartialEq)]
enum Position {
    Start,
    InFork(ForkType),
    Done,
}

pub struct MacBinaryLayer {
    input: Box<dyn Layer>,
    name: String,
    file_type: OsType,
    creator: OsType,
    finder_flags: FinderFlags,
    data_len: u32,
    rsrc_len: u32,
    position: Position,
    remaining: u32,
    poisoned: bool,
}

impl MacBinaryLayer {
    pub fn new(mut input: Box<dyn Layer>) -> Result<Self> {
        if input.open(Advance::First)?.is_none() {
            return Err(Error::Truncated(COMPONENT));
        }
        let mut header = [0; HEADER_SIZE];
        layer::read_full(input.as_mut(), &mut header, COMPONENT)?;

        let version = recognize(&header)
            .ok_or_else(|| Error::corrupt(COMPONENT, "not a MacBinary header"))?;

        // version II adds a secondary header, aligned to the block size
        if version != Version::I {
            let secondary = u32::from(BigEndian::read_u16(&header[120..122]));
            if secondary > 0 {
                layer::drain(input.as_mut(), u64::from(align(secondary)), COMPONENT)?;
            }
        }

        let name_len = usize::from(header[1]);
        let finder_flags = (u16::from(header[73]) << 8) | u16::from(header[101]);
        Ok(Self {
            input,
            name: decode_mac_roman(&header[2..2 + name_len]),
            file_type: OsType::from_bytes(&header[65..69]),
            creator: OsType::from_bytes(&header[69..73]),
            finder_flags: FinderFlags::from_bits_truncate(finder_flags),
            data_len: BigEndian::read_u32(&header[83..87]),
            rsrc_len: BigEndian::read_u32(&header[87..91]),
            position: Position::Start,
            remaining: 0,
            poisoned: false,
        })
    }

    pub(crate) fn sniff(input: &mut Prefetch) -> Result<bool> {
        let head = crate::detect::peek(input, HEADER_SIZE)?;
        if head.len() < HEADER_SIZE {
            return Ok(false);
        }
        let mut header = [0; HEADER_SIZE];
        header.copy_from_slice(&head);
        Ok(recognize(&header).is_some())
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

    fn open_inner(&mut self, advance: Advance) -> Result<Option<FileInfo>> {
        match advance {
            Advance::First => {
                if self.position != Position::Start {
                    return Err(Error::Usage("open(FIRST) after iteration began"));
                }
                self.position = Position::InFork(ForkType::Data);
                self.remaining = self.data_len;
                Ok(Some(self.info(ForkType::Data, self.data_len)))
            }
            Advance::Next => match self.position {
                Position::Start => Err(Error::Usage("open(NEXT) before open(FIRST)")),
                Position::Done => Ok(None),
                Position::InFork(fork) => {
                    // leftover fork bytes plus block padding are discarded
                    let fork_len = match fork {
                        ForkType::Data => self.data_len,
                        ForkType::Resource => self.rsrc_len,
                    };
                    let padding = align(fork_len) - fork_len;
                    let skip = u64::from(self.remaining) + u64::from(padding);
                    if skip > 0 {
                        layer::drain(self.input.as_mut(), skip, COMPONENT)?;
                    }
                    self.remaining = 0;
                    if fork == ForkType::Data && self.rsrc_len > 0 {
                        self.position = Position::InFork(ForkType::Resource);
                        self.remaining = self.rsrc_len;
                        Ok(Some(self.info(ForkType::Resource, self.rsrc_len)))
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
                    return Ok(0);
                }
                let want = buf.len().min(self.remaining as usize);
                let n = self.input.read(&mut buf[..want])?;
                if n == 0 {
                    return Err(Error::Truncated(COMPONENT));
                }
                self.remaining -= n as u32;
                Ok(n)
            }
        }
    }
}

impl Layer for MacBinaryLayer {
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

#[inline]
fn align(n: u32) -> u32 {
    (n + (BLOCK_SIZE - 1)) & !(BLOCK_SIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::MemLayer;

    pub(crate) fn build_header(name: &str, data_len: u32, rsrc_len: u32) -> [u8; HEADER_SIZE] {
        let mut header = [0; HEADER_SIZE];
        header[1] = name.len() as u8;
        header[2..2 + name.len()].copy_from_slice(name.as_bytes());
        header[65..69].copy_from_slice(b"TEXT");
        header[69..73].copy_from_slice(b"ttxt");
        header[83..87].copy_from_slice(&data_len.to_be_bytes());
        header[87..91].copy_from_slice(&rsrc_len.to_be_bytes());
        header[122] = 129;
        header[123] = 129;
        let crc = crc::checksum(&header[0..124]);
        header[124..126].copy_from_slice(&crc.to_be_bytes());
        header
    }

    pub(crate) fn build(name: &str, data: &[u8], rsrc: &[u8]) -> Vec<u8> {
        let mut out = build_header(name, data.len() as u32, rsrc.len() as u32).to_vec();
        out.extend_from_slice(data);
        out.resize(HEADER_SIZE + align(data.len() as u32) as usize, 0);
        out.extend_from_slice(rsrc);
        let total = out.len();
        out.resize(total + (align(rsrc.len() as u32) as usize - rsrc.len()), 0);
        out
    }

    #[test]
    fn recognizes_version_ii_crc() {
        let header = build_header("test", 4, 0);
        assert_eq!(recognize(&header), Some(Version::II));
    }

    #[test]
    fn rejects_nonzero_magic_bytes() {
        let mut header = build_header("test", 4, 0);
        header[0] = 1;
        assert_eq!(recognize(&header), None);
    }

    #[test]
    fn recognizes_version_i_without_crc() {
        let mut header = build_header("old", 6, 0);
        header[122] = 0;
        header[123] = 0;
        header[124] = 0;
        header[125] = 0;
        assert_eq!(recognize(&header), Some(Version::I));
    }

    #[test]
    fn both_forks_in_order() {
        let archive = build("hello", b"hello world", b"rsrc bytes");
        let mut layer = MacBinaryLayer::new(Box::new(MemLayer::new(archive))).unwrap();

        let info = layer.open(Advance::First).unwrap().unwrap();
        assert_eq!(info.name, "hello");
        assert_eq!(info.fork, ForkType::Data);
        assert_eq!(info.len, 11);
        assert!(info.has_metadata);

        let mut data = [0; 11];
        layer::read_full(&mut layer, &mut data, "test").unwrap();
        assert_eq!(&data, b"hello world");

        let info = layer.open(Advance::Next).unwrap().unwrap();
        assert_eq!(info.fork, ForkType::Resource);
        assert_eq!(info.len, 10);
        let mut rsrc = [0; 10];
        layer::read_full(&mut layer, &mut rsrc, "test").unwrap();
        assert_eq!(&rsrc, b"rsrc bytes");

        assert!(layer.open(Advance::Next).unwrap().is_none());
    }

    #[test]
    fn next_discards_unread_fork_bytes() {
        let archive = build("hello", b"hello world", b"rr");
        let mut layer = MacBinaryLayer::new(Box::new(MemLayer::new(archive))).unwrap();
        layer.open(Advance::First).unwrap();
        let info = layer.open(Advance::Next).unwrap().unwrap();
        assert_eq!(info.fork, ForkType::Resource);
        let mut rsrc = [0; 2];
        layer::read_full(&mut layer, &mut rsrc, "test").unwrap();
        assert_eq!(&rsrc, b"rr");
    }
}
