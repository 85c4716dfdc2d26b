//! Classic StuffIt (v1) archives. A 22-byte container header is followed
//! by entries, each a 112-byte header with per-fork methods, sizes and
//! CRCs, then the compressed resource fork, then the compressed data
//! fork. Forks are surfaced data-first regardless of the on-disk order.

use crate::{
    compress,
    crc,
    layer::{self, Advance, FileInfo, FinderFlags, ForkType, Layer, Prefetch},
    string::decode_mac_roman,
    Error, OsType, Result,
};
use byteorder::{BigEndian, ByteOrder};
use std::collections::VecDeque;

const COMPONENT: &str = "sit";
const HEADER_SIZE: usize = 22;
const ENTRY_SIZE: usize = 112;
const MAGIC: &[u8; 4] = b"SIT!";
const SIGNATURE: &[u8; 4] = b"rLau";

/// Set on a method byte for the folder start/end markers.
const METHOD_FOLDER: u8 = 0x20;

struct PendingFork {
    info: FileInfo,
    method: u8,
    compressed: Vec<u8>,
    crc: u16,
}

pub struct SitLayer {
    input: Box<dyn Layer>,
    remaining_entries: u16,
    pending: VecDeque<PendingFork>,
    current: Option<(FileInfo, Vec<u8>, usize)>,
    started: bool,
    poisoned: bool,
}

impl SitLayer {
    pub fn new(mut input: Box<dyn Layer>) -> Result<Self> {
        if input.open(Advance::First)?.is_none() {
            return Err(Error::Truncated(COMPONENT));
        }
        let mut header = [0; HEADER_SIZE];
        layer::read_full(input.as_mut(), &mut header, COMPONENT)?;
        if &header[0..4] != MAGIC || &header[10..14] != SIGNATURE {
            return Err(Error::corrupt(COMPONENT, "not a StuffIt archive"));
        }
        let remaining_entries = BigEndian::read_u16(&header[4..6]);
        Ok(Self {
            input,
            remaining_entries,
            pending: VecDeque::new(),
            current: None,
            started: false,
            poisoned: false,
        })
    }

    pub(crate) fn sniff(input: &mut Prefetch) -> Result<bool> {
        let head = crate::detect::peek(input, 14)?;
        Ok(head.len() >= 14 && &head[0..4] == MAGIC && &head[10..14] == SIGNATURE)
    }

    /// Reads entry headers until one contributes forks, queuing them
    /// data-first. Folder markers are consumed without contributing.
    fn queue_next_entry(&mut self) -> Result<bool> {
        while self.remaining_entries > 0 {
            self.remaining_entries -= 1;

            let mut entry = [0; ENTRY_SIZE];
            layer::read_full(self.input.as_mut(), &mut entry, COMPONENT)?;

            let stored = BigEndian::read_u16(&entry[110..112]);
            let computed = crc::checksum(&entry[0..110]);
            if stored != computed {
                return Err(Error::Checksum {
                    component: COMPONENT,
                    stored,
                    computed,
                });
            }

            let rsrc_method = entry[0];
            let data_method = entry[1];
            let name_len = usize::from(entry[2]);
            if name_len > 63 {
                return Err(Error::corrupt(COMPONENT, "entry name longer than 63 bytes"));
            }
            let rsrc_uncomp = BigEndian::read_u32(&entry[84..88]);
            let data_uncomp = BigEndian::read_u32(&entry[88..92]);
            let rsrc_comp = BigEndian::read_u32(&entry[92..96]);
            let data_comp = BigEndian::read_u32(&entry[96..100]);

            if data_method & METHOD_FOLDER != 0 || rsrc_method & METHOD_FOLDER != 0 {
                continue;
            }

            let info = FileInfo {
                name: decode_mac_roman(&entry[3..3 + name_len]),
                file_type: OsType::from_bytes(&entry[66..70]),
                creator: OsType::from_bytes(&entry[70..74]),
                finder_flags: FinderFlags::from_bits_truncate(BigEndian::read_u16(
                    &entry[74..76],
                )),
                fork: ForkType::Data,
                len: 0,
                has_metadata: true,
            };

            // on disk the resource fork comes first; capture both so the
            // data fork can be surfaced first
            let mut rsrc_bytes = vec![0; rsrc_comp as usize];
            layer::read_full(self.input.as_mut(), &mut rsrc_bytes, COMPONENT)?;
            let mut data_bytes = vec![0; data_comp as usize];
            layer::read_full(self.input.as_mut(), &mut data_bytes, COMPONENT)?;

            if data_comp > 0 || rsrc_comp == 0 {
                if data_comp == 0 && data_uncomp != 0 {
                    return Err(Error::corrupt(COMPONENT, "empty data fork with a size"));
                }
                let mut info = info.clone();
                info.fork = ForkType::Data;
                info.len = data_uncomp;
                self.pending.push_back(PendingFork {
                    info,
                    method: data_method,
                    compressed: data_bytes,
                    crc: BigEndian::read_u16(&entry[102..104]),
                });
            }
            if rsrc_comp > 0 {
                let mut info = info;
                info.fork = ForkType::Resource;
                info.len = rsrc_uncomp;
                self.pending.push_back(PendingFork {
                    info,
                    method: rsrc_method,
                    compressed: rsrc_bytes,
                    crc: BigEndian::read_u16(&entry[100..102]),
                });
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Decodes and positions to the next queued fork.
    fn advance(&mut self) -> Result<Option<FileInfo>> {
        self.current = None;
        if self.pending.is_empty() && !self.queue_next_entry()? {
            return Ok(None);
        }
        // queue_next_entry only returns true with forks queued
        let fork = self.pending.pop_front().unwrap();

        let decoded = if fork.compressed.is_empty() && fork.info.len == 0 {
            Vec::new()
        } else {
            compress::decode_fork(COMPONENT, fork.method, &fork.compressed, fork.info.len as usize)?
        };
        let computed = crc::checksum(&decoded);
        if computed != fork.crc {
            return Err(Error::Checksum {
                component: COMPONENT,
                stored: fork.crc,
                computed,
            });
        }

        let info = fork.info;
        self.current = Some((info.clone(), decoded, 0));
        Ok(Some(info))
    }

    fn open_inner(&mut self, advance: Advance) -> Result<Option<FileInfo>> {
        match advance {
            Advance::First => {
                if self.started {
                    return Err(Error::Usage("open(FIRST) after iteration began"));
                }
                self.started = true;
                self.advance()
            }
            Advance::Next => {
                if !self.started {
                    return Err(Error::Usage("open(NEXT) before open(FIRST)"));
                }
                self.advance()
            }
        }
    }

    fn read_inner(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.current {
            None if !self.started => Err(Error::Usage("read before open")),
            None => Ok(0),
            Some((_, ref decoded, ref mut pos)) => {
                let n = buf.len().min(decoded.len() - *pos);
                buf[..n].copy_from_slice(&decoded[*pos..*pos + n]);
                *pos += n;
                Ok(n)
            }
        }
    }
}

impl Layer for SitLayer {
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

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::layer::MemLayer;

    pub(crate) struct EntrySpec<'a> {
        pub name: &'a str,
        pub data_method: u8,
        pub data: &'a [u8],
        pub data_uncomp: u32,
        pub rsrc_method: u8,
        pub rsrc: &'a [u8],
        pub rsrc_uncomp: u32,
        pub data_crc: u16,
        pub rsrc_crc: u16,
    }

    impl<'a> EntrySpec<'a> {
        pub(crate) fn stored(name: &'a str, data: &'a [u8]) -> Self {
            Self {
                name,
                data_method: 0,
                data,
                data_uncomp: data.len() as u32,
                rsrc_method: 0,
                rsrc: b"",
                rsrc_uncomp: 0,
                data_crc: crc::checksum(data),
                rsrc_crc: 0,
            }
        }
    }

    pub(crate) fn build(entries: &[EntrySpec<'_>]) -> Vec<u8> {
        let mut out = vec![0; HEADER_SIZE];
        out[0..4].copy_from_slice(MAGIC);
        out[4..6].copy_from_slice(&(entries.len() as u16).to_be_bytes());
        out[10..14].copy_from_slice(SIGNATURE);
        out[14] = 1;
        for spec in entries {
            let mut entry = [0_u8; ENTRY_SIZE];
            entry[0] = spec.rsrc_method;
            entry[1] = spec.data_method;
            entry[2] = spec.name.len() as u8;
            entry[3..3 + spec.name.len()].copy_from_slice(spec.name.as_bytes());
            entry[66..70].copy_from_slice(b"TEXT");
            entry[70..74].copy_from_slice(b"ttxt");
            entry[84..88].copy_from_slice(&spec.rsrc_uncomp.to_be_bytes());
            entry[88..92].copy_from_slice(&spec.data_uncomp.to_be_bytes());
            entry[92..96].copy_from_slice(&(spec.rsrc.len() as u32).to_be_bytes());
            entry[96..100].copy_from_slice(&(spec.data.len() as u32).to_be_bytes());
            entry[100..102].copy_from_slice(&spec.rsrc_crc.to_be_bytes());
            entry[102..104].copy_from_slice(&spec.data_crc.to_be_bytes());
            let header_crc = crc::checksum(&entry[0..110]);
            entry[110..112].copy_from_slice(&header_crc.to_be_bytes());
            out.extend_from_slice(&entry);
            out.extend_from_slice(spec.rsrc);
            out.extend_from_slice(spec.data);
        }
        let total = out.len() as u32;
        out[6..10].copy_from_slice(&total.to_be_bytes());
        out
    }

    #[test]
    fn stored_entry_round_trip() {
        let archive = build(&[EntrySpec::stored("a.txt", b"abcd")]);
        let mut layer = SitLayer::new(Box::new(MemLayer::new(archive))).unwrap();

        let info = layer.open(Advance::First).unwrap().unwrap();
        assert_eq!(info.name, "a.txt");
        assert_eq!(info.fork, ForkType::Data);
        assert_eq!(info.len, 4);

        let mut data = [0; 4];
        layer::read_full(&mut layer, &mut data, "test").unwrap();
        assert_eq!(&data, b"abcd");
        let mut end = [0; 1];
        assert_eq!(layer.read(&mut end).unwrap(), 0);
        assert!(layer.open(Advance::Next).unwrap().is_none());
    }

    #[test]
    fn rle_compressed_data_fork() {
        let compressed = b"A\x90\x06";
        let mut spec = EntrySpec::stored("r", compressed);
        spec.data_method = 1;
        spec.data_uncomp = 6;
        spec.data_crc = crc::checksum(b"AAAAAA");
        let archive = build(&[spec]);
        let mut layer = SitLayer::new(Box::new(MemLayer::new(archive))).unwrap();

        let info = layer.open(Advance::First).unwrap().unwrap();
        assert_eq!(info.len, 6);
        let mut data = [0; 6];
        layer::read_full(&mut layer, &mut data, "test").unwrap();
        assert_eq!(&data, b"AAAAAA");
    }

    #[test]
    fn fork_crc_mismatch_is_reported() {
        let mut spec = EntrySpec::stored("bad", b"abcd");
        spec.data_crc = 0xbeef;
        let archive = build(&[spec]);
        let mut layer = SitLayer::new(Box::new(MemLayer::new(archive))).unwrap();
        assert!(matches!(
            layer.open(Advance::First),
            Err(Error::Checksum { .. })
        ));
        // and the fault is sticky
        assert!(matches!(layer.open(Advance::Next), Err(Error::Poisoned)));
    }

    #[test]
    fn entry_with_both_forks_empty_still_appears() {
        let archive = build(&[
            EntrySpec::stored("empty", b""),
            EntrySpec::stored("after", b"x"),
        ]);
        let mut layer = SitLayer::new(Box::new(MemLayer::new(archive))).unwrap();

        let info = layer.open(Advance::First).unwrap().unwrap();
        assert_eq!(info.name, "empty");
        assert_eq!(info.len, 0);
        let mut buf = [0; 4];
        assert_eq!(layer.read(&mut buf).unwrap(), 0);

        let info = layer.open(Advance::Next).unwrap().unwrap();
        assert_eq!(info.name, "after");
        assert!(layer.open(Advance::Next).unwrap().is_none());
    }

    #[test]
    fn resource_fork_follows_data_fork() {
        let mut spec = EntrySpec::stored("both", b"data!");
        spec.rsrc = b"RSRC";
        spec.rsrc_uncomp = 4;
        spec.rsrc_crc = crc::checksum(b"RSRC");
        let archive = build(&[spec]);
        let mut layer = SitLayer::new(Box::new(MemLayer::new(archive))).unwrap();

        let first = layer.open(Advance::First).unwrap().unwrap();
        assert_eq!(first.fork, ForkType::Data);
        let second = layer.open(Advance::Next).unwrap().unwrap();
        assert_eq!(second.fork, ForkType::Resource);
        assert_eq!(second.name, first.name);
        let mut rsrc = [0; 4];
        layer::read_full(&mut layer, &mut rsrc, "test").unwrap();
        assert_eq!(&rsrc, b"RSRC");
        assert!(layer.open(Advance::Next).unwrap().is_none());
    }

    #[test]
    fn corrupt_entry_header_crc() {
        let mut archive = build(&[EntrySpec::stored("a", b"abcd")]);
        archive[HEADER_SIZE + 3] ^= 0xff; // flip a name byte
        let mut layer = SitLayer::new(Box::new(MemLayer::new(archive))).unwrap();
        assert!(matches!(
            layer.open(Advance::First),
            Err(Error::Checksum { .. })
        ));
    }
}
