//! Compact Pro archives. The container header points at a directory that
//! ordinarily trails the file data, so the whole input is captured once
//! and addressed in memory. Directory folders nest; their files are
//! flattened out in order. Fork payloads sit at each entry's file offset,
//! resource fork first, stored either raw or as RLE-90 + LZH.

use crate::{
    compress::{lzh, rle90},
    crc,
    layer::{Advance, FileInfo, FinderFlags, ForkType, Layer, Prefetch},
    string::decode_mac_roman,
    Error, OsType, OsTypeReadExt, Result,
};
use byteordered::ByteOrdered;
use std::io::{Cursor, Read};

const COMPONENT: &str = "cpt";
const MAGIC: u8 = 0x01;
const VERSION_CLASSIC: u8 = 0x52;
const VERSION_EARLY: u8 = 0x01;

/// Method-flag word bits: which forks ran through the LZH stage.
const FLAG_RSRC_LZH: u16 = 0x0002;
const FLAG_DATA_LZH: u16 = 0x0004;

const FOLDER_BIT: u8 = 0x80;

#[derive(Clone, Copy)]
struct ForkDesc {
    uncomp: u32,
    comp: u32,
    crc: u16,
    lzh: bool,
}

struct CptFile {
    name: String,
    file_type: OsType,
    creator: OsType,
    finder_flags: FinderFlags,
    offset: u32,
    rsrc: ForkDesc,
    data: ForkDesc,
}

pub struct CptLayer {
    buf: Vec<u8>,
    files: Vec<CptFile>,
    next_fork: Vec<(usize, ForkType)>,
    cursor: usize,
    current: Option<(FileInfo, Vec<u8>, usize)>,
    started: bool,
    poisoned: bool,
}

impl CptLayer {
    pub fn new(mut input: Box<dyn Layer>) -> Result<Self> {
        if input.open(Advance::First)?.is_none() {
            return Err(Error::Truncated(COMPONENT));
        }
        let mut buf = Vec::new();
        let mut chunk = [0; 4096];
        loop {
            let n = input.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        if buf.len() < 8 || buf[0] != MAGIC || buf[2] != 0 {
            return Err(Error::corrupt(COMPONENT, "not a Compact Pro archive"));
        }
        if buf[1] != VERSION_CLASSIC && buf[1] != VERSION_EARLY {
            return Err(Error::corrupt(
                COMPONENT,
                format!("unknown version byte {:#04x}", buf[1]),
            ));
        }
        let dir_offset = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        if dir_offset < 8 || dir_offset >= buf.len() {
            return Err(Error::corrupt(
                COMPONENT,
                format!("directory offset {} outside the archive", dir_offset),
            ));
        }

        let mut files = Vec::new();
        {
            let mut dir = ByteOrdered::be(Cursor::new(&buf[dir_offset..]));
            let num_entries = dir
                .read_u16()
                .map_err(|_| Error::Truncated(COMPONENT))?;
            let comment_len = dir.read_u8().map_err(|_| Error::Truncated(COMPONENT))?;
            let mut comment = vec![0; usize::from(comment_len)];
            dir.read_exact(&mut comment)
                .map_err(|_| Error::Truncated(COMPONENT))?;
            for _ in 0..num_entries {
                parse_entry(&mut dir, &mut files)?;
            }
        }

        // fork payloads all live below the directory
        for file in &files {
            let end = u64::from(file.offset) + u64::from(file.rsrc.comp) + u64::from(file.data.comp);
            if end > dir_offset as u64 {
                return Err(Error::Truncated(COMPONENT));
            }
        }

        // data fork first per file, resource fork right behind it
        let mut next_fork = Vec::new();
        for (index, file) in files.iter().enumerate() {
            if file.data.comp > 0 || file.rsrc.comp == 0 {
                next_fork.push((index, ForkType::Data));
            }
            if file.rsrc.comp > 0 {
                next_fork.push((index, ForkType::Resource));
            }
        }

        Ok(Self {
            buf,
            files,
            next_fork,
            cursor: 0,
            current: None,
            started: false,
            poisoned: false,
        })
    }

    pub(crate) fn sniff(input: &mut Prefetch) -> Result<bool> {
        let head = crate::detect::peek(input, 8)?;
        Ok(head.len() >= 8
            && head[0] == MAGIC
            && (head[1] == VERSION_CLASSIC || head[1] == VERSION_EARLY)
            && head[2] == 0)
    }

    fn advance(&mut self) -> Result<Option<FileInfo>> {
        self.current = None;
        let (index, fork) = match self.next_fork.get(self.cursor) {
            Some(&pair) => pair,
            None => return Ok(None),
        };
        self.cursor += 1;

        let file = &self.files[index];
        let (desc, start) = match fork {
            ForkType::Resource => (file.rsrc, file.offset),
            ForkType::Data => (file.data, file.offset + file.rsrc.comp),
        };
        let compressed = &self.buf[start as usize..(start + desc.comp) as usize];

        let decoded = if desc.lzh {
            let expanded = rle90::decode_to_end(COMPONENT, compressed)?;
            lzh::decode(COMPONENT, &expanded, desc.uncomp as usize)?
        } else {
            if compressed.len() != desc.uncomp as usize {
                return Err(Error::corrupt(
                    COMPONENT,
                    format!(
                        "stored fork is {} bytes, expected {}",
                        compressed.len(),
                        desc.uncomp
                    ),
                ));
            }
            compressed.to_vec()
        };
        let computed = crc::checksum(&decoded);
        if computed != desc.crc {
            return Err(Error::Checksum {
                component: COMPONENT,
                stored: desc.crc,
                computed,
            });
        }

        let info = FileInfo {
            name: file.name.clone(),
            file_type: file.file_type,
            creator: file.creator,
            finder_flags: file.finder_flags,
            fork,
            len: desc.uncomp,
            has_metadata: true,
        };
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

type Dir<'a> = ByteOrdered<Cursor<&'a [u8]>, byteordered::StaticEndianness<byteorder::BigEndian>>;

fn parse_entry(dir: &mut Dir<'_>, files: &mut Vec<CptFile>) -> Result<()> {
    let name_len = dir.read_u8().map_err(|_| Error::Truncated(COMPONENT))?;
    let mut name = vec![0; usize::from(name_len & !FOLDER_BIT)];
    dir.read_exact(&mut name)
        .map_err(|_| Error::Truncated(COMPONENT))?;

    if name_len & FOLDER_BIT != 0 {
        // folder: the child count follows, children nest right here
        let children = dir.read_u16().map_err(|_| Error::Truncated(COMPONENT))?;
        for _ in 0..children {
            parse_entry(dir, files)?;
        }
        return Ok(());
    }

    let _volume = dir.read_u8().map_err(|_| Error::Truncated(COMPONENT))?;
    let offset = dir.read_u32().map_err(|_| Error::Truncated(COMPONENT))?;
    let file_type = dir.read_os_type().map_err(|_| Error::Truncated(COMPONENT))?;
    let creator = dir.read_os_type().map_err(|_| Error::Truncated(COMPONENT))?;
    let _created = dir.read_u32().map_err(|_| Error::Truncated(COMPONENT))?;
    let _modified = dir.read_u32().map_err(|_| Error::Truncated(COMPONENT))?;
    let finder_flags = dir.read_u16().map_err(|_| Error::Truncated(COMPONENT))?;
    let rsrc_crc = dir.read_u16().map_err(|_| Error::Truncated(COMPONENT))?;
    let data_crc = dir.read_u16().map_err(|_| Error::Truncated(COMPONENT))?;
    let method = dir.read_u16().map_err(|_| Error::Truncated(COMPONENT))?;
    let rsrc_uncomp = dir.read_u32().map_err(|_| Error::Truncated(COMPONENT))?;
    let data_uncomp = dir.read_u32().map_err(|_| Error::Truncated(COMPONENT))?;
    let rsrc_comp = dir.read_u32().map_err(|_| Error::Truncated(COMPONENT))?;
    let data_comp = dir.read_u32().map_err(|_| Error::Truncated(COMPONENT))?;

    files.push(CptFile {
        name: decode_mac_roman(&name),
        file_type,
        creator,
        finder_flags: FinderFlags::from_bits_truncate(finder_flags),
        offset,
        rsrc: ForkDesc {
            uncomp: rsrc_uncomp,
            comp: rsrc_comp,
            crc: rsrc_crc,
            lzh: method & FLAG_RSRC_LZH != 0,
        },
        data: ForkDesc {
            uncomp: data_uncomp,
            comp: data_comp,
            crc: data_crc,
            lzh: method & FLAG_DATA_LZH != 0,
        },
    });
    Ok(())
}

impl Layer for CptLayer {
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
    use crate::layer::{self, MemLayer};
    use byteorder::{BigEndian, ByteOrder};

    pub(crate) struct FileSpec<'a> {
        pub name: &'a str,
        pub data: &'a [u8],
        pub data_uncomp: u32,
        pub data_crc: u16,
        pub data_lzh: bool,
        pub rsrc: &'a [u8],
        pub rsrc_uncomp: u32,
        pub rsrc_crc: u16,
    }

    impl<'a> FileSpec<'a> {
        pub(crate) fn stored(name: &'a str, data: &'a [u8]) -> Self {
            Self {
                name,
                data,
                data_uncomp: data.len() as u32,
                data_crc: crc::checksum(data),
                data_lzh: false,
                rsrc: b"",
                rsrc_uncomp: 0,
                rsrc_crc: 0,
            }
        }
    }

    pub(crate) fn build(files: &[FileSpec<'_>]) -> Vec<u8> {
        let mut out = vec![0_u8; 8];
        out[0] = MAGIC;
        out[1] = VERSION_CLASSIC;

        let mut offsets = Vec::new();
        for spec in files {
            offsets.push(out.len() as u32);
            out.extend_from_slice(spec.rsrc);
            out.extend_from_slice(spec.data);
        }
        let dir_offset = out.len() as u32;
        BigEndian::write_u32(&mut out[4..8], dir_offset);

        out.extend_from_slice(&(files.len() as u16).to_be_bytes());
        out.push(0); // no comment
        for (spec, &offset) in files.iter().zip(&offsets) {
            out.push(spec.name.len() as u8);
            out.extend_from_slice(spec.name.as_bytes());
            out.push(0); // volume
            out.extend_from_slice(&offset.to_be_bytes());
            out.extend_from_slice(b"TEXT");
            out.extend_from_slice(b"ttxt");
            out.extend_from_slice(&0_u32.to_be_bytes());
            out.extend_from_slice(&0_u32.to_be_bytes());
            out.extend_from_slice(&0_u16.to_be_bytes());
            out.extend_from_slice(&spec.rsrc_crc.to_be_bytes());
            out.extend_from_slice(&spec.data_crc.to_be_bytes());
            let mut method = 0_u16;
            if spec.data_lzh {
                method |= FLAG_DATA_LZH;
            }
            out.extend_from_slice(&method.to_be_bytes());
            out.extend_from_slice(&spec.rsrc_uncomp.to_be_bytes());
            out.extend_from_slice(&spec.data_uncomp.to_be_bytes());
            out.extend_from_slice(&(spec.rsrc.len() as u32).to_be_bytes());
            out.extend_from_slice(&(spec.data.len() as u32).to_be_bytes());
        }
        out
    }

    #[test]
    fn stored_file_round_trip() {
        let archive = build(&[FileSpec::stored("readme", b"plain bytes")]);
        let mut layer = CptLayer::new(Box::new(MemLayer::new(archive))).unwrap();

        let info = layer.open(Advance::First).unwrap().unwrap();
        assert_eq!(info.name, "readme");
        assert_eq!(info.fork, ForkType::Data);
        assert_eq!(info.len, 11);
        let mut data = [0; 11];
        layer::read_full(&mut layer, &mut data, "test").unwrap();
        assert_eq!(&data, b"plain bytes");
        assert!(layer.open(Advance::Next).unwrap().is_none());
    }

    #[test]
    fn crc_mismatch_is_reported() {
        let mut spec = FileSpec::stored("bad", b"plain bytes");
        spec.data_crc ^= 1;
        let archive = build(&[spec]);
        let mut layer = CptLayer::new(Box::new(MemLayer::new(archive))).unwrap();
        assert!(matches!(
            layer.open(Advance::First),
            Err(Error::Checksum { .. })
        ));
    }

    #[test]
    fn truncated_fork_payload() {
        let mut archive = build(&[FileSpec::stored("cut", b"0123456789")]);
        // move the directory pointer so the payload hangs off the end
        let dir_offset = BigEndian::read_u32(&archive[4..8]);
        let tail = archive.split_off(dir_offset as usize);
        archive.truncate(10);
        let new_dir = archive.len() as u32;
        archive.extend_from_slice(&tail);
        BigEndian::write_u32(&mut archive[4..8], new_dir);
        assert!(matches!(
            CptLayer::new(Box::new(MemLayer::new(archive))),
            Err(Error::Truncated(_))
        ));
    }
}
