//! StuffIt 5 archives: an 80-byte banner line, an archive header, then
//! self-describing entries introduced by a marker word. Compression
//! methods and CRC rules are shared with the classic format.

use crate::{
    compress,
    crc,
    layer::{self, Advance, FileInfo, FinderFlags, ForkType, Layer, Prefetch},
    string::decode_mac_roman,
    Error, OsType, Result,
};
use byteorder::{BigEndian, ByteOrder};
use std::collections::VecDeque;

const COMPONENT: &str = "sit5";
pub(crate) const BANNER: &[u8; 80] =
    b"StuffIt (c)1997-2002 Aladdin Systems, Inc., http://www.aladdinsys.com/StuffIt/\r\n";
const BANNER_PREFIX: &[u8; 16] = b"StuffIt (c)1997-";
const ENTRY_MARKER: u32 = 0xa5a5_a5a5;
const ENTRY_FIXED: usize = 40;

struct PendingFork {
    info: FileInfo,
    method: u8,
    compressed: Vec<u8>,
    crc: u16,
}

pub struct Sit5Layer {
    input: Box<dyn Layer>,
    remaining_entries: u16,
    pending: VecDeque<PendingFork>,
    current: Option<(FileInfo, Vec<u8>, usize)>,
    started: bool,
    poisoned: bool,
}

impl Sit5Layer {
    pub fn new(mut input: Box<dyn Layer>) -> Result<Self> {
        if input.open(Advance::First)?.is_none() {
            return Err(Error::Truncated(COMPONENT));
        }
        let mut banner = [0; BANNER.len()];
        layer::read_full(input.as_mut(), &mut banner, COMPONENT)?;
        if &banner[0..BANNER_PREFIX.len()] != BANNER_PREFIX {
            return Err(Error::corrupt(COMPONENT, "not a StuffIt 5 archive"));
        }
        let mut header = [0; 8];
        layer::read_full(input.as_mut(), &mut header, COMPONENT)?;
        let remaining_entries = BigEndian::read_u16(&header[6..8]);
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
        let head = crate::detect::peek(input, BANNER_PREFIX.len())?;
        Ok(head.as_slice() == BANNER_PREFIX)
    }

    fn queue_next_entry(&mut self) -> Result<bool> {
        if self.remaining_entries == 0 {
            return Ok(false);
        }
        self.remaining_entries -= 1;

        let mut fixed = [0; ENTRY_FIXED];
        layer::read_full(self.input.as_mut(), &mut fixed, COMPONENT)?;
        if BigEndian::read_u32(&fixed[0..4]) != ENTRY_MARKER {
            return Err(Error::corrupt(COMPONENT, "entry marker missing"));
        }
        let header_len = usize::from(BigEndian::read_u16(&fixed[4..6]));
        let data_method = fixed[6];
        let rsrc_method = fixed[7];
        let name_len = usize::from(BigEndian::read_u16(&fixed[8..10]));
        if header_len < ENTRY_FIXED + name_len {
            return Err(Error::corrupt(COMPONENT, "entry header shorter than its name"));
        }
        let data_uncomp = BigEndian::read_u32(&fixed[20..24]);
        let rsrc_uncomp = BigEndian::read_u32(&fixed[24..28]);
        let data_comp = BigEndian::read_u32(&fixed[28..32]);
        let rsrc_comp = BigEndian::read_u32(&fixed[32..36]);
        let data_crc = BigEndian::read_u16(&fixed[36..38]);
        let rsrc_crc = BigEndian::read_u16(&fixed[38..40]);

        let mut name = vec![0; name_len];
        layer::read_full(self.input.as_mut(), &mut name, COMPONENT)?;
        let padding = header_len - ENTRY_FIXED - name_len;
        if padding > 0 {
            layer::drain(self.input.as_mut(), padding as u64, COMPONENT)?;
        }

        let info = FileInfo {
            name: decode_mac_roman(&name),
            file_type: OsType::from_bytes(&fixed[10..14]),
            creator: OsType::from_bytes(&fixed[14..18]),
            finder_flags: FinderFlags::from_bits_truncate(BigEndian::read_u16(&fixed[18..20])),
            fork: ForkType::Data,
            len: 0,
            has_metadata: true,
        };

        let mut rsrc_bytes = vec![0; rsrc_comp as usize];
        layer::read_full(self.input.as_mut(), &mut rsrc_bytes, COMPONENT)?;
        let mut data_bytes = vec![0; data_comp as usize];
        layer::read_full(self.input.as_mut(), &mut data_bytes, COMPONENT)?;

        if data_comp > 0 || rsrc_comp == 0 {
            let mut info = info.clone();
            info.len = data_uncomp;
            self.pending.push_back(PendingFork {
                info,
                method: data_method,
                compressed: data_bytes,
                crc: data_crc,
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
                crc: rsrc_crc,
            });
        }
        Ok(true)
    }

    fn advance(&mut self) -> Result<Option<FileInfo>> {
        self.current = None;
        while self.pending.is_empty() {
            if !self.queue_next_entry()? {
                return Ok(None);
            }
        }
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

impl Layer for Sit5Layer {
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
