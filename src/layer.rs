use crate::{Error, OsType, Result};
use bitflags::bitflags;
use derive_more::Display;
use std::{
    fs::File,
    io::{self, BufReader, Read, Seek, SeekFrom},
    path::Path,
};

/// Which fork to position to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Advance {
    First,
    Next,
}

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum ForkType {
    #[display(fmt = "data")]
    Data,
    #[display(fmt = "resource")]
    Resource,
}

bitflags! {
    /// Finder flags as stored in catalog info and archive entries.
    pub struct FinderFlags: u16 {
        const IS_ON_DESK       = 0x0001;
        const COLOR            = 0x000e;
        const IS_SHARED        = 0x0040;
        const HAS_NO_INITS     = 0x0080;
        const HAS_BEEN_INITED  = 0x0100;
        const HAS_CUSTOM_ICON  = 0x0400;
        const IS_STATIONERY    = 0x0800;
        const NAME_LOCKED      = 0x1000;
        const HAS_BUNDLE       = 0x2000;
        const IS_INVISIBLE     = 0x4000;
        const IS_ALIAS         = 0x8000;
    }
}

/// Metadata for the fork a layer has positioned to. Across the forks of one
/// file only `fork` and `len` change.
#[derive(Clone, Debug)]
pub struct FileInfo {
    pub name: String,
    pub file_type: OsType,
    pub creator: OsType,
    pub finder_flags: FinderFlags,
    pub fork: ForkType,
    pub len: u32,
    pub has_metadata: bool,
}

impl FileInfo {
    /// Info for a bare byte stream with no Finder metadata attached.
    #[must_use]
    pub(crate) fn bare(name: String, len: u32) -> Self {
        Self {
            name,
            file_type: OsType::default(),
            creator: OsType::default(),
            finder_flags: FinderFlags::empty(),
            fork: ForkType::Data,
            len,
            has_metadata: false,
        }
    }
}

/// One decoding stage: a leaf source, a transport envelope, or an archive.
///
/// `open(First)` positions to the first fork and returns its metadata;
/// `open(Next)` discards whatever is left of the current fork and advances,
/// returning `None` once every fork has been emitted. `read` streams the
/// bytes of the current fork and returns 0 at fork end. Dropping a layer
/// releases it along with the input layer it owns.
pub trait Layer {
    fn open(&mut self, advance: Advance) -> Result<Option<FileInfo>>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Reads until `buf` is full, failing with `Truncated` on early end.
pub(crate) fn read_full(
    layer: &mut (impl Layer + ?Sized),
    buf: &mut [u8],
    component: &'static str,
) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = layer.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(Error::Truncated(component));
        }
        filled += n;
    }
    Ok(())
}

/// Reads until `buf` is full or the fork ends; returns the byte count.
pub(crate) fn read_up_to(layer: &mut (impl Layer + ?Sized), buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = layer.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Reads and discards `count` bytes.
pub(crate) fn drain(
    layer: &mut (impl Layer + ?Sized),
    mut count: u64,
    component: &'static str,
) -> Result<()> {
    let mut scratch = [0; 512];
    while count > 0 {
        let want = scratch.len().min(count as usize);
        let n = layer.read(&mut scratch[..want])?;
        if n == 0 {
            return Err(Error::Truncated(component));
        }
        count -= n as u64;
    }
    Ok(())
}

/// Bridges a layer's current fork to `io::Read` for the bit- and
/// byte-oriented decoder adapters.
pub(crate) struct LayerReader {
    inner: Box<dyn Layer>,
}

impl LayerReader {
    pub(crate) fn new(inner: Box<dyn Layer>) -> Self {
        Self { inner }
    }
}

impl Read for LayerReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(Into::into)
    }
}

/// Leaf source over a file on disk.
pub struct FileLayer {
    input: BufReader<File>,
    name: String,
    len: u64,
    remaining: u64,
    opened: bool,
}

impl FileLayer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            input: BufReader::new(file),
            name,
            len,
            remaining: 0,
            opened: false,
        })
    }
}

impl Layer for FileLayer {
    fn open(&mut self, advance: Advance) -> Result<Option<FileInfo>> {
        match advance {
            Advance::First => {
                self.input.seek(SeekFrom::Start(0))?;
                self.remaining = self.len;
                self.opened = true;
                Ok(Some(FileInfo::bare(self.name.clone(), self.len as u32)))
            }
            Advance::Next => Ok(None),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.opened {
            return Err(Error::Usage("read before open"));
        }
        if self.remaining == 0 {
            return Ok(0);
        }
        let max = buf.len().min(self.remaining as usize);
        let n = self.input.read(&mut buf[..max])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Leaf source over an in-memory buffer.
pub struct MemLayer {
    data: Vec<u8>,
    pos: usize,
    opened: bool,
}

impl MemLayer {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            opened: false,
        }
    }
}

impl Layer for MemLayer {
    fn open(&mut self, advance: Advance) -> Result<Option<FileInfo>> {
        match advance {
            Advance::First => {
                self.pos = 0;
                self.opened = true;
                Ok(Some(FileInfo::bare(String::new(), self.data.len() as u32)))
            }
            Advance::Next => Ok(None),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.opened {
            return Err(Error::Usage("read before open"));
        }
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Bounded replay adapter for format detection.
///
/// Every byte read while recording is kept, so a rejected constructor costs
/// nothing: `rewind` replays the sniffed head to the next candidate. Once a
/// constructor commits (or detection gives up), recording stops, the kept
/// head replays one last time, and further reads pass straight through.
pub struct Prefetch {
    inner: Box<dyn Layer>,
    info: Option<FileInfo>,
    buf: Vec<u8>,
    pos: usize,
    recording: bool,
    opened: bool,
    overrun: bool,
}

impl Prefetch {
    #[must_use]
    pub fn new(inner: Box<dyn Layer>) -> Self {
        Self {
            inner,
            info: None,
            buf: Vec::new(),
            pos: 0,
            recording: true,
            opened: false,
            overrun: false,
        }
    }

    /// Replays the recorded head on the next reads.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Stops recording; the head already kept still replays, everything
    /// past it streams through unrecorded.
    pub fn stop_recording(&mut self) {
        self.recording = false;
    }
}

impl Layer for Prefetch {
    fn open(&mut self, advance: Advance) -> Result<Option<FileInfo>> {
        match advance {
            Advance::First => {
                if !self.opened {
                    self.info = self.inner.open(Advance::First)?;
                    self.opened = true;
                    Ok(self.info.clone())
                } else if self.overrun {
                    Err(Error::Usage("stream already consumed past the replay buffer"))
                } else {
                    self.rewind();
                    Ok(self.info.clone())
                }
            }
            Advance::Next => {
                self.buf.clear();
                self.pos = 0;
                self.recording = false;
                self.overrun = true;
                self.inner.open(Advance::Next)
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.opened {
            return Err(Error::Usage("read before open"));
        }
        if self.pos < self.buf.len() {
            let n = buf.len().min(self.buf.len() - self.pos);
            buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
        let n = self.inner.read(buf)?;
        if self.recording {
            self.buf.extend_from_slice(&buf[..n]);
            self.pos = self.buf.len();
        } else if n > 0 {
            self.overrun = true;
        }
        Ok(n)
    }
}
