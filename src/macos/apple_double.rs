//! AppleDouble `._name` sidecar files: Finder metadata and the resource
//! fork of a file whose data fork lives next door under the plain name.
//!
//! The header reserves two descriptor slots up front; the Finder Info
//! entry (id 9) is written immediately, and when a resource fork (id 2)
//! arrives later the descriptor table is rewritten with the new entry
//! count and offsets.

use crate::{FileInfo, Result};
use byteorder::{BigEndian, WriteBytesExt};
use std::{
    fs::File,
    io::{Seek, SeekFrom, Write},
    path::Path,
};

const MAGIC: u32 = 0x0005_1607;
const VERSION: u32 = 0x0002_0000;

const ENTRY_RESOURCE_FORK: u32 = 2;
const ENTRY_FINDER_INFO: u32 = 9;

const FINDER_INFO_LEN: u32 = 32;
// magic + version + 16 filler + entry count
const TABLE_OFFSET: u64 = 26;
const DESCRIPTOR_LEN: u32 = 12;
const RESERVED_SLOTS: u32 = 2;
const FINDER_INFO_OFFSET: u32 = TABLE_OFFSET as u32 + RESERVED_SLOTS * DESCRIPTOR_LEN;

pub struct AppleDoubleWriter {
    file: File,
    entries: Vec<(u32, u32, u32)>,
}

impl AppleDoubleWriter {
    /// Creates the sidecar with a Finder Info entry built from `info`.
    pub fn create(path: impl AsRef<Path>, info: &FileInfo) -> Result<Self> {
        let mut file = File::create(path)?;
        file.write_u32::<BigEndian>(MAGIC)?;
        file.write_u32::<BigEndian>(VERSION)?;
        file.write_all(&[0; 16])?;

        let mut writer = Self {
            file,
            entries: vec![(ENTRY_FINDER_INFO, FINDER_INFO_OFFSET, FINDER_INFO_LEN)],
        };
        writer.write_descriptors()?;
        // hold the second slot open for a resource fork descriptor
        writer.file.write_all(&[0; DESCRIPTOR_LEN as usize])?;

        // 16 bytes of Finder info, 16 of extended Finder info
        writer.file.write_all(info.file_type.as_bytes())?;
        writer.file.write_all(info.creator.as_bytes())?;
        writer.file.write_u16::<BigEndian>(info.finder_flags.bits())?;
        writer.file.write_all(&[0; 6])?;
        writer.file.write_all(&[0; 16])?;
        Ok(writer)
    }

    /// Appends the resource fork and patches the descriptor table.
    pub fn append_resource_fork(&mut self, data: &[u8]) -> Result<()> {
        let offset = self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(data)?;
        self.entries
            .push((ENTRY_RESOURCE_FORK, offset as u32, data.len() as u32));
        self.write_descriptors()?;
        self.file.seek(SeekFrom::End(0))?;
        Ok(())
    }

    fn write_descriptors(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(TABLE_OFFSET - 2))?;
        self.file.write_u16::<BigEndian>(self.entries.len() as u16)?;
        for &(id, offset, len) in &self.entries {
            self.file.write_u32::<BigEndian>(id)?;
            self.file.write_u32::<BigEndian>(offset)?;
            self.file.write_u32::<BigEndian>(len)?;
        }
        // unused reserved slots stay zero and are not counted
        self.file.seek(SeekFrom::End(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FinderFlags, ForkType, OsType};
    use byteorder::ByteOrder;
    use std::fs;

    fn sample_info() -> FileInfo {
        FileInfo {
            name: "sample".to_string(),
            file_type: OsType::new(*b"TEXT"),
            creator: OsType::new(*b"ttxt"),
            finder_flags: FinderFlags::from_bits_truncate(0x0100),
            fork: ForkType::Resource,
            len: 0,
            has_metadata: true,
        }
    }

    #[test]
    fn finder_info_only() {
        let dir = std::env::temp_dir().join("munbox-ad-test-1");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("._sample");
        AppleDoubleWriter::create(&path, &sample_info()).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(BigEndian::read_u32(&bytes[0..4]), MAGIC);
        assert_eq!(BigEndian::read_u32(&bytes[4..8]), VERSION);
        assert_eq!(BigEndian::read_u16(&bytes[24..26]), 1);
        assert_eq!(BigEndian::read_u32(&bytes[26..30]), ENTRY_FINDER_INFO);
        let offset = BigEndian::read_u32(&bytes[30..34]) as usize;
        assert_eq!(BigEndian::read_u32(&bytes[34..38]), FINDER_INFO_LEN);
        assert_eq!(&bytes[offset..offset + 4], b"TEXT");
        assert_eq!(&bytes[offset + 4..offset + 8], b"ttxt");
        assert_eq!(BigEndian::read_u16(&bytes[offset + 8..offset + 10]), 0x0100);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn resource_fork_patches_table() {
        let dir = std::env::temp_dir().join("munbox-ad-test-2");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("._sample");
        let mut writer = AppleDoubleWriter::create(&path, &sample_info()).unwrap();
        writer.append_resource_fork(b"RSRC DATA").unwrap();
        drop(writer);

        let bytes = fs::read(&path).unwrap();
        assert_eq!(BigEndian::read_u16(&bytes[24..26]), 2);
        assert_eq!(BigEndian::read_u32(&bytes[38..42]), ENTRY_RESOURCE_FORK);
        let offset = BigEndian::read_u32(&bytes[42..46]) as usize;
        let len = BigEndian::read_u32(&bytes[46..50]) as usize;
        assert_eq!(&bytes[offset..offset + len], b"RSRC DATA");
        fs::remove_dir_all(&dir).unwrap();
    }
}
