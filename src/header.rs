use std::io::Error as IoError;
use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use super::consts::*;
use super::error::Error;

/// The set of MPQ format versions this crate understands.
///
/// Kept as a closed enum so that serialization code which depends on
/// the version is forced to handle every supported variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FormatVersion {
    /// Format version 0, the original 32-byte header.
    Original,
}

impl FormatVersion {
    fn from_raw(raw: u16) -> Result<FormatVersion, Error> {
        match raw {
            0 => Ok(FormatVersion::Original),
            _ => Err(Error::UnsupportedFormat),
        }
    }

    fn to_raw(self) -> u16 {
        match self {
            FormatVersion::Original => 0,
        }
    }
}

#[derive(Debug)]
pub(crate) struct FileHeader {
    pub header_size: u32,
    pub archive_size: u32,
    pub format_version: FormatVersion,
    pub block_size_shift: u16,
    pub hash_table_offset: u32,
    pub block_table_offset: u32,
    pub hash_table_entries: u32,
    pub block_table_entries: u32,
}

impl FileHeader {
    pub fn new_v0(
        archive_size: u32,
        sector_size: u32,
        hash_table_offset: u32,
        block_table_offset: u32,
        hash_table_entries: u32,
        block_table_entries: u32,
    ) -> FileHeader {
        let mut sector_size = sector_size / (BLOCK_SIZE_MODIFIER as u32);
        let mut shift = 0;
        while sector_size > 1 {
            sector_size /= 2;
            shift += 1;
        }

        FileHeader {
            format_version: FormatVersion::Original,
            header_size: HEADER_MPQ_SIZE as u32,
            archive_size,
            block_size_shift: shift,
            hash_table_offset,
            hash_table_entries,
            block_table_offset,
            block_table_entries,
        }
    }

    /// Parses a header from a reader positioned just past the magic.
    ///
    /// Rejects any format version other than 0, as well as headers which
    /// declare an extension area with non-zero version 1 fields.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<FileHeader, Error> {
        let header_size = reader.read_u32::<LE>()?;
        let archive_size = reader.read_u32::<LE>()?;
        let format_version = FormatVersion::from_raw(reader.read_u16::<LE>()?)?;
        let block_size_shift = reader.read_u16::<LE>()?;
        let hash_table_offset = reader.read_u32::<LE>()?;
        let block_table_offset = reader.read_u32::<LE>()?;
        let hash_table_entries = reader.read_u32::<LE>()?;
        let block_table_entries = reader.read_u32::<LE>()?;

        if u64::from(header_size) > HEADER_MPQ_SIZE {
            // version 1 extension: extended block table offset,
            // and the high words of the two table offsets
            let extended_block_table_offset = reader.read_u64::<LE>()?;
            let hash_table_offset_high = reader.read_u16::<LE>()?;
            let block_table_offset_high = reader.read_u16::<LE>()?;

            if extended_block_table_offset != 0
                || hash_table_offset_high != 0
                || block_table_offset_high != 0
            {
                return Err(Error::UnsupportedFormat);
            }
        }

        if !hash_table_entries.is_power_of_two() {
            return Err(Error::Corrupted);
        }

        Ok(FileHeader {
            header_size,
            archive_size,
            format_version,
            block_size_shift,
            hash_table_offset,
            block_table_offset,
            hash_table_entries,
            block_table_entries,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<(), IoError> {
        writer.write_u32::<LE>(HEADER_MPQ_MAGIC)?;
        writer.write_u32::<LE>(self.header_size)?;
        writer.write_u32::<LE>(self.archive_size)?;
        writer.write_u16::<LE>(self.format_version.to_raw())?;
        writer.write_u16::<LE>(self.block_size_shift)?;
        writer.write_u32::<LE>(self.hash_table_offset)?;
        writer.write_u32::<LE>(self.block_table_offset)?;
        writer.write_u32::<LE>(self.hash_table_entries)?;
        writer.write_u32::<LE>(self.block_table_entries)?;

        Ok(())
    }

    pub fn sector_size(&self) -> u64 {
        BLOCK_SIZE_MODIFIER << self.block_size_shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use byteorder::WriteBytesExt;

    fn raw_header(version: u16, header_size: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32::<LE>(header_size).unwrap();
        buf.write_u32::<LE>(1024).unwrap();
        buf.write_u16::<LE>(version).unwrap();
        buf.write_u16::<LE>(3).unwrap();
        buf.write_u32::<LE>(512).unwrap();
        buf.write_u32::<LE>(768).unwrap();
        buf.write_u32::<LE>(16).unwrap();
        buf.write_u32::<LE>(4).unwrap();
        buf
    }

    #[test]
    fn parses_version_0() {
        let buf = raw_header(0, HEADER_MPQ_SIZE as u32);
        let header = FileHeader::from_reader(&buf[..]).unwrap();

        assert_eq!(header.format_version, FormatVersion::Original);
        assert_eq!(header.archive_size, 1024);
        assert_eq!(header.sector_size(), 4096);
        assert_eq!(header.hash_table_entries, 16);
    }

    #[test]
    fn rejects_version_1() {
        let buf = raw_header(1, HEADER_MPQ_SIZE as u32);
        match FileHeader::from_reader(&buf[..]) {
            Err(Error::UnsupportedFormat) => {}
            other => panic!("expected UnsupportedFormat, got {:?}", other),
        }
    }

    #[test]
    fn rejects_nonzero_extension_fields() {
        let mut buf = raw_header(0, (HEADER_MPQ_SIZE + HEADER_V1_EXTENSION_SIZE) as u32);
        buf.write_u64::<LE>(0xDEAD).unwrap();
        buf.write_u16::<LE>(0).unwrap();
        buf.write_u16::<LE>(0).unwrap();

        match FileHeader::from_reader(&buf[..]) {
            Err(Error::UnsupportedFormat) => {}
            other => panic!("expected UnsupportedFormat, got {:?}", other),
        }
    }

    #[test]
    fn accepts_zero_extension_fields() {
        let mut buf = raw_header(0, (HEADER_MPQ_SIZE + HEADER_V1_EXTENSION_SIZE) as u32);
        buf.write_u64::<LE>(0).unwrap();
        buf.write_u16::<LE>(0).unwrap();
        buf.write_u16::<LE>(0).unwrap();

        assert!(FileHeader::from_reader(&buf[..]).is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_hash_table() {
        let mut buf = raw_header(0, HEADER_MPQ_SIZE as u32);
        // overwrite the hash table entry count with 3
        buf[20..24].copy_from_slice(&3u32.to_le_bytes());

        match FileHeader::from_reader(&buf[..]) {
            Err(Error::Corrupted) => {}
            other => panic!("expected Corrupted, got {:?}", other),
        }
    }

    #[test]
    fn header_round_trips() {
        let header = FileHeader::new_v0(2048, 4096, 1024, 1280, 8, 3);
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        // the 32-byte header size includes the magic word
        assert_eq!(buf.len(), HEADER_MPQ_SIZE as usize);

        let reparsed = FileHeader::from_reader(&buf[4..]).unwrap();
        assert_eq!(reparsed.archive_size, 2048);
        assert_eq!(reparsed.block_size_shift, 3);
        assert_eq!(reparsed.hash_table_offset, 1024);
        assert_eq!(reparsed.block_table_offset, 1280);
        assert_eq!(reparsed.hash_table_entries, 8);
        assert_eq!(reparsed.block_table_entries, 3);
    }
}
