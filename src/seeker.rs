use std::io::{Read, Seek, SeekFrom};

use byteorder::{ReadBytesExt, LE};
use log::debug;

use super::consts::*;
use super::error::Error;
use super::header::*;

/// Owns the underlying stream of an archive and performs all reads on
/// it. Offsets handed to [`read`](Seeker::read) are relative to the
/// archive header, which need not sit at the start of the stream.
#[derive(Debug)]
pub(crate) struct Seeker<R: Read + Seek> {
    reader: R,
    archive_info: ArchiveInfo,
}

impl<R: Read + Seek> Seeker<R> {
    pub(crate) fn new(mut reader: R) -> Result<Seeker<R>, Error> {
        let archive_info = find_header(&mut reader)?;

        debug!(
            "located MPQ header at offset {} (archive size {})",
            archive_info.header_offset, archive_info.archive_size
        );

        Ok(Seeker {
            reader,
            archive_info,
        })
    }

    fn archive_offset(&self, offset: u64) -> u64 {
        offset + self.archive_info.header_offset
    }

    pub(crate) fn info(&self) -> &ArchiveInfo {
        &self.archive_info
    }

    /// Reads `size` bytes at `offset` relative to the archive header.
    pub(crate) fn read(&mut self, offset: u64, size: u64) -> Result<Vec<u8>, Error> {
        self.read_raw(self.archive_offset(offset), size)
    }

    /// Reads `size` bytes at an absolute offset in the underlying stream.
    pub(crate) fn read_raw(&mut self, offset: u64, size: u64) -> Result<Vec<u8>, Error> {
        if offset + size > self.archive_info.file_size {
            return Err(Error::Corrupted);
        }

        self.reader.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; size as usize];
        self.reader.read_exact(&mut buf)?;

        Ok(buf)
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct TableInfo {
    pub(crate) entries: u64,
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

#[derive(Debug)]
pub(crate) struct ArchiveInfo {
    pub(crate) hash_table_info: TableInfo,
    pub(crate) block_table_info: TableInfo,

    pub(crate) sector_size: u64,
    pub(crate) file_size: u64,
    pub(crate) archive_size: u64,
    pub(crate) header_offset: u64,
    pub(crate) archive_before_tables: bool,
}

impl ArchiveInfo {
    fn new(file_size: u64, header_offset: u64, header: &FileHeader) -> Result<ArchiveInfo, Error> {
        // file content either directly follows the header, or follows
        // the two tables placed right after the header
        let archive_before_tables = u64::from(header.header_size) == HEADER_MPQ_SIZE
            || u64::from(header.hash_table_offset) != HEADER_MPQ_SIZE;

        let hash_table_info = TableInfo {
            entries: u64::from(header.hash_table_entries),
            offset: u64::from(header.hash_table_offset),
            size: u64::from(header.hash_table_entries) * u64::from(HASH_TABLE_ENTRY_SIZE),
        };

        if header_offset + hash_table_info.offset + hash_table_info.size > file_size {
            return Err(Error::Corrupted);
        }

        let block_table_offset = u64::from(header.block_table_offset);
        let mut block_table_entries = u64::from(header.block_table_entries);

        // some archives overstate their block table size; clamp it to
        // the number of whole entries that fit in the remaining stream
        if archive_before_tables {
            let remaining = file_size.saturating_sub(header_offset + block_table_offset);
            block_table_entries =
                block_table_entries.min(remaining / u64::from(BLOCK_TABLE_ENTRY_SIZE));
        }

        let block_table_info = TableInfo {
            entries: block_table_entries,
            offset: block_table_offset,
            size: block_table_entries * u64::from(BLOCK_TABLE_ENTRY_SIZE),
        };

        if header_offset + block_table_info.offset + block_table_info.size > file_size {
            return Err(Error::Corrupted);
        }

        Ok(ArchiveInfo {
            hash_table_info,
            block_table_info,
            sector_size: header.sector_size(),
            file_size,
            archive_size: u64::from(header.archive_size),
            header_offset,
            archive_before_tables,
        })
    }
}

/// Scans the stream for the archive header at 512-byte-aligned
/// offsets, stopping once fewer bytes than a header remain.
fn find_header<R: Read + Seek>(mut reader: R) -> Result<ArchiveInfo, Error> {
    let file_size = reader.seek(SeekFrom::End(0))?;

    let mut candidate = 0u64;
    while candidate + HEADER_MPQ_SIZE <= file_size {
        reader.seek(SeekFrom::Start(candidate))?;

        let magic = reader.read_u32::<LE>()?;
        if magic == HEADER_MPQ_MAGIC {
            let header = FileHeader::from_reader(&mut reader)?;
            return ArchiveInfo::new(file_size, candidate, &header);
        }

        candidate += HEADER_BOUNDARY;
    }

    Err(Error::HeaderNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn minimal_archive_bytes(prefix: usize) -> Vec<u8> {
        // one hash slot, no block entries
        let header = FileHeader::new_v0(48, 4096, 32, 48, 1, 0);
        let mut buf = vec![0u8; prefix];
        header.write(&mut buf).unwrap();
        buf.resize(prefix + 48, 0);
        buf
    }

    #[test]
    fn finds_header_at_stream_start() {
        let buf = minimal_archive_bytes(0);
        let seeker = Seeker::new(Cursor::new(buf)).unwrap();
        assert_eq!(seeker.info().header_offset, 0);
        assert!(seeker.info().archive_before_tables);
    }

    #[test]
    fn finds_header_after_aligned_prefix() {
        let buf = minimal_archive_bytes(1024);
        let seeker = Seeker::new(Cursor::new(buf)).unwrap();
        assert_eq!(seeker.info().header_offset, 1024);
    }

    #[test]
    fn misaligned_magic_is_not_found() {
        let mut buf = vec![0u8; 100];
        let inner = minimal_archive_bytes(0);
        buf.extend_from_slice(&inner);

        match Seeker::new(Cursor::new(buf)) {
            Err(Error::HeaderNotFound) => {}
            other => panic!("expected HeaderNotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn empty_stream_has_no_header() {
        match Seeker::new(Cursor::new(Vec::new())) {
            Err(Error::HeaderNotFound) => {}
            other => panic!("expected HeaderNotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn truncated_table_is_corrupted() {
        let mut buf = minimal_archive_bytes(0);
        // chop off half of the hash table
        buf.truncate(40);

        match Seeker::new(Cursor::new(buf)) {
            Err(Error::Corrupted) => {}
            other => panic!("expected Corrupted, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn reads_are_bounds_checked() {
        let buf = minimal_archive_bytes(0);
        let mut seeker = Seeker::new(Cursor::new(buf)).unwrap();

        assert!(seeker.read(32, 16).is_ok());
        match seeker.read(40, 64) {
            Err(Error::Corrupted) => {}
            other => panic!("expected Corrupted, got {:?}", other.map(|_| ())),
        }
    }
}
