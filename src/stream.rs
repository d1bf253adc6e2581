use std::cmp::min;
use std::io;
use std::io::{Read, Seek, SeekFrom};

use super::codec::{decode_block, Codec};
use super::crypto::*;
use super::error::Error;
use super::seeker::Seeker;
use super::table::{FileEntry, SectorOffsets};

/// Random-access reader over the logical (decompressed, decrypted)
/// bytes of one stored file.
///
/// Content is fetched and transformed one sector at a time, with the
/// most recently used sector kept decoded, so sequential reads touch
/// the underlying stream once per sector and seeks only pay for the
/// sectors they actually land in.
///
/// The stream mutably borrows its archive: two streams of the same
/// archive cannot be read in an interleaved fashion, since they share
/// a single seek position underneath.
pub struct FileStream<'a, R: Read + Seek> {
    seeker: &'a mut Seeker<R>,
    codec: &'a dyn Codec,
    entry: FileEntry,
    encryption_key: Option<u32>,
    sector_size: u64,
    offsets: Option<SectorOffsets>,
    position: u64,
    current_sector: Option<(u64, Vec<u8>)>,
}

impl<'a, R: Read + Seek> FileStream<'a, R> {
    pub(crate) fn new(
        seeker: &'a mut Seeker<R>,
        codec: &'a dyn Codec,
        entry: FileEntry,
    ) -> Result<FileStream<'a, R>, Error> {
        let sector_size = seeker.info().sector_size;

        let encryption_key = if entry.is_encrypted() {
            // the key is derived from the base name; an entry that was
            // never resolved to a name cannot be decrypted
            let name = entry.file_name().ok_or(Error::NotSupported {
                reason: "cannot decrypt a file whose name is unknown",
            })?;

            Some(calculate_file_key(
                name,
                entry.file_pos as u32,
                entry.uncompressed_size as u32,
                entry.is_key_adjusted(),
            ))
        } else {
            None
        };

        // only compressed multi-sector files carry a sector offset
        // table; it is encrypted with the file key minus one
        let offsets = if entry.is_compressed() && !entry.is_single_unit() {
            Some(SectorOffsets::from_seeker(
                seeker,
                &entry,
                encryption_key.map(|k| k.overflowing_sub(1).0),
            )?)
        } else {
            None
        };

        Ok(FileStream {
            seeker,
            codec,
            entry,
            encryption_key,
            sector_size,
            offsets,
            position: 0,
            current_sector: None,
        })
    }

    /// The entry this stream reads from.
    pub fn entry(&self) -> &FileEntry {
        &self.entry
    }

    /// Logical size of the file.
    pub fn len(&self) -> u64 {
        self.entry.uncompressed_size
    }

    pub fn is_empty(&self) -> bool {
        self.entry.uncompressed_size == 0
    }

    // A single-unit file is one whole-body sector regardless of the
    // archive's sector size.
    fn logical_sector_size(&self) -> u64 {
        if self.entry.is_single_unit() {
            self.entry.uncompressed_size.max(1)
        } else {
            self.sector_size
        }
    }

    fn expected_sector_size(&self, index: u64) -> u64 {
        let start = index * self.logical_sector_size();
        min(
            self.logical_sector_size(),
            self.entry.uncompressed_size - start,
        )
    }

    fn fetch_sector(&mut self, index: u64) -> Result<Vec<u8>, Error> {
        let expected = self.expected_sector_size(index);

        if self.entry.is_single_unit() {
            let raw = self
                .seeker
                .read(self.entry.file_pos, self.entry.compressed_size)?;
            return decode_block(&raw, expected, self.encryption_key, self.codec);
        }

        let sector_key = self.encryption_key.map(|k| k.overflowing_add(index as u32).0);

        match &self.offsets {
            Some(offsets) => {
                let (offset, size) = offsets.one(index as usize).ok_or(Error::Corrupted)?;
                let raw = self
                    .seeker
                    .read(self.entry.file_pos + u64::from(offset), u64::from(size))?;

                decode_block(&raw, expected, sector_key, self.codec)
            }
            None => {
                // uncompressed files have no offset table; sectors are
                // addressed arithmetically
                let start = index * self.sector_size;
                let mut raw = self.seeker.read(self.entry.file_pos + start, expected)?;

                if let Some(key) = sector_key {
                    decrypt_mpq_block(&mut raw, key);
                }

                Ok(raw)
            }
        }
    }

    fn sector_bytes(&mut self, index: u64) -> Result<&[u8], Error> {
        let cached = match &self.current_sector {
            Some((cached_index, _)) => *cached_index == index,
            None => false,
        };

        if !cached {
            let data = self.fetch_sector(index)?;
            self.current_sector = Some((index, data));
        }

        match &self.current_sector {
            Some((_, data)) => Ok(data),
            None => Err(Error::Corrupted),
        }
    }
}

fn to_io_error(error: Error) -> io::Error {
    match error {
        Error::Io { cause } => cause,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

impl<'a, R: Read + Seek> Read for FileStream<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let file_size = self.entry.uncompressed_size;
        let mut written = 0;

        while written < buf.len() && self.position < file_size {
            let sector_size = self.logical_sector_size();
            let sector_index = self.position / sector_size;
            let offset_in_sector = (self.position - sector_index * sector_size) as usize;

            let sector = self.sector_bytes(sector_index).map_err(to_io_error)?;
            let available = sector.len().saturating_sub(offset_in_sector);
            let count = min(buf.len() - written, available);

            if count == 0 {
                break;
            }

            buf[written..written + count]
                .copy_from_slice(&sector[offset_in_sector..offset_in_sector + count]);

            written += count;
            self.position += count as u64;
        }

        Ok(written)
    }
}

impl<'a, R: Read + Seek> Seek for FileStream<'a, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(offset) => add_offset(self.entry.uncompressed_size, offset),
            SeekFrom::Current(offset) => add_offset(self.position, offset),
        };

        match target {
            Some(target) => {
                self.position = target;
                Ok(target)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before the start of the file",
            )),
        }
    }
}

fn add_offset(base: u64, offset: i64) -> Option<u64> {
    if offset >= 0 {
        base.checked_add(offset as u64)
    } else {
        base.checked_sub(offset.unsigned_abs())
    }
}
