use std::borrow::Cow;
use std::cmp::min;
use std::io::{Seek, SeekFrom, Write};

use indexmap::IndexMap;
use log::{debug, trace};

use super::codec::{encode_block, Codec, DeflateCodec};
use super::consts::*;
use super::crypto::*;
use super::error::Error;
use super::header::FileHeader;
use super::table::*;

/// Physical ordering of file content and tables inside an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveLayout {
    /// File content directly follows the header; the two tables come
    /// last. This is the layout produced by the official tools.
    ArchiveBeforeTables,
    /// Both tables directly follow the header. Recognized by the
    /// format, but writing it is not supported.
    TablesBeforeArchive,
}

/// Represents various options that can be used when adding a file to
/// an archive.
#[derive(Debug, Clone, Copy)]
pub struct FileOptions {
    /// Whether to compress the file with the creator's codec.
    pub compress: bool,
    /// Whether to encrypt the file using MPQ's encryption scheme. The
    /// encryption key is derived from the file name, so in practice
    /// this is pretty useless.
    pub encrypt: bool,
    /// If the file is encrypted, this will "adjust" the encryption key
    /// by mixing the file's position into it.
    pub adjust_key: bool,
    /// Whether to store the file as a single unit instead of splitting
    /// it into sectors. Single-unit files cannot be seeked in cheaply.
    pub single_unit: bool,
    /// Locale tag recorded in the file's hash slot.
    pub locale: u16,
}

impl Default for FileOptions {
    fn default() -> FileOptions {
        FileOptions {
            compress: false,
            encrypt: false,
            adjust_key: false,
            single_unit: false,
            locale: 0,
        }
    }
}

impl FileOptions {
    fn flags(self) -> u32 {
        let mut flags = MPQ_FILE_EXISTS;

        if self.encrypt {
            flags |= MPQ_FILE_ENCRYPTED;
        }

        if self.adjust_key {
            flags |= MPQ_FILE_ADJUST_KEY;
        }

        if self.compress {
            flags |= MPQ_FILE_COMPRESS;
        }

        if self.single_unit {
            flags |= MPQ_FILE_SINGLE_UNIT;
        }

        flags
    }
}

/// A file queued to be written, together with the placement data the
/// creator fills in while laying out the archive.
#[derive(Debug)]
struct PendingFile {
    file_name: String,
    contents: Vec<u8>,
    options: FileOptions,

    offset: u64,
    compressed_size: u64,
    hash_collisions: u32,
}

impl PendingFile {
    fn new<S: Into<String>, C: Into<Vec<u8>>>(
        name: S,
        contents: C,
        options: FileOptions,
    ) -> PendingFile {
        PendingFile {
            file_name: name.into(),
            contents: contents.into(),
            options,
            offset: 0,
            compressed_size: 0,
            hash_collisions: 0,
        }
    }
}

/// Creator capable of writing MPQ format version 0 archives.
///
/// Holds all pending files in memory until asked to
/// [`write`](Creator::write) them to a writer.
///
/// No `(listfile)` is invented on the way out; callers that want one
/// add it like any other file.
pub struct Creator {
    added_files: IndexMap<NameHashes, PendingFile>,

    sector_size: u64,
    hash_table_size: Option<u32>,
    layout: ArchiveLayout,
    compression_tag: u8,
    codec: Box<dyn Codec>,
}

impl Default for Creator {
    fn default() -> Creator {
        Creator {
            added_files: IndexMap::new(),
            sector_size: 0x10000,
            hash_table_size: None,
            layout: ArchiveLayout::ArchiveBeforeTables,
            compression_tag: COMPRESSION_ZLIB,
            codec: Box::new(DeflateCodec),
        }
    }
}

impl Creator {
    /// Requests a hash table size. The realized size is still at least
    /// the file count, rounded up to a power of two.
    pub fn set_hash_table_size(&mut self, size: u32) {
        self.hash_table_size = Some(size);
    }

    /// Sets the sector size; must be a power-of-two multiple of 512.
    pub fn set_sector_size(&mut self, sector_size: u64) {
        debug_assert!(sector_size >= BLOCK_SIZE_MODIFIER);
        debug_assert!(sector_size.is_power_of_two());

        self.sector_size = sector_size;
    }

    pub fn set_layout(&mut self, layout: ArchiveLayout) {
        self.layout = layout;
    }

    /// Replaces the codec used to compress added files, and the tag
    /// recorded on the blocks it produces.
    pub fn set_codec(&mut self, codec: Box<dyn Codec>, compression_tag: u8) {
        self.codec = codec;
        self.compression_tag = compression_tag;
    }

    /// Adds a file to be later written to the archive.
    ///
    /// All forward slashes (`/`) in the file path will be converted to
    /// backward slashes (`\`). If a file was already added under the
    /// same name, the first addition wins.
    pub fn add_file<C>(&mut self, file_name: &str, contents: C, options: FileOptions)
    where
        C: Into<Vec<u8>>,
    {
        let file_name = file_name.replace('/', "\\");
        let hashes = NameHashes::of(&file_name);

        self.added_files
            .entry(hashes)
            .or_insert_with(|| PendingFile::new(file_name, contents, options));
    }

    /// Writes out the entire archive to the specified writer.
    ///
    /// The archive starts at the writer's current position rounded up
    /// to the next multiple of 512. Content is laid out as
    /// `[header][files in insertion order][hash table][block table]`,
    /// and the header is written last, once every offset is known.
    pub fn write<W>(self, mut writer: W) -> Result<(), Error>
    where
        W: Write + Seek,
    {
        let Creator {
            mut added_files,
            sector_size,
            hash_table_size,
            layout,
            compression_tag,
            codec,
        } = self;

        if layout == ArchiveLayout::TablesBeforeArchive {
            return Err(Error::NotSupported {
                reason: "writing archives with tables before the file content",
            });
        }

        let file_count = added_files.len() as u32;
        let mut hash_table =
            HashTable::with_size(HashTable::realized_size(file_count, hash_table_size));
        let mut block_table = BlockTable::with_capacity(file_count);

        debug!(
            "writing archive: {} files, {} hash slots",
            file_count,
            hash_table.size()
        );

        let current_pos = writer.seek(SeekFrom::Current(0))?;
        // starting from the current pos, this will find the closest
        // valid header position
        let archive_start =
            ((current_pos + (HEADER_BOUNDARY - 1)) / HEADER_BOUNDARY) * HEADER_BOUNDARY;
        writer.seek(SeekFrom::Start(archive_start))?;

        // leave a hole for the header; its contents are only known
        // once everything else has been placed
        writer.seek(SeekFrom::Current(HEADER_MPQ_SIZE as i64))?;

        for (hashes, file) in added_files.iter_mut() {
            write_file(
                sector_size,
                archive_start,
                &mut writer,
                file,
                compression_tag,
                codec.as_ref(),
            )?;

            file.hash_collisions = hash_table.insert(
                *hashes,
                file.options.locale,
                block_table.len() as u32,
            );

            trace!(
                "placed {} at offset {} ({} probe collisions)",
                file.file_name,
                file.offset,
                file.hash_collisions
            );

            block_table.add(FileEntry::new(
                file.offset,
                file.compressed_size,
                file.contents.len() as u64,
                file.options.flags(),
            ));
        }

        let hash_table_pos = writer.seek(SeekFrom::Current(0))?;
        hash_table.serialize(&mut writer)?;

        let block_table_pos = writer.seek(SeekFrom::Current(0))?;
        block_table.serialize(&mut writer)?;

        let archive_end = writer.seek(SeekFrom::Current(0))?;
        let header = FileHeader::new_v0(
            (archive_end - archive_start) as u32,
            sector_size as u32,
            (hash_table_pos - archive_start) as u32,
            (block_table_pos - archive_start) as u32,
            hash_table.size(),
            block_table.len() as u32,
        );

        writer.seek(SeekFrom::Start(archive_start))?;
        header.write(&mut writer)?;
        writer.seek(SeekFrom::Start(archive_end))?;

        Ok(())
    }
}

/// Writes out the specified file starting at the writer's current
/// position, filling in its offset and stored size.
///
/// Sector-split files marked for compression get a sector offset table
/// followed by their sectors, each compressed only when that shrinks
/// it. Single-unit files are one tagged block without an offset table.
/// Encryption, when requested, happens after compression.
fn write_file<W>(
    sector_size: u64,
    archive_start: u64,
    mut writer: W,
    file: &mut PendingFile,
    compression_tag: u8,
    codec: &dyn Codec,
) -> Result<(), Error>
where
    W: Write + Seek,
{
    use super::util::sector_count_from_size;
    use byteorder::{WriteBytesExt, LE};

    let options = file.options;
    let sector_count = sector_count_from_size(file.contents.len() as u64, sector_size);
    let file_start = writer.seek(SeekFrom::Current(0))?;

    let encryption_key = if options.encrypt {
        Some(calculate_file_key(
            &file.file_name,
            (file_start - archive_start) as u32,
            file.contents.len() as u32,
            options.adjust_key,
        ))
    } else {
        None
    };

    if options.single_unit {
        let mut buf = if options.compress {
            encode_block(&file.contents, compression_tag, codec)?
        } else {
            Cow::Borrowed(&file.contents[..])
        };

        if let Some(key) = encryption_key {
            encrypt_mpq_block(buf.to_mut(), key);
        }

        writer.write_all(&buf)?;

        file.offset = file_start - archive_start;
        file.compressed_size = buf.len() as u64;

        Ok(())
    } else if options.compress {
        let mut offsets: Vec<u32> = Vec::new();

        // reserve room for the sector offset table in front of the
        // sectors themselves
        let first_sector_start = ((sector_count + 1) * 4) as u32;
        writer.seek(SeekFrom::Current(i64::from(first_sector_start)))?;
        offsets.push(first_sector_start);

        for i in 0..sector_count {
            let sector_start = i * sector_size;
            let sector_end = min((i + 1) * sector_size, file.contents.len() as u64);
            let data = &file.contents[sector_start as usize..sector_end as usize];

            let mut block = encode_block(data, compression_tag, codec)?;

            if let Some(key) = encryption_key.map(|k| k.overflowing_add(i as u32).0) {
                encrypt_mpq_block(block.to_mut(), key);
            }

            writer.write_all(&block)?;

            // the end of this sector is the start of the next one
            let current_offset = writer.seek(SeekFrom::Current(0))?;
            offsets.push((current_offset - file_start) as u32);
        }

        let file_end = writer.seek(SeekFrom::Current(0))?;

        // go back and fill in the sector offset table
        {
            let mut buf = vec![0u8; offsets.len() * 4];
            let mut cursor = buf.as_mut_slice();
            for offset in &offsets {
                cursor.write_u32::<LE>(*offset)?;
            }

            if let Some(key) = encryption_key.map(|k| k.overflowing_sub(1).0) {
                encrypt_mpq_block(&mut buf, key);
            }

            writer.seek(SeekFrom::Start(file_start))?;
            writer.write_all(&buf)?;
        }

        writer.seek(SeekFrom::Start(file_end))?;

        file.offset = file_start - archive_start;
        file.compressed_size = file_end - file_start;

        Ok(())
    } else {
        for i in 0..sector_count {
            let sector_start = i * sector_size;
            let sector_end = min((i + 1) * sector_size, file.contents.len() as u64);
            let data = &file.contents[sector_start as usize..sector_end as usize];
            let mut buf = Cow::Borrowed(data);

            if let Some(key) = encryption_key.map(|k| k.overflowing_add(i as u32).0) {
                encrypt_mpq_block(buf.to_mut(), key);
            }

            writer.write_all(&buf)?;
        }

        let file_end = writer.seek(SeekFrom::Current(0))?;

        file.offset = file_start - archive_start;
        file.compressed_size = file_end - file_start;

        Ok(())
    }
}
