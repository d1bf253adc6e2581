use std::fs;
use std::io::{BufRead, BufReader, Read, Seek, Write};
use std::path::Path;

use log::debug;

use super::codec::{Codec, DeflateCodec};
use super::consts::*;
use super::error::Error;
use super::header::FileHeader;
use super::seeker::Seeker;
use super::stream::FileStream;
use super::table::*;

/// Implementation of a MoPaQ archive viewer.
///
/// Works on any reader that implements `Read + Seek` and takes
/// exclusive ownership of it for the lifetime of the archive; all
/// reads, including those of [`FileStream`]s opened from it, go
/// through that single seek position.
pub struct Archive<R: Read + Seek> {
    seeker: Seeker<R>,
    hash_table: HashTable,
    block_table: BlockTable,
    codec: Box<dyn Codec>,
}

impl<R: Read + Seek> Archive<R> {
    /// Tries to open an MPQ archive from the specified `reader`.
    ///
    /// Immediately, this will perform the following:
    ///
    /// 1. Locate and validate an MPQ header.
    /// 2. Locate and decrypt the hash table.
    /// 3. Locate and decrypt the block table.
    ///
    /// If any of these steps fail, the archive is deemed corrupted and
    /// an appropriate error is returned. No other operations are
    /// performed.
    pub fn open(reader: R) -> Result<Archive<R>, Error> {
        Archive::open_with_codec(reader, Box::new(DeflateCodec))
    }

    /// Like [`open`](Archive::open), but decompresses file content
    /// through the supplied codec instead of the default one.
    pub fn open_with_codec(reader: R, codec: Box<dyn Codec>) -> Result<Archive<R>, Error> {
        let mut seeker = Seeker::new(reader)?;

        let hash_table = HashTable::from_seeker(&mut seeker)?;
        let block_table = BlockTable::from_seeker(&mut seeker)?;

        debug!(
            "opened archive: {} hash slots, {} block entries",
            hash_table.size(),
            block_table.len()
        );

        Ok(Archive {
            seeker,
            hash_table,
            block_table,
            codec,
        })
    }

    /// Checks whether a file with the given name is present.
    ///
    /// Name resolution is case-insensitive and treats backslashes and
    /// forward slashes as the same character.
    pub fn file_exists(&self, name: &str) -> bool {
        self.find_index(name).is_some()
    }

    /// Resolves a name to its block table index.
    pub fn find_index(&self, name: &str) -> Option<usize> {
        self.hash_table
            .find_entry(name)
            .map(|hash| hash.block_index as usize)
    }

    /// Opens a file by name, returning a seekable stream over its
    /// logical bytes. The resolved name is remembered on the entry.
    pub fn open_file(&mut self, name: &str) -> Result<FileStream<'_, R>, Error> {
        let index = self
            .find_index(name)
            .ok_or_else(|| Error::file_not_found(name))?;

        let entry = self.block_table.get_mut(index).ok_or(Error::Corrupted)?;
        entry.file_name = Some(name.to_string());
        let entry = entry.clone();

        FileStream::new(&mut self.seeker, self.codec.as_ref(), entry)
    }

    /// Opens a file by its block table index. Files that were never
    /// resolved by name are readable this way, unless they are
    /// encrypted (their key depends on the name).
    pub fn open_file_by_index(&mut self, index: usize) -> Result<FileStream<'_, R>, Error> {
        let entry = self.block_table.get(index).ok_or(Error::Corrupted)?.clone();

        FileStream::new(&mut self.seeker, self.codec.as_ref(), entry)
    }

    /// Reads a file's entire contents.
    pub fn read_file(&mut self, name: &str) -> Result<Vec<u8>, Error> {
        let mut stream = self.open_file(name)?;
        let mut buf = Vec::with_capacity(stream.len() as usize);
        stream.read_to_end(&mut buf)?;

        Ok(buf)
    }

    /// Tries to resolve `name` against the hash table, remembering it
    /// on the matching block entry.
    pub fn add_filename(&mut self, name: &str) -> bool {
        let index = match self.find_index(name) {
            Some(index) => index,
            None => return false,
        };

        match self.block_table.get_mut(index) {
            Some(entry) => {
                entry.file_name = Some(name.to_string());
                true
            }
            None => false,
        }
    }

    /// Resolves every newline-delimited name read from `reader`,
    /// tolerating names with no matching entry.
    ///
    /// Returns the number of names that resolved to an entry.
    pub fn add_filenames<S: Read>(&mut self, reader: S) -> Result<usize, Error> {
        let mut resolved = 0;

        for line in BufReader::new(reader).lines() {
            let line = line?;
            if !line.is_empty() && self.add_filename(&line) {
                resolved += 1;
            }
        }

        Ok(resolved)
    }

    /// Resolves all names found in the archive's `(listfile)`, if it
    /// has one. Returns whether a listfile was found.
    pub fn add_listfile_filenames(&mut self) -> Result<bool, Error> {
        if !self.file_exists(LISTFILE_NAME) {
            return Ok(false);
        }

        let listfile = self.read_file(LISTFILE_NAME)?;
        self.add_filenames(&listfile[..])?;

        Ok(true)
    }

    /// If the archive contains a `(listfile)`, parses it and returns
    /// all names listed there.
    pub fn files(&mut self) -> Option<Vec<String>> {
        let listfile = self.read_file(LISTFILE_NAME).ok()?;

        let list = String::from_utf8_lossy(&listfile)
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| line.to_string())
            .collect();

        Some(list)
    }

    /// All entries, in block table order.
    pub fn entries(&self) -> impl Iterator<Item = &FileEntry> {
        self.block_table.iter()
    }

    /// The entry at the given block table index.
    pub fn get(&self, index: usize) -> Option<&FileEntry> {
        self.block_table.get(index)
    }

    /// Number of entries in the block table.
    pub fn len(&self) -> usize {
        self.block_table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.block_table.len() == 0
    }

    /// Size in bytes of the sectors files are split into.
    pub fn sector_size(&self) -> u64 {
        self.seeker.info().sector_size
    }

    /// Offset of the archive header within the underlying stream.
    pub fn header_offset(&self) -> u64 {
        self.seeker.info().header_offset
    }
}

impl Archive<fs::File> {
    /// Rewrites the archive at `input_path` to `output_path` with the
    /// content of one file replaced.
    ///
    /// The replacement is spliced in raw: the rewritten entry loses its
    /// compression and encryption flags, and every entry stored after
    /// it has its offset shifted by the difference in size. Everything
    /// else, including the pre-header prefix and the encrypted hash
    /// table bytes, is copied verbatim.
    ///
    /// Only archives whose file content precedes the tables can be
    /// rewritten this way; others fail with
    /// [`NotSupported`](Error::NotSupported).
    ///
    /// The output is streamed directly to `output_path` and is left
    /// incomplete if an I/O error interrupts the rewrite; callers that
    /// need atomicity should write to a temporary path and rename.
    pub fn replace_file<P, Q>(
        input_path: P,
        output_path: Q,
        filename: &str,
        contents: &[u8],
    ) -> Result<(), Error>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let input = fs::File::open(input_path)?;
        let mut archive = Archive::open(input)?;

        let index = archive
            .find_index(filename)
            .ok_or_else(|| Error::file_not_found(filename))?;
        let replaced = archive.block_table.get(index).ok_or(Error::Corrupted)?.clone();

        let info = archive.seeker.info();
        if !info.archive_before_tables {
            return Err(Error::NotSupported {
                reason: "cannot replace a file when the tables precede the archive",
            });
        }

        let header_offset = info.header_offset;
        let archive_size = info.archive_size;
        let sector_size = info.sector_size;
        let hash_table = info.hash_table_info;
        let block_table = info.block_table_info;

        let size_delta = contents.len() as i64 - replaced.compressed_size as i64;

        debug!(
            "replacing {} ({} -> {} bytes, delta {})",
            filename,
            replaced.compressed_size,
            contents.len(),
            size_delta
        );

        if replaced.file_pos < HEADER_MPQ_SIZE
            || replaced.file_pos + replaced.compressed_size > hash_table.offset
        {
            return Err(Error::Corrupted);
        }

        let mut output = fs::File::create(output_path)?;

        // pre-header prefix, byte for byte
        if header_offset > 0 {
            let prefix = archive.seeker.read_raw(0, header_offset)?;
            output.write_all(&prefix)?;
        }

        // header with the trailing layout shifted by the size delta
        let header = FileHeader::new_v0(
            apply_delta(archive_size, size_delta)? as u32,
            sector_size as u32,
            apply_delta(hash_table.offset, size_delta)? as u32,
            apply_delta(block_table.offset, size_delta)? as u32,
            hash_table.entries as u32,
            block_table.entries as u32,
        );
        header.write(&mut output)?;

        // stored files up to the replaced entry
        let before = archive
            .seeker
            .read(HEADER_MPQ_SIZE, replaced.file_pos - HEADER_MPQ_SIZE)?;
        output.write_all(&before)?;

        // the replacement itself, stored raw
        output.write_all(contents)?;

        // stored files between the replaced entry and the tables
        let after_start = replaced.file_pos + replaced.compressed_size;
        let after = archive
            .seeker
            .read(after_start, hash_table.offset - after_start)?;
        output.write_all(&after)?;

        // names are unaffected, so the encrypted hash table bytes are
        // copied verbatim
        let hash_table_bytes = archive.seeker.read(hash_table.offset, hash_table.size)?;
        output.write_all(&hash_table_bytes)?;

        // the block table is rebuilt: one entry changes its size and
        // loses its transformation flags, later entries shift
        let mut rewritten = BlockTable::with_capacity(block_table.entries as u32);
        for entry in archive.block_table.iter() {
            let is_replaced = entry.file_pos == replaced.file_pos;

            let file_pos = if entry.file_pos > replaced.file_pos {
                apply_delta(entry.file_pos, size_delta)?
            } else {
                entry.file_pos
            };

            let (compressed_size, uncompressed_size, flags) = if is_replaced {
                let stripped = entry.flags
                    & !(MPQ_FILE_COMPRESS
                        | MPQ_FILE_IMPLODE
                        | MPQ_FILE_ENCRYPTED
                        | MPQ_FILE_ADJUST_KEY);

                (contents.len() as u64, contents.len() as u64, stripped)
            } else {
                (entry.compressed_size, entry.uncompressed_size, entry.flags)
            };

            rewritten.add(FileEntry::new(
                file_pos,
                compressed_size,
                uncompressed_size,
                flags,
            ));
        }

        rewritten.serialize(&mut output)?;

        Ok(())
    }
}

fn apply_delta(value: u64, delta: i64) -> Result<u64, Error> {
    let shifted = value as i64 + delta;
    if shifted < 0 {
        return Err(Error::Corrupted);
    }

    Ok(shifted as u64)
}
