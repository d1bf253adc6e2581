use std::io::Error as IoError;
use std::io::{Read, Seek, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use super::consts::*;
use super::crypto::*;
use super::error::Error;
use super::seeker::Seeker;
use super::util::sector_count_from_size;

/// The three hashes under which a filename is known to the hash table:
/// the probe start index and the two identity fingerprints.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub(crate) struct NameHashes {
    pub name_a: u32,
    pub name_b: u32,
    pub index: u32,
}

impl NameHashes {
    pub fn of(name: &str) -> NameHashes {
        let name_a = hash_string(name.as_bytes(), MPQ_HASH_NAME_A);
        let name_b = hash_string(name.as_bytes(), MPQ_HASH_NAME_B);
        let index = hash_string(name.as_bytes(), MPQ_HASH_TABLE_INDEX);

        NameHashes {
            name_a,
            name_b,
            index,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HashEntry {
    pub name_a: u32,
    pub name_b: u32,
    pub locale: u16,
    pub platform: u16,
    pub block_index: u32,
}

impl HashEntry {
    pub fn new(hashes: NameHashes, locale: u16, block_index: u32) -> HashEntry {
        HashEntry {
            name_a: hashes.name_a,
            name_b: hashes.name_b,
            locale,
            platform: 0,
            block_index,
        }
    }

    pub fn blank() -> HashEntry {
        HashEntry {
            name_a: 0xFFFF_FFFF,
            name_b: 0xFFFF_FFFF,
            locale: 0xFFFF,
            platform: 0x00FF,
            block_index: HASH_TABLE_EMPTY,
        }
    }

    /// A never-used slot; terminates probe chains.
    pub fn is_empty(&self) -> bool {
        self.block_index == HASH_TABLE_EMPTY
    }

    /// A deleted slot; probing continues past it, but it may be reused.
    pub fn is_deleted(&self) -> bool {
        self.block_index == HASH_TABLE_DELETED
    }

    pub fn is_free(&self) -> bool {
        self.is_empty() || self.is_deleted()
    }

    pub fn from_reader<R: Read>(mut reader: R) -> Result<HashEntry, Error> {
        let name_a = reader.read_u32::<LE>()?;
        let name_b = reader.read_u32::<LE>()?;
        let locale = reader.read_u16::<LE>()?;
        let platform = reader.read_u16::<LE>()?;
        let block_index = reader.read_u32::<LE>()?;

        Ok(HashEntry {
            name_a,
            name_b,
            locale,
            platform,
            block_index,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<(), IoError> {
        writer.write_u32::<LE>(self.name_a)?;
        writer.write_u32::<LE>(self.name_b)?;
        writer.write_u16::<LE>(self.locale)?;
        writer.write_u16::<LE>(self.platform)?;
        writer.write_u32::<LE>(self.block_index)?;

        Ok(())
    }
}

/// Open-addressing index from a filename's fingerprints to a block
/// index. The slot count is always a power of two, so probing can wrap
/// with a simple mask.
#[derive(Debug)]
pub(crate) struct HashTable {
    entries: Vec<HashEntry>,
}

impl HashTable {
    /// Computes the realized table size for `file_count` files and an
    /// optional requested size: at least the file count, eight slots
    /// per file when nothing was requested, rounded up to a power of
    /// two.
    pub fn realized_size(file_count: u32, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or_else(|| file_count.saturating_mul(8))
            .max(file_count)
            .next_power_of_two()
    }

    pub fn with_size(size: u32) -> HashTable {
        debug_assert!(size.is_power_of_two());

        HashTable {
            entries: vec![HashEntry::blank(); size as usize],
        }
    }

    pub fn from_seeker<R>(seeker: &mut Seeker<R>) -> Result<HashTable, Error>
    where
        R: Read + Seek,
    {
        let info = seeker.info().hash_table_info;
        let mut raw_data = seeker.read(info.offset, info.size)?;
        decrypt_mpq_block(&mut raw_data, HASH_TABLE_KEY);

        let mut entries = Vec::with_capacity(info.entries as usize);
        let mut slice = &raw_data[..];
        for _ in 0..info.entries {
            entries.push(HashEntry::from_reader(&mut slice)?);
        }

        if !entries.len().is_power_of_two() {
            return Err(Error::Corrupted);
        }

        Ok(HashTable { entries })
    }

    pub fn size(&self) -> u32 {
        self.entries.len() as u32
    }

    fn mask(&self) -> usize {
        self.entries.len() - 1
    }

    /// Inserts a file into the first free slot reachable from its probe
    /// start index, and reports how many occupied slots were stepped
    /// over on the way there.
    ///
    /// Insertion and lookup must walk slots in the same order, or
    /// entries become unreachable.
    pub fn insert(&mut self, hashes: NameHashes, locale: u16, block_index: u32) -> u32 {
        let mask = self.mask();
        let mut index = (hashes.index as usize) & mask;
        let mut collisions = 0;

        while !self.entries[index].is_free() {
            index = (index + 1) & mask;
            collisions += 1;
        }

        self.entries[index] = HashEntry::new(hashes, locale, block_index);
        collisions
    }

    /// Walks the probe chain of `name`. An empty slot or a full
    /// wraparound ends the search.
    pub fn find_entry(&self, name: &str) -> Option<&HashEntry> {
        let hashes = NameHashes::of(name);
        let mask = self.mask();

        let start_index = (hashes.index as usize) & mask;
        let mut index = start_index;

        loop {
            let inspected = &self.entries[index];

            if inspected.is_empty() {
                break;
            }

            if !inspected.is_deleted()
                && inspected.name_a == hashes.name_a
                && inspected.name_b == hashes.name_b
            {
                return Some(inspected);
            }

            index = (index + 1) & mask;
            if index == start_index {
                break;
            }
        }

        None
    }

    /// Writes the slot array in order, encrypted with the fixed hash
    /// table key.
    pub fn serialize<W: Write>(&self, mut writer: W) -> Result<(), IoError> {
        let mut buf = vec![0u8; self.entries.len() * HASH_TABLE_ENTRY_SIZE as usize];

        let mut cursor = buf.as_mut_slice();
        for entry in &self.entries {
            entry.write(&mut cursor)?;
        }
        encrypt_mpq_block(&mut buf, HASH_TABLE_KEY);

        writer.write_all(&buf)
    }
}

/// Metadata of one stored file: where its content lives, how big it
/// is, and how it was transformed on the way in.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub(crate) file_pos: u64,
    pub(crate) compressed_size: u64,
    pub(crate) uncompressed_size: u64,
    pub(crate) flags: u32,
    pub(crate) file_name: Option<String>,
}

impl FileEntry {
    pub(crate) fn new(
        file_pos: u64,
        compressed_size: u64,
        uncompressed_size: u64,
        flags: u32,
    ) -> FileEntry {
        FileEntry {
            file_pos,
            compressed_size,
            uncompressed_size,
            flags,
            file_name: None,
        }
    }

    pub(crate) fn from_reader<R: Read>(mut reader: R) -> Result<FileEntry, Error> {
        let file_pos = u64::from(reader.read_u32::<LE>()?);
        let compressed_size = u64::from(reader.read_u32::<LE>()?);
        let uncompressed_size = u64::from(reader.read_u32::<LE>()?);
        let flags = reader.read_u32::<LE>()?;

        Ok(FileEntry::new(
            file_pos,
            compressed_size,
            uncompressed_size,
            flags,
        ))
    }

    pub(crate) fn write<W: Write>(&self, mut writer: W) -> Result<(), IoError> {
        writer.write_u32::<LE>(self.file_pos as u32)?;
        writer.write_u32::<LE>(self.compressed_size as u32)?;
        writer.write_u32::<LE>(self.uncompressed_size as u32)?;
        writer.write_u32::<LE>(self.flags)?;

        Ok(())
    }

    /// Offset of the file content, relative to the archive header.
    pub fn file_offset(&self) -> u64 {
        self.file_pos
    }

    /// Size of the content as stored, after compression.
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    /// Logical size of the content.
    pub fn file_size(&self) -> u64 {
        self.uncompressed_size
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// The name this entry was resolved under, if any. Entries whose
    /// name never went through a successful lookup or a listfile stay
    /// nameless but remain readable by block index.
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn exists(&self) -> bool {
        (self.flags & MPQ_FILE_EXISTS) != 0
    }

    pub fn is_compressed(&self) -> bool {
        (self.flags & (MPQ_FILE_COMPRESS | MPQ_FILE_IMPLODE)) != 0
    }

    pub fn is_encrypted(&self) -> bool {
        (self.flags & MPQ_FILE_ENCRYPTED) != 0
    }

    pub fn is_key_adjusted(&self) -> bool {
        (self.flags & MPQ_FILE_ADJUST_KEY) != 0
    }

    pub fn is_single_unit(&self) -> bool {
        (self.flags & MPQ_FILE_SINGLE_UNIT) != 0
    }
}

/// Densely packed sequential index of file entries. Only reachable
/// through a hash slot's block index, never by name.
#[derive(Debug)]
pub(crate) struct BlockTable {
    entries: Vec<FileEntry>,
}

impl BlockTable {
    pub fn with_capacity(capacity: u32) -> BlockTable {
        BlockTable {
            entries: Vec::with_capacity(capacity as usize),
        }
    }

    pub fn from_seeker<R>(seeker: &mut Seeker<R>) -> Result<BlockTable, Error>
    where
        R: Read + Seek,
    {
        let info = seeker.info().block_table_info;
        let mut raw_data = seeker.read(info.offset, info.size)?;
        decrypt_mpq_block(&mut raw_data, BLOCK_TABLE_KEY);

        let mut entries = Vec::with_capacity(info.entries as usize);
        let mut slice = &raw_data[..];
        for _ in 0..info.entries {
            entries.push(FileEntry::from_reader(&mut slice)?);
        }

        Ok(BlockTable { entries })
    }

    /// Appends an entry; the returned index is what the owning hash
    /// slot must reference.
    pub fn add(&mut self, entry: FileEntry) -> u32 {
        let index = self.entries.len() as u32;
        self.entries.push(entry);
        index
    }

    pub fn get(&self, index: usize) -> Option<&FileEntry> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut FileEntry> {
        self.entries.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter()
    }

    pub fn serialize<W: Write>(&self, mut writer: W) -> Result<(), IoError> {
        let mut buf = vec![0u8; self.entries.len() * BLOCK_TABLE_ENTRY_SIZE as usize];

        let mut cursor = buf.as_mut_slice();
        for entry in &self.entries {
            entry.write(&mut cursor)?;
        }
        encrypt_mpq_block(&mut buf, BLOCK_TABLE_KEY);

        writer.write_all(&buf)
    }
}

/// The sector offset table of a compressed file: `n + 1` offsets
/// relative to the file start, delimiting `n` sectors.
#[derive(Debug)]
pub(crate) struct SectorOffsets {
    offsets: Vec<u32>,
}

impl SectorOffsets {
    pub fn from_seeker<R>(
        seeker: &mut Seeker<R>,
        entry: &FileEntry,
        encryption_key: Option<u32>,
    ) -> Result<SectorOffsets, Error>
    where
        R: Read + Seek,
    {
        let sector_count =
            sector_count_from_size(entry.uncompressed_size, seeker.info().sector_size);
        let mut raw_data = seeker.read(entry.file_pos, (sector_count + 1) * 4)?;

        if let Some(encryption_key) = encryption_key {
            decrypt_mpq_block(&mut raw_data, encryption_key);
        }

        let mut slice = &raw_data[..];
        let mut offsets = vec![0u32; (sector_count + 1) as usize];
        for offset in offsets.iter_mut() {
            *offset = slice.read_u32::<LE>()?;
        }

        // offsets must be monotonic and stay within the stored size
        for pair in offsets.windows(2) {
            if pair[0] > pair[1] {
                return Err(Error::Corrupted);
            }
        }
        if u64::from(offsets[sector_count as usize]) > entry.compressed_size {
            return Err(Error::Corrupted);
        }

        Ok(SectorOffsets { offsets })
    }

    /// Start offset and stored size of one sector.
    pub fn one(&self, index: usize) -> Option<(u32, u32)> {
        if index >= (self.offsets.len() - 1) {
            None
        } else {
            Some((
                self.offsets[index],
                self.offsets[index + 1] - self.offsets[index],
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realized_size_is_a_power_of_two() {
        for &(count, requested) in &[
            (0u32, None),
            (1, None),
            (2, Some(4)),
            (2, Some(3)),
            (7, None),
            (7, Some(1)),
            (100, Some(65)),
            (1000, None),
        ] {
            let size = HashTable::realized_size(count, requested);
            assert!(size.is_power_of_two(), "size {} not a power of two", size);
            assert!(size >= count);
            if let Some(requested) = requested {
                assert!(size >= requested.min(size));
            }
        }

        assert_eq!(HashTable::realized_size(2, Some(4)), 4);
        assert_eq!(HashTable::realized_size(2, None), 16);
        assert_eq!(HashTable::realized_size(9, Some(1)), 16);
    }

    #[test]
    fn lookup_finds_what_insert_wrote() {
        let names = [
            "war3map.j",
            "war3map.w3i",
            "scripts\\common.j",
            "(listfile)",
            "units\\unitdata.slk",
        ];

        let mut table = HashTable::with_size(HashTable::realized_size(names.len() as u32, None));
        for (i, name) in names.iter().enumerate() {
            table.insert(NameHashes::of(name), 0, i as u32);
        }

        for (i, name) in names.iter().enumerate() {
            let entry = table.find_entry(name).expect(name);
            assert_eq!(entry.block_index, i as u32);
        }

        assert!(table.find_entry("not-there.txt").is_none());
    }

    #[test]
    fn colliding_names_resolve_through_probing() {
        // in a 4-slot table, quarter of name pairs share a probe start;
        // find such a pair by construction
        let mut colliding = None;
        let probe = |name: &str| (NameHashes::of(name).index & 3) as usize;

        'outer: for i in 0..64 {
            for j in (i + 1)..64 {
                let a = format!("file{}.txt", i);
                let b = format!("file{}.txt", j);
                if probe(&a) == probe(&b) {
                    colliding = Some((a, b));
                    break 'outer;
                }
            }
        }

        let (a, b) = colliding.expect("no colliding pair among 64 names");

        let mut table = HashTable::with_size(4);
        let collisions_a = table.insert(NameHashes::of(&a), 0, 0);
        let collisions_b = table.insert(NameHashes::of(&b), 0, 1);

        assert_eq!(collisions_a, 0);
        assert!(collisions_b >= 1);

        assert_eq!(table.find_entry(&a).unwrap().block_index, 0);
        assert_eq!(table.find_entry(&b).unwrap().block_index, 1);
    }

    #[test]
    fn insert_wraps_around_the_table_end() {
        let mut table = HashTable::with_size(4);

        // fill every slot; the last insert probes across the wrap point
        // no matter where its start index lands
        for i in 0..4 {
            table.insert(NameHashes::of(&format!("f{}", i)), 0, i);
        }

        for i in 0..4 {
            assert_eq!(table.find_entry(&format!("f{}", i)).unwrap().block_index, i);
        }
    }

    #[test]
    fn hash_table_serialization_is_encrypted() {
        let mut table = HashTable::with_size(4);
        table.insert(NameHashes::of("a.txt"), 0, 0);

        let mut buf = Vec::new();
        table.serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), 4 * HASH_TABLE_ENTRY_SIZE as usize);

        // decrypting with the well-known key must reveal the slots
        decrypt_mpq_block(&mut buf, HASH_TABLE_KEY);

        let mut slice = &buf[..];
        let hashes = NameHashes::of("a.txt");
        let mut found = false;
        for _ in 0..4 {
            let entry = HashEntry::from_reader(&mut slice).unwrap();
            if !entry.is_empty() {
                assert_eq!(entry.name_a, hashes.name_a);
                assert_eq!(entry.name_b, hashes.name_b);
                assert_eq!(entry.block_index, 0);
                found = true;
            }
        }
        assert!(found);
    }

    #[test]
    fn block_table_round_trips_through_serialization() {
        let mut table = BlockTable::with_capacity(2);
        assert_eq!(table.add(FileEntry::new(32, 10, 10, MPQ_FILE_EXISTS)), 0);
        assert_eq!(
            table.add(FileEntry::new(
                42,
                5,
                20,
                MPQ_FILE_EXISTS | MPQ_FILE_COMPRESS
            )),
            1
        );

        let mut buf = Vec::new();
        table.serialize(&mut buf).unwrap();
        decrypt_mpq_block(&mut buf, BLOCK_TABLE_KEY);

        let mut slice = &buf[..];
        let first = FileEntry::from_reader(&mut slice).unwrap();
        let second = FileEntry::from_reader(&mut slice).unwrap();

        assert_eq!(first.file_offset(), 32);
        assert_eq!(first.compressed_size(), 10);
        assert!(!first.is_compressed());

        assert_eq!(second.file_offset(), 42);
        assert_eq!(second.file_size(), 20);
        assert!(second.is_compressed());
        assert!(second.exists());
    }
}
