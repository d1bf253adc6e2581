// Magic identifier of an MPQ file header, "MPQ\x1A" in LE byte order.
pub const HEADER_MPQ_MAGIC: u32 = 0x1A51_504D;

// An MPQ header may only start at an offset aligned to 512 bytes.
pub const HEADER_BOUNDARY: u64 = 512;
pub const HEADER_MPQ_SIZE: u64 = 32;

// Size of the version 1 header extension. Its fields must be all
// zeroes in a version 0 archive.
pub const HEADER_V1_EXTENSION_SIZE: u64 = 12;

// Sector size is computed as 512 << block_size_shift.
pub const BLOCK_SIZE_MODIFIER: u64 = 512;

pub const HASH_TABLE_ENTRY_SIZE: u32 = 16;
pub const BLOCK_TABLE_ENTRY_SIZE: u32 = 16;

// Hash slot sentinels. An empty slot terminates a probe chain,
// a deleted slot does not.
pub const HASH_TABLE_EMPTY: u32 = 0xFFFF_FFFF;
pub const HASH_TABLE_DELETED: u32 = 0xFFFF_FFFE;

// Hash type selectors for `hash_string`.
pub const MPQ_HASH_TABLE_INDEX: u32 = 0x000;
pub const MPQ_HASH_NAME_A: u32 = 0x100;
pub const MPQ_HASH_NAME_B: u32 = 0x200;
pub const MPQ_HASH_FILE_KEY: u32 = 0x300;
pub const MPQ_HASH_KEY2_MIX: u32 = 0x400;

// hash_string(b"(hash table)", MPQ_HASH_FILE_KEY)
pub const HASH_TABLE_KEY: u32 = 0xC3AF_3770;
// hash_string(b"(block table)", MPQ_HASH_FILE_KEY)
pub const BLOCK_TABLE_KEY: u32 = 0xEC83_B3A3;

// Block entry flags.
pub const MPQ_FILE_IMPLODE: u32 = 0x0000_0100;
pub const MPQ_FILE_COMPRESS: u32 = 0x0000_0200;
pub const MPQ_FILE_ENCRYPTED: u32 = 0x0001_0000;
pub const MPQ_FILE_ADJUST_KEY: u32 = 0x0002_0000;
pub const MPQ_FILE_SINGLE_UNIT: u32 = 0x0100_0000;
pub const MPQ_FILE_EXISTS: u32 = 0x8000_0000;

// Compression tag bits found in the first byte of a compressed sector.
pub const COMPRESSION_HUFFMAN: u8 = 0x01;
pub const COMPRESSION_ZLIB: u8 = 0x02;
pub const COMPRESSION_PKWARE: u8 = 0x08;
pub const COMPRESSION_BZIP2: u8 = 0x10;
pub const COMPRESSION_IMA_ADPCM_MONO: u8 = 0x40;
pub const COMPRESSION_IMA_ADPCM_STEREO: u8 = 0x80;

pub const LISTFILE_NAME: &str = "(listfile)";
