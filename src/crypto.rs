use byte_slice_cast::*;
use lazy_static::lazy_static;

use super::consts::*;

lazy_static! {
    static ref CRYPTO_TABLE: [u32; 0x500] = generate_crypto_table();
}

fn generate_crypto_table() -> [u32; 0x500] {
    let mut crypto_table = [0u32; 0x500];
    let mut seed: u32 = 0x0010_0001;

    for i in 0..0x100 {
        for j in 0..5 {
            let index = i + j * 0x100;
            seed = (seed * 125 + 3) % 0x002A_AAAB;
            let t1 = (seed & 0xFFFF) << 0x10;
            seed = (seed * 125 + 3) % 0x002A_AAAB;
            let t2 = seed & 0xFFFF;

            crypto_table[index] = t1 | t2;
        }
    }

    crypto_table
}

// Filenames are case-insensitive, and forward slashes hash
// identically to backslashes.
fn normalize_byte(byte: u8) -> u32 {
    if byte == b'/' {
        u32::from(b'\\')
    } else {
        u32::from(byte.to_ascii_uppercase())
    }
}

/// Computes one of the MPQ name hashes of `source`. The variant is
/// selected by `hash_type`, which must be one of the `MPQ_HASH_*`
/// selectors in `consts`.
pub(crate) fn hash_string(source: &[u8], hash_type: u32) -> u32 {
    let mut seed1: u32 = 0x7FED_7FED;
    let mut seed2: u32 = 0xEEEE_EEEE;

    for byte in source {
        let upper = normalize_byte(*byte);

        seed1 = CRYPTO_TABLE[(hash_type + upper) as usize] ^ (seed1.overflowing_add(seed2)).0;
        seed2 = upper
            .overflowing_add(seed1)
            .0
            .overflowing_add(seed2)
            .0
            .overflowing_add(seed2 << 5)
            .0
            .overflowing_add(3)
            .0;
    }

    seed1
}

pub(crate) fn encrypt_mpq_block(data: &mut [u8], mut key: u32) {
    let iterations = data.len() >> 2;

    let mut key_secondary: u32 = 0xEEEE_EEEE;
    let mut temp: u32;

    // if the buffer is not aligned to u32s we need to truncate it
    // this is ok because the last bytes that don't fit into the
    // aligned slice are not encrypted
    let u32_data = &mut data[..iterations * 4].as_mut_slice_of::<u32>().unwrap();

    for i in 0..iterations {
        key_secondary = key_secondary
            .overflowing_add(CRYPTO_TABLE[(MPQ_HASH_KEY2_MIX + (key & 0xFF)) as usize])
            .0;

        // the secondary key evolves from the plaintext word
        temp = u32_data[i];
        u32_data[i] ^= key.overflowing_add(key_secondary).0;

        key = ((!key << 0x15).overflowing_add(0x1111_1111).0) | (key >> 0x0B);
        key_secondary = temp
            .overflowing_add(key_secondary)
            .0
            .overflowing_add(key_secondary << 5)
            .0
            .overflowing_add(3)
            .0;
    }
}

pub(crate) fn decrypt_mpq_block(data: &mut [u8], mut key: u32) {
    let iterations = data.len() >> 2;

    let mut key_secondary: u32 = 0xEEEE_EEEE;
    let mut temp: u32;

    let u32_data = &mut data[..iterations * 4].as_mut_slice_of::<u32>().unwrap();

    for i in 0..iterations {
        key_secondary = key_secondary
            .overflowing_add(CRYPTO_TABLE[(MPQ_HASH_KEY2_MIX + (key & 0xFF)) as usize])
            .0;

        u32_data[i] ^= key.overflowing_add(key_secondary).0;
        temp = u32_data[i];

        key = ((!key << 0x15).overflowing_add(0x1111_1111).0) | (key >> 0x0B);
        key_secondary = temp
            .overflowing_add(key_secondary)
            .0
            .overflowing_add(key_secondary << 5)
            .0
            .overflowing_add(3)
            .0;
    }
}

pub(crate) fn get_plain_name(input: &str) -> &[u8] {
    let bytes = input.as_bytes();
    let mut out = input.as_bytes();

    for i in 0..bytes.len() {
        if bytes[i] == b'\\' || bytes[i] == b'/' {
            out = &bytes[(i + 1)..];
        }
    }

    out
}

/// Derives the encryption key of a file from its base name. When
/// `adjusted` is set, the key additionally depends on the file's
/// offset within the archive and its uncompressed size.
pub(crate) fn calculate_file_key(
    file_name: &str,
    file_offset: u32,
    file_size: u32,
    adjusted: bool,
) -> u32 {
    let plain_name = get_plain_name(file_name);
    let mut key = hash_string(plain_name, MPQ_HASH_FILE_KEY);

    if adjusted {
        key = (key.overflowing_add(file_offset).0) ^ file_size
    }

    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_key_constants() {
        assert_eq!(hash_string(b"(hash table)", MPQ_HASH_FILE_KEY), HASH_TABLE_KEY);
        assert_eq!(
            hash_string(b"(block table)", MPQ_HASH_FILE_KEY),
            BLOCK_TABLE_KEY
        );
    }

    #[test]
    fn hash_is_case_and_slash_insensitive() {
        let a = hash_string(b"units\\human\\footman.mdx", MPQ_HASH_NAME_A);
        let b = hash_string(b"UNITS/HUMAN/FOOTMAN.MDX", MPQ_HASH_NAME_A);
        assert_eq!(a, b);

        let a = hash_string(b"war3map.j", MPQ_HASH_TABLE_INDEX);
        let b = hash_string(b"WAR3MAP.J", MPQ_HASH_TABLE_INDEX);
        assert_eq!(a, b);
    }

    #[test]
    fn hash_variants_are_independent() {
        let name = b"scripts\\common.j";
        let index = hash_string(name, MPQ_HASH_TABLE_INDEX);
        let name_a = hash_string(name, MPQ_HASH_NAME_A);
        let name_b = hash_string(name, MPQ_HASH_NAME_B);

        assert_ne!(index, name_a);
        assert_ne!(index, name_b);
        assert_ne!(name_a, name_b);
    }

    #[test]
    fn cipher_inverse_law() {
        let original: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

        for key in &[0u32, 1, 0xDEAD_BEEF, HASH_TABLE_KEY, 0xFFFF_FFFF] {
            let mut buf = original.clone();
            encrypt_mpq_block(&mut buf, *key);
            assert_ne!(buf, original);
            decrypt_mpq_block(&mut buf, *key);
            assert_eq!(buf, original);
        }
    }

    #[test]
    fn cipher_leaves_unaligned_tail_untouched() {
        let mut buf = vec![7u8; 10];
        encrypt_mpq_block(&mut buf, 0x1234_5678);
        // the last two bytes do not form a whole word
        assert_eq!(&buf[8..], &[7u8, 7u8]);
    }

    #[test]
    fn plain_name_strips_directories() {
        assert_eq!(get_plain_name("a\\b\\c.txt"), b"c.txt");
        assert_eq!(get_plain_name("a/b/c.txt"), b"c.txt");
        assert_eq!(get_plain_name("c.txt"), b"c.txt");
    }

    #[test]
    fn adjusted_key_depends_on_position() {
        let base = calculate_file_key("war3map.j", 0x200, 100, false);
        let adjusted = calculate_file_key("war3map.j", 0x200, 100, true);
        assert_eq!(adjusted, (base.overflowing_add(0x200).0) ^ 100);
        // the directory part must not affect the key
        assert_eq!(base, calculate_file_key("scripts\\war3map.j", 0x400, 7, false));
    }
}
