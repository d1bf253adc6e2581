use std::borrow::Cow;
use std::io::Read;

use super::consts::*;
use super::crypto::decrypt_mpq_block;
use super::error::Error;

/// Boundary with the compression collaborators.
///
/// MPQ stores the compression algorithm of a block as a set of bitflags
/// in the first byte of the block; implementations receive that tag
/// verbatim and are expected to fail with
/// [`UnsupportedCompression`](Error::UnsupportedCompression) for
/// algorithms they do not provide.
pub trait Codec {
    /// Compresses `data` with the algorithm selected by `tag`. The
    /// returned buffer does not include the tag byte.
    fn compress(&self, data: &[u8], tag: u8) -> Result<Vec<u8>, Error>;

    /// Decompresses `data` (without its tag byte) into exactly
    /// `expected_size` bytes.
    fn decompress(&self, data: &[u8], tag: u8, expected_size: u64) -> Result<Vec<u8>, Error>;
}

/// Default codec, backed by DEFLATE and bzip2.
///
/// Huffman, PKWare DCL and IMA ADPCM blocks are rejected; these are
/// mostly found on sound files in archives produced by official tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeflateCodec;

const UNSUPPORTED_TAGS: u8 = COMPRESSION_HUFFMAN
    | COMPRESSION_PKWARE
    | COMPRESSION_IMA_ADPCM_MONO
    | COMPRESSION_IMA_ADPCM_STEREO;

impl Codec for DeflateCodec {
    fn compress(&self, data: &[u8], tag: u8) -> Result<Vec<u8>, Error> {
        use std::io::Write;

        match tag {
            COMPRESSION_ZLIB => {
                let mut encoder =
                    flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            COMPRESSION_BZIP2 => {
                let mut encoder =
                    bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::Default);
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            _ => Err(Error::UnsupportedCompression { tag }),
        }
    }

    fn decompress(&self, data: &[u8], tag: u8, expected_size: u64) -> Result<Vec<u8>, Error> {
        if tag & UNSUPPORTED_TAGS != 0 {
            return Err(Error::UnsupportedCompression { tag });
        }

        // a block may be passed through more than one algorithm; they
        // are undone innermost-last
        let mut buf = Cow::Borrowed(data);

        if tag & COMPRESSION_BZIP2 != 0 {
            let mut decompressed = Vec::with_capacity(expected_size as usize);
            let mut decoder = bzip2::read::BzDecoder::new(&buf[..]);
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|_| Error::Corrupted)?;
            buf = Cow::Owned(decompressed);
        }

        if tag & COMPRESSION_ZLIB != 0 {
            let mut decompressed = Vec::with_capacity(expected_size as usize);
            let mut decoder = flate2::read::ZlibDecoder::new(&buf[..]);
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|_| Error::Corrupted)?;
            buf = Cow::Owned(decompressed);
        }

        if buf.len() as u64 != expected_size {
            return Err(Error::Corrupted);
        }

        Ok(buf.into_owned())
    }
}

/// Decrypts and, when the stored size differs from `expected_size`,
/// decompresses a single block read from an archive.
pub(crate) fn decode_block(
    input: &[u8],
    expected_size: u64,
    encryption_key: Option<u32>,
    codec: &dyn Codec,
) -> Result<Vec<u8>, Error> {
    let mut buf: Vec<u8> = input.into();

    if let Some(encryption_key) = encryption_key {
        decrypt_mpq_block(&mut buf, encryption_key);
    }

    if buf.len() as u64 != expected_size {
        if buf.is_empty() {
            return Err(Error::Corrupted);
        }

        let tag = buf[0];
        buf = codec.decompress(&buf[1..], tag, expected_size)?;
    }

    Ok(buf)
}

/// Compresses a block for writing, prefixing it with its tag byte.
/// Falls back to storing the block raw when compression does not
/// actually shrink it.
pub(crate) fn encode_block<'a>(
    data: &'a [u8],
    tag: u8,
    codec: &dyn Codec,
) -> Result<Cow<'a, [u8]>, Error> {
    let compressed = codec.compress(data, tag)?;

    if compressed.len() + 1 < data.len() {
        let mut buf = Vec::with_capacity(compressed.len() + 1);
        buf.push(tag);
        buf.extend_from_slice(&compressed);
        Ok(Cow::Owned(buf))
    } else {
        Ok(Cow::Borrowed(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zlib_round_trip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let codec = DeflateCodec;

        let compressed = codec.compress(&data, COMPRESSION_ZLIB).unwrap();
        assert!(compressed.len() < data.len());

        let restored = codec
            .decompress(&compressed, COMPRESSION_ZLIB, data.len() as u64)
            .unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn bzip2_round_trip() {
        let data = b"abcabcabc".repeat(200);
        let codec = DeflateCodec;

        let compressed = codec.compress(&data, COMPRESSION_BZIP2).unwrap();
        let restored = codec
            .decompress(&compressed, COMPRESSION_BZIP2, data.len() as u64)
            .unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn unsupported_tag_is_rejected() {
        let codec = DeflateCodec;

        match codec.decompress(b"xx", COMPRESSION_PKWARE, 10) {
            Err(Error::UnsupportedCompression { tag }) => assert_eq!(tag, COMPRESSION_PKWARE),
            other => panic!("expected UnsupportedCompression, got {:?}", other),
        }

        assert!(codec.compress(b"xx", COMPRESSION_HUFFMAN).is_err());
    }

    #[test]
    fn size_mismatch_is_corrupted() {
        let codec = DeflateCodec;
        let compressed = codec.compress(b"hello world", COMPRESSION_ZLIB).unwrap();

        match codec.decompress(&compressed, COMPRESSION_ZLIB, 5) {
            Err(Error::Corrupted) => {}
            other => panic!("expected Corrupted, got {:?}", other),
        }
    }

    #[test]
    fn incompressible_blocks_are_stored_raw() {
        // too short for the deflate overhead to pay off
        let data = b"a";
        let encoded = encode_block(data, COMPRESSION_ZLIB, &DeflateCodec).unwrap();
        assert_eq!(&encoded[..], data);
    }

    #[test]
    fn encode_then_decode_block() {
        let data = b"zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz".repeat(10);
        let encoded = encode_block(&data, COMPRESSION_ZLIB, &DeflateCodec).unwrap();
        assert!(encoded.len() < data.len());

        let decoded = decode_block(&encoded, data.len() as u64, None, &DeflateCodec).unwrap();
        assert_eq!(decoded, data);
    }
}
