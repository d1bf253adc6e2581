//! A library for reading, writing and patching Blizzard's proprietary
//! MoPaQ archive format.
//!
//! `stormpack` supports MPQ format version 0 archives, the variant
//! still actively encountered in the wild through Warcraft III custom
//! maps. Version 1 archives (64-bit extended tables) are rejected
//! outright, as are headers that smuggle version 1 fields into a
//! version 0 archive.
//!
//! # Supported features
//!
//! Reading:
//!
//! * DEFLATE and bzip2 compressed files; other algorithms can be
//!   plugged in through the [`Codec`] trait.
//! * Encrypted files, including offset-adjusted keys.
//! * Single-unit files.
//! * Random access within a file via [`FileStream`], one sector at a
//!   time.
//! * Archives embedded at a 512-aligned offset of a larger stream.
//!
//! Writing:
//!
//! * [`Creator`] builds an archive from a set of named byte streams,
//!   with per-file compression/encryption options.
//! * [`Archive::replace_file`] rewrites an existing archive with one
//!   file's content replaced, without touching anything else.
//!
//! Checksums and file attributes are not checked or read, and no
//! effort is made to read "protected" maps that deliberately subvert
//! the archive structure. If you need those, refer to
//! [StormLib](http://www.zezula.net/en/mpq/stormlib.html).
//!
//! # Example
//!
//! ```
//! # use stormpack::{Archive, Creator, FileOptions};
//! # use std::io::{Cursor, Seek, SeekFrom};
//! # use std::error::Error;
//! # fn main() -> Result<(), Box<dyn Error>> {
//! let mut cursor = Cursor::new(Vec::new());
//!
//! // creating an archive
//! let mut creator = Creator::default();
//! creator.add_file(
//!     "hello.txt",
//!     "hello world!",
//!     FileOptions {
//!         compress: true,
//!         ..FileOptions::default()
//!     },
//! );
//! creator.write(&mut cursor)?;
//!
//! cursor.seek(SeekFrom::Start(0))?;
//!
//! // reading it back
//! let mut archive = Archive::open(&mut cursor)?;
//! let file = archive.read_file("hello.txt")?;
//!
//! assert_eq!(file.as_slice(), b"hello world!");
//! # Ok(())
//! # }
//! ```

#![allow(dead_code)]

pub(crate) mod consts;
pub(crate) mod crypto;
pub(crate) mod header;
pub(crate) mod seeker;
pub(crate) mod table;
pub(crate) mod util;

pub mod archive;
pub mod codec;
pub mod creator;
pub mod error;
pub mod stream;

pub use archive::Archive;
pub use codec::Codec;
pub use codec::DeflateCodec;
pub use creator::ArchiveLayout;
pub use creator::Creator;
pub use creator::FileOptions;
pub use error::Error;
pub use stream::FileStream;
pub use table::FileEntry;
