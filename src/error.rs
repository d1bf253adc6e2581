use std::io::Error as IoError;

use err_derive::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(display = "no MPQ header found")]
    HeaderNotFound,
    #[error(display = "unsupported MPQ format version")]
    UnsupportedFormat,
    #[error(display = "corrupted archive")]
    Corrupted,
    #[error(display = "file not found: {}", name)]
    FileNotFound { name: String },
    #[error(display = "not supported: {}", reason)]
    NotSupported { reason: &'static str },
    #[error(display = "unsupported compression type: {:#04X}", tag)]
    UnsupportedCompression { tag: u8 },
    #[error(display = "io error: {}", cause)]
    Io { cause: IoError },
}

impl Error {
    pub(crate) fn file_not_found(name: &str) -> Error {
        Error::FileNotFound {
            name: name.to_string(),
        }
    }
}

impl From<IoError> for Error {
    fn from(other: IoError) -> Self {
        Error::Io { cause: other }
    }
}
