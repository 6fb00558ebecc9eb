//! BaseX errors.

use std::string::String;

/// A BaseX encoding or decoding error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A byte outside of the alphabet was found while decoding in strict mode, or the symbols of
    /// a block do not represent a value that fits in the decoded block.
    CorruptInput {
        /// Offset of the offending byte in the input.
        offset: usize,
    },
    /// The final block does not have a minimal valid length.
    InvalidEncodingLength {
        /// The number of symbols found in the final block.
        length: usize,
    },
    /// The alphabet cannot be used for an encoding.
    BadAlphabet(String),
    /// The input block length is out of the supported range.
    BadBlockLength(usize),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::CorruptInput { offset } => write!(f, "illegal basex data at input byte {offset}"),
            Self::InvalidEncodingLength { length } => {
                write!(f, "invalid basex encoding length: {length} trailing symbols")
            }
            Self::BadAlphabet(reason) => write!(f, "bad alphabet: {reason}"),
            Self::BadBlockLength(len) => write!(f, "unsupported input block length: {len}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e)
    }
}
