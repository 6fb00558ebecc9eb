//! # BaseX
//!
//! Block-oriented arbitrary-radix encoding, used to carry binary messages through channels that
//! only accept text.
//!
//! An [`Encoding`] maps fixed-size input blocks to fixed-size blocks of symbols over an alphabet
//! of N printable characters. Unlike base64 and friends, N does not have to be a power of two:
//! each block is treated as a big unsigned integer and written in base N. The final block may be
//! shorter than a full block, but must always use the minimal number of symbols, so every byte
//! string has exactly one valid encoding.
//!
//! Lenient encodings (the default) skip any byte outside of the alphabet when decoding, which
//! makes them robust against whitespace and line breaks inserted in transit. Strict encodings
//! reject such bytes with [`Error::CorruptInput`].
//!
//! ```
//! use sp_basex::BASE58;
//!
//! let text = BASE58.encode(b"hello world");
//! let spaced: String = text.chars().flat_map(|c| [c, ' ']).collect();
//!
//! assert_eq!(BASE58.decode_str(&spaced).unwrap(), b"hello world");
//! assert!(BASE58.to_strict().decode_str(&spaced).is_err());
//! ```
#![deny(
    missing_debug_implementations,
    rust_2018_idioms,
    missing_docs,
    rustdoc::broken_intra_doc_links
)]

pub mod encoding;
pub mod error;
pub mod stream;

pub use encoding::{BlockDecoder, BlockEncoder, Encoding};
pub use error::Error;
pub use stream::{Decoder, Encoder};

use lazy_static::lazy_static;

/// The Bitcoin base58 alphabet.
pub const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Digits followed by upper and lower case letters.
pub const BASE62_ALPHABET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// The standard base64 alphabet of RFC 4648.
pub const BASE64_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

lazy_static! {
    /// Base58 over 19-byte blocks (26 symbols per block).
    pub static ref BASE58: Encoding = Encoding::build(BASE58_ALPHABET.as_bytes(), 19);

    /// Base62 over 32-byte blocks (43 symbols per block).
    pub static ref BASE62: Encoding = Encoding::build(BASE62_ALPHABET.as_bytes(), 32);

    /// Base64 over 3-byte blocks. Full blocks coincide with RFC 4648, short blocks do not pad.
    pub static ref BASE64: Encoding = Encoding::build(BASE64_ALPHABET.as_bytes(), 3);
}
