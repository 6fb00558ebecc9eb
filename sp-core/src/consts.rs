//! Constants used in the saltpack format.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The format name with which every header begins.
pub const FORMAT_NAME: &str = "saltpack";

/// The major version of the format produced by this library.
///
/// Messages with a different major version are rejected.
pub const VERSION_MAJOR: u32 = 1;

/// The minor version of the format produced by this library.
pub const VERSION_MINOR: u32 = 0;

/// Default size of plaintext chunks (1 MiB).
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Size of a symmetric key and of a raw box key.
pub const KEY_SIZE: usize = 32;

/// Size of a NaCl nonce.
pub const NONCE_SIZE: usize = 24;

/// Size of the random nonce in a signature header.
pub const SIGNATURE_NONCE_SIZE: usize = 16;

/// Size of the Poly1305 authenticator that every box carries.
pub const TAG_SIZE: usize = 16;

/// Size of an ed25519 signature.
pub const SIGNATURE_SIZE: usize = 64;

/// Domain separation for the encryption nonce prefix.
pub const ENCRYPTION_NONCE_PREFIX: &[u8] = b"saltpack encryption nonce\0";

/// Domain separation for attached signature inputs.
pub const ATTACHED_SIGNATURE_PREFIX: &[u8] = b"saltpack attached signature\0";

/// Domain separation for detached signature inputs.
pub const DETACHED_SIGNATURE_PREFIX: &[u8] = b"saltpack detached signature\0";

/// Domain separation for the signcryption nonce prefix.
pub const SIGNCRYPTION_NONCE_PREFIX: &[u8] = b"saltpack signcryption nonce\0";

/// Domain separation for signcrypted chunk signature inputs.
pub const SIGNCRYPTION_SIGNATURE_PREFIX: &[u8] = b"saltpack encrypted signature\0";

/// HMAC key deriving the receiver identifier of a box receiver in a signcrypted message.
pub const SIGNCRYPTION_BOX_KEY_IDENTIFIER: &[u8] = b"saltpack signcryption box key identifier";

/// HMAC key deriving the symmetric key of a box receiver in a signcrypted message.
pub const SIGNCRYPTION_DERIVED_SYMMETRIC_KEY: &[u8] =
    b"saltpack signcryption derived symmetric key";

/// Nonce of the box that turns a Diffie-Hellman shared key into signcryption key material.
pub const SIGNCRYPTION_DERIVED_KEY_NONCE: &[u8; NONCE_SIZE] = b"saltpack_derived_sboxkey";

/// Armor: the number of encoded characters per word.
pub const ARMOR_CHARS_PER_WORD: usize = 15;

/// Armor: the number of words per line.
pub const ARMOR_WORDS_PER_LINE: usize = 200;

/// Armor: the maximum length of a header or footer, in bytes.
pub const ARMOR_MAX_FRAME_LEN: usize = 512;

/// The kind of message a header introduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// An encrypted message.
    Encryption = 0,
    /// A message with an attached signature.
    AttachedSignature = 1,
    /// A detached signature.
    DetachedSignature = 2,
    /// A message that is both encrypted and signed.
    Signcryption = 3,
}

impl MessageType {
    /// The string used for this type in armor frames.
    pub fn armor_str(self) -> &'static str {
        match self {
            Self::Encryption => "ENCRYPTED MESSAGE",
            Self::AttachedSignature => "SIGNED MESSAGE",
            Self::DetachedSignature => "DETACHED SIGNATURE",
            Self::Signcryption => "SIGNCRYPTED MESSAGE",
        }
    }

    /// Looks up the message type for an armor type string.
    pub fn from_armor_str(s: &str) -> Option<Self> {
        [
            Self::Encryption,
            Self::AttachedSignature,
            Self::DetachedSignature,
            Self::Signcryption,
        ]
        .into_iter()
        .find(|t| t.armor_str() == s)
    }
}

impl core::fmt::Display for MessageType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Encryption => write!(f, "encryption"),
            Self::AttachedSignature => write!(f, "attached signature"),
            Self::DetachedSignature => write!(f, "detached signature"),
            Self::Signcryption => write!(f, "signcryption"),
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Encryption),
            1 => Ok(Self::AttachedSignature),
            2 => Ok(Self::DetachedSignature),
            3 => Ok(Self::Signcryption),
            other => Err(other),
        }
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;
        MessageType::try_from(value)
            .map_err(|v| serde::de::Error::custom(format!("unknown message type: {v}")))
    }
}
