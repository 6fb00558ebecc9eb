//! Key material and serde helpers for binary fields.
//!
//! Binary fields serialize as MessagePack `bin` in the wire format and as base64 strings when the
//! serializer is human readable (e.g. JSON).

use core::fmt;

use aead::generic_array::GenericArray;
use aead::{Aead, KeyInit};
use base64ct::{Base64, Encoding};
use crypto_box::SalsaBox;
use crypto_secretbox::XSalsa20Poly1305;
use rand::{CryptoRng, RngCore};
use serde::de::{Error, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::consts::KEY_SIZE;
use crate::error::Error as SaltpackError;
use crate::nonce::Nonce;

/// The raw bytes of an X25519 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawBoxKey([u8; KEY_SIZE]);

impl RawBoxKey {
    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl From<[u8; KEY_SIZE]> for RawBoxKey {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for RawBoxKey {
    type Error = SaltpackError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(bytes.try_into()?))
    }
}

/// A secretbox key: the key that seals all payload chunks of one message, or a pre-shared key of
/// a signcryption receiver.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey").finish_non_exhaustive()
    }
}

impl SymmetricKey {
    /// Generates a fresh random key.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut key = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut key);
        Self(key)
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Seals `plaintext` in a secretbox.
    pub fn seal(&self, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>, SaltpackError> {
        XSalsa20Poly1305::new(GenericArray::from_slice(&self.0))
            .encrypt(GenericArray::from_slice(nonce.as_bytes()), plaintext)
            .map_err(|_| SaltpackError::ConstraintViolation)
    }

    /// Opens a secretbox, or returns `None` if it does not authenticate.
    pub fn open(&self, nonce: &Nonce, ciphertext: &[u8]) -> Option<Vec<u8>> {
        XSalsa20Poly1305::new(GenericArray::from_slice(&self.0))
            .decrypt(GenericArray::from_slice(nonce.as_bytes()), ciphertext)
            .ok()
    }
}

impl From<[u8; KEY_SIZE]> for SymmetricKey {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for SymmetricKey {
    type Error = SaltpackError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(bytes.try_into()?))
    }
}

/// A Diffie-Hellman shared secret, precomputed for repeated boxing between two parties.
pub struct PrecomputedSharedKey(SalsaBox);

impl fmt::Debug for PrecomputedSharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrecomputedSharedKey").finish_non_exhaustive()
    }
}

impl PrecomputedSharedKey {
    pub(crate) fn new(shared: SalsaBox) -> Self {
        Self(shared)
    }

    /// Seals `plaintext` in a box.
    pub fn seal(&self, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>, SaltpackError> {
        self.0
            .encrypt(GenericArray::from_slice(nonce.as_bytes()), plaintext)
            .map_err(|_| SaltpackError::ConstraintViolation)
    }

    /// Opens a box, or returns `None` if it does not authenticate.
    pub fn open(&self, nonce: &Nonce, ciphertext: &[u8]) -> Option<Vec<u8>> {
        self.0
            .decrypt(GenericArray::from_slice(nonce.as_bytes()), ciphertext)
            .ok()
    }
}

pub(crate) fn serialize_bin_or_b64<S, T>(val: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: AsRef<[u8]>,
{
    if serializer.is_human_readable() {
        serializer.serialize_str(&Base64::encode_string(val.as_ref()))
    } else {
        serializer.serialize_bytes(val.as_ref())
    }
}

pub(crate) fn deserialize_bin_or_b64<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<u8>, D::Error> {
    struct BytesVisitor {
        human_readable: bool,
    }

    impl<'de> Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            if self.human_readable {
                write!(formatter, "a base64 string")
            } else {
                write!(formatter, "a byte array")
            }
        }

        fn visit_str<E: Error>(self, v: &str) -> Result<Self::Value, E> {
            if self.human_readable {
                Base64::decode_vec(v)
                    .map_err(|e| Error::custom(format!("base64ct decoding error: {e}")))
            } else {
                Ok(v.as_bytes().to_vec())
            }
        }

        fn visit_bytes<E: Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(4096));
            while let Some(b) = seq.next_element()? {
                out.push(b);
            }
            Ok(out)
        }
    }

    if deserializer.is_human_readable() {
        deserializer.deserialize_str(BytesVisitor {
            human_readable: true,
        })
    } else {
        deserializer.deserialize_bytes(BytesVisitor {
            human_readable: false,
        })
    }
}

pub(crate) fn serialize_bin_seq<S, T>(val: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: AsRef<[Vec<u8>]>,
{
    struct Item<'a>(&'a [u8]);

    impl Serialize for Item<'_> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serialize_bin_or_b64(&self.0, serializer)
        }
    }

    serializer.collect_seq(val.as_ref().iter().map(|v| Item(v)))
}

pub(crate) fn deserialize_bin_seq<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<Vec<u8>>, D::Error> {
    struct Item(Vec<u8>);

    impl<'de> Deserialize<'de> for Item {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserialize_bin_or_b64(deserializer).map(Item)
        }
    }

    let items = Vec::<Item>::deserialize(deserializer)?;
    Ok(items.into_iter().map(|i| i.0).collect())
}
