//! Wire records and the MessagePack packet stream that carries them.
//!
//! A message is one header packet followed by block packets. Each packet is one MessagePack
//! array holding the fields of a record in declaration order. Packets are self-delimiting, so no
//! extra framing is needed.

use std::io::{BufRead, BufReader, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::artifacts::{
    deserialize_bin_or_b64, deserialize_bin_seq, serialize_bin_or_b64, serialize_bin_seq,
};
use crate::consts::{MessageType, FORMAT_NAME, VERSION_MAJOR, VERSION_MINOR};
use crate::error::Error;

/// A format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Major version; incompatible changes.
    pub major: u32,
    /// Minor version; compatible changes.
    pub minor: u32,
}

impl Version {
    /// The version produced by this library.
    pub const CURRENT: Version = Version {
        major: VERSION_MAJOR,
        minor: VERSION_MINOR,
    };
}

impl core::fmt::Display for Version {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The header of an encrypted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionHeader {
    /// Always [`FORMAT_NAME`].
    pub format_name: String,
    /// The format version.
    pub version: Version,
    /// Always [`MessageType::Encryption`].
    pub message_type: MessageType,
    /// The ephemeral public key of this message.
    #[serde(
        serialize_with = "serialize_bin_or_b64",
        deserialize_with = "deserialize_bin_or_b64"
    )]
    pub ephemeral: Vec<u8>,
    /// One record per receiver, in the order of the receivers' tags.
    pub receivers: Vec<ReceiverKeys>,
}

/// The wrapped keys of one receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverKeys {
    /// The receiver's key id, empty for hidden receivers.
    #[serde(
        serialize_with = "serialize_bin_or_b64",
        deserialize_with = "deserialize_bin_or_b64"
    )]
    pub kid: Vec<u8>,
    /// A box holding the packed [`ReceiverKeysPlaintext`].
    #[serde(
        serialize_with = "serialize_bin_or_b64",
        deserialize_with = "deserialize_bin_or_b64"
    )]
    pub keys: Vec<u8>,
}

/// The contents of a receiver key box.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ReceiverKeysPlaintext {
    /// The sender's public key, or the ephemeral key for anonymous senders.
    #[serde(
        serialize_with = "serialize_bin_or_b64",
        deserialize_with = "deserialize_bin_or_b64"
    )]
    pub sender: Vec<u8>,
    /// The session key.
    #[serde(
        serialize_with = "serialize_bin_or_b64",
        deserialize_with = "deserialize_bin_or_b64"
    )]
    pub session_key: Vec<u8>,
}

impl core::fmt::Debug for ReceiverKeysPlaintext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReceiverKeysPlaintext")
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

/// One chunk of an encrypted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionBlock {
    /// One authentication tag per receiver, in header order.
    #[serde(
        serialize_with = "serialize_bin_seq",
        deserialize_with = "deserialize_bin_seq"
    )]
    pub tags: Vec<Vec<u8>>,
    /// The chunk, sealed with the session key.
    #[serde(
        serialize_with = "serialize_bin_or_b64",
        deserialize_with = "deserialize_bin_or_b64"
    )]
    pub payload_ciphertext: Vec<u8>,
}

/// The header of a signed message or of a detached signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureHeader {
    /// Always [`FORMAT_NAME`].
    pub format_name: String,
    /// The format version.
    pub version: Version,
    /// [`MessageType::AttachedSignature`] or [`MessageType::DetachedSignature`].
    pub message_type: MessageType,
    /// The key id of the signer.
    #[serde(
        serialize_with = "serialize_bin_or_b64",
        deserialize_with = "deserialize_bin_or_b64"
    )]
    pub sender_public: Vec<u8>,
    /// Random per-message nonce.
    #[serde(
        serialize_with = "serialize_bin_or_b64",
        deserialize_with = "deserialize_bin_or_b64"
    )]
    pub nonce: Vec<u8>,
}

/// One chunk of a message with an attached signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBlock {
    /// The signature over this chunk.
    #[serde(
        serialize_with = "serialize_bin_or_b64",
        deserialize_with = "deserialize_bin_or_b64"
    )]
    pub signature: Vec<u8>,
    /// The plaintext chunk.
    #[serde(
        serialize_with = "serialize_bin_or_b64",
        deserialize_with = "deserialize_bin_or_b64"
    )]
    pub payload_chunk: Vec<u8>,
}

/// The body of a detached signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachedSignature {
    /// The signature over the whole message.
    #[serde(
        serialize_with = "serialize_bin_or_b64",
        deserialize_with = "deserialize_bin_or_b64"
    )]
    pub signature: Vec<u8>,
}

/// The header of a signcrypted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigncryptionHeader {
    /// Always [`FORMAT_NAME`].
    pub format_name: String,
    /// The format version.
    pub version: Version,
    /// Always [`MessageType::Signcryption`].
    pub message_type: MessageType,
    /// The ephemeral public key of this message.
    #[serde(
        serialize_with = "serialize_bin_or_b64",
        deserialize_with = "deserialize_bin_or_b64"
    )]
    pub ephemeral: Vec<u8>,
    /// The sender's signing key id, or zeros for anonymous senders, sealed with the payload key.
    #[serde(
        serialize_with = "serialize_bin_or_b64",
        deserialize_with = "deserialize_bin_or_b64"
    )]
    pub sender_secretbox: Vec<u8>,
    /// One record per receiver.
    pub receivers: Vec<SigncryptionReceiver>,
}

/// The wrapped payload key of one signcryption receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigncryptionReceiver {
    /// The identifier of a pre-shared key, or a value derived from the Diffie-Hellman secret for
    /// box receivers.
    #[serde(
        serialize_with = "serialize_bin_or_b64",
        deserialize_with = "deserialize_bin_or_b64"
    )]
    pub identifier: Vec<u8>,
    /// The payload key, sealed with the receiver's symmetric key.
    #[serde(
        serialize_with = "serialize_bin_or_b64",
        deserialize_with = "deserialize_bin_or_b64"
    )]
    pub key_box: Vec<u8>,
}

/// One chunk of a signcrypted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigncryptionBlock {
    /// The chunk's signature followed by the chunk, sealed with the payload key.
    #[serde(
        serialize_with = "serialize_bin_or_b64",
        deserialize_with = "deserialize_bin_or_b64"
    )]
    pub payload_ciphertext: Vec<u8>,
    /// Whether this is the last block.
    pub is_final: bool,
}

macro_rules! impl_header {
    ($type:ty) => {
        impl $type {
            /// Checks format name, version and message type, in that order.
            pub fn check(&self, wanted: MessageType) -> Result<(), Error> {
                check_preamble(&self.format_name, self.version, self.message_type, wanted)
            }

            /// Serializes the header as JSON, with binary fields in base64.
            pub fn to_json(&self) -> Result<String, Error> {
                Ok(serde_json::to_string(self)?)
            }

            /// Deserializes a header from JSON.
            pub fn from_json(s: &str) -> Result<Self, Error> {
                Ok(serde_json::from_str(s)?)
            }
        }
    };
}

impl_header!(EncryptionHeader);
impl_header!(SignatureHeader);
impl_header!(SigncryptionHeader);

fn check_preamble(
    format_name: &str,
    version: Version,
    received: MessageType,
    wanted: MessageType,
) -> Result<(), Error> {
    if format_name != FORMAT_NAME {
        return Err(Error::NotSaltpack {
            received: format_name.to_string(),
        });
    }

    if version.major != VERSION_MAJOR {
        return Err(Error::BadVersion {
            seqno: 0,
            received: version,
        });
    }

    if received != wanted {
        return Err(Error::WrongMessageType {
            seqno: 0,
            wanted,
            received,
        });
    }

    Ok(())
}

/// Packs a record.
pub fn encode<T: Serialize>(packet: &T) -> Result<Vec<u8>, Error> {
    Ok(rmp_serde::to_vec(packet)?)
}

/// Unpacks a record that must span all of `bytes`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    let mut dec = PacketDecoder::new(bytes);
    let packet = dec.expect()?;
    dec.assert_end_of_stream()?;
    Ok(packet)
}

/// Writes packets to an inner writer.
#[derive(Debug)]
pub struct PacketEncoder<W: Write> {
    inner: W,
}

impl<W: Write> PacketEncoder<W> {
    /// Creates a new packet encoder.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Packs and writes one record.
    pub fn write<T: Serialize>(&mut self, packet: &T) -> Result<(), Error> {
        let bytes = encode(packet)?;
        self.write_raw(&bytes)
    }

    /// Writes an already packed record.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.inner.write_all(bytes)?;
        Ok(())
    }

    /// Flushes the inner writer.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.inner.flush()?;
        Ok(())
    }

    /// Returns a mutable reference to the inner writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads packets from an inner reader, counting sequence numbers.
#[derive(Debug)]
pub struct PacketDecoder<R: Read> {
    inner: BufReader<R>,
    seqno: u64,
}

impl<R: Read> PacketDecoder<R> {
    /// Creates a new packet decoder.
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            seqno: 0,
        }
    }

    /// The sequence number of the next packet.
    pub fn seqno(&self) -> u64 {
        self.seqno
    }

    /// Reads the next packet, or `None` at a clean end of stream.
    ///
    /// A packet that is cut short is an [`Error::UnexpectedEof`].
    pub fn next_packet<T: DeserializeOwned>(&mut self) -> Result<Option<T>, Error> {
        if self.at_eof()? {
            return Ok(None);
        }

        let packet = rmp_serde::decode::from_read(&mut self.inner)?;
        self.seqno += 1;
        Ok(Some(packet))
    }

    /// Reads the next packet, which must exist.
    pub fn expect<T: DeserializeOwned>(&mut self) -> Result<T, Error> {
        self.next_packet()?.ok_or(Error::UnexpectedEof)
    }

    /// Reads the next packet, which must exist, together with its packed bytes.
    pub fn expect_raw<T: DeserializeOwned>(&mut self) -> Result<(T, Vec<u8>), Error> {
        if self.at_eof()? {
            return Err(Error::UnexpectedEof);
        }

        let mut recorder = Recorder {
            inner: &mut self.inner,
            seen: Vec::new(),
        };
        let packet = rmp_serde::decode::from_read(&mut recorder)?;
        let raw = recorder.seen;

        self.seqno += 1;
        Ok((packet, raw))
    }

    /// Fails unless the stream is exhausted.
    pub fn assert_end_of_stream(&mut self) -> Result<(), Error> {
        if self.at_eof()? {
            Ok(())
        } else {
            Err(Error::TrailingGarbage)
        }
    }

    fn at_eof(&mut self) -> Result<bool, Error> {
        Ok(self.inner.fill_buf()?.is_empty())
    }
}

// Keeps a copy of every byte read through it.
struct Recorder<'a, R> {
    inner: &'a mut R,
    seen: Vec<u8>,
}

impl<R: Read> Read for Recorder<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.seen.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}
