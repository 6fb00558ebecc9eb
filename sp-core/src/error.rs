//! Saltpack errors.

use std::io;
use std::sync::Arc;

use crate::consts::MessageType;
use crate::packet::Version;

/// Which part of an armored message was malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePart {
    /// The `BEGIN ... SALTPACK ...` line.
    Header,
    /// The encoded body between the header and the footer.
    Body,
    /// The `END ... SALTPACK ...` line.
    Footer,
}

impl core::fmt::Display for FramePart {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Header => write!(f, "header"),
            Self::Body => write!(f, "body"),
            Self::Footer => write!(f, "footer"),
        }
    }
}

/// A saltpack error.
///
/// Sequence numbers count packets: the header is packet 0, the first block is packet 1.
#[derive(Debug, Clone)]
pub enum Error {
    /// The header does not carry the saltpack format name.
    NotSaltpack {
        /// The format name that was found.
        received: String,
    },
    /// The header carries an unsupported major version.
    BadVersion {
        /// The packet in which the version was found.
        seqno: u64,
        /// The version that was found.
        received: Version,
    },
    /// The header introduces a different kind of message than expected.
    WrongMessageType {
        /// The packet in which the message type was found.
        seqno: u64,
        /// The expected message type.
        wanted: MessageType,
        /// The message type that was found.
        received: MessageType,
    },
    /// A nonce field has the wrong length.
    BadNonceLength(usize),
    /// The sender key in a receiver key box has the wrong length.
    BadSenderKey,
    /// The session key in a receiver key box has the wrong length.
    BadSessionKey,
    /// The ephemeral key in the header could not be imported.
    BadEphemeralKey,
    /// None of the receiver key boxes could be opened with the keys at hand.
    NoDecryptionKey {
        /// The key ids of the visible receivers.
        named_receivers: Vec<Vec<u8>>,
        /// The number of hidden receivers.
        num_anon_receivers: usize,
    },
    /// The sender's public key is unknown.
    NoSenderKey,
    /// The secretbox carrying the sender's signing key did not open.
    BadSenderKeySecretbox,
    /// A symmetric key resolver failed.
    Resolver(String),
    /// A symmetric key resolver returned a different number of keys than it was asked for.
    WrongNumberOfKeys {
        /// The number of identifiers passed to the resolver.
        wanted: usize,
        /// The number of keys it returned.
        received: usize,
    },
    /// The keyring reported a receiver index outside of the header's receiver list.
    BadReceiverIndex(usize),
    /// The authentication tag of a block did not verify.
    BadTag(u64),
    /// A box or secretbox did not open.
    BadCiphertext(u64),
    /// A signature did not verify.
    BadSignature(u64),
    /// The same receiver key was given more than once.
    RepeatedKey(Vec<u8>),
    /// The receiver set is empty.
    BadReceivers,
    /// The stream ended before its terminating block.
    UnexpectedEof,
    /// More data followed the terminating block.
    TrailingGarbage,
    /// The armor frame is malformed.
    BadFrame {
        /// The malformed part.
        part: FramePart,
        /// What was wrong with it.
        reason: String,
    },
    /// BaseX encoding error.
    Encoding(sp_basex::Error),
    /// A packet could not be (de)serialized.
    FormatViolation(String),
    /// Constraint violation.
    ConstraintViolation,
    /// The stream was written to after it was closed.
    WriteAfterClose,
    /// Opaque IO error from the underlying reader or writer.
    Io(Arc<io::Error>),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotSaltpack { received } => {
                write!(f, "not a saltpack message, format name: {received:?}")
            }
            Self::BadVersion { seqno, received } => {
                write!(f, "unsupported version {received} in packet {seqno}")
            }
            Self::WrongMessageType {
                seqno,
                wanted,
                received,
            } => write!(
                f,
                "wrong message type in packet {seqno}, wanted: {wanted}, received: {received}"
            ),
            Self::BadNonceLength(len) => write!(f, "bad nonce length: {len}"),
            Self::BadSenderKey => write!(f, "bad sender key"),
            Self::BadSessionKey => write!(f, "bad session key"),
            Self::BadEphemeralKey => write!(f, "bad ephemeral key"),
            Self::NoDecryptionKey {
                named_receivers,
                num_anon_receivers,
            } => write!(
                f,
                "no decryption key found among {} named and {} anonymous receivers",
                named_receivers.len(),
                num_anon_receivers
            ),
            Self::NoSenderKey => write!(f, "sender key not found"),
            Self::BadSenderKeySecretbox => write!(f, "sender key secretbox did not open"),
            Self::Resolver(reason) => write!(f, "key resolver failed: {reason}"),
            Self::WrongNumberOfKeys { wanted, received } => {
                write!(f, "key resolver returned {received} keys for {wanted} identifiers")
            }
            Self::BadReceiverIndex(i) => write!(f, "receiver index out of range: {i}"),
            Self::BadTag(seqno) => write!(f, "bad authentication tag in packet {seqno}"),
            Self::BadCiphertext(seqno) => write!(f, "bad ciphertext in packet {seqno}"),
            Self::BadSignature(seqno) => write!(f, "bad signature in packet {seqno}"),
            Self::RepeatedKey(kid) => write!(f, "repeated receiver key: {kid:02x?}"),
            Self::BadReceivers => write!(f, "no receivers"),
            Self::UnexpectedEof => write!(f, "unexpected end of stream"),
            Self::TrailingGarbage => write!(f, "trailing data after the end of the stream"),
            Self::BadFrame { part, reason } => write!(f, "bad armor {part}: {reason}"),
            Self::Encoding(e) => write!(f, "encoding error: {e}"),
            Self::FormatViolation(s) => write!(f, "malformed packet: {s}"),
            Self::ConstraintViolation => write!(f, "constraint violation"),
            Self::WriteAfterClose => write!(f, "write after close"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Recovers a saltpack error that travelled through an [`io::Error`].
    pub fn from_io(e: io::Error) -> Self {
        if let Some(inner) = e.get_ref() {
            if let Some(err) = inner.downcast_ref::<Error>() {
                return err.clone();
            }
            if let Some(err) = inner.downcast_ref::<sp_basex::Error>() {
                return Self::Encoding(err.clone());
            }
        }

        if e.kind() == io::ErrorKind::UnexpectedEof {
            return Self::UnexpectedEof;
        }

        Self::Io(Arc::new(e))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::from_io(e)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match &e {
            Error::UnexpectedEof => io::ErrorKind::UnexpectedEof,
            Error::Io(inner) => inner.kind(),
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, e)
    }
}

impl From<sp_basex::Error> for Error {
    fn from(e: sp_basex::Error) -> Self {
        Self::Encoding(e)
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        match e {
            rmp_serde::decode::Error::InvalidMarkerRead(e)
            | rmp_serde::decode::Error::InvalidDataRead(e) => Self::from_io(e),
            e => Self::FormatViolation(e.to_string()),
        }
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Self::FormatViolation(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::FormatViolation(e.to_string())
    }
}

impl From<core::array::TryFromSliceError> for Error {
    fn from(_: core::array::TryFromSliceError) -> Self {
        Self::ConstraintViolation
    }
}
