//! Purpose-tagged nonces.
//!
//! Every nonce is 24 bytes: a 16-byte per-message prefix, one purpose byte and a 56-bit
//! big-endian counter. Encryption derives the prefix from the ephemeral public key, so a receiver
//! can compute all nonces of a message from its header alone. Signing uses the random nonce
//! carried in the signature header. Signcryption derives the prefix from the ephemeral key too,
//! under its own domain, and folds the final-block flag into the payload counter.

use sha2::{Digest, Sha512};

use crate::artifacts::RawBoxKey;
use crate::consts::{
    ENCRYPTION_NONCE_PREFIX, NONCE_SIZE, SIGNATURE_NONCE_SIZE, SIGNCRYPTION_NONCE_PREFIX,
};

const PREFIX_SIZE: usize = 16;
const COUNTER_MASK: u64 = 0x00ff_ffff_ffff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Purpose {
    KeyBox = 1,
    PayloadBox = 2,
    TagBox = 3,
    AttachedSignature = 4,
    DetachedSignature = 5,
    SenderKey = 6,
}

/// A nonce for boxes, secretboxes and signature inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

/// The per-message nonce prefix from which all nonces of one message are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceBase([u8; PREFIX_SIZE]);

impl NonceBase {
    /// Derives the nonce base of an encrypted message from its ephemeral public key.
    pub fn for_encryption(ephemeral: &RawBoxKey) -> Self {
        Self::from_ephemeral(ENCRYPTION_NONCE_PREFIX, ephemeral)
    }

    /// Derives the nonce base of a signcrypted message from its ephemeral public key.
    pub fn for_signcryption(ephemeral: &RawBoxKey) -> Self {
        Self::from_ephemeral(SIGNCRYPTION_NONCE_PREFIX, ephemeral)
    }

    fn from_ephemeral(domain: &[u8], ephemeral: &RawBoxKey) -> Self {
        let digest = Sha512::new()
            .chain_update(domain)
            .chain_update(ephemeral.as_bytes())
            .finalize();

        let mut prefix = [0u8; PREFIX_SIZE];
        prefix.copy_from_slice(&digest[..PREFIX_SIZE]);
        Self(prefix)
    }

    /// Uses the random nonce of a signature header as nonce base.
    pub fn for_signature(nonce: &[u8; SIGNATURE_NONCE_SIZE]) -> Self {
        Self(*nonce)
    }

    /// The nonce of the key box of the receiver at `index` in the header.
    pub fn key_box(&self, index: u64) -> Nonce {
        self.derive(Purpose::KeyBox, index)
    }

    /// The nonce of the payload secretbox of block `block`.
    pub fn payload_box(&self, block: u64) -> Nonce {
        self.derive(Purpose::PayloadBox, block)
    }

    /// The nonce of the payload secretbox of signcrypted block `block`.
    ///
    /// The lowest counter bit is the final-block flag, so a block cannot be marked final, or
    /// unmarked, without breaking its secretbox.
    pub fn signcrypted_payload_box(&self, block: u64, is_final: bool) -> Nonce {
        self.derive(Purpose::PayloadBox, (block << 1) | u64::from(is_final))
    }

    /// The nonce of the secretbox that carries the sender's signing key.
    pub fn sender_key_box(&self) -> Nonce {
        self.derive(Purpose::SenderKey, 0)
    }

    /// The nonce of the authentication tags of block `block`.
    pub fn tag_box(&self, block: u64) -> Nonce {
        self.derive(Purpose::TagBox, block)
    }

    /// The nonce mixed into the signature input of attached signature block `block`.
    pub fn attached_signature(&self, block: u64) -> Nonce {
        self.derive(Purpose::AttachedSignature, block)
    }

    /// The nonce mixed into a detached signature input.
    pub fn detached_signature(&self) -> Nonce {
        self.derive(Purpose::DetachedSignature, 0)
    }

    fn derive(&self, purpose: Purpose, counter: u64) -> Nonce {
        let mut n = [0u8; NONCE_SIZE];
        n[..PREFIX_SIZE].copy_from_slice(&self.0);
        n[PREFIX_SIZE] = purpose as u8;
        n[PREFIX_SIZE + 1..].copy_from_slice(&(counter & COUNTER_MASK).to_be_bytes()[1..]);
        Nonce(n)
    }
}

impl Nonce {
    pub(crate) fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// The raw nonce bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}
