//! Key capabilities and their NaCl and ed25519 implementations.
//!
//! The protocol code only talks to keys through the traits in this module. Any key store can
//! plug in by implementing them, see [`Keyring`] and [`SigKeyring`].

use core::fmt;

use crypto_box::{PublicKey, SalsaBox, SecretKey};
use ed25519_dalek::{Signer, Verifier};
use rand::{CryptoRng, RngCore};

use crate::artifacts::{PrecomputedSharedKey, RawBoxKey, SymmetricKey};
use crate::consts::{KEY_SIZE, SIGNATURE_SIZE};
use crate::error::Error;
use crate::nonce::Nonce;

/// A public key that can receive boxes.
pub trait BoxPublicKey: Clone {
    /// The matching secret key type.
    type Secret: BoxSecretKey<Public = Self>;

    /// The key id under which this key is advertised in a header.
    fn to_kid(&self) -> Vec<u8>;

    /// The raw X25519 public key.
    fn to_raw_box_key(&self) -> RawBoxKey;

    /// Whether the owner of this key wants to stay anonymous as a receiver.
    fn hide_identity(&self) -> bool;

    /// Creates a fresh key pair of the same kind, to be used once.
    fn create_ephemeral_key<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Self::Secret;
}

/// A secret key that can open and seal boxes.
pub trait BoxSecretKey: Clone {
    /// The matching public key type.
    type Public: BoxPublicKey<Secret = Self>;

    /// The public half of this key.
    fn public_key(&self) -> Self::Public;

    /// Generates a fresh key pair, to be used once.
    fn generate_ephemeral<R: RngCore + CryptoRng>(rng: &mut R) -> Self;

    /// Precomputes the shared secret with `peer`.
    fn precompute(&self, peer: &RawBoxKey) -> PrecomputedSharedKey;

    /// Seals `msg` for `receiver`.
    fn seal_box(&self, receiver: &RawBoxKey, nonce: &Nonce, msg: &[u8]) -> Result<Vec<u8>, Error> {
        self.precompute(receiver).seal(nonce, msg)
    }

    /// Opens a box sealed by `sender`.
    fn open_box(&self, sender: &RawBoxKey, nonce: &Nonce, ciphertext: &[u8]) -> Option<Vec<u8>> {
        self.precompute(sender).open(nonce, ciphertext)
    }
}

/// A store of box keys, consulted while decrypting.
pub trait Keyring {
    /// The secret key type in this keyring.
    type Secret: BoxSecretKey<Public = Self::Public>;
    /// The public key type in this keyring.
    type Public: BoxPublicKey<Secret = Self::Secret>;

    /// Finds a secret key for one of `kids`, returning its position in `kids`.
    ///
    /// Empty key ids denote hidden receivers and must be skipped.
    fn lookup_box_secret_key(&self, kids: &[Vec<u8>]) -> Option<(usize, Self::Secret)>;

    /// Finds the public key with key id `kid`.
    fn lookup_box_public_key(&self, kid: &[u8]) -> Option<Self::Public>;

    /// All secret keys that may be tried against hidden receivers.
    ///
    /// Keyrings that cannot or will not enumerate their keys return an empty list.
    fn all_box_secret_keys(&self) -> Vec<Self::Secret>;

    /// Imports an ephemeral public key from a header.
    fn import_ephemeral_key(&self, bytes: &[u8]) -> Option<Self::Public>;
}

/// A pre-shared secretbox key of a signcryption receiver, with the identifier under which the
/// receiver finds it again.
#[derive(Debug, Clone)]
pub struct ReceiverSymmetricKey {
    /// The shared key.
    pub key: SymmetricKey,
    /// An identifier that lets the receiver's resolver find the key. It is sent in the clear.
    pub identifier: Vec<u8>,
}

/// Finds the pre-shared keys of signcryption receivers.
pub trait SymmetricKeyResolver {
    /// Returns one entry per identifier, in the same order: the matching key, or `None`.
    fn resolve_keys(&self, identifiers: &[Vec<u8>]) -> Result<Vec<Option<SymmetricKey>>, Error>;
}

/// A secret key that produces signatures.
pub trait SigningSecretKey {
    /// The matching public key type.
    type Public: SigningPublicKey;

    /// Signs `msg`.
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, Error>;

    /// The public half of this key.
    fn public_key(&self) -> Self::Public;
}

/// A public key that verifies signatures.
pub trait SigningPublicKey {
    /// The key id carried in signature headers.
    fn to_kid(&self) -> Vec<u8>;

    /// Whether `sig` is a valid signature of `msg`.
    fn verify(&self, msg: &[u8], sig: &[u8]) -> bool;
}

/// A store of signing public keys, consulted while verifying.
pub trait SigKeyring {
    /// The public key type in this keyring.
    type Public: SigningPublicKey;

    /// Finds the public key with key id `kid`.
    fn lookup_signing_public_key(&self, kid: &[u8]) -> Option<Self::Public>;
}

/// An X25519 public key.
#[derive(Clone, PartialEq, Eq)]
pub struct NaclBoxPublicKey {
    key: PublicKey,
    hide: bool,
}

impl fmt::Debug for NaclBoxPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NaclBoxPublicKey")
            .field("key", self.key.as_bytes())
            .field("hide", &self.hide)
            .finish()
    }
}

impl NaclBoxPublicKey {
    /// Marks this key as a hidden receiver.
    pub fn hidden(mut self) -> Self {
        self.hide = true;
        self
    }
}

impl From<RawBoxKey> for NaclBoxPublicKey {
    fn from(raw: RawBoxKey) -> Self {
        Self {
            key: PublicKey::from(*raw.as_bytes()),
            hide: false,
        }
    }
}

impl TryFrom<&[u8]> for NaclBoxPublicKey {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Ok(RawBoxKey::try_from(bytes)?.into())
    }
}

impl BoxPublicKey for NaclBoxPublicKey {
    type Secret = NaclBoxSecretKey;

    fn to_kid(&self) -> Vec<u8> {
        self.key.as_bytes().to_vec()
    }

    fn to_raw_box_key(&self) -> RawBoxKey {
        RawBoxKey::from(*self.key.as_bytes())
    }

    fn hide_identity(&self) -> bool {
        self.hide
    }

    fn create_ephemeral_key<R: RngCore + CryptoRng>(&self, rng: &mut R) -> NaclBoxSecretKey {
        NaclBoxSecretKey::generate(rng)
    }
}

/// An X25519 secret key.
#[derive(Clone)]
pub struct NaclBoxSecretKey(SecretKey);

impl fmt::Debug for NaclBoxSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NaclBoxSecretKey")
            .field("public", self.0.public_key().as_bytes())
            .finish_non_exhaustive()
    }
}

impl NaclBoxSecretKey {
    /// Generates a fresh random key.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(SecretKey::from(bytes))
    }

    /// Creates a key from its raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(SecretKey::from(bytes))
    }
}

impl BoxSecretKey for NaclBoxSecretKey {
    type Public = NaclBoxPublicKey;

    fn public_key(&self) -> NaclBoxPublicKey {
        NaclBoxPublicKey {
            key: self.0.public_key(),
            hide: false,
        }
    }

    fn generate_ephemeral<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::generate(rng)
    }

    fn precompute(&self, peer: &RawBoxKey) -> PrecomputedSharedKey {
        let peer = PublicKey::from(*peer.as_bytes());
        PrecomputedSharedKey::new(SalsaBox::new(&peer, &self.0))
    }
}

/// An ed25519 verifying key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ed25519PublicKey(ed25519_dalek::VerifyingKey);

impl TryFrom<&[u8]> for Ed25519PublicKey {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into()?;
        ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|_| Error::ConstraintViolation)
    }
}

impl SigningPublicKey for Ed25519PublicKey {
    fn to_kid(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }

    fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        let Ok(sig) = <[u8; SIGNATURE_SIZE]>::try_from(sig) else {
            return false;
        };
        self.0
            .verify(msg, &ed25519_dalek::Signature::from_bytes(&sig))
            .is_ok()
    }
}

/// An ed25519 signing key.
#[derive(Clone)]
pub struct Ed25519SecretKey(ed25519_dalek::SigningKey);

impl fmt::Debug for Ed25519SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519SecretKey")
            .field("public", self.0.verifying_key().as_bytes())
            .finish_non_exhaustive()
    }
}

impl Ed25519SecretKey {
    /// Generates a fresh random key.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut seed = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut seed);
        Self(ed25519_dalek::SigningKey::from_bytes(&seed))
    }

    /// Creates a key from its 32-byte seed.
    pub fn from_bytes(seed: [u8; KEY_SIZE]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&seed))
    }
}

impl SigningSecretKey for Ed25519SecretKey {
    type Public = Ed25519PublicKey;

    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(self.0.sign(msg).to_bytes().to_vec())
    }

    fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.0.verifying_key())
    }
}
