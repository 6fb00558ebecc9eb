//! # Saltpack core library
#![deny(
    missing_debug_implementations,
    rust_2018_idioms,
    missing_docs,
    rustdoc::broken_intra_doc_links
)]
//! Saltpack is a message format for encrypting and signing arbitrarily large messages for any
//! number of receivers.
//!
//! * Encryption: a random session key encrypts the payload in blocks, using NaCl `secretbox`.
//! The session key is boxed once per receiver under a fresh ephemeral key, and every block
//! carries one authenticator per receiver, boxed from the sender. Receivers can be hidden, in
//! which case their key id is left out of the [header][`packet::EncryptionHeader`] and they find
//! their key box by trial decryption. The sender can be anonymous.
//!
//! * Signing: payload blocks are signed with Ed25519 in sequence, either attached (the message
//! travels inside the signed stream) or detached (a single signature over the whole message).
//!
//! * Signcryption: the payload is encrypted as above, but each block is signed with the sender's
//! Ed25519 key inside its secretbox instead of carrying per-receiver authenticators. Receivers
//! can also be pre-shared symmetric keys.
//!
//! * Armor: any of the above can be carried as text, using a block-wise BaseX encoding that
//! survives whitespace being inserted anywhere in the body.
//!
//! Messages are processed in blocks, so neither side has to hold the whole message in memory.
//! Decrypted and verified chunks are authentic as soon as they are returned, but only a message
//! that was read up to its terminating block is known to be complete.
//!
//! ## Examples
//!
//! ### Encryption
//!
//! ```
//! use sp_core::key::{BoxSecretKey, NaclBoxSecretKey};
//! use sp_core::keyring::SimpleKeyring;
//! use sp_core::{open, seal};
//!
//! let mut rng = rand::thread_rng();
//!
//! let alice = NaclBoxSecretKey::generate(&mut rng);
//! let bob = NaclBoxSecretKey::generate(&mut rng);
//! let carol = NaclBoxSecretKey::generate(&mut rng);
//!
//! // Carol does not want to be named in the header.
//! let receivers = [bob.public_key(), carol.public_key().hidden()];
//! let ciphertext = seal(b"SECRET DATA", Some(&alice), &receivers, &mut rng).unwrap();
//!
//! let mut keyring = SimpleKeyring::new().iterable();
//! keyring.insert_box_key(carol);
//! keyring.insert_box_public_key(alice.public_key());
//!
//! let (info, plaintext) = open(&ciphertext, &keyring).unwrap();
//! assert_eq!(plaintext, b"SECRET DATA");
//! assert!(info.receiver_is_anonymous);
//! assert!(!info.sender_is_anonymous);
//! ```
//!
//! ### Signing
//!
//! ```
//! use sp_core::key::{Ed25519SecretKey, SigningSecretKey};
//! use sp_core::keyring::SimpleKeyring;
//! use sp_core::{sign_armored, verify_armored};
//!
//! let mut rng = rand::thread_rng();
//! let signer = Ed25519SecretKey::generate(&mut rng);
//!
//! let text = sign_armored(b"hello", &signer, Some("ACME"), &mut rng).unwrap();
//! assert!(text.starts_with("BEGIN ACME SALTPACK SIGNED MESSAGE."));
//!
//! let mut keyring = SimpleKeyring::new();
//! keyring.insert_signing_public_key(signer.public_key());
//!
//! let (who, message) = verify_armored(&text, Some("ACME"), &keyring).unwrap();
//! assert_eq!(who, signer.public_key());
//! assert_eq!(message, b"hello");
//! ```

pub mod armor;
pub mod artifacts;
pub mod consts;
pub mod decrypt;
pub mod encrypt;
pub mod error;
pub mod key;
pub mod keyring;
pub mod nonce;
pub mod packet;
pub mod sign;
pub mod signcrypt;
pub mod verify;


pub use armor::{armor, dearmor, ArmorEncoder, ArmorParams, Dearmor, Frame};
pub use consts::MessageType;
pub use decrypt::{open, DecryptStream, MessageKeyInfo};
pub use encrypt::{seal, EncryptStream};
pub use error::Error;
pub use sign::{sign, sign_detached, DetachedSigner, SignStream};
pub use signcrypt::{signcrypt_open, signcrypt_seal, SigncryptOpenStream, SigncryptStream};
pub use verify::{verify, verify_detached, verify_detached_reader, VerifyStream};

use rand::{CryptoRng, RngCore};

use key::{
    BoxPublicKey, Keyring, ReceiverSymmetricKey, SigKeyring, SigningSecretKey,
    SymmetricKeyResolver,
};

fn armor_params(brand: Option<&str>) -> ArmorParams {
    match brand {
        Some(brand) => ArmorParams::default().with_brand(brand),
        None => ArmorParams::default(),
    }
}

/// Encrypts `plaintext` and armors the result.
pub fn seal_armored<P, R>(
    plaintext: &[u8],
    sender: Option<&P::Secret>,
    receivers: &[P],
    brand: Option<&str>,
    rng: &mut R,
) -> Result<String, Error>
where
    P: BoxPublicKey,
    R: RngCore + CryptoRng,
{
    let ciphertext = seal(plaintext, sender, receivers, rng)?;
    armor(&ciphertext, MessageType::Encryption, &armor_params(brand))
}

/// Dearmors and decrypts `text`.
///
/// If `brand` is given, the message must carry that brand.
pub fn open_armored<K: Keyring>(
    text: &str,
    brand: Option<&str>,
    keyring: &K,
) -> Result<(MessageKeyInfo, Vec<u8>), Error> {
    let (_, ciphertext) = dearmor(text.as_bytes(), MessageType::Encryption, &armor_params(brand))?;
    open(&ciphertext, keyring)
}

/// Signs `plaintext` and armors the result.
pub fn sign_armored<S, R>(
    plaintext: &[u8],
    signer: &S,
    brand: Option<&str>,
    rng: &mut R,
) -> Result<String, Error>
where
    S: SigningSecretKey,
    R: RngCore + CryptoRng,
{
    let signed = sign(plaintext, signer, rng)?;
    armor(&signed, MessageType::AttachedSignature, &armor_params(brand))
}

/// Dearmors and verifies an attached signature, returning the signer and the plaintext.
pub fn verify_armored<K: SigKeyring>(
    text: &str,
    brand: Option<&str>,
    keyring: &K,
) -> Result<(K::Public, Vec<u8>), Error> {
    let (_, signed) = dearmor(
        text.as_bytes(),
        MessageType::AttachedSignature,
        &armor_params(brand),
    )?;
    verify(&signed, keyring)
}

/// Produces an armored detached signature over `plaintext`.
pub fn sign_detached_armored<S, R>(
    plaintext: &[u8],
    signer: &S,
    brand: Option<&str>,
    rng: &mut R,
) -> Result<String, Error>
where
    S: SigningSecretKey,
    R: RngCore + CryptoRng,
{
    let signature = sign_detached(plaintext, signer, rng)?;
    armor(&signature, MessageType::DetachedSignature, &armor_params(brand))
}

/// Verifies an armored detached signature over `message`.
pub fn verify_detached_armored<K: SigKeyring>(
    message: &[u8],
    signature: &str,
    brand: Option<&str>,
    keyring: &K,
) -> Result<K::Public, Error> {
    let (_, signature) = dearmor(
        signature.as_bytes(),
        MessageType::DetachedSignature,
        &armor_params(brand),
    )?;
    verify_detached(message, &signature, keyring)
}

/// Signcrypts `plaintext` and armors the result.
pub fn signcrypt_seal_armored<P, S, R>(
    plaintext: &[u8],
    signer: Option<&S>,
    box_receivers: &[P],
    symmetric_receivers: &[ReceiverSymmetricKey],
    brand: Option<&str>,
    rng: &mut R,
) -> Result<String, Error>
where
    P: BoxPublicKey,
    S: SigningSecretKey,
    R: RngCore + CryptoRng,
{
    let ciphertext = signcrypt_seal(plaintext, signer, box_receivers, symmetric_receivers, rng)?;
    armor(&ciphertext, MessageType::Signcryption, &armor_params(brand))
}

/// Dearmors and opens a signcrypted message, returning the sender (if not anonymous) and the
/// plaintext.
pub fn signcrypt_open_armored<K>(
    text: &str,
    brand: Option<&str>,
    keyring: &K,
    resolver: Option<&dyn SymmetricKeyResolver>,
) -> Result<(Option<<K as SigKeyring>::Public>, Vec<u8>), Error>
where
    K: Keyring + SigKeyring,
{
    let (_, ciphertext) = dearmor(
        text.as_bytes(),
        MessageType::Signcryption,
        &armor_params(brand),
    )?;
    signcrypt_open(&ciphertext, keyring, resolver)
}
