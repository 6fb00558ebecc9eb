//! An in-memory keyring.

use std::collections::HashMap;

use crate::artifacts::SymmetricKey;
use crate::error::Error;
use crate::key::{
    BoxPublicKey, BoxSecretKey, Ed25519PublicKey, Keyring, NaclBoxPublicKey, NaclBoxSecretKey,
    ReceiverSymmetricKey, SigKeyring, SigningPublicKey, SymmetricKeyResolver,
};

/// A keyring that keeps all keys in memory.
///
/// Secret keys are only offered for hidden-receiver trial decryption when the keyring is made
/// iterable with [`SimpleKeyring::iterable`].
#[derive(Debug, Default, Clone)]
pub struct SimpleKeyring {
    secret_keys: HashMap<Vec<u8>, NaclBoxSecretKey>,
    public_keys: HashMap<Vec<u8>, NaclBoxPublicKey>,
    signing_keys: HashMap<Vec<u8>, Ed25519PublicKey>,
    symmetric_keys: HashMap<Vec<u8>, SymmetricKey>,
    iterable: bool,
}

impl SimpleKeyring {
    /// Creates an empty keyring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows trial decryption with every secret key in this keyring.
    pub fn iterable(mut self) -> Self {
        self.iterable = true;
        self
    }

    /// Adds a box secret key. Its public half is added as well.
    pub fn insert_box_key(&mut self, sk: NaclBoxSecretKey) {
        let pk = sk.public_key();
        self.secret_keys.insert(pk.to_kid(), sk);
        self.insert_box_public_key(pk);
    }

    /// Adds a box public key, e.g. of a known sender.
    pub fn insert_box_public_key(&mut self, pk: NaclBoxPublicKey) {
        self.public_keys.insert(pk.to_kid(), pk);
    }

    /// Adds a signing public key.
    pub fn insert_signing_public_key(&mut self, pk: Ed25519PublicKey) {
        self.signing_keys.insert(pk.to_kid(), pk);
    }

    /// Adds a pre-shared signcryption key under its identifier.
    pub fn insert_symmetric_key(&mut self, receiver: ReceiverSymmetricKey) {
        self.symmetric_keys.insert(receiver.identifier, receiver.key);
    }
}

impl Keyring for SimpleKeyring {
    type Secret = NaclBoxSecretKey;
    type Public = NaclBoxPublicKey;

    fn lookup_box_secret_key(&self, kids: &[Vec<u8>]) -> Option<(usize, NaclBoxSecretKey)> {
        kids.iter()
            .enumerate()
            .filter(|(_, kid)| !kid.is_empty())
            .find_map(|(i, kid)| self.secret_keys.get(kid).map(|sk| (i, sk.clone())))
    }

    fn lookup_box_public_key(&self, kid: &[u8]) -> Option<NaclBoxPublicKey> {
        self.public_keys.get(kid).cloned()
    }

    fn all_box_secret_keys(&self) -> Vec<NaclBoxSecretKey> {
        if self.iterable {
            self.secret_keys.values().cloned().collect()
        } else {
            Vec::new()
        }
    }

    fn import_ephemeral_key(&self, bytes: &[u8]) -> Option<NaclBoxPublicKey> {
        NaclBoxPublicKey::try_from(bytes).ok()
    }
}

impl SigKeyring for SimpleKeyring {
    type Public = Ed25519PublicKey;

    fn lookup_signing_public_key(&self, kid: &[u8]) -> Option<Ed25519PublicKey> {
        self.signing_keys.get(kid).cloned()
    }
}

impl SymmetricKeyResolver for SimpleKeyring {
    fn resolve_keys(&self, identifiers: &[Vec<u8>]) -> Result<Vec<Option<SymmetricKey>>, Error> {
        Ok(identifiers
            .iter()
            .map(|id| self.symmetric_keys.get(id).cloned())
            .collect())
    }
}
