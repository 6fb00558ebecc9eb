//! Signcryption: encrypting and signing in one pass.
//!
//! A signcrypted message is sealed with a random payload key like an encrypted message, but
//! instead of per-receiver authenticators each chunk carries the sender's signature inside its
//! secretbox. Receivers are either box keys, whose symmetric key is derived from the
//! Diffie-Hellman secret with the message's ephemeral key, or pre-shared symmetric keys that the
//! opener finds through a [`SymmetricKeyResolver`]. No receiver key id appears in the header.
//!
//! The sender's signing key id travels in a secretbox under the payload key. An anonymous sender
//! puts zeros there and leaves the chunks unsigned.
//!
//! The last block is flagged as final and the flag is part of the payload nonce, so a message
//! cannot be cut short at a block boundary.

use std::collections::HashSet;
use std::io::{self, Read, Write};

use hmac::{Hmac, Mac};
use log::{debug, trace};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

use crate::artifacts::{PrecomputedSharedKey, RawBoxKey, SymmetricKey};
use crate::consts::{
    MessageType, DEFAULT_BLOCK_SIZE, FORMAT_NAME, KEY_SIZE, SIGNATURE_SIZE,
    SIGNCRYPTION_BOX_KEY_IDENTIFIER, SIGNCRYPTION_DERIVED_KEY_NONCE,
    SIGNCRYPTION_DERIVED_SYMMETRIC_KEY, SIGNCRYPTION_SIGNATURE_PREFIX,
};
use crate::error::Error;
use crate::key::{
    BoxPublicKey, BoxSecretKey, Keyring, ReceiverSymmetricKey, SigKeyring, SigningPublicKey,
    SigningSecretKey, SymmetricKeyResolver,
};
use crate::nonce::{Nonce, NonceBase};
use crate::packet::{
    encode, PacketDecoder, PacketEncoder, SigncryptionBlock, SigncryptionHeader,
    SigncryptionReceiver, Version,
};

type HmacSha512 = Hmac<Sha512>;

const ANONYMOUS_SENDER: [u8; KEY_SIZE] = [0; KEY_SIZE];

fn keyed_digest(key: &[u8], secret: &[u8], nonce: &Nonce) -> Result<[u8; KEY_SIZE], Error> {
    let Ok(mut mac) = HmacSha512::new_from_slice(key) else {
        return Err(Error::ConstraintViolation);
    };
    mac.update(secret);
    mac.update(nonce.as_bytes());

    let mut out = [0u8; KEY_SIZE];
    out.copy_from_slice(&mac.finalize().into_bytes()[..KEY_SIZE]);
    Ok(out)
}

// The identifier and symmetric key of the box receiver whose key box uses `nonce`.
fn derive_box_receiver(
    shared: &PrecomputedSharedKey,
    nonce: &Nonce,
) -> Result<(Vec<u8>, SymmetricKey), Error> {
    let secret = Zeroizing::new(shared.seal(
        &Nonce::from_bytes(*SIGNCRYPTION_DERIVED_KEY_NONCE),
        &[0u8; KEY_SIZE],
    )?);

    let identifier = keyed_digest(SIGNCRYPTION_BOX_KEY_IDENTIFIER, &secret, nonce)?;
    let key = keyed_digest(SIGNCRYPTION_DERIVED_SYMMETRIC_KEY, &secret, nonce)?;
    Ok((identifier.to_vec(), SymmetricKey::from(key)))
}

/// The bytes signed for one signcrypted chunk.
pub(crate) fn signcryption_signature_input(
    header_hash: &[u8],
    nonce: &Nonce,
    is_final: bool,
    chunk: &[u8],
) -> Vec<u8> {
    let digest = Sha512::new()
        .chain_update(header_hash)
        .chain_update(nonce.as_bytes())
        .chain_update([u8::from(is_final)])
        .chain_update(Sha512::digest(chunk))
        .finalize();

    [SIGNCRYPTION_SIGNATURE_PREFIX, digest.as_slice()].concat()
}

fn payload_key(bytes: &[u8]) -> Result<SymmetricKey, Error> {
    SymmetricKey::try_from(bytes).map_err(|_| Error::BadSessionKey)
}

/// Signcrypts a plaintext stream.
///
/// The header is written when the stream is created. A full block is only written once more
/// plaintext follows it, because the last block must be flagged as final. The stream must be
/// closed, and any error poisons it.
#[derive(Debug)]
pub struct SigncryptStream<'k, W: Write, S: SigningSecretKey> {
    encoder: PacketEncoder<W>,
    signer: Option<&'k S>,
    payload_key: SymmetricKey,
    header_hash: Vec<u8>,
    nonces: NonceBase,
    buf: Vec<u8>,
    block_size: usize,
    block: u64,
    closed: bool,
    err: Option<Error>,
}

impl<'k, W: Write, S: SigningSecretKey> SigncryptStream<'k, W, S> {
    /// Starts a signcrypted message and writes its header.
    ///
    /// Without a signer the message is anonymous and unsigned. Box receivers come first in the
    /// header, followed by the symmetric receivers.
    pub fn new<P, R>(
        inner: W,
        signer: Option<&'k S>,
        box_receivers: &[P],
        symmetric_receivers: &[ReceiverSymmetricKey],
        rng: &mut R,
    ) -> Result<Self, Error>
    where
        P: BoxPublicKey,
        R: RngCore + CryptoRng,
    {
        if box_receivers.is_empty() && symmetric_receivers.is_empty() {
            return Err(Error::BadReceivers);
        }

        let mut seen = HashSet::new();
        for r in box_receivers {
            if !seen.insert(r.to_kid()) {
                return Err(Error::RepeatedKey(r.to_kid()));
            }
        }
        let mut seen = HashSet::new();
        for r in symmetric_receivers {
            if !seen.insert(&r.identifier) {
                return Err(Error::RepeatedKey(r.identifier.clone()));
            }
        }

        let ephemeral = <P::Secret as BoxSecretKey>::generate_ephemeral(rng);
        let ephemeral_pk = ephemeral.public_key().to_raw_box_key();
        let nonces = NonceBase::for_signcryption(&ephemeral_pk);
        let payload_key = SymmetricKey::generate(rng);

        let sender = match signer {
            Some(signer) => signer.public_key().to_kid(),
            None => ANONYMOUS_SENDER.to_vec(),
        };
        let sender_secretbox = payload_key.seal(&nonces.sender_key_box(), &sender)?;

        let mut receivers = Vec::with_capacity(box_receivers.len() + symmetric_receivers.len());
        for r in box_receivers {
            let nonce = nonces.key_box(receivers.len() as u64);
            let shared = ephemeral.precompute(&r.to_raw_box_key());
            let (identifier, key) = derive_box_receiver(&shared, &nonce)?;
            receivers.push(SigncryptionReceiver {
                identifier,
                key_box: key.seal(&nonce, payload_key.as_bytes())?,
            });
        }
        for r in symmetric_receivers {
            let nonce = nonces.key_box(receivers.len() as u64);
            receivers.push(SigncryptionReceiver {
                identifier: r.identifier.clone(),
                key_box: r.key.seal(&nonce, payload_key.as_bytes())?,
            });
        }

        debug!(
            "signcrypting for {} box and {} symmetric receivers, anonymous sender: {}",
            box_receivers.len(),
            symmetric_receivers.len(),
            signer.is_none()
        );

        let header = SigncryptionHeader {
            format_name: FORMAT_NAME.to_string(),
            version: Version::CURRENT,
            message_type: MessageType::Signcryption,
            ephemeral: ephemeral_pk.as_bytes().to_vec(),
            sender_secretbox,
            receivers,
        };

        let bytes = encode(&header)?;
        let mut encoder = PacketEncoder::new(inner);
        encoder.write_raw(&bytes)?;

        Ok(Self {
            encoder,
            signer,
            payload_key,
            header_hash: Sha512::digest(&bytes).to_vec(),
            nonces,
            buf: Vec::new(),
            block_size: DEFAULT_BLOCK_SIZE,
            block: 1,
            closed: false,
            err: None,
        })
    }

    /// Sets the plaintext block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Signcrypts `data`, writing every block that is known not to be the last one.
    pub fn write_payload(&mut self, data: &[u8]) -> Result<(), Error> {
        if let Some(e) = &self.err {
            return Err(e.clone());
        }
        if self.closed {
            return Err(Error::WriteAfterClose);
        }

        self.buf.extend_from_slice(data);
        if self.buf.len() <= self.block_size {
            return Ok(());
        }

        let buf = std::mem::take(&mut self.buf);
        let split = (buf.len() - 1) / self.block_size * self.block_size;
        let (ready, rest) = buf.split_at(split);
        let res = ready
            .chunks_exact(self.block_size)
            .try_for_each(|chunk| self.write_block(chunk, false));
        self.buf = rest.to_vec();

        self.poison(res)
    }

    /// Writes the buffered plaintext as the final block.
    pub fn close(&mut self) -> Result<(), Error> {
        if let Some(e) = &self.err {
            return Err(e.clone());
        }
        if self.closed {
            return Ok(());
        }

        let res = self.write_final();
        self.poison(res)
    }

    /// Closes the stream and returns the inner writer.
    pub fn finish(mut self) -> Result<W, Error> {
        self.close()?;
        Ok(self.encoder.into_inner())
    }

    fn write_final(&mut self) -> Result<(), Error> {
        let rest = std::mem::take(&mut self.buf);
        self.write_block(&rest, true)?;
        self.encoder.flush()?;
        self.closed = true;
        Ok(())
    }

    fn write_block(&mut self, chunk: &[u8], is_final: bool) -> Result<(), Error> {
        let nonce = self.nonces.signcrypted_payload_box(self.block, is_final);

        let signature = match self.signer {
            Some(signer) => signer.sign(&signcryption_signature_input(
                &self.header_hash,
                &nonce,
                is_final,
                chunk,
            ))?,
            None => vec![0u8; SIGNATURE_SIZE],
        };

        let plaintext = Zeroizing::new([signature.as_slice(), chunk].concat());
        self.encoder.write(&SigncryptionBlock {
            payload_ciphertext: self.payload_key.seal(&nonce, &plaintext)?,
            is_final,
        })?;

        trace!(
            "signcrypted block {} ({} bytes, final: {is_final})",
            self.block,
            chunk.len()
        );
        self.block += 1;
        Ok(())
    }

    fn poison<T>(&mut self, res: Result<T, Error>) -> Result<T, Error> {
        if let Err(e) = &res {
            self.err = Some(e.clone());
        }
        res
    }
}

impl<W: Write, S: SigningSecretKey> Write for SigncryptStream<'_, W, S> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.write_payload(data)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.encoder.flush()?)
    }
}

/// Opens a signcrypted message, verifying each chunk before handing it out.
///
/// Any error poisons the stream.
#[derive(Debug)]
pub struct SigncryptOpenStream<R: Read, P: SigningPublicKey> {
    decoder: PacketDecoder<R>,
    sender: Option<P>,
    payload_key: SymmetricKey,
    header_hash: Vec<u8>,
    nonces: NonceBase,
    out: Vec<u8>,
    pos: usize,
    done: bool,
    err: Option<Error>,
}

impl<R: Read, P: SigningPublicKey> SigncryptOpenStream<R, P> {
    /// Reads the header of a signcrypted message, recovers its payload key and resolves the
    /// sender.
    ///
    /// Every box secret key the keyring is willing to enumerate is tried against every receiver.
    /// Only when none of them matches is `resolver` asked for pre-shared keys.
    pub fn new<K>(
        inner: R,
        keyring: &K,
        resolver: Option<&dyn SymmetricKeyResolver>,
    ) -> Result<Self, Error>
    where
        K: Keyring + SigKeyring<Public = P>,
    {
        let mut decoder = PacketDecoder::new(inner);
        let (header, raw): (SigncryptionHeader, _) = decoder.expect_raw()?;
        header.check(MessageType::Signcryption)?;

        let ephemeral = keyring
            .import_ephemeral_key(&header.ephemeral)
            .ok_or(Error::BadEphemeralKey)?
            .to_raw_box_key();
        let nonces = NonceBase::for_signcryption(&ephemeral);

        let payload_key =
            match open_with_box_keys(keyring.all_box_secret_keys(), &header, &nonces, &ephemeral)? {
                Some(key) => key,
                None => open_with_resolver(resolver, &header, &nonces)?.ok_or_else(|| {
                    Error::NoDecryptionKey {
                        named_receivers: Vec::new(),
                        num_anon_receivers: header.receivers.len(),
                    }
                })?,
            };

        let sender = payload_key
            .open(&nonces.sender_key_box(), &header.sender_secretbox)
            .ok_or(Error::BadSenderKeySecretbox)?;

        let sender = if sender.iter().all(|&b| b == 0) {
            debug!("sender is anonymous");
            None
        } else {
            Some(
                keyring
                    .lookup_signing_public_key(&sender)
                    .ok_or(Error::NoSenderKey)?,
            )
        };

        Ok(Self {
            decoder,
            sender,
            payload_key,
            header_hash: Sha512::digest(&raw).to_vec(),
            nonces,
            out: Vec::new(),
            pos: 0,
            done: false,
            err: None,
        })
    }

    /// The sender's signing key, or `None` for anonymous senders.
    pub fn sender(&self) -> Option<&P> {
        self.sender.as_ref()
    }

    /// Returns the next verified chunk, or `None` after the final block.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, Error> {
        if let Some(e) = &self.err {
            return Err(e.clone());
        }
        if self.done {
            return Ok(None);
        }

        let res = self.read_block();
        if let Err(e) = &res {
            self.err = Some(e.clone());
        }
        res
    }

    fn read_block(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let seqno = self.decoder.seqno();
        let block: SigncryptionBlock = self.decoder.expect()?;

        let nonce = self.nonces.signcrypted_payload_box(seqno, block.is_final);
        let plaintext = self
            .payload_key
            .open(&nonce, &block.payload_ciphertext)
            .map(Zeroizing::new)
            .ok_or(Error::BadCiphertext(seqno))?;
        if plaintext.len() < SIGNATURE_SIZE {
            return Err(Error::BadCiphertext(seqno));
        }

        let (signature, chunk) = plaintext.split_at(SIGNATURE_SIZE);
        if let Some(sender) = &self.sender {
            let input =
                signcryption_signature_input(&self.header_hash, &nonce, block.is_final, chunk);
            if !sender.verify(&input, signature) {
                return Err(Error::BadSignature(seqno));
            }
        }

        if block.is_final {
            self.decoder.assert_end_of_stream()?;
            self.done = true;
            trace!("reached final block {seqno} ({} bytes)", chunk.len());
        } else {
            trace!("opened block {seqno} ({} bytes)", chunk.len());
        }

        Ok(Some(chunk.to_vec()))
    }
}

fn open_with_box_keys<S: BoxSecretKey>(
    candidates: Vec<S>,
    header: &SigncryptionHeader,
    nonces: &NonceBase,
    ephemeral: &RawBoxKey,
) -> Result<Option<SymmetricKey>, Error> {
    debug!(
        "trying {} box keys against {} receivers",
        candidates.len(),
        header.receivers.len()
    );

    for sk in candidates {
        let shared = sk.precompute(ephemeral);

        for (i, record) in header.receivers.iter().enumerate() {
            let nonce = nonces.key_box(i as u64);
            let (identifier, key) = derive_box_receiver(&shared, &nonce)?;
            if identifier != record.identifier {
                continue;
            }

            let bytes = key
                .open(&nonce, &record.key_box)
                .map(Zeroizing::new)
                .ok_or(Error::BadCiphertext(0))?;
            debug!("opened key box of receiver {i} with a box key");
            return payload_key(&bytes).map(Some);
        }
    }

    Ok(None)
}

fn open_with_resolver(
    resolver: Option<&dyn SymmetricKeyResolver>,
    header: &SigncryptionHeader,
    nonces: &NonceBase,
) -> Result<Option<SymmetricKey>, Error> {
    let Some(resolver) = resolver else {
        return Ok(None);
    };

    let identifiers: Vec<Vec<u8>> = header
        .receivers
        .iter()
        .map(|r| r.identifier.clone())
        .collect();
    let keys = resolver.resolve_keys(&identifiers)?;
    if keys.len() != identifiers.len() {
        return Err(Error::WrongNumberOfKeys {
            wanted: identifiers.len(),
            received: keys.len(),
        });
    }

    for (i, (record, key)) in header.receivers.iter().zip(keys).enumerate() {
        let Some(key) = key else {
            continue;
        };

        let bytes = key
            .open(&nonces.key_box(i as u64), &record.key_box)
            .map(Zeroizing::new)
            .ok_or(Error::BadCiphertext(0))?;
        debug!("opened key box of receiver {i} with a resolved key");
        return payload_key(&bytes).map(Some);
    }

    Ok(None)
}

impl<R: Read, P: SigningPublicKey> Read for SigncryptOpenStream<R, P> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.out.len() {
            match self.next_chunk()? {
                Some(chunk) => {
                    self.out = chunk;
                    self.pos = 0;
                }
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.out.len() - self.pos);
        buf[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Signcrypts `plaintext` in memory.
pub fn signcrypt_seal<P, S, R>(
    plaintext: &[u8],
    signer: Option<&S>,
    box_receivers: &[P],
    symmetric_receivers: &[ReceiverSymmetricKey],
    rng: &mut R,
) -> Result<Vec<u8>, Error>
where
    P: BoxPublicKey,
    S: SigningSecretKey,
    R: RngCore + CryptoRng,
{
    let mut stream =
        SigncryptStream::new(Vec::new(), signer, box_receivers, symmetric_receivers, rng)?;
    stream.write_payload(plaintext)?;
    stream.finish()
}

/// Opens a signcrypted message in memory, returning the sender (if not anonymous) and the
/// plaintext.
pub fn signcrypt_open<K>(
    ciphertext: &[u8],
    keyring: &K,
    resolver: Option<&dyn SymmetricKeyResolver>,
) -> Result<(Option<<K as SigKeyring>::Public>, Vec<u8>), Error>
where
    K: Keyring + SigKeyring,
{
    let mut stream = SigncryptOpenStream::new(ciphertext, keyring, resolver)?;
    let mut plaintext = Vec::new();

    while let Some(chunk) = stream.next_chunk()? {
        plaintext.extend_from_slice(&chunk);
    }

    Ok((stream.sender, plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{Ed25519PublicKey, Ed25519SecretKey, NaclBoxPublicKey, NaclBoxSecretKey};
    use crate::keyring::SimpleKeyring;
    use crate::test::{rand_vec, FailingWriter};

    const BLOCK: usize = 1000;
    const LENGTHS: &[usize] = &[0, 1, BLOCK - 1, BLOCK, BLOCK + 1, 3 * BLOCK, 4 * BLOCK + 7];

    struct Parties {
        keyring: SimpleKeyring,
        receivers: Vec<NaclBoxPublicKey>,
        signer: Ed25519SecretKey,
    }

    // One box receiver whose keyring also knows the signer.
    fn parties() -> Parties {
        let mut rng = rand::thread_rng();
        let receiver = NaclBoxSecretKey::generate(&mut rng);
        let signer = Ed25519SecretKey::generate(&mut rng);

        let mut keyring = SimpleKeyring::new().iterable();
        let receivers = vec![receiver.public_key()];
        keyring.insert_box_key(receiver);
        keyring.insert_signing_public_key(signer.public_key());

        Parties {
            keyring,
            receivers,
            signer,
        }
    }

    fn dummy_receiver() -> ReceiverSymmetricKey {
        ReceiverSymmetricKey {
            key: SymmetricKey::from([0u8; KEY_SIZE]),
            identifier: b"dummy identifier".to_vec(),
        }
    }

    fn seal_helper(p: &Parties, plain: &[u8], anonymous: bool) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        let signer = (!anonymous).then_some(&p.signer);
        let mut stream = SigncryptStream::new(Vec::new(), signer, &p.receivers, &[], &mut rng)
            .unwrap()
            .with_block_size(BLOCK);
        stream.write_all(plain).unwrap();
        stream.finish().unwrap()
    }

    fn packets(ct: &[u8]) -> (SigncryptionHeader, Vec<SigncryptionBlock>) {
        let mut dec = PacketDecoder::new(ct);
        let header = dec.expect().unwrap();
        let mut blocks = Vec::new();
        while let Some(b) = dec.next_packet().unwrap() {
            blocks.push(b);
        }
        (header, blocks)
    }

    fn assemble(header: &SigncryptionHeader, blocks: &[SigncryptionBlock]) -> Vec<u8> {
        let mut enc = PacketEncoder::new(Vec::new());
        enc.write(header).unwrap();
        for b in blocks {
            enc.write(b).unwrap();
        }
        enc.into_inner()
    }

    fn tamper(
        ct: &[u8],
        f: impl FnOnce(&mut SigncryptionHeader, &mut Vec<SigncryptionBlock>),
    ) -> Vec<u8> {
        let (mut header, mut blocks) = packets(ct);
        f(&mut header, &mut blocks);
        assemble(&header, &blocks)
    }

    #[test]
    fn test_box_key_round_trip() {
        let p = parties();

        for &l in LENGTHS {
            let plain = rand_vec(l);
            let ct = seal_helper(&p, &plain, false);

            let (sender, out) = signcrypt_open(&ct, &p.keyring, None).unwrap();
            assert_eq!(sender, Some(p.signer.public_key()));
            assert_eq!(out, plain);
        }
    }

    #[test]
    fn test_final_block_layout() {
        let p = parties();

        // A message of exactly one block is a single final packet.
        let (header, blocks) = packets(&seal_helper(&p, &rand_vec(BLOCK), false));
        header.check(MessageType::Signcryption).unwrap();
        assert_eq!(header.ephemeral.len(), KEY_SIZE);
        assert_eq!(header.receivers.len(), 1);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].is_final);
        assert_eq!(
            blocks[0].payload_ciphertext.len(),
            BLOCK + SIGNATURE_SIZE + crate::consts::TAG_SIZE
        );

        let (_, blocks) = packets(&seal_helper(&p, &[], false));
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].is_final);

        let (_, blocks) = packets(&seal_helper(&p, &rand_vec(2 * BLOCK + 1), false));
        let flags: Vec<bool> = blocks.iter().map(|b| b.is_final).collect();
        assert_eq!(flags, [false, false, true]);
    }

    #[test]
    fn test_write_granularity() {
        let p = parties();
        let plain = rand_vec(3 * BLOCK + 5);
        let mut rng = rand::thread_rng();

        let mut stream =
            SigncryptStream::new(Vec::new(), Some(&p.signer), &p.receivers, &[], &mut rng)
                .unwrap()
                .with_block_size(BLOCK);
        for chunk in plain.chunks(7) {
            stream.write_payload(chunk).unwrap();
        }
        let ct = stream.finish().unwrap();

        let (_, blocks) = packets(&ct);
        assert_eq!(blocks.len(), 4);
        assert_eq!(signcrypt_open(&ct, &p.keyring, None).unwrap().1, plain);
    }

    #[test]
    fn test_resolved_key() {
        let mut rng = rand::thread_rng();
        let signer = Ed25519SecretKey::generate(&mut rng);
        let ct = signcrypt_seal::<NaclBoxPublicKey, _, _>(
            b"hello world",
            Some(&signer),
            &[],
            &[dummy_receiver()],
            &mut rng,
        )
        .unwrap();

        let (header, _) = packets(&ct);
        assert_eq!(header.receivers[0].identifier, b"dummy identifier");

        let mut keyring = SimpleKeyring::new();
        keyring.insert_signing_public_key(signer.public_key());
        keyring.insert_symmetric_key(dummy_receiver());

        let (sender, out) = signcrypt_open(&ct, &keyring, Some(&keyring)).unwrap();
        assert_eq!(sender, Some(signer.public_key()));
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn test_mixed_receivers() {
        let mut rng = rand::thread_rng();
        let p = parties();
        let plain = rand_vec(2500);

        let ct = signcrypt_seal(
            &plain,
            Some(&p.signer),
            &p.receivers,
            &[dummy_receiver()],
            &mut rng,
        )
        .unwrap();

        assert_eq!(signcrypt_open(&ct, &p.keyring, None).unwrap().1, plain);

        let mut resolving = SimpleKeyring::new();
        resolving.insert_signing_public_key(p.signer.public_key());
        resolving.insert_symmetric_key(dummy_receiver());
        assert_eq!(signcrypt_open(&ct, &resolving, Some(&resolving)).unwrap().1, plain);
    }

    #[test]
    fn test_anonymous_sender() {
        let p = parties();
        let ct = seal_helper(&p, b"hello world", true);

        let (sender, out) = signcrypt_open(&ct, &p.keyring, None).unwrap();
        assert!(sender.is_none());
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn test_unknown_sender() {
        let p = parties();
        let ct = seal_helper(&p, b"hello world", false);

        let mut no_signer = SimpleKeyring::new().iterable();
        for sk in p.keyring.all_box_secret_keys() {
            no_signer.insert_box_key(sk);
        }
        assert!(matches!(
            signcrypt_open(&ct, &no_signer, None),
            Err(Error::NoSenderKey)
        ));
    }

    #[test]
    fn test_bad_receivers() {
        let mut rng = rand::thread_rng();
        let p = parties();

        assert!(matches!(
            signcrypt_seal::<NaclBoxPublicKey, _, _>(b"hi", Some(&p.signer), &[], &[], &mut rng),
            Err(Error::BadReceivers)
        ));

        let twice = [dummy_receiver(), dummy_receiver()];
        assert!(matches!(
            signcrypt_seal::<NaclBoxPublicKey, _, _>(b"hi", Some(&p.signer), &[], &twice, &mut rng),
            Err(Error::RepeatedKey(id)) if id == b"dummy identifier"
        ));

        let twice = [p.receivers[0].clone(), p.receivers[0].clone()];
        assert!(matches!(
            signcrypt_seal(b"hi", Some(&p.signer), &twice, &[], &mut rng),
            Err(Error::RepeatedKey(_))
        ));
    }

    #[test]
    fn test_empty_ciphertext() {
        let p = parties();
        assert!(matches!(
            signcrypt_open(&[], &p.keyring, None),
            Err(Error::UnexpectedEof)
        ));
    }

    #[test]
    fn test_truncated_at_packet_boundary() {
        let p = parties();
        let ct = seal_helper(&p, b"hello world", false);

        let mut dec = PacketDecoder::new(&ct[..]);
        let (_, raw): (SigncryptionHeader, _) = dec.expect_raw().unwrap();
        assert!(matches!(
            signcrypt_open(&ct[..raw.len()], &p.keyring, None),
            Err(Error::UnexpectedEof)
        ));

        let ct = seal_helper(&p, &rand_vec(3 * BLOCK), false);
        let cut = tamper(&ct, |_, blocks| {
            blocks.pop();
        });
        assert!(matches!(
            signcrypt_open(&cut, &p.keyring, None),
            Err(Error::UnexpectedEof)
        ));
    }

    #[test]
    fn test_invalid_messagepack() {
        let p = parties();
        let ct = seal_helper(&p, b"hello world", false);
        assert!(matches!(
            signcrypt_open(&ct[..10], &p.keyring, None),
            Err(Error::UnexpectedEof)
        ));
    }

    #[test]
    fn test_packet_swapping_within_message() {
        let p = parties();
        let ct = seal_helper(&p, &rand_vec(2 * BLOCK), false);

        let swapped = tamper(&ct, |_, blocks| {
            assert_eq!(blocks.len(), 2);
            blocks.swap(0, 1);
        });
        assert!(matches!(
            signcrypt_open(&swapped, &p.keyring, None),
            Err(Error::BadCiphertext(1))
        ));
    }

    #[test]
    fn test_packet_swapping_between_messages() {
        let p = parties();
        let plain = rand_vec(2 * BLOCK);
        let (header1, blocks1) = packets(&seal_helper(&p, &plain, false));
        let (header2, blocks2) = packets(&seal_helper(&p, &plain, false));

        for swapped in [assemble(&header1, &blocks2), assemble(&header2, &blocks1)] {
            assert!(matches!(
                signcrypt_open(&swapped, &p.keyring, None),
                Err(Error::BadCiphertext(1))
            ));
        }
    }

    #[test]
    fn test_subsequence_marked_final() {
        let p = parties();

        for anonymous in [false, true] {
            let (header, blocks) = packets(&seal_helper(&p, &rand_vec(2 * BLOCK), anonymous));
            assert_eq!(blocks.len(), 2);

            for block in blocks {
                let forged = SigncryptionBlock {
                    is_final: true,
                    ..block
                };
                assert!(matches!(
                    signcrypt_open(&assemble(&header, &[forged]), &p.keyring, None),
                    Err(Error::BadCiphertext(1))
                ));
            }
        }
    }

    #[test]
    fn test_trailing_garbage() {
        let p = parties();
        let ct = seal_helper(&p, &rand_vec(BLOCK + 1), false);

        let padded = tamper(&ct, |_, blocks| {
            let last = blocks[blocks.len() - 1].clone();
            blocks.push(last);
        });
        assert!(matches!(
            signcrypt_open(&padded, &p.keyring, None),
            Err(Error::TrailingGarbage)
        ));
    }

    #[test]
    fn test_read_one_byte_at_a_time() {
        let p = parties();
        let plain = rand_vec(2 * BLOCK + 3);
        let ct = seal_helper(&p, &plain, false);

        let mut stream = SigncryptOpenStream::new(&ct[..], &p.keyring, None).unwrap();
        assert_eq!(stream.sender(), Some(&p.signer.public_key()));

        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = stream.read(&mut byte).unwrap();
            if n == 0 {
                break;
            }
            out.push(byte[0]);
        }
        assert_eq!(out, plain);
    }

    #[test]
    fn test_error_is_sticky() {
        let p = parties();
        let ct = seal_helper(&p, b"hello world", false);
        let broken = tamper(&ct, |_, blocks| blocks[0].payload_ciphertext[20] ^= 1);

        let mut stream = SigncryptOpenStream::new(&broken[..], &p.keyring, None).unwrap();
        for _ in 0..2 {
            let err = stream.read_to_end(&mut Vec::new()).unwrap_err();
            assert!(matches!(Error::from_io(err), Error::BadCiphertext(1)));
        }
    }

    #[test]
    fn test_broken_key_box() {
        let mut rng = rand::thread_rng();
        let p = parties();

        let ct = seal_helper(&p, b"hello world", false);
        let broken = tamper(&ct, |header, _| header.receivers[0].key_box[0] ^= 1);
        assert!(matches!(
            signcrypt_open(&broken, &p.keyring, None),
            Err(Error::BadCiphertext(0))
        ));

        let ct = signcrypt_seal::<NaclBoxPublicKey, _, _>(
            b"hello world",
            Some(&p.signer),
            &[],
            &[dummy_receiver()],
            &mut rng,
        )
        .unwrap();
        let broken = tamper(&ct, |header, _| {
            let key_box = &mut header.receivers[0].key_box;
            let last = key_box.len() - 1;
            key_box[last] ^= 1;
        });
        let mut resolver = SimpleKeyring::new();
        resolver.insert_symmetric_key(dummy_receiver());
        assert!(matches!(
            signcrypt_open(&broken, &p.keyring, Some(&resolver)),
            Err(Error::BadCiphertext(0))
        ));
    }

    struct BrokenResolver;

    impl SymmetricKeyResolver for BrokenResolver {
        fn resolve_keys(&self, _: &[Vec<u8>]) -> Result<Vec<Option<SymmetricKey>>, Error> {
            Err(Error::Resolver("garbage error foo".to_string()))
        }
    }

    struct EmptyResolver;

    impl SymmetricKeyResolver for EmptyResolver {
        fn resolve_keys(&self, _: &[Vec<u8>]) -> Result<Vec<Option<SymmetricKey>>, Error> {
            Ok(Vec::new())
        }
    }

    struct NilResolver;

    impl SymmetricKeyResolver for NilResolver {
        fn resolve_keys(&self, ids: &[Vec<u8>]) -> Result<Vec<Option<SymmetricKey>>, Error> {
            Ok(vec![None; ids.len()])
        }
    }

    #[test]
    fn test_bad_resolvers() {
        let mut rng = rand::thread_rng();
        let p = parties();
        let ct = signcrypt_seal::<NaclBoxPublicKey, _, _>(
            b"hello world",
            Some(&p.signer),
            &[],
            &[dummy_receiver()],
            &mut rng,
        )
        .unwrap();

        let err = signcrypt_open(&ct, &p.keyring, Some(&BrokenResolver)).unwrap_err();
        assert_eq!(err.to_string(), "key resolver failed: garbage error foo");

        assert!(matches!(
            signcrypt_open(&ct, &p.keyring, Some(&EmptyResolver)),
            Err(Error::WrongNumberOfKeys {
                wanted: 1,
                received: 0
            })
        ));
    }

    #[test]
    fn test_no_matching_receivers() {
        let p = parties();
        let ct = seal_helper(&p, b"hello world", false);

        let other = parties();
        assert!(matches!(
            signcrypt_open(&ct, &other.keyring, Some(&NilResolver)),
            Err(Error::NoDecryptionKey {
                num_anon_receivers: 1,
                ..
            })
        ));
        assert!(matches!(
            signcrypt_open(&ct, &other.keyring, None),
            Err(Error::NoDecryptionKey { .. })
        ));
    }

    #[test]
    fn test_bad_sender_secretbox() {
        let p = parties();
        let ct = seal_helper(&p, b"hello world", false);

        let broken = tamper(&ct, |header, _| header.sender_secretbox[0] ^= 1);
        assert!(matches!(
            signcrypt_open(&broken, &p.keyring, None),
            Err(Error::BadSenderKeySecretbox)
        ));
    }

    #[test]
    fn test_wrong_message_type() {
        let p = parties();
        let ct = seal_helper(&p, b"hello world", false);

        let broken = tamper(&ct, |header, _| {
            header.message_type = MessageType::AttachedSignature
        });
        assert!(matches!(
            signcrypt_open(&broken, &p.keyring, None),
            Err(Error::WrongMessageType {
                seqno: 0,
                wanted: MessageType::Signcryption,
                received: MessageType::AttachedSignature,
            })
        ));
    }

    #[test]
    fn test_bad_version() {
        let p = parties();
        let ct = seal_helper(&p, b"hello world", false);

        let broken = tamper(&ct, |header, _| {
            header.version = Version {
                major: 999,
                minor: 0,
            }
        });
        assert!(matches!(
            signcrypt_open(&broken, &p.keyring, None),
            Err(Error::BadVersion {
                seqno: 0,
                received: Version { major: 999, .. }
            })
        ));
    }

    // Knows the box keys of a keyring but answers every signing key lookup with a random key.
    struct RandomSigningKeys(SimpleKeyring);

    impl Keyring for RandomSigningKeys {
        type Secret = NaclBoxSecretKey;
        type Public = NaclBoxPublicKey;

        fn lookup_box_secret_key(&self, kids: &[Vec<u8>]) -> Option<(usize, NaclBoxSecretKey)> {
            self.0.lookup_box_secret_key(kids)
        }

        fn lookup_box_public_key(&self, kid: &[u8]) -> Option<NaclBoxPublicKey> {
            self.0.lookup_box_public_key(kid)
        }

        fn all_box_secret_keys(&self) -> Vec<NaclBoxSecretKey> {
            self.0.all_box_secret_keys()
        }

        fn import_ephemeral_key(&self, bytes: &[u8]) -> Option<NaclBoxPublicKey> {
            self.0.import_ephemeral_key(bytes)
        }
    }

    impl SigKeyring for RandomSigningKeys {
        type Public = Ed25519PublicKey;

        fn lookup_signing_public_key(&self, _: &[u8]) -> Option<Ed25519PublicKey> {
            Some(Ed25519SecretKey::generate(&mut rand::thread_rng()).public_key())
        }
    }

    #[test]
    fn test_invalid_signature() {
        let p = parties();
        let ct = seal_helper(&p, b"hello world", false);

        let keyring = RandomSigningKeys(p.keyring.clone());
        assert!(matches!(
            signcrypt_open(&ct, &keyring, None),
            Err(Error::BadSignature(1))
        ));
    }

    #[test]
    fn test_failed_write_poisons_stream() {
        let mut rng = rand::thread_rng();
        let p = parties();

        let mut stream = SigncryptStream::new(
            FailingWriter::new(600),
            Some(&p.signer),
            &p.receivers,
            &[],
            &mut rng,
        )
        .unwrap()
        .with_block_size(100);

        let first = stream.write_payload(&rand_vec(2000)).unwrap_err();
        assert!(matches!(first, Error::Io(_)));
        assert_eq!(
            stream.write_payload(b"more").unwrap_err().to_string(),
            first.to_string()
        );
        assert_eq!(stream.close().unwrap_err().to_string(), first.to_string());
    }

    #[test]
    fn test_header_is_packed_once() {
        let p = parties();
        let ct = seal_helper(&p, b"hello world", false);

        let mut dec = PacketDecoder::new(&ct[..]);
        let (header, raw): (SigncryptionHeader, _) = dec.expect_raw().unwrap();
        assert_eq!(encode(&header).unwrap(), raw);
    }
}
