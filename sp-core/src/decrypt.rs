//! Streaming decryption.

use std::io::{self, Read};

use log::{debug, trace};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

use crate::artifacts::{PrecomputedSharedKey, RawBoxKey, SymmetricKey};
use crate::consts::{MessageType, KEY_SIZE};
use crate::error::Error;
use crate::key::{BoxPublicKey, BoxSecretKey, Keyring};
use crate::nonce::NonceBase;
use crate::packet::{self, EncryptionBlock, EncryptionHeader, PacketDecoder, ReceiverKeysPlaintext};

/// What was learned about the keys of a message while opening its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageKeyInfo {
    /// The sender's public key. For anonymous senders this is the ephemeral key.
    pub sender_key: RawBoxKey,
    /// Whether the sender chose to stay anonymous.
    pub sender_is_anonymous: bool,
    /// The public key of the receiver key that opened the message.
    pub receiver_key: RawBoxKey,
    /// The position of that receiver in the header.
    pub receiver_index: usize,
    /// Whether that receiver was hidden.
    pub receiver_is_anonymous: bool,
    /// The key ids of all visible receivers.
    pub named_receivers: Vec<Vec<u8>>,
    /// The number of hidden receivers.
    pub num_anon_receivers: usize,
}

/// Decrypts and authenticates an encrypted message.
///
/// The header is processed by [`DecryptStream::new`]; after that, every block is authenticated
/// before any of its plaintext is handed out. Any error poisons the stream.
#[derive(Debug)]
pub struct DecryptStream<R: Read> {
    decoder: PacketDecoder<R>,
    info: MessageKeyInfo,
    session_key: SymmetricKey,
    tag_key: PrecomputedSharedKey,
    nonces: NonceBase,
    out: Vec<u8>,
    pos: usize,
    done: bool,
    err: Option<Error>,
}

// A key box that opened: receiver index, the receiver's secret key, the shared key with the
// ephemeral key and the box contents.
type Opened<S> = (usize, S, PrecomputedSharedKey, Vec<u8>);

impl<R: Read> DecryptStream<R> {
    /// Reads the header of an encrypted message and recovers its session key.
    ///
    /// Visible receivers are tried first. Only when the keyring holds none of their keys are the
    /// hidden receivers tried, with every key the keyring is willing to enumerate.
    pub fn new<K: Keyring>(inner: R, keyring: &K) -> Result<Self, Error> {
        let mut decoder = PacketDecoder::new(inner);

        let header: EncryptionHeader = decoder.expect()?;
        header.check(MessageType::Encryption)?;

        let ephemeral = keyring
            .import_ephemeral_key(&header.ephemeral)
            .ok_or(Error::BadEphemeralKey)?
            .to_raw_box_key();
        let nonces = NonceBase::for_encryption(&ephemeral);

        let kids: Vec<Vec<u8>> = header.receivers.iter().map(|r| r.kid.clone()).collect();
        let named_receivers: Vec<Vec<u8>> =
            kids.iter().filter(|k| !k.is_empty()).cloned().collect();
        let num_anon_receivers = kids.len() - named_receivers.len();

        let opened = match keyring.lookup_box_secret_key(&kids) {
            Some((i, sk)) => {
                let record = header
                    .receivers
                    .get(i)
                    .ok_or(Error::BadReceiverIndex(i))?;
                let shared = sk.precompute(&ephemeral);
                let keys = shared
                    .open(&nonces.key_box(i as u64), &record.keys)
                    .ok_or(Error::BadCiphertext(0))?;
                debug!("opened key box of named receiver {i}");
                (i, sk, shared, keys)
            }
            None => open_hidden(keyring.all_box_secret_keys(), &header, &nonces, &ephemeral)
                .ok_or_else(|| Error::NoDecryptionKey {
                    named_receivers: named_receivers.clone(),
                    num_anon_receivers,
                })?,
        };

        let (receiver_index, receiver, shared, keys) = opened;
        let keys: ReceiverKeysPlaintext = packet::decode(&keys)?;

        if keys.sender.len() != KEY_SIZE {
            return Err(Error::BadSenderKey);
        }
        if keys.session_key.len() != KEY_SIZE {
            return Err(Error::BadSessionKey);
        }

        let sender_key = RawBoxKey::try_from(&keys.sender[..])?;
        let session_key = SymmetricKey::try_from(&keys.session_key[..])?;
        let sender_is_anonymous = sender_key == ephemeral;

        let tag_key = if sender_is_anonymous {
            debug!("sender is anonymous");
            shared
        } else {
            let sender = keyring
                .lookup_box_public_key(&keys.sender)
                .ok_or(Error::NoSenderKey)?;
            receiver.precompute(&sender.to_raw_box_key())
        };

        let info = MessageKeyInfo {
            sender_key,
            sender_is_anonymous,
            receiver_key: receiver.public_key().to_raw_box_key(),
            receiver_index,
            receiver_is_anonymous: header.receivers[receiver_index].kid.is_empty(),
            named_receivers,
            num_anon_receivers,
        };

        Ok(Self {
            decoder,
            info,
            session_key,
            tag_key,
            nonces,
            out: Vec::new(),
            pos: 0,
            done: false,
            err: None,
        })
    }

    /// What was learned about the keys of this message.
    pub fn message_key_info(&self) -> &MessageKeyInfo {
        &self.info
    }

    /// Returns the plaintext of the next block, or `None` after the terminating block.
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
        let block: EncryptionBlock = self.decoder.expect()?;

        let tag = block
            .tags
            .get(self.info.receiver_index)
            .ok_or(Error::BadTag(seqno))?;
        let digest = self
            .tag_key
            .open(&self.nonces.tag_box(seqno), tag)
            .ok_or(Error::BadTag(seqno))?;

        let expected = Sha512::digest(&block.payload_ciphertext);
        if !bool::from(digest.as_slice().ct_eq(expected.as_slice())) {
            return Err(Error::BadTag(seqno));
        }

        let chunk = self
            .session_key
            .open(&self.nonces.payload_box(seqno), &block.payload_ciphertext)
            .ok_or(Error::BadCiphertext(seqno))?;

        if chunk.is_empty() {
            self.decoder.assert_end_of_stream()?;
            self.done = true;
            trace!("reached terminating block {seqno}");
            return Ok(None);
        }

        trace!("read block {seqno} ({} bytes)", chunk.len());
        Ok(Some(chunk))
    }
}

fn open_hidden<S: BoxSecretKey>(
    candidates: Vec<S>,
    header: &EncryptionHeader,
    nonces: &NonceBase,
    ephemeral: &RawBoxKey,
) -> Option<Opened<S>> {
    debug!(
        "trying {} keys against hidden receivers",
        candidates.len()
    );

    for sk in candidates {
        let shared = sk.precompute(ephemeral);
        let hidden = header
            .receivers
            .iter()
            .enumerate()
            .filter(|(_, r)| r.kid.is_empty());

        for (i, record) in hidden {
            if let Some(keys) = shared.open(&nonces.key_box(i as u64), &record.keys) {
                debug!("opened key box of hidden receiver {i}");
                return Some((i, sk, shared, keys));
            }
        }
    }

    None
}

impl<R: Read> Read for DecryptStream<R> {
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

/// Decrypts `ciphertext` in memory.
pub fn open<K: Keyring>(
    ciphertext: &[u8],
    keyring: &K,
) -> Result<(MessageKeyInfo, Vec<u8>), Error> {
    let mut stream = DecryptStream::new(ciphertext, keyring)?;
    let mut plaintext = Vec::new();

    while let Some(chunk) = stream.next_chunk()? {
        plaintext.extend_from_slice(&chunk);
    }

    Ok((stream.info, plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::DEFAULT_BLOCK_SIZE;
    use crate::encrypt::{seal, EncryptStream};
    use crate::key::{NaclBoxPublicKey, NaclBoxSecretKey};
    use crate::keyring::SimpleKeyring;
    use crate::packet::{encode, PacketEncoder, Version};
    use crate::test::{rand_vec, TestSetup};
    use std::io::Write;

    const BLOCK: usize = 1024;
    const LENGTHS: &[usize] = &[0, 1, BLOCK - 1, BLOCK, BLOCK + 1, 3 * BLOCK, 5 * BLOCK + 17];

    fn seal_helper(setup: &TestSetup, plain: &[u8], anonymous: bool) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        let sender = (!anonymous).then_some(&setup.sender);
        let mut stream =
            EncryptStream::new(Vec::new(), sender, &setup.receivers, &mut rng)
                .unwrap()
                .with_block_size(BLOCK);
        stream.write_all(plain).unwrap();
        stream.finish().unwrap()
    }

    // Decodes all packets, lets `f` tamper with them and encodes them again.
    fn tamper(
        ct: &[u8],
        f: impl FnOnce(&mut EncryptionHeader, &mut Vec<EncryptionBlock>),
    ) -> Vec<u8> {
        let mut dec = PacketDecoder::new(ct);
        let mut header: EncryptionHeader = dec.expect().unwrap();
        let mut blocks = Vec::new();
        while let Some(b) = dec.next_packet().unwrap() {
            blocks.push(b);
        }

        f(&mut header, &mut blocks);

        let mut enc = PacketEncoder::new(Vec::new());
        enc.write(&header).unwrap();
        for b in &blocks {
            enc.write(b).unwrap();
        }
        enc.into_inner()
    }

    #[test]
    fn test_round_trip() {
        let mut rng = rand::thread_rng();
        let setup = TestSetup::new(&mut rng);

        for &l in LENGTHS {
            let plain = rand_vec(l);
            let ct = seal_helper(&setup, &plain, false);

            let (info, out) = open(&ct, &setup.keyring).unwrap();
            assert_eq!(out, plain);
            assert!(!info.sender_is_anonymous);
            assert_eq!(info.sender_key, setup.sender.public_key().to_raw_box_key());
            assert_eq!(info.receiver_index, 0);
            assert_eq!(info.named_receivers.len(), setup.receivers.len());
        }
    }

    #[test]
    fn test_read_granularity() {
        let mut rng = rand::thread_rng();
        let setup = TestSetup::new(&mut rng);
        let plain = rand_vec(4 * BLOCK + 3);
        let ct = seal_helper(&setup, &plain, false);

        for step in [1, 13, BLOCK, 3 * BLOCK] {
            let mut stream = DecryptStream::new(&ct[..], &setup.keyring).unwrap();
            let mut out = Vec::new();
            let mut buf = vec![0u8; step];
            loop {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
            assert_eq!(out, plain);
        }
    }

    #[test]
    fn test_default_block_size() {
        let mut rng = rand::thread_rng();
        let setup = TestSetup::new(&mut rng);
        let plain = rand_vec(DEFAULT_BLOCK_SIZE + 1);

        let ct = seal(&plain, Some(&setup.sender), &setup.receivers, &mut rng).unwrap();
        assert_eq!(open(&ct, &setup.keyring).unwrap().1, plain);
    }

    #[test]
    fn test_anonymous_sender() {
        let mut rng = rand::thread_rng();
        let setup = TestSetup::new(&mut rng);
        let plain = rand_vec(3 * BLOCK);
        let ct = seal_helper(&setup, &plain, true);

        // No sender public key is needed.
        let mut ring = SimpleKeyring::new();
        ring.insert_box_key(setup.receiver_keys[2].clone());

        let (info, out) = open(&ct, &ring).unwrap();
        assert_eq!(out, plain);
        assert!(info.sender_is_anonymous);
        assert_eq!(info.receiver_index, 2);
    }

    #[test]
    fn test_no_sender_key() {
        let mut rng = rand::thread_rng();
        let setup = TestSetup::new(&mut rng);
        let ct = seal_helper(&setup, b"hello", false);

        let mut ring = SimpleKeyring::new();
        ring.insert_box_key(setup.receiver_keys[0].clone());

        assert!(matches!(open(&ct, &ring), Err(Error::NoSenderKey)));
    }

    #[test]
    fn test_no_decryption_key() {
        let mut rng = rand::thread_rng();
        let setup = TestSetup::new(&mut rng);
        let ct = seal_helper(&setup, b"hello", false);

        let mut ring = SimpleKeyring::new().iterable();
        ring.insert_box_key(NaclBoxSecretKey::generate(&mut rng));

        match open(&ct, &ring) {
            Err(Error::NoDecryptionKey {
                named_receivers,
                num_anon_receivers,
            }) => {
                assert_eq!(named_receivers.len(), setup.receivers.len());
                assert_eq!(num_anon_receivers, 0);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_hidden_receivers() {
        let mut rng = rand::thread_rng();
        let sender = NaclBoxSecretKey::generate(&mut rng);
        let keys: Vec<NaclBoxSecretKey> = (0..4)
            .map(|_| NaclBoxSecretKey::generate(&mut rng))
            .collect();
        let receivers: Vec<NaclBoxPublicKey> =
            keys.iter().map(|k| k.public_key().hidden()).collect();

        let plain = rand_vec(2 * BLOCK + 5);
        let ct = seal(&plain, Some(&sender), &receivers, &mut rng).unwrap();

        let mut ring = SimpleKeyring::new();
        ring.insert_box_key(keys[3].clone());
        ring.insert_box_public_key(sender.public_key());

        match open(&ct, &ring) {
            Err(Error::NoDecryptionKey {
                named_receivers,
                num_anon_receivers,
            }) => {
                assert!(named_receivers.is_empty());
                assert_eq!(num_anon_receivers, 4);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let ring = ring.iterable();
        let (info, out) = open(&ct, &ring).unwrap();
        assert_eq!(out, plain);
        assert_eq!(info.receiver_index, 3);
        assert!(info.receiver_is_anonymous);
        assert_eq!(info.num_anon_receivers, 4);
    }

    #[test]
    fn test_named_before_hidden() {
        let mut rng = rand::thread_rng();
        let keys: Vec<NaclBoxSecretKey> = (0..2)
            .map(|_| NaclBoxSecretKey::generate(&mut rng))
            .collect();
        let receivers = vec![keys[0].public_key().hidden(), keys[1].public_key()];
        let ct = seal(b"hi", None, &receivers, &mut rng).unwrap();

        let mut ring = SimpleKeyring::new().iterable();
        ring.insert_box_key(keys[0].clone());
        ring.insert_box_key(keys[1].clone());

        let (info, _) = open(&ct, &ring).unwrap();
        assert_eq!(info.receiver_index, 1);
        assert!(!info.receiver_is_anonymous);
    }

    #[test]
    fn test_bad_receiver_index() {
        struct Liar(SimpleKeyring);

        impl Keyring for Liar {
            type Secret = NaclBoxSecretKey;
            type Public = NaclBoxPublicKey;

            fn lookup_box_secret_key(&self, kids: &[Vec<u8>]) -> Option<(usize, Self::Secret)> {
                self.0
                    .lookup_box_secret_key(kids)
                    .map(|(_, sk)| (kids.len(), sk))
            }

            fn lookup_box_public_key(&self, kid: &[u8]) -> Option<Self::Public> {
                self.0.lookup_box_public_key(kid)
            }

            fn all_box_secret_keys(&self) -> Vec<Self::Secret> {
                self.0.all_box_secret_keys()
            }

            fn import_ephemeral_key(&self, bytes: &[u8]) -> Option<Self::Public> {
                self.0.import_ephemeral_key(bytes)
            }
        }

        let mut rng = rand::thread_rng();
        let setup = TestSetup::new(&mut rng);
        let ct = seal_helper(&setup, b"hello", false);
        let n = setup.receivers.len();

        assert!(matches!(
            open(&ct, &Liar(setup.keyring.clone())),
            Err(Error::BadReceiverIndex(i)) if i == n
        ));
    }

    #[test]
    fn test_header_checks() {
        let mut rng = rand::thread_rng();
        let setup = TestSetup::new(&mut rng);
        let ct = seal_helper(&setup, b"hello", false);

        let bad = tamper(&ct, |h, _| h.format_name = "pepper".to_string());
        assert!(matches!(
            open(&bad, &setup.keyring),
            Err(Error::NotSaltpack { received }) if received == "pepper"
        ));

        let bad = tamper(&ct, |h, _| h.version = Version { major: 2, minor: 0 });
        assert!(matches!(
            open(&bad, &setup.keyring),
            Err(Error::BadVersion { seqno: 0, .. })
        ));

        let bad = tamper(&ct, |h, _| h.message_type = MessageType::AttachedSignature);
        assert!(matches!(
            open(&bad, &setup.keyring),
            Err(Error::WrongMessageType {
                seqno: 0,
                wanted: MessageType::Encryption,
                received: MessageType::AttachedSignature,
            })
        ));

        let bad = tamper(&ct, |h, _| h.ephemeral.truncate(31));
        assert!(matches!(
            open(&bad, &setup.keyring),
            Err(Error::BadEphemeralKey)
        ));

        // A newer minor version is fine.
        let ok = tamper(&ct, |h, _| h.version.minor = 7);
        assert_eq!(open(&ok, &setup.keyring).unwrap().1, b"hello");
    }

    #[test]
    fn test_corrupt_key_box() {
        let mut rng = rand::thread_rng();
        let setup = TestSetup::new(&mut rng);
        let ct = seal_helper(&setup, b"hello", false);

        let bad = tamper(&ct, |h, _| h.receivers[0].keys[3] ^= 1);
        assert!(matches!(
            open(&bad, &setup.keyring),
            Err(Error::BadCiphertext(0))
        ));
    }

    #[test]
    fn test_corrupt_payload() {
        let mut rng = rand::thread_rng();
        let setup = TestSetup::new(&mut rng);
        let ct = seal_helper(&setup, &rand_vec(3 * BLOCK), false);

        for block in 0..4 {
            let bad = tamper(&ct, |_, b| b[block].payload_ciphertext[0] ^= 0x80);
            assert!(matches!(
                open(&bad, &setup.keyring),
                Err(Error::BadTag(seqno)) if seqno == block as u64 + 1
            ));
        }
    }

    #[test]
    fn test_corrupt_tag() {
        let mut rng = rand::thread_rng();
        let setup = TestSetup::new(&mut rng);
        let ct = seal_helper(&setup, &rand_vec(2 * BLOCK), false);

        let bad = tamper(&ct, |_, b| b[1].tags[0][20] ^= 1);
        assert!(matches!(open(&bad, &setup.keyring), Err(Error::BadTag(2))));

        // Another receiver's tag does not matter to us.
        let ok = tamper(&ct, |_, b| b[1].tags[1][20] ^= 1);
        assert!(open(&ok, &setup.keyring).is_ok());

        let bad = tamper(&ct, |_, b| b[0].tags.clear());
        assert!(matches!(open(&bad, &setup.keyring), Err(Error::BadTag(1))));
    }

    #[test]
    fn test_swapped_blocks() {
        let mut rng = rand::thread_rng();
        let setup = TestSetup::new(&mut rng);
        let ct = seal_helper(&setup, &rand_vec(2 * BLOCK), false);

        let bad = tamper(&ct, |_, b| b.swap(0, 1));
        assert!(matches!(open(&bad, &setup.keyring), Err(Error::BadTag(1))));
    }

    #[test]
    fn test_truncation() {
        let mut rng = rand::thread_rng();
        let setup = TestSetup::new(&mut rng);
        let ct = seal_helper(&setup, &rand_vec(2 * BLOCK + 1), false);

        let bad = tamper(&ct, |_, b| {
            b.pop();
        });
        assert!(matches!(
            open(&bad, &setup.keyring),
            Err(Error::UnexpectedEof)
        ));

        assert!(matches!(
            open(&ct[..ct.len() - 51], &setup.keyring),
            Err(Error::UnexpectedEof)
        ));

        // Dropping a block in the middle shifts the nonces of all later blocks.
        let bad = tamper(&ct, |_, b| {
            b.remove(1);
        });
        assert!(matches!(open(&bad, &setup.keyring), Err(Error::BadTag(2))));
    }

    #[test]
    fn test_trailing_garbage() {
        let mut rng = rand::thread_rng();
        let setup = TestSetup::new(&mut rng);
        let ct = seal_helper(&setup, b"hello", false);

        let bad = tamper(&ct, |_, b| {
            let last = b[b.len() - 1].clone();
            b.push(last);
        });
        assert!(matches!(
            open(&bad, &setup.keyring),
            Err(Error::TrailingGarbage)
        ));

        let mut bad = ct.clone();
        bad.extend_from_slice(&encode(&"junk").unwrap());
        assert!(matches!(
            open(&bad, &setup.keyring),
            Err(Error::TrailingGarbage)
        ));
    }

    #[test]
    fn test_error_is_sticky() {
        let mut rng = rand::thread_rng();
        let setup = TestSetup::new(&mut rng);
        let ct = seal_helper(&setup, &rand_vec(3 * BLOCK), false);
        let bad = tamper(&ct, |_, b| b[1].payload_ciphertext[0] ^= 1);

        let mut stream = DecryptStream::new(&bad[..], &setup.keyring).unwrap();
        assert_eq!(stream.next_chunk().unwrap().unwrap().len(), BLOCK);
        assert!(matches!(stream.next_chunk(), Err(Error::BadTag(2))));
        assert!(matches!(stream.next_chunk(), Err(Error::BadTag(2))));
    }
}
