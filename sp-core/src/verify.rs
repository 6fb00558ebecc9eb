//! Verification of attached and detached signatures.

use std::io::{self, Read};

use log::{debug, trace};
use sha2::{Digest, Sha512};

use crate::consts::{MessageType, SIGNATURE_NONCE_SIZE};
use crate::error::Error;
use crate::key::{SigKeyring, SigningPublicKey};
use crate::nonce::NonceBase;
use crate::packet::{DetachedSignature, PacketDecoder, SignatureBlock, SignatureHeader};
use crate::sign::{attached_signature_input, detached_hasher, detached_signature_input};

// Reads and checks a signature header, resolving the signer.
fn read_header<R, K>(
    decoder: &mut PacketDecoder<R>,
    keyring: &K,
    wanted: MessageType,
) -> Result<(K::Public, Vec<u8>, NonceBase), Error>
where
    R: Read,
    K: SigKeyring,
{
    let (header, raw): (SignatureHeader, _) = decoder.expect_raw()?;
    header.check(wanted)?;

    let nonce: [u8; SIGNATURE_NONCE_SIZE] = header
        .nonce
        .as_slice()
        .try_into()
        .map_err(|_| Error::BadNonceLength(header.nonce.len()))?;

    let signer = keyring
        .lookup_signing_public_key(&header.sender_public)
        .ok_or(Error::NoSenderKey)?;

    debug!("verifying {wanted} message");

    Ok((
        signer,
        Sha512::digest(&raw).to_vec(),
        NonceBase::for_signature(&nonce),
    ))
}

/// Verifies a signed message while reading its plaintext.
///
/// Every chunk is verified before it is handed out. Any error poisons the stream.
#[derive(Debug)]
pub struct VerifyStream<R: Read, P: SigningPublicKey> {
    decoder: PacketDecoder<R>,
    signer: P,
    header_hash: Vec<u8>,
    nonces: NonceBase,
    out: Vec<u8>,
    pos: usize,
    done: bool,
    err: Option<Error>,
}

impl<R: Read, P: SigningPublicKey> VerifyStream<R, P> {
    /// Reads the header of a signed message and resolves the signer.
    pub fn new<K: SigKeyring<Public = P>>(inner: R, keyring: &K) -> Result<Self, Error> {
        let mut decoder = PacketDecoder::new(inner);
        let (signer, header_hash, nonces) =
            read_header(&mut decoder, keyring, MessageType::AttachedSignature)?;

        Ok(Self {
            decoder,
            signer,
            header_hash,
            nonces,
            out: Vec::new(),
            pos: 0,
            done: false,
            err: None,
        })
    }

    /// The signer's public key.
    pub fn signer(&self) -> &P {
        &self.signer
    }

    /// Returns the next verified chunk, or `None` after the terminating block.
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
        let block: SignatureBlock = self.decoder.expect()?;

        let nonce = self.nonces.attached_signature(seqno);
        let input = attached_signature_input(&self.header_hash, &nonce, &block.payload_chunk);
        if !self.signer.verify(&input, &block.signature) {
            return Err(Error::BadSignature(seqno));
        }

        if block.payload_chunk.is_empty() {
            self.decoder.assert_end_of_stream()?;
            self.done = true;
            return Ok(None);
        }

        trace!("verified block {seqno} ({} bytes)", block.payload_chunk.len());
        Ok(Some(block.payload_chunk))
    }
}

impl<R: Read, P: SigningPublicKey> Read for VerifyStream<R, P> {
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

/// Verifies a signed message in memory, returning the signer and the plaintext.
pub fn verify<K: SigKeyring>(signed: &[u8], keyring: &K) -> Result<(K::Public, Vec<u8>), Error> {
    let mut stream = VerifyStream::new(signed, keyring)?;
    let mut plaintext = Vec::new();

    while let Some(chunk) = stream.next_chunk()? {
        plaintext.extend_from_slice(&chunk);
    }

    Ok((stream.signer, plaintext))
}

/// Verifies a detached signature over a message read from `message`.
pub fn verify_detached_reader<R, K>(
    mut message: R,
    signature: &[u8],
    keyring: &K,
) -> Result<K::Public, Error>
where
    R: Read,
    K: SigKeyring,
{
    let mut decoder = PacketDecoder::new(signature);
    let (signer, header_hash, nonces) =
        read_header(&mut decoder, keyring, MessageType::DetachedSignature)?;

    let seqno = decoder.seqno();
    let packet: DetachedSignature = decoder.expect()?;
    decoder.assert_end_of_stream()?;

    let mut hasher = detached_hasher(&header_hash, &nonces);
    io::copy(&mut message, &mut hasher)?;

    if !signer.verify(&detached_signature_input(hasher), &packet.signature) {
        return Err(Error::BadSignature(seqno));
    }

    Ok(signer)
}

/// Verifies a detached signature over `message`.
pub fn verify_detached<K: SigKeyring>(
    message: &[u8],
    signature: &[u8],
    keyring: &K,
) -> Result<K::Public, Error> {
    verify_detached_reader(message, signature, keyring)
}
