//! Attached and detached signing.
//!
//! Every signature input is anchored to the SHA-512 hash of the packed header, which carries the
//! signer's key id and a random nonce. Attached signatures sign each chunk together with its
//! block number, so chunks cannot be reordered, dropped or moved to another message. The stream
//! ends with a signed empty chunk.

use std::io::{self, Write};

use log::trace;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha512};

use crate::consts::{
    MessageType, ATTACHED_SIGNATURE_PREFIX, DEFAULT_BLOCK_SIZE, DETACHED_SIGNATURE_PREFIX,
    FORMAT_NAME, SIGNATURE_NONCE_SIZE,
};
use crate::error::Error;
use crate::key::{SigningPublicKey, SigningSecretKey};
use crate::nonce::{Nonce, NonceBase};
use crate::packet::{
    encode, DetachedSignature, PacketEncoder, SignatureBlock, SignatureHeader, Version,
};

/// The bytes signed for one attached signature block.
pub(crate) fn attached_signature_input(header_hash: &[u8], nonce: &Nonce, chunk: &[u8]) -> Vec<u8> {
    let digest = Sha512::new()
        .chain_update(header_hash)
        .chain_update(nonce.as_bytes())
        .chain_update(chunk)
        .finalize();

    [ATTACHED_SIGNATURE_PREFIX, digest.as_slice()].concat()
}

/// Starts the message digest of a detached signature.
pub(crate) fn detached_hasher(header_hash: &[u8], nonces: &NonceBase) -> Sha512 {
    Sha512::new()
        .chain_update(header_hash)
        .chain_update(nonces.detached_signature().as_bytes())
}

/// The bytes signed for a detached signature.
pub(crate) fn detached_signature_input(hasher: Sha512) -> Vec<u8> {
    [DETACHED_SIGNATURE_PREFIX, hasher.finalize().as_slice()].concat()
}

// Writes a fresh signature header, returning its hash and the nonces derived from it.
fn write_header<W, S, R>(
    encoder: &mut PacketEncoder<W>,
    signer: &S,
    message_type: MessageType,
    rng: &mut R,
) -> Result<(Vec<u8>, NonceBase), Error>
where
    W: Write,
    S: SigningSecretKey,
    R: RngCore + CryptoRng,
{
    let mut nonce = [0u8; SIGNATURE_NONCE_SIZE];
    rng.fill_bytes(&mut nonce);

    let header = SignatureHeader {
        format_name: FORMAT_NAME.to_string(),
        version: Version::CURRENT,
        message_type,
        sender_public: signer.public_key().to_kid(),
        nonce: nonce.to_vec(),
    };

    let bytes = encode(&header)?;
    encoder.write_raw(&bytes)?;

    Ok((
        Sha512::digest(&bytes).to_vec(),
        NonceBase::for_signature(&nonce),
    ))
}

/// Signs a plaintext stream, embedding the plaintext in the output.
///
/// Like [`EncryptStream`](crate::encrypt::EncryptStream), the stream must be closed to write the
/// terminating block, and any error poisons it.
#[derive(Debug)]
pub struct SignStream<'k, W: Write, S: SigningSecretKey> {
    encoder: PacketEncoder<W>,
    signer: &'k S,
    header_hash: Vec<u8>,
    nonces: NonceBase,
    buf: Vec<u8>,
    block_size: usize,
    block: u64,
    closed: bool,
    err: Option<Error>,
}

impl<'k, W: Write, S: SigningSecretKey> SignStream<'k, W, S> {
    /// Starts a signed message and writes its header.
    pub fn new<R: RngCore + CryptoRng>(
        inner: W,
        signer: &'k S,
        rng: &mut R,
    ) -> Result<Self, Error> {
        let mut encoder = PacketEncoder::new(inner);
        let (header_hash, nonces) =
            write_header(&mut encoder, signer, MessageType::AttachedSignature, rng)?;

        Ok(Self {
            encoder,
            signer,
            header_hash,
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

    /// Signs `data`, writing every block that is complete.
    pub fn write_payload(&mut self, data: &[u8]) -> Result<(), Error> {
        if let Some(e) = &self.err {
            return Err(e.clone());
        }
        if self.closed {
            return Err(Error::WriteAfterClose);
        }

        self.buf.extend_from_slice(data);
        if self.buf.len() < self.block_size {
            return Ok(());
        }

        let buf = std::mem::take(&mut self.buf);
        let mut chunks = buf.chunks_exact(self.block_size);
        let res = chunks.try_for_each(|chunk| self.write_block(chunk));
        self.buf = chunks.remainder().to_vec();

        self.poison(res)
    }

    /// Writes the buffered plaintext and the terminating block.
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
        if !rest.is_empty() {
            self.write_block(&rest)?;
        }
        self.write_block(&[])?;
        self.encoder.flush()?;
        self.closed = true;
        Ok(())
    }

    fn write_block(&mut self, chunk: &[u8]) -> Result<(), Error> {
        let nonce = self.nonces.attached_signature(self.block);
        let input = attached_signature_input(&self.header_hash, &nonce, chunk);

        self.encoder.write(&SignatureBlock {
            signature: self.signer.sign(&input)?,
            payload_chunk: chunk.to_vec(),
        })?;

        trace!("signed block {} ({} bytes)", self.block, chunk.len());
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

impl<W: Write, S: SigningSecretKey> Write for SignStream<'_, W, S> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.write_payload(data)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.encoder.flush()?)
    }
}

/// Produces a detached signature over everything written to it.
///
/// The header is written on creation; the signature packet is written by
/// [`DetachedSigner::finish`].
#[derive(Debug)]
pub struct DetachedSigner<'k, W: Write, S: SigningSecretKey> {
    encoder: PacketEncoder<W>,
    signer: &'k S,
    hasher: Sha512,
}

impl<'k, W: Write, S: SigningSecretKey> DetachedSigner<'k, W, S> {
    /// Starts a detached signature and writes its header.
    pub fn new<R: RngCore + CryptoRng>(
        inner: W,
        signer: &'k S,
        rng: &mut R,
    ) -> Result<Self, Error> {
        let mut encoder = PacketEncoder::new(inner);
        let (header_hash, nonces) =
            write_header(&mut encoder, signer, MessageType::DetachedSignature, rng)?;

        Ok(Self {
            encoder,
            signer,
            hasher: detached_hasher(&header_hash, &nonces),
        })
    }

    /// Signs the message and returns the inner writer.
    pub fn finish(mut self) -> Result<W, Error> {
        let input = detached_signature_input(self.hasher);
        self.encoder.write(&DetachedSignature {
            signature: self.signer.sign(&input)?,
        })?;
        self.encoder.flush()?;
        Ok(self.encoder.into_inner())
    }
}

impl<W: Write, S: SigningSecretKey> Write for DetachedSigner<'_, W, S> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.hasher.update(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Signs `plaintext` in memory, embedding it in the output.
pub fn sign<S, R>(plaintext: &[u8], signer: &S, rng: &mut R) -> Result<Vec<u8>, Error>
where
    S: SigningSecretKey,
    R: RngCore + CryptoRng,
{
    let mut stream = SignStream::new(Vec::new(), signer, rng)?;
    stream.write_payload(plaintext)?;
    stream.finish()
}

/// Produces a detached signature over `plaintext`.
pub fn sign_detached<S, R>(plaintext: &[u8], signer: &S, rng: &mut R) -> Result<Vec<u8>, Error>
where
    S: SigningSecretKey,
    R: RngCore + CryptoRng,
{
    let mut signer = DetachedSigner::new(Vec::new(), signer, rng)?;
    signer.hasher.update(plaintext);
    signer.finish()
}
