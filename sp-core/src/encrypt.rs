//! Streaming encryption for multiple receivers.

use std::collections::HashSet;
use std::io::{self, Write};

use log::{debug, trace};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha512};

use crate::artifacts::{PrecomputedSharedKey, SymmetricKey};
use crate::consts::{MessageType, DEFAULT_BLOCK_SIZE, FORMAT_NAME};
use crate::error::Error;
use crate::key::{BoxPublicKey, BoxSecretKey};
use crate::nonce::NonceBase;
use crate::packet::{
    encode, EncryptionBlock, EncryptionHeader, PacketEncoder, ReceiverKeys, ReceiverKeysPlaintext,
    Version,
};

/// Encrypts a plaintext stream for a set of receivers.
///
/// The header is written when the stream is created. Plaintext is buffered and sealed in blocks
/// of [`DEFAULT_BLOCK_SIZE`] bytes (see [`EncryptStream::with_block_size`]), so the output does
/// not depend on how the plaintext is split over calls to [`Write::write`]. The stream must be
/// ended with [`EncryptStream::close`] or [`EncryptStream::finish`], which write the remaining
/// plaintext and the terminating empty block. Without it, receivers reject the message as
/// truncated.
///
/// Any error poisons the stream.
#[derive(Debug)]
pub struct EncryptStream<W: Write> {
    encoder: PacketEncoder<W>,
    session_key: SymmetricKey,
    nonces: NonceBase,
    tag_keys: Vec<PrecomputedSharedKey>,
    buf: Vec<u8>,
    block_size: usize,
    block: u64,
    closed: bool,
    err: Option<Error>,
}

impl<W: Write> EncryptStream<W> {
    /// Starts an encrypted message from `sender` to `receivers`.
    ///
    /// Without a sender, the message is sent anonymously: the ephemeral key stands in for the
    /// sender. Receivers that want to hide their identity are left out of the header's key ids.
    pub fn new<P, R>(
        inner: W,
        sender: Option<&P::Secret>,
        receivers: &[P],
        rng: &mut R,
    ) -> Result<Self, Error>
    where
        P: BoxPublicKey,
        R: RngCore + CryptoRng,
    {
        let first = receivers.first().ok_or(Error::BadReceivers)?;

        let mut seen = HashSet::with_capacity(receivers.len());
        for r in receivers {
            if !seen.insert(r.to_raw_box_key()) {
                return Err(Error::RepeatedKey(r.to_kid()));
            }
        }

        let ephemeral = first.create_ephemeral_key(rng);
        let ephemeral_pk = ephemeral.public_key().to_raw_box_key();
        let sender = sender.unwrap_or(&ephemeral);

        let session_key = SymmetricKey::generate(rng);
        let nonces = NonceBase::for_encryption(&ephemeral_pk);

        let keys = encode(&ReceiverKeysPlaintext {
            sender: sender.public_key().to_raw_box_key().as_bytes().to_vec(),
            session_key: session_key.as_bytes().to_vec(),
        })?;

        let mut records = Vec::with_capacity(receivers.len());
        let mut tag_keys = Vec::with_capacity(receivers.len());

        for (i, r) in receivers.iter().enumerate() {
            let raw = r.to_raw_box_key();

            let kid = if r.hide_identity() {
                Vec::new()
            } else {
                r.to_kid()
            };

            records.push(ReceiverKeys {
                kid,
                keys: ephemeral
                    .precompute(&raw)
                    .seal(&nonces.key_box(i as u64), &keys)?,
            });
            tag_keys.push(sender.precompute(&raw));
        }

        debug!(
            "encrypting for {} receivers, {} hidden",
            records.len(),
            records.iter().filter(|r| r.kid.is_empty()).count()
        );

        let header = EncryptionHeader {
            format_name: FORMAT_NAME.to_string(),
            version: Version::CURRENT,
            message_type: MessageType::Encryption,
            ephemeral: ephemeral_pk.as_bytes().to_vec(),
            receivers: records,
        };

        let mut encoder = PacketEncoder::new(inner);
        encoder.write(&header)?;

        Ok(Self {
            encoder,
            session_key,
            nonces,
            tag_keys,
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

    /// Writes the buffered plaintext and the terminating block.
    ///
    /// Closing twice is a no-op.
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

    /// Encrypts `data`, writing every block that is complete.
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
        let ciphertext = self
            .session_key
            .seal(&self.nonces.payload_box(self.block), chunk)?;

        let digest = Sha512::digest(&ciphertext);
        let tag_nonce = self.nonces.tag_box(self.block);
        let tags = self
            .tag_keys
            .iter()
            .map(|k| k.seal(&tag_nonce, &digest))
            .collect::<Result<Vec<_>, _>>()?;

        self.encoder.write(&EncryptionBlock {
            tags,
            payload_ciphertext: ciphertext,
        })?;

        trace!("wrote block {} ({} bytes)", self.block, chunk.len());
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

impl<W: Write> Write for EncryptStream<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.write_payload(data)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.encoder.flush()?)
    }
}

/// Encrypts `plaintext` in memory.
pub fn seal<P, R>(
    plaintext: &[u8],
    sender: Option<&P::Secret>,
    receivers: &[P],
    rng: &mut R,
) -> Result<Vec<u8>, Error>
where
    P: BoxPublicKey,
    R: RngCore + CryptoRng,
{
    let mut stream = EncryptStream::new(Vec::new(), sender, receivers, rng)?;
    stream.write_payload(plaintext)?;
    stream.finish()
}
