//! Streaming wrappers around [`BlockEncoder`] and [`BlockDecoder`].

use std::io::{self, Read, Write};

use crate::encoding::{BlockDecoder, BlockEncoder, Encoding};
use crate::error::Error;

const READ_BUF_SIZE: usize = 8 * 1024;

/// Encodes everything written to it and passes the symbols on to an inner writer.
///
/// Full blocks are emitted as soon as they are complete. A trailing short block is only emitted
/// by [`Encoder::finish`]; dropping the encoder without finishing loses it.
#[derive(Debug)]
pub struct Encoder<'a, W: Write> {
    inner: W,
    block: BlockEncoder<'a>,
    buf: Vec<u8>,
}

impl<'a, W: Write> Encoder<'a, W> {
    /// Creates a new streaming encoder.
    pub fn new(enc: &'a Encoding, inner: W) -> Self {
        Self {
            inner,
            block: BlockEncoder::new(enc),
            buf: Vec::new(),
        }
    }

    /// Flushes the final short block and returns the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.buf.clear();
        self.block.finish(&mut self.buf);
        self.inner.write_all(&self.buf)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for Encoder<'_, W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.clear();
        self.block.push(data, &mut self.buf);
        self.inner.write_all(&self.buf)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decodes symbols read from an inner reader.
///
/// A decoding error is sticky: every read after the first failure returns the same error. Errors
/// of the inner reader are passed through untouched, so an interrupted read can be retried and a
/// reader that fails for good keeps reporting its own error.
#[derive(Debug)]
pub struct Decoder<'a, R: Read> {
    inner: R,
    block: BlockDecoder<'a>,
    scratch: Box<[u8]>,
    out: Vec<u8>,
    pos: usize,
    eof: bool,
    err: Option<Error>,
}

impl<'a, R: Read> Decoder<'a, R> {
    /// Creates a new streaming decoder.
    pub fn new(enc: &'a Encoding, inner: R) -> Self {
        Self {
            inner,
            block: BlockDecoder::new(enc),
            scratch: vec![0u8; READ_BUF_SIZE].into_boxed_slice(),
            out: Vec::new(),
            pos: 0,
            eof: false,
            err: None,
        }
    }

    /// Returns the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for Decoder<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.pos < self.out.len() {
                let n = buf.len().min(self.out.len() - self.pos);
                buf[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }

            if let Some(e) = &self.err {
                return Err(e.clone().into());
            }

            if self.eof || buf.is_empty() {
                return Ok(0);
            }

            self.out.clear();
            self.pos = 0;

            let n = self.inner.read(&mut self.scratch)?;
            let res = if n == 0 {
                self.eof = true;
                self.block.finish(&mut self.out)
            } else {
                self.block.push(&self.scratch[..n], &mut self.out)
            };

            if let Err(e) = res {
                self.out.clear();
                self.err = Some(e.clone());
                return Err(e.into());
            }
        }
    }
}
