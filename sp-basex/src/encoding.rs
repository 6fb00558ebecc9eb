//! Radix-N block encoding over an arbitrary alphabet.
//!
//! Every input block of `in_block_len` bytes is read as one big-endian unsigned integer and
//! written out as exactly `out_block_len` symbols, most significant symbol first, left-padded
//! with the alphabet's zero symbol. The output block length follows from the bit density of the
//! alphabet: `ceil(8 * in_block_len / log2(N))`. The final block of a message may be shorter,
//! in which case its symbol count must be the minimal count for its byte length.

use crate::error::Error;

/// The largest supported input block, in bytes.
pub const MAX_BLOCK_LEN: usize = 256;

/// The largest supported alphabet.
pub const MAX_ALPHABET_LEN: usize = 128;

/// An immutable BaseX encoding.
///
/// An [`Encoding`] holds no mutable state and can be shared by any number of concurrent encoders
/// and decoders.
#[derive(Debug, Clone)]
pub struct Encoding {
    alphabet: Vec<u8>,
    decode_map: [Option<u8>; 256],
    base: u32,
    log2_base: f64,
    in_block_len: usize,
    out_block_len: usize,
    strict: bool,
}

impl Encoding {
    /// Creates a new lenient encoding from an alphabet and an input block length.
    ///
    /// The alphabet must consist of 2 to 128 distinct printable ASCII characters. The input
    /// block length must be between 1 and [`MAX_BLOCK_LEN`] bytes.
    pub fn new(alphabet: &str, in_block_len: usize) -> Result<Self, Error> {
        let bytes = alphabet.as_bytes();

        if bytes.len() < 2 || bytes.len() > MAX_ALPHABET_LEN {
            return Err(Error::BadAlphabet(format!(
                "expected between 2 and {MAX_ALPHABET_LEN} symbols, got {}",
                bytes.len()
            )));
        }

        if let Some(b) = bytes.iter().find(|b| !b.is_ascii_graphic()) {
            return Err(Error::BadAlphabet(format!(
                "symbol 0x{b:02x} is not printable ASCII"
            )));
        }

        let mut seen = [false; 256];
        for &b in bytes {
            if seen[b as usize] {
                return Err(Error::BadAlphabet(format!(
                    "symbol '{}' occurs more than once",
                    char::from(b)
                )));
            }
            seen[b as usize] = true;
        }

        if in_block_len == 0 || in_block_len > MAX_BLOCK_LEN {
            return Err(Error::BadBlockLength(in_block_len));
        }

        Ok(Self::build(bytes, in_block_len))
    }

    // Callers guarantee a valid alphabet and block length.
    pub(crate) fn build(alphabet: &[u8], in_block_len: usize) -> Self {
        let mut decode_map = [None; 256];
        for (i, &b) in alphabet.iter().enumerate() {
            decode_map[b as usize] = Some(i as u8);
        }

        let base = alphabet.len() as u32;
        let log2_base = f64::from(base).log2();

        let mut enc = Self {
            alphabet: alphabet.to_vec(),
            decode_map,
            base,
            log2_base,
            in_block_len,
            out_block_len: 0,
            strict: false,
        };
        enc.out_block_len = enc.encoded_block_len(in_block_len);
        enc
    }

    /// Returns a copy of this encoding that rejects any byte outside of the alphabet.
    pub fn to_strict(&self) -> Self {
        Self {
            strict: true,
            ..self.clone()
        }
    }

    /// Whether this encoding is strict.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// The alphabet of this encoding.
    pub fn alphabet(&self) -> &[u8] {
        &self.alphabet
    }

    /// The number of symbols in the alphabet.
    pub fn base(&self) -> usize {
        self.base as usize
    }

    /// The number of bytes in a full input block.
    pub fn in_block_len(&self) -> usize {
        self.in_block_len
    }

    /// The number of symbols in a full output block.
    pub fn out_block_len(&self) -> usize {
        self.out_block_len
    }

    /// Whether `b` is a symbol of this encoding.
    pub fn is_symbol(&self, b: u8) -> bool {
        self.decode_map[b as usize].is_some()
    }

    /// Returns the number of symbols needed to encode `n` bytes.
    pub fn encoded_len(&self, n: usize) -> usize {
        let full = n / self.in_block_len;
        let rem = n % self.in_block_len;
        full * self.out_block_len + self.encoded_block_len(rem)
    }

    /// Returns the number of bytes encoded by `n` symbols, assuming a valid encoding.
    pub fn decoded_len(&self, n: usize) -> usize {
        let full = n / self.out_block_len;
        let rem = n % self.out_block_len;
        full * self.in_block_len + self.decoded_block_len(rem)
    }

    /// Encodes `src` and returns the text.
    pub fn encode(&self, src: &[u8]) -> String {
        let mut out = Vec::with_capacity(self.encoded_len(src.len()));
        self.encode_into(&mut out, src);
        out.into_iter().map(char::from).collect()
    }

    /// Encodes `src`, appending the symbols to `dst`.
    pub fn encode_into(&self, dst: &mut Vec<u8>, src: &[u8]) {
        let mut enc = BlockEncoder::new(self);
        enc.push(src, dst);
        enc.finish(dst);
    }

    /// Decodes `src` and returns the bytes.
    pub fn decode(&self, src: &[u8]) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(self.decoded_len(src.len()));
        self.decode_into(&mut out, src)?;
        Ok(out)
    }

    /// Decodes the text `src` and returns the bytes.
    pub fn decode_str(&self, src: &str) -> Result<Vec<u8>, Error> {
        self.decode(src.as_bytes())
    }

    /// Decodes `src`, appending the bytes to `dst`.
    ///
    /// Returns the number of bytes appended.
    pub fn decode_into(&self, dst: &mut Vec<u8>, src: &[u8]) -> Result<usize, Error> {
        let start = dst.len();
        let mut dec = BlockDecoder::new(self);
        dec.push(src, dst)?;
        dec.finish(dst)?;
        Ok(dst.len() - start)
    }

    fn encoded_block_len(&self, n: usize) -> usize {
        ((8 * n) as f64 / self.log2_base).ceil() as usize
    }

    fn decoded_block_len(&self, n: usize) -> usize {
        (n as f64 * self.log2_base / 8.0).floor() as usize
    }

    fn encode_block(&self, dst: &mut Vec<u8>, block: &[u8]) {
        let n = block.len();
        let k = self.encoded_block_len(n);

        let mut num = [0u8; MAX_BLOCK_LEN];
        num[..n].copy_from_slice(block);

        let start = dst.len();
        dst.resize(start + k, self.alphabet[0]);

        for i in (0..k).rev() {
            let digit = div_rem(&mut num[..n], self.base);
            dst[start + i] = self.alphabet[digit as usize];
        }
    }

    fn decode_block(&self, dst: &mut Vec<u8>, digits: &[u8], offset: usize) -> Result<(), Error> {
        let k = digits.len();
        let n = self.decoded_block_len(k);

        if n == 0 || self.encoded_block_len(n) != k {
            return Err(Error::InvalidEncodingLength { length: k });
        }

        let mut num = [0u8; MAX_BLOCK_LEN];
        for &d in digits {
            if mul_add(&mut num[..n], self.base, u32::from(d)) != 0 {
                return Err(Error::CorruptInput { offset });
            }
        }

        dst.extend_from_slice(&num[..n]);
        Ok(())
    }
}

/// Divides the big-endian integer `num` by `base` in place and returns the remainder.
fn div_rem(num: &mut [u8], base: u32) -> u32 {
    let mut rem = 0u32;
    for b in num.iter_mut() {
        let acc = (rem << 8) | u32::from(*b);
        *b = (acc / base) as u8;
        rem = acc % base;
    }
    rem
}

/// Computes `num * base + digit` in place and returns the carry out of the top byte.
fn mul_add(num: &mut [u8], base: u32, digit: u32) -> u32 {
    let mut carry = digit;
    for b in num.iter_mut().rev() {
        let acc = u32::from(*b) * base + carry;
        *b = acc as u8;
        carry = acc >> 8;
    }
    carry
}

/// Push-style encoder that buffers partial input blocks across calls.
#[derive(Debug)]
pub struct BlockEncoder<'a> {
    enc: &'a Encoding,
    pending: Vec<u8>,
}

impl<'a> BlockEncoder<'a> {
    /// Creates a new block encoder.
    pub fn new(enc: &'a Encoding) -> Self {
        Self {
            enc,
            pending: Vec::with_capacity(enc.in_block_len),
        }
    }

    /// Encodes all full blocks available after appending `src`, writing symbols to `dst`.
    pub fn push(&mut self, mut src: &[u8], dst: &mut Vec<u8>) {
        let block_len = self.enc.in_block_len;

        if !self.pending.is_empty() {
            let take = (block_len - self.pending.len()).min(src.len());
            self.pending.extend_from_slice(&src[..take]);
            src = &src[take..];

            if self.pending.len() < block_len {
                return;
            }

            self.enc.encode_block(dst, &self.pending);
            self.pending.clear();
        }

        let mut blocks = src.chunks_exact(block_len);
        for block in &mut blocks {
            self.enc.encode_block(dst, block);
        }
        self.pending.extend_from_slice(blocks.remainder());
    }

    /// Encodes the remaining short block, if any.
    pub fn finish(&mut self, dst: &mut Vec<u8>) {
        if !self.pending.is_empty() {
            self.enc.encode_block(dst, &self.pending);
            self.pending.clear();
        }
    }
}

/// Push-style decoder that buffers partial output blocks across calls.
///
/// In lenient mode, bytes outside the alphabet are skipped. Offsets in errors are relative to
/// the first byte ever pushed.
#[derive(Debug)]
pub struct BlockDecoder<'a> {
    enc: &'a Encoding,
    digits: Vec<u8>,
    consumed: usize,
    block_start: usize,
}

impl<'a> BlockDecoder<'a> {
    /// Creates a new block decoder.
    pub fn new(enc: &'a Encoding) -> Self {
        Self {
            enc,
            digits: Vec::with_capacity(enc.out_block_len),
            consumed: 0,
            block_start: 0,
        }
    }

    /// Decodes all full blocks available after appending `src`, writing bytes to `dst`.
    pub fn push(&mut self, src: &[u8], dst: &mut Vec<u8>) -> Result<(), Error> {
        let enc = self.enc;

        for &b in src {
            let offset = self.consumed;
            self.consumed += 1;

            match enc.decode_map[b as usize] {
                Some(d) => {
                    if self.digits.is_empty() {
                        self.block_start = offset;
                    }
                    self.digits.push(d);

                    if self.digits.len() == enc.out_block_len {
                        enc.decode_block(dst, &self.digits, self.block_start)?;
                        self.digits.clear();
                    }
                }
                None if enc.strict => return Err(Error::CorruptInput { offset }),
                None => {}
            }
        }

        Ok(())
    }

    /// Decodes the remaining short block, if any.
    pub fn finish(&mut self, dst: &mut Vec<u8>) -> Result<(), Error> {
        if !self.digits.is_empty() {
            self.enc.decode_block(dst, &self.digits, self.block_start)?;
            self.digits.clear();
        }
        Ok(())
    }
}
