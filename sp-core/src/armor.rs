//! Text armor.
//!
//! An armored message looks like
//!
//! ```text
//! BEGIN [<brand> ]SALTPACK <TYPE>. <body>. END [<brand> ]SALTPACK <TYPE>.
//! ```
//!
//! where the body is the BaseX encoding of the binary message, split into words of
//! [`ARMOR_CHARS_PER_WORD`] characters and lines of [`ARMOR_WORDS_PER_LINE`] words. When reading,
//! any whitespace in the body is ignored, so the text survives mail clients and chat programs
//! that rewrap it.

use std::io::{self, BufRead, BufReader, Read, Write};

use sp_basex::{Encoding, BASE58};

use crate::consts::{
    MessageType, ARMOR_CHARS_PER_WORD, ARMOR_MAX_FRAME_LEN, ARMOR_WORDS_PER_LINE,
};
use crate::error::{Error, FramePart};

/// Armor settings.
#[derive(Debug, Clone)]
pub struct ArmorParams {
    /// The body encoding.
    pub encoding: &'static Encoding,
    /// Encoded characters per word; 0 disables word splitting.
    pub chars_per_word: usize,
    /// Words per line; 0 puts everything on one line.
    pub words_per_line: usize,
    /// The brand written in the frame. When reading, a brand here must match the message.
    pub brand: Option<String>,
}

impl Default for ArmorParams {
    fn default() -> Self {
        Self {
            encoding: &BASE58,
            chars_per_word: ARMOR_CHARS_PER_WORD,
            words_per_line: ARMOR_WORDS_PER_LINE,
            brand: None,
        }
    }
}

impl ArmorParams {
    /// Uses `encoding` for the body.
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets the number of encoded characters per word.
    pub fn with_chars_per_word(mut self, chars_per_word: usize) -> Self {
        self.chars_per_word = chars_per_word;
        self
    }

    /// Sets the number of words per line.
    pub fn with_words_per_line(mut self, words_per_line: usize) -> Self {
        self.words_per_line = words_per_line;
        self
    }

    /// Sets the brand.
    pub fn with_brand(mut self, brand: &str) -> Self {
        self.brand = Some(brand.to_string());
        self
    }
}

/// The header and footer of an armored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The kind of message.
    pub message_type: MessageType,
    /// The brand, if any.
    pub brand: Option<String>,
}

impl Frame {
    /// The header line, without the trailing period.
    pub fn header(&self) -> String {
        self.line("BEGIN")
    }

    /// The footer line, without the trailing period.
    pub fn footer(&self) -> String {
        self.line("END")
    }

    fn line(&self, word: &str) -> String {
        let t = self.message_type.armor_str();
        match &self.brand {
            Some(brand) => format!("{word} {brand} SALTPACK {t}"),
            None => format!("{word} SALTPACK {t}"),
        }
    }

    fn parse(text: &str, word: &str, part: FramePart) -> Result<Self, Error> {
        let bad = |reason: String| Error::BadFrame { part, reason };

        let tokens: Vec<&str> = text.split_ascii_whitespace().collect();
        if tokens.first() != Some(&word) {
            return Err(bad(format!("expected {word}")));
        }

        let (brand, rest) = match tokens.iter().position(|t| *t == "SALTPACK") {
            Some(1) => (None, &tokens[2..]),
            Some(2) => (Some(tokens[1].to_string()), &tokens[3..]),
            _ => return Err(bad("expected SALTPACK".to_string())),
        };

        let type_str = rest.join(" ");
        let message_type = MessageType::from_armor_str(&type_str)
            .ok_or_else(|| bad(format!("unknown message type {type_str:?}")))?;

        Ok(Self {
            message_type,
            brand,
        })
    }
}

fn valid_brand(brand: &str) -> bool {
    !brand.is_empty() && brand.bytes().all(|b| b.is_ascii_alphanumeric())
}

// Bytes that may appear in an armored body.
fn is_text(b: u8) -> bool {
    b.is_ascii_graphic() || b.is_ascii_whitespace()
}

// Reads up to and including the next period, returning the text before it.
fn read_frame_text<B: BufRead>(r: &mut B, part: FramePart) -> Result<String, Error> {
    let mut buf = Vec::new();
    r.by_ref()
        .take(ARMOR_MAX_FRAME_LEN as u64 + 1)
        .read_until(b'.', &mut buf)?;

    if buf.last() != Some(&b'.') {
        let reason = if buf.len() > ARMOR_MAX_FRAME_LEN {
            "too long"
        } else {
            "missing"
        };
        return Err(Error::BadFrame {
            part,
            reason: reason.to_string(),
        });
    }
    buf.pop();

    if let Some(b) = buf.iter().find(|b| !is_text(**b)) {
        return Err(Error::BadFrame {
            part,
            reason: format!("unexpected byte 0x{b:02x}"),
        });
    }

    // Checked to be ASCII above.
    Ok(buf.into_iter().map(char::from).collect())
}

/// Inserts word and line breaks into the encoded body.
#[derive(Debug)]
struct Punctuator<W: Write> {
    inner: W,
    chars_per_word: usize,
    words_per_line: usize,
    chars: usize,
    words: usize,
    buf: Vec<u8>,
}

impl<W: Write> Punctuator<W> {
    fn new(inner: W, chars_per_word: usize, words_per_line: usize) -> Self {
        Self {
            inner,
            chars_per_word,
            words_per_line,
            chars: 0,
            words: 0,
            buf: Vec::new(),
        }
    }
}

impl<W: Write> Write for Punctuator<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.chars_per_word == 0 {
            return self.inner.write(data);
        }

        self.buf.clear();
        for &b in data {
            // Separators go in front of the next character, so none trails the body.
            if self.chars == self.chars_per_word {
                self.chars = 0;
                self.words += 1;
                if self.words == self.words_per_line {
                    self.words = 0;
                    self.buf.push(b'\n');
                } else {
                    self.buf.push(b' ');
                }
            }
            self.buf.push(b);
            self.chars += 1;
        }

        self.inner.write_all(&self.buf)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Armors everything written to it.
///
/// The header is written on creation, the footer by [`ArmorEncoder::finish`].
#[derive(Debug)]
pub struct ArmorEncoder<W: Write> {
    encoder: sp_basex::Encoder<'static, Punctuator<W>>,
    footer: String,
}

impl<W: Write> ArmorEncoder<W> {
    /// Starts an armored message.
    pub fn new(
        mut inner: W,
        message_type: MessageType,
        params: &ArmorParams,
    ) -> Result<Self, Error> {
        if let Some(brand) = &params.brand {
            if !valid_brand(brand) {
                return Err(Error::BadFrame {
                    part: FramePart::Header,
                    reason: format!("invalid brand {brand:?}"),
                });
            }
        }

        let frame = Frame {
            message_type,
            brand: params.brand.clone(),
        };
        write!(inner, "{}. ", frame.header())?;

        let punctuator = Punctuator::new(inner, params.chars_per_word, params.words_per_line);

        Ok(Self {
            encoder: sp_basex::Encoder::new(params.encoding, punctuator),
            footer: frame.footer(),
        })
    }

    /// Encodes the final block, writes the footer and returns the inner writer.
    pub fn finish(self) -> Result<W, Error> {
        let mut inner = self.encoder.finish()?.inner;
        write!(inner, ". {}.", self.footer)?;
        inner.flush()?;
        Ok(inner)
    }
}

impl<W: Write> Write for ArmorEncoder<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.encoder.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

/// Yields the body of an armored message and validates the footer once the body ends.
#[derive(Debug)]
struct Body<R: Read> {
    inner: BufReader<R>,
    frame: Frame,
    done: bool,
    err: Option<Error>,
}

impl<R: Read> Body<R> {
    fn read_footer(&mut self) -> Result<(), Error> {
        let bad = |reason: &str| Error::BadFrame {
            part: FramePart::Footer,
            reason: reason.to_string(),
        };

        let text = read_frame_text(&mut self.inner, FramePart::Footer)?;
        let footer = Frame::parse(&text, "END", FramePart::Footer)?;

        if footer.message_type != self.frame.message_type {
            return Err(bad("message type does not match the header"));
        }
        if footer.brand != self.frame.brand {
            return Err(bad("brand does not match the header"));
        }

        let mut rest = Vec::new();
        self.inner.read_to_end(&mut rest)?;
        if !rest.iter().all(u8::is_ascii_whitespace) {
            return Err(bad("trailing data"));
        }

        Ok(())
    }

    fn read_body(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }

        let avail = self.inner.fill_buf()?;
        if avail.is_empty() {
            return Err(Error::BadFrame {
                part: FramePart::Footer,
                reason: "missing".to_string(),
            });
        }

        let end = avail.iter().position(|&b| b == b'.').unwrap_or(avail.len());
        let n = end.min(buf.len());

        if let Some(b) = avail[..n].iter().find(|b| !is_text(**b)) {
            return Err(Error::BadFrame {
                part: FramePart::Body,
                reason: format!("unexpected byte 0x{b:02x}"),
            });
        }

        buf[..n].copy_from_slice(&avail[..n]);
        self.inner.consume(n);

        if n == 0 {
            // The period that ends the body.
            self.inner.consume(1);
            self.read_footer()?;
            self.done = true;
        }

        Ok(n)
    }
}

impl<R: Read> Read for Body<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(e) = &self.err {
            return Err(e.clone().into());
        }

        self.read_body(buf).map_err(|e| {
            if !matches!(&e, Error::Io(inner) if inner.kind() == io::ErrorKind::Interrupted) {
                self.err = Some(e.clone());
            }
            e.into()
        })
    }
}

/// Reads an armored message, yielding the decoded binary message.
///
/// The header is parsed and checked by [`Dearmor::new`]. The footer is checked when the body has
/// been read completely; until then the reader does not report end of stream.
#[derive(Debug)]
pub struct Dearmor<R: Read> {
    decoder: sp_basex::Decoder<'static, Body<R>>,
    frame: Frame,
}

impl<R: Read> Dearmor<R> {
    /// Parses the header and checks it against `message_type` and the brand in `params`.
    pub fn new(inner: R, message_type: MessageType, params: &ArmorParams) -> Result<Self, Error> {
        let mut reader = BufReader::new(inner);

        let text = read_frame_text(&mut reader, FramePart::Header)?;
        let frame = Frame::parse(&text, "BEGIN", FramePart::Header)?;

        if frame.message_type != message_type {
            return Err(Error::BadFrame {
                part: FramePart::Header,
                reason: format!(
                    "expected {}, found {}",
                    message_type.armor_str(),
                    frame.message_type.armor_str()
                ),
            });
        }

        if let Some(brand) = &params.brand {
            if frame.brand.as_ref() != Some(brand) {
                return Err(Error::BadFrame {
                    part: FramePart::Header,
                    reason: format!("expected brand {brand:?}"),
                });
            }
        }

        let body = Body {
            inner: reader,
            frame: frame.clone(),
            done: false,
            err: None,
        };

        Ok(Self {
            decoder: sp_basex::Decoder::new(params.encoding, body),
            frame,
        })
    }

    /// The parsed header.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

impl<R: Read> Read for Dearmor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read(buf)
    }
}

/// Armors `data` in memory.
pub fn armor(
    data: &[u8],
    message_type: MessageType,
    params: &ArmorParams,
) -> Result<String, Error> {
    let mut enc = ArmorEncoder::new(Vec::new(), message_type, params)?;
    enc.write_all(data)?;
    let out = enc.finish()?;
    Ok(out.into_iter().map(char::from).collect())
}

/// Dearmors `text` in memory.
pub fn dearmor(
    text: &[u8],
    message_type: MessageType,
    params: &ArmorParams,
) -> Result<(Frame, Vec<u8>), Error> {
    let mut dec = Dearmor::new(text, message_type, params)?;
    let mut out = Vec::new();
    dec.read_to_end(&mut out)?;
    Ok((dec.frame, out))
}
