//! Low-level streaming input for the XML parser.
//!
//! [`ParserInput`] wraps any [`Read`] and pulls bytes from it only when the
//! parser needs to look at them. Lookahead is incremental: `looking_at`
//! stops reading as soon as a byte mismatches, so a parser fed through a
//! [`HandoffStream`](super::handoff::HandoffStream) never blocks waiting for
//! a chunk it does not need to make its next decision.
//!
//! Tokens (names, text runs, attribute values) are accumulated as raw bytes
//! and decoded once complete, which keeps multi-byte sequences split across
//! chunks intact. Documents in an encoding that does not keep ASCII bytes as
//! themselves (UTF-16) are transcoded to UTF-8 as they are read, so the
//! scanner only ever sees ASCII-compatible bytes.
//!
//! # Security
//!
//! Nesting depth and name length are bounded; no external entity loading is
//! performed.

use std::io::{self, Read};

use encoding_rs::{CoderResult, Decoder, Encoding};

use crate::encoding;
use crate::error::{ParseError, SourceLocation};

// -------------------------------------------------------------------------
// Security defaults
// -------------------------------------------------------------------------

/// Default maximum element nesting depth.
pub(crate) const DEFAULT_MAX_DEPTH: u32 = 256;

/// Default maximum number of attributes on a single element.
pub(crate) const DEFAULT_MAX_ATTRIBUTES: u32 = 256;

/// Default maximum length (in bytes) of a text node or attribute value.
pub(crate) const DEFAULT_MAX_TEXT_LENGTH: usize = 10 * 1024 * 1024; // 10 MB

/// Default maximum length (in bytes) of an element or attribute name.
pub(crate) const DEFAULT_MAX_NAME_LENGTH: usize = 50_000;

/// Default size of a single `read` call against the underlying reader.
pub(crate) const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Consumed bytes are discarded from the buffer once this many pile up.
const COMPACT_THRESHOLD: usize = 8 * 1024;

// -------------------------------------------------------------------------
// XML Name character classes (XML 1.0 §2.3)
// -------------------------------------------------------------------------

/// Returns `true` if `c` is a valid `Char` per XML 1.0 §2.2 `[2]`.
pub(crate) fn is_xml_char(c: char) -> bool {
    matches!(c as u32,
        0x09 | 0x0A | 0x0D | 0x20..=0xD7FF | 0xE000..=0xFFFD | 0x0001_0000..=0x0010_FFFF
    )
}

/// Returns `true` if `c` is a valid `NameStartChar` per XML 1.0 §2.3 `[4]`.
pub(crate) fn is_name_start_char(c: char) -> bool {
    matches!(c,
        ':' | 'A'..='Z' | '_' | 'a'..='z' |
        '\u{C0}'..='\u{D6}' | '\u{D8}'..='\u{F6}' | '\u{F8}'..='\u{2FF}' |
        '\u{370}'..='\u{37D}' | '\u{37F}'..='\u{1FFF}' |
        '\u{200C}'..='\u{200D}' | '\u{2070}'..='\u{218F}' |
        '\u{2C00}'..='\u{2FEF}' | '\u{3001}'..='\u{D7FF}' |
        '\u{F900}'..='\u{FDCF}' | '\u{FDF0}'..='\u{FFFD}' |
        '\u{10000}'..='\u{EFFFF}'
    )
}

/// Returns `true` if `c` is a valid `NameChar` per XML 1.0 §2.3 `[4a]`.
pub(crate) fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9' | '\u{B7}' |
            '\u{300}'..='\u{36F}' | '\u{203F}'..='\u{2040}'
        )
}

/// Bytes that may belong to a name in any ASCII-compatible encoding.
///
/// Non-ASCII bytes are accepted here and validated after decoding.
fn is_name_byte(b: u8) -> bool {
    b >= 0x80 || b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b':')
}

fn is_xml_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

/// Splits a qualified name into optional prefix and local part.
///
/// `"foo:bar"` → `(Some("foo"), "bar")`
/// `"bar"` → `(None, "bar")`
pub(crate) fn split_name(name: &str) -> (Option<&str>, &str) {
    match name.find(':') {
        Some(pos) => (Some(&name[..pos]), &name[pos + 1..]),
        None => (None, name),
    }
}

/// Normalizes line endings (XML 1.0 §2.11): `\r\n` and lone `\r` become `\n`.
pub(crate) fn normalize_newlines(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Outcome of parsing `&...;`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reference {
    /// A predefined entity or character reference, already expanded.
    Resolved(String),
    /// A named entity this parser does not know.
    Unknown(String),
}

// -------------------------------------------------------------------------
// ParserInput
// -------------------------------------------------------------------------

/// Streaming input state for the XML parser.
///
/// Tracks the read buffer, position (line/column/offset), nesting depth,
/// the active decoding, and any I/O error raised by the reader. An I/O
/// error is latched and makes the input look exhausted; the parser checks
/// [`take_io_error`](ParserInput::take_io_error) before reporting a
/// syntax error so that the real cause wins.
pub(crate) struct ParserInput<R> {
    reader: R,

    /// Bytes read but not yet discarded.
    buf: Vec<u8>,

    /// Undecoded bytes from the reader while transcoding.
    raw: Vec<u8>,

    /// Set when the source is transcoded into `buf` as UTF-8.
    transcoder: Option<Decoder>,

    /// Current index into `buf`.
    pos: usize,

    /// Absolute offset of `buf[0]` in the stream.
    discarded: usize,

    /// Size of each `read` request.
    read_size: usize,

    /// The reader returned 0 (or failed).
    eof: bool,

    io_error: Option<io::Error>,

    line: u32,
    column: u32,

    depth: u32,
    max_depth: u32,
    max_name_length: usize,

    encoding: &'static Encoding,
}

impl<R: Read> ParserInput<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            raw: Vec::new(),
            transcoder: None,
            pos: 0,
            discarded: 0,
            read_size: DEFAULT_READ_BUFFER_SIZE,
            eof: false,
            io_error: None,
            line: 1,
            column: 1,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
            encoding: encoding::UTF_8,
        }
    }

    pub fn set_read_size(&mut self, size: usize) {
        self.read_size = size.max(1);
    }

    pub fn set_max_depth(&mut self, max: u32) {
        self.max_depth = max;
    }

    pub fn set_max_name_length(&mut self, max: usize) {
        self.max_name_length = max;
    }

    pub fn set_encoding(&mut self, encoding: &'static Encoding) {
        self.encoding = encoding;
    }

    /// Decodes everything from the current position on from `encoding`,
    /// presenting it to the scanner as UTF-8.
    pub fn transcode_from(&mut self, encoding: &'static Encoding) {
        let pending = self.buf.split_off(self.pos);
        self.raw.extend_from_slice(&pending);
        self.transcoder = Some(encoding.new_decoder_without_bom_handling());
        self.encoding = encoding::UTF_8;
        self.decode_raw();
    }

    /// Looks for a byte order mark at the current position without
    /// consuming it.
    pub fn peek_bom(&mut self) -> Option<(&'static Encoding, usize)> {
        self.fill(3);
        encoding::detect_bom(&self.buf[self.pos..])
    }

    /// Skips a byte order mark found by [`peek_bom`](Self::peek_bom). It
    /// does not count towards the column.
    pub fn skip_bom(&mut self, len: usize) {
        self.pos = (self.pos + len).min(self.buf.len());
    }

    /// Returns the latched I/O error, if the reader failed.
    pub fn take_io_error(&mut self) -> Option<io::Error> {
        self.io_error.take()
    }

    // -- Buffer management --

    /// Ensures at least `n` unread bytes are buffered, unless the reader is
    /// exhausted. Returns whether `n` bytes are available.
    fn fill(&mut self, n: usize) -> bool {
        while self.buf.len() - self.pos < n && !self.eof {
            if self.pos >= COMPACT_THRESHOLD {
                self.buf.drain(..self.pos);
                self.discarded += self.pos;
                self.pos = 0;
            }
            let transcoding = self.transcoder.is_some();
            let target = if transcoding {
                &mut self.raw
            } else {
                &mut self.buf
            };
            let old_len = target.len();
            target.resize(old_len + self.read_size, 0);
            match self.reader.read(&mut target[old_len..]) {
                Ok(0) => {
                    target.truncate(old_len);
                    self.eof = true;
                }
                Ok(read) => target.truncate(old_len + read),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => target.truncate(old_len),
                Err(e) => {
                    target.truncate(old_len);
                    self.io_error = Some(e);
                    self.eof = true;
                }
            }
            if transcoding {
                self.decode_raw();
            }
        }
        self.buf.len() - self.pos >= n
    }

    /// Moves the bytes in `raw` through the transcoder into `buf`.
    /// Malformed input becomes U+FFFD. A code unit split across reads stays
    /// in the decoder until the rest arrives.
    fn decode_raw(&mut self) {
        let Some(decoder) = self.transcoder.as_mut() else {
            return;
        };
        let last = self.eof;
        let mut src = &self.raw[..];
        loop {
            let room = decoder
                .max_utf8_buffer_length(src.len())
                .unwrap_or(src.len() * 3 + 4);
            let old_len = self.buf.len();
            self.buf.resize(old_len + room, 0);
            let (result, read, written, _) =
                decoder.decode_to_utf8(src, &mut self.buf[old_len..], last);
            self.buf.truncate(old_len + written);
            src = &src[read..];
            if result == CoderResult::InputEmpty {
                break;
            }
        }
        self.raw.clear();
    }

    // -- Depth tracking --

    /// Increments the nesting depth. Returns an error if the limit is exceeded.
    pub fn increment_depth(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(self.fatal(format!(
                "maximum nesting depth exceeded ({})",
                self.max_depth
            )));
        }
        Ok(())
    }

    pub fn decrement_depth(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // -- Position queries --

    pub fn location(&self) -> SourceLocation {
        SourceLocation {
            line: self.line,
            column: self.column,
            byte_offset: self.discarded + self.pos,
        }
    }

    /// Returns `true` if all input has been consumed. May block for more input.
    pub fn at_end(&mut self) -> bool {
        !self.fill(1)
    }

    // -- Peek operations --

    pub fn peek(&mut self) -> Option<u8> {
        if self.fill(1) {
            Some(self.buf[self.pos])
        } else {
            None
        }
    }

    /// Returns `true` if the upcoming bytes are `s`, reading only as far as
    /// the first mismatch.
    pub fn looking_at(&mut self, s: &[u8]) -> bool {
        for (i, &expected) in s.iter().enumerate() {
            if !self.fill(i + 1) || self.buf[self.pos + i] != expected {
                return false;
            }
        }
        true
    }

    // -- Advance operations --

    /// Advances over `count` already-buffered bytes, updating line/column.
    pub fn advance(&mut self, count: usize) {
        for _ in 0..count {
            if self.pos >= self.buf.len() && !self.fill(1) {
                return;
            }
            let b = self.buf[self.pos];
            if b == b'\n' {
                self.line += 1;
                self.column = 1;
            } else if !(self.encoding == encoding::UTF_8 && b & 0xC0 == 0x80) {
                // UTF-8 continuation bytes belong to the previous column.
                self.column += 1;
            }
            self.pos += 1;
        }
    }

    /// Consumes and returns the next byte, or returns an error at EOF.
    pub fn next_byte(&mut self) -> Result<u8, ParseError> {
        let b = self
            .peek()
            .ok_or_else(|| self.fatal("unexpected end of input"))?;
        self.advance(1);
        Ok(b)
    }

    // -- Expect operations --

    pub fn expect_byte(&mut self, expected: u8) -> Result<(), ParseError> {
        match self.peek() {
            Some(b) if b == expected => {
                self.advance(1);
                Ok(())
            }
            Some(b) => Err(self.fatal(format!(
                "expected '{}', found '{}'",
                expected as char,
                b.escape_ascii()
            ))),
            None => Err(self.fatal(format!(
                "expected '{}', found end of input",
                expected as char
            ))),
        }
    }

    pub fn expect_str(&mut self, expected: &[u8]) -> Result<(), ParseError> {
        for &b in expected {
            self.expect_byte(b)?;
        }
        Ok(())
    }

    // -- Whitespace --

    /// Skips whitespace. Returns `true` if any was consumed.
    pub fn skip_whitespace(&mut self) -> bool {
        let mut skipped = false;
        while let Some(b) = self.peek() {
            if !is_xml_whitespace(b) {
                break;
            }
            self.advance(1);
            skipped = true;
        }
        skipped
    }

    pub fn skip_whitespace_required(&mut self) -> Result<(), ParseError> {
        if !self.skip_whitespace() {
            return Err(self.fatal("whitespace required"));
        }
        Ok(())
    }

    // -- Raw token collection --

    /// Consumes bytes while `pred` holds and returns them undecoded.
    pub fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(b) = self.peek() {
            if !pred(b) {
                break;
            }
            out.push(b);
            self.advance(1);
        }
        out
    }

    /// Consumes bytes up to and including `terminator`, returning the bytes
    /// before it. Returns `None` if the input ends first.
    pub fn take_until(&mut self, terminator: &[u8]) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            if self.looking_at(terminator) {
                self.advance(terminator.len());
                return Some(out);
            }
            let b = self.peek()?;
            out.push(b);
            self.advance(1);
        }
    }

    /// Decodes a complete token with the active encoding.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, ParseError> {
        encoding::decode(bytes, self.encoding).map_err(|e| self.fatal(e.message))
    }

    // -- Name parsing (XML 1.0 §2.3) --

    /// Parses an XML `Name` per XML 1.0 §2.3 production `[5]`.
    pub fn parse_name(&mut self) -> Result<String, ParseError> {
        let raw = self.take_while(is_name_byte);
        if raw.is_empty() {
            return match self.peek() {
                Some(b) => Err(self.fatal(format!(
                    "invalid name start character: '{}'",
                    b.escape_ascii()
                ))),
                None => Err(self.fatal("expected name, found end of input")),
            };
        }
        if raw.len() > self.max_name_length {
            return Err(self.fatal(format!(
                "name length ({}) exceeds maximum ({})",
                raw.len(),
                self.max_name_length
            )));
        }
        let name = self.decode(&raw)?;
        let mut chars = name.chars();
        if let Some(first) = chars.next() {
            if !is_name_start_char(first) {
                return Err(self.fatal(format!("invalid name start character: '{first}'")));
            }
        }
        if let Some(bad) = chars.find(|&c| !is_name_char(c)) {
            return Err(self.fatal(format!("invalid name character: '{bad}'")));
        }
        Ok(name)
    }

    // -- Reference parsing (XML 1.0 §4.1) --

    /// Parses an entity or character reference (`&...;`).
    ///
    /// Handles the five predefined entities and decimal/hexadecimal
    /// character references. Other named entities come back as
    /// [`Reference::Unknown`] for the caller to report.
    pub fn parse_reference(&mut self) -> Result<Reference, ParseError> {
        self.expect_byte(b'&')?;

        if self.peek() == Some(b'#') {
            self.advance(1);
            let value = if self.peek() == Some(b'x') {
                self.advance(1);
                let hex = self.take_while(|b| b.is_ascii_hexdigit());
                if hex.is_empty() {
                    return Err(self.fatal("empty hex character reference"));
                }
                std::str::from_utf8(&hex)
                    .ok()
                    .and_then(|h| u32::from_str_radix(h, 16).ok())
                    .ok_or_else(|| self.fatal("invalid hex character reference"))?
            } else {
                let dec = self.take_while(|b| b.is_ascii_digit());
                if dec.is_empty() {
                    return Err(self.fatal("empty decimal character reference"));
                }
                std::str::from_utf8(&dec)
                    .ok()
                    .and_then(|d| d.parse::<u32>().ok())
                    .ok_or_else(|| self.fatal("invalid decimal character reference"))?
            };
            self.expect_byte(b';')?;

            let ch = char::from_u32(value)
                .filter(|&c| is_xml_char(c))
                .ok_or_else(|| {
                    self.fatal(format!(
                        "character reference &#x{value:X}; does not refer to a valid XML character"
                    ))
                })?;
            return Ok(Reference::Resolved(ch.to_string()));
        }

        let name = self.parse_name()?;
        self.expect_byte(b';')?;
        let expanded = match name.as_str() {
            "amp" => "&",
            "lt" => "<",
            "gt" => ">",
            "apos" => "'",
            "quot" => "\"",
            _ => return Ok(Reference::Unknown(name)),
        };
        Ok(Reference::Resolved(expanded.to_string()))
    }

    /// Parses a quoted literal without reference expansion.
    pub fn parse_quoted_value(&mut self) -> Result<String, ParseError> {
        let quote = self.next_byte()?;
        if quote != b'"' && quote != b'\'' {
            return Err(self.fatal("expected quoted value"));
        }
        let raw = self.take_while(|b| b != quote);
        self.expect_byte(quote)?;
        self.decode(&raw)
    }

    // -- Error helpers --

    pub fn fatal(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.location())
    }
}
