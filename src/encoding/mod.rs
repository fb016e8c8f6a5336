//! Encoding lookup, BOM sniffing, and chunk transcoding.
//!
//! The streaming parser scans markup byte by byte, so only encodings in
//! which ASCII delimiters (`<`, `>`, `&`, quotes, whitespace) are encoded as
//! themselves can be named by an XML declaration. Documents in UTF-16 are
//! recognized by their BOM, by the shape of `<?`, or by a forced encoding,
//! and transcoded before scanning. [`lookup`] is the single label table used
//! both by the push session (to encode string chunks) and by the parser (to
//! decode names and text), backed by `encoding_rs`.
//!
//! # Examples
//!
//! ```
//! use xmlpush::encoding::{decode, encode_chunk, lookup};
//!
//! let latin1 = lookup("ISO-8859-1").unwrap();
//! let bytes = encode_chunk("café", latin1).unwrap();
//! assert_eq!(bytes, b"caf\xE9");
//! assert_eq!(decode(&bytes, latin1).unwrap(), "café");
//! ```

use encoding_rs::Encoding;
use thiserror::Error;

/// An error that occurs during encoding lookup or transcoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("encoding error: {message}")]
pub struct EncodingError {
    /// A human-readable description of the encoding error.
    pub message: String,
}

impl EncodingError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The default document encoding.
pub const UTF_8: &Encoding = encoding_rs::UTF_8;

/// Resolves an encoding label (case-insensitive, WHATWG label set).
///
/// # Errors
///
/// Returns `EncodingError` if the label is unknown, or if the encoding is not
/// ASCII-compatible (for example UTF-16). A declaration read as ASCII cannot
/// switch the document to such an encoding.
///
/// # Examples
///
/// ```
/// use xmlpush::encoding::lookup;
///
/// assert_eq!(lookup("utf8").unwrap().name(), "UTF-8");
/// assert!(lookup("UTF-16LE").is_err());
/// assert!(lookup("klingon").is_err());
/// ```
pub fn lookup(label: &str) -> Result<&'static Encoding, EncodingError> {
    let encoding = Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| EncodingError::new(format!("unsupported encoding: {label}")))?;
    if !encoding.is_ascii_compatible() {
        return Err(EncodingError::new(format!(
            "encoding {} is not ASCII-compatible; it needs a byte order mark",
            encoding.name()
        )));
    }
    Ok(encoding)
}

/// Detects a Byte Order Mark at the start of `bytes`.
///
/// Returns the indicated encoding and the number of BOM bytes to skip, or
/// `None` if no BOM is present.
///
/// # Examples
///
/// ```
/// use xmlpush::encoding::detect_bom;
///
/// let (enc, skip) = detect_bom(b"\xEF\xBB\xBF<root/>").unwrap();
/// assert_eq!(enc.name(), "UTF-8");
/// assert_eq!(skip, 3);
/// assert!(detect_bom(b"<root/>").is_none());
/// ```
#[must_use]
pub fn detect_bom(bytes: &[u8]) -> Option<(&'static Encoding, usize)> {
    Encoding::for_bom(bytes)
}

/// Encodes a string chunk into `encoding`.
///
/// UTF-16 is written as UTF-16 (`encoding_rs` only encodes into
/// ASCII-compatible encodings).
///
/// # Errors
///
/// Returns `EncodingError` if `text` contains a character that the encoding
/// cannot represent.
pub fn encode_chunk(text: &str, encoding: &'static Encoding) -> Result<Vec<u8>, EncodingError> {
    if encoding == encoding_rs::UTF_16LE {
        return Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect());
    }
    if encoding == encoding_rs::UTF_16BE {
        return Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect());
    }
    let (bytes, _used, had_errors) = encoding.encode(text);
    if had_errors {
        let culprit = text
            .chars()
            .find(|c| {
                let mut buf = [0u8; 4];
                encoding.encode(c.encode_utf8(&mut buf)).2
            })
            .map_or_else(String::new, |c| format!(" (U+{:04X})", c as u32));
        return Err(EncodingError::new(format!(
            "character not representable in {}{culprit}",
            encoding.name()
        )));
    }
    Ok(bytes.into_owned())
}

/// Decodes a complete token (name, text run, attribute value) from `encoding`.
///
/// # Errors
///
/// Returns `EncodingError` if `bytes` contains a malformed sequence.
pub fn decode(bytes: &[u8], encoding: &'static Encoding) -> Result<String, EncodingError> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(std::borrow::Cow::into_owned)
        .ok_or_else(|| {
            EncodingError::new(format!("malformed byte sequence for encoding {}", encoding.name()))
        })
}
