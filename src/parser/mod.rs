//! Blocking XML parsing and the push bridge built on top of it.
//!
//! A [`DocumentParser`] is a blocking, pull-based parser: it reads from any
//! [`Read`] and reports what it finds to a [`DocumentSink`]. The bridge
//! lets a caller push bytes at such a parser chunk by chunk:
//!
//! - [`HandoffStream`] is a single-slot blocking byte stream between one
//!   writer and one reader, acknowledging each chunk once it has been read.
//! - [`ParseWorker`] runs the blocking parse on its own thread against the
//!   reading side of a stream and records every error it sees.
//! - [`PushParseSession`] is the embedder-facing controller that starts the
//!   worker lazily, forwards chunks with backpressure, and applies the
//!   strict or recover policy after every chunk.
//!
//! [`XmlParser`] is the built-in streaming XML 1.0 parser used by default.

pub mod handoff;
pub(crate) mod input;
pub mod push;
pub mod worker;
mod xml;

pub use handoff::{AckStatus, HandoffReader, HandoffStream, PendingAck};
pub use push::PushParseSession;
pub use worker::{ErrorLog, ParseWorker, WorkerLifecycle};
pub use xml::XmlParser;

use std::io::Read;

use encoding_rs::Encoding;

use crate::error::ParseFailure;
use crate::sax::DocumentSink;

use input::{
    DEFAULT_MAX_ATTRIBUTES, DEFAULT_MAX_DEPTH, DEFAULT_MAX_NAME_LENGTH,
    DEFAULT_MAX_TEXT_LENGTH, DEFAULT_READ_BUFFER_SIZE,
};

/// A blocking parser that pulls its input from a reader.
///
/// Implementations must not assume the whole input is available up front:
/// `input` may block until the next chunk arrives, and returns `Ok(0)` only
/// at end of stream.
///
/// Recoverable problems are reported through [`DocumentSink::error`] and
/// [`DocumentSink::warning`]. The error that stops the parse is returned
/// instead; callers that run the parser on a worker forward it to the sink.
pub trait DocumentParser: Send + Sync {
    /// Parses one document from `input`, firing callbacks on `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseFailure::Syntax`] for the error that stopped the
    /// parse, [`ParseFailure::Io`] if reading failed, and
    /// [`ParseFailure::Internal`] for anything else.
    fn parse(
        &self,
        input: &mut dyn Read,
        sink: &mut dyn DocumentSink,
        options: &ParseOptions,
    ) -> Result<(), ParseFailure>;
}

/// Parse options controlling parser behavior and security limits.
///
/// Use the builder pattern to configure options:
///
/// ```
/// use xmlpush::parser::ParseOptions;
///
/// let opts = ParseOptions::default()
///     .recover(true)
///     .no_blanks(true)
///     .max_depth(128);
/// assert!(opts.recover);
/// ```
#[derive(Clone)]
pub struct ParseOptions {
    /// If true, report well-formedness errors and keep parsing.
    pub recover: bool,
    /// If true, drop whitespace-only character data.
    pub no_blanks: bool,
    /// Overrides the document's declared encoding. Also the encoding used
    /// by [`PushParseSession::write_str`].
    pub encoding: Option<&'static Encoding>,
    /// How many bytes the parser asks its reader for at a time (default: 4096).
    pub read_buffer_size: usize,

    // -- Security limits --
    /// Maximum element nesting depth (default: 256).
    pub max_depth: u32,
    /// Maximum number of attributes on a single element (default: 256).
    pub max_attributes: u32,
    /// Maximum length in bytes of a single text run or attribute value (default: 10 MB).
    pub max_text_length: usize,
    /// Maximum length in bytes of an element or attribute name (default: 50,000).
    pub max_name_length: usize,
}

impl std::fmt::Debug for ParseOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseOptions")
            .field("recover", &self.recover)
            .field("no_blanks", &self.no_blanks)
            .field("encoding", &self.encoding.map(Encoding::name))
            .field("read_buffer_size", &self.read_buffer_size)
            .field("max_depth", &self.max_depth)
            .field("max_attributes", &self.max_attributes)
            .field("max_text_length", &self.max_text_length)
            .field("max_name_length", &self.max_name_length)
            .finish()
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            recover: false,
            no_blanks: false,
            encoding: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_depth: DEFAULT_MAX_DEPTH,
            max_attributes: DEFAULT_MAX_ATTRIBUTES,
            max_text_length: DEFAULT_MAX_TEXT_LENGTH,
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
        }
    }
}

impl ParseOptions {
    /// Enables or disables error recovery mode.
    #[must_use]
    pub fn recover(mut self, yes: bool) -> Self {
        self.recover = yes;
        self
    }

    /// Enables or disables stripping of blank text.
    #[must_use]
    pub fn no_blanks(mut self, yes: bool) -> Self {
        self.no_blanks = yes;
        self
    }

    /// Forces the document encoding. It wins over a BOM and the XML
    /// declaration. UTF-16 is transcoded as it is read.
    ///
    /// ```
    /// use xmlpush::encoding::lookup;
    /// use xmlpush::parser::ParseOptions;
    ///
    /// let opts = ParseOptions::default().encoding(lookup("latin1").unwrap());
    /// assert_eq!(opts.encoding.unwrap().name(), "windows-1252");
    /// ```
    #[must_use]
    pub fn encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Sets the reader request size. Zero is treated as one.
    #[must_use]
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Sets the maximum element nesting depth.
    #[must_use]
    pub fn max_depth(mut self, max: u32) -> Self {
        self.max_depth = max;
        self
    }

    /// Sets the maximum number of attributes per element.
    #[must_use]
    pub fn max_attributes(mut self, max: u32) -> Self {
        self.max_attributes = max;
        self
    }

    /// Sets the maximum text run length in bytes.
    #[must_use]
    pub fn max_text_length(mut self, max: usize) -> Self {
        self.max_text_length = max;
        self
    }

    /// Sets the maximum element/attribute name length in bytes.
    #[must_use]
    pub fn max_name_length(mut self, max: usize) -> Self {
        self.max_name_length = max;
        self
    }
}

/// Parses one document from `reader` on the calling thread with the
/// built-in [`XmlParser`].
///
/// # Errors
///
/// Returns the [`ParseFailure`] that stopped the parse. In recovery mode
/// well-formedness errors go to `sink` instead.
///
/// # Examples
///
/// ```
/// use xmlpush::parser::{parse_reader, ParseOptions};
/// use xmlpush::sax::EventRecorder;
///
/// let mut recorder = EventRecorder::new();
/// parse_reader(&b"<a><b></a>"[..], &mut recorder, &ParseOptions::default().recover(true))
///     .unwrap();
/// assert_eq!(recorder.errors().len(), 2);
/// ```
pub fn parse_reader<R: Read, S: DocumentSink>(
    mut reader: R,
    sink: &mut S,
    options: &ParseOptions,
) -> Result<(), ParseFailure> {
    XmlParser.parse(&mut reader, sink, options)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sax::EventRecorder;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_options() {
        let opts = ParseOptions::default();
        assert!(!opts.recover);
        assert!(!opts.no_blanks);
        assert!(opts.encoding.is_none());
        assert_eq!(opts.max_depth, 256);
        assert_eq!(opts.read_buffer_size, 4096);
    }

    #[test]
    fn test_debug_shows_encoding_name() {
        let opts = ParseOptions::default().encoding(crate::encoding::UTF_8);
        let rendered = format!("{opts:?}");
        assert!(rendered.contains("Some(\"UTF-8\")"), "{rendered}");
    }

    #[test]
    fn test_zero_read_size_clamped() {
        assert_eq!(ParseOptions::default().read_buffer_size(0).read_buffer_size, 1);
    }

    #[test]
    fn test_parse_reader_one_byte_reads() {
        let opts = ParseOptions::default().read_buffer_size(1);
        let mut recorder = EventRecorder::new();
        parse_reader(&b"<r k='v'>t&amp;t</r>"[..], &mut recorder, &opts).unwrap();
        assert_eq!(
            recorder.summaries(),
            vec![
                "start_document",
                "start_element(r)",
                "characters(t&t)",
                "end_element(r)",
                "end_document",
            ]
        );
    }

    #[test]
    fn test_parse_reader_io_error() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk on fire"))
            }
        }
        let result = parse_reader(Broken, &mut EventRecorder::new(), &ParseOptions::default());
        assert!(matches!(result, Err(ParseFailure::Io(_))));
    }
}
