//! Error types and diagnostics for push parsing.
//!
//! Parse-level problems are reported as [`ParseDiagnostic`]s carrying a
//! severity and a [`SourceLocation`]. The error that stops a parse is a
//! [`ParseError`]. A [`DocumentParser`](crate::parser::DocumentParser)
//! returns [`ParseFailure`], which separates syntax errors from I/O and
//! internal faults. The embedder-facing
//! [`PushParseSession`](crate::parser::PushParseSession) reports
//! [`PushError`].

use std::fmt;
use std::io;

use thiserror::Error;

/// Severity level for a parse diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSeverity {
    /// A non-fatal issue that doesn't prevent parsing.
    Warning,
    /// A recoverable error: the parser can continue but the document is malformed.
    Error,
    /// An unrecoverable error. Parsing stops.
    Fatal,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal error"),
        }
    }
}

/// Source location within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number, in characters.
    pub column: u32,
    /// 0-based byte offset from the start of the input. For transcoded
    /// (UTF-16) documents this counts bytes of the UTF-8 rendering.
    pub byte_offset: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A single diagnostic emitted during parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDiagnostic {
    /// The severity of this diagnostic.
    pub severity: ErrorSeverity,
    /// Human-readable error message.
    pub message: String,
    /// Where in the source this error occurred.
    pub location: SourceLocation,
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} at {}",
            self.severity, self.message, self.location
        )
    }
}

/// The error that stops a parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at {location}: {message}")]
pub struct ParseError {
    /// The primary error message.
    pub message: String,
    /// Where in the source the error occurred.
    pub location: SourceLocation,
    /// Diagnostics collected before this error (recovered errors and
    /// warnings, in the order they were reported).
    pub diagnostics: Vec<ParseDiagnostic>,
}

impl ParseError {
    /// Creates an error with no prior diagnostics.
    pub fn new(message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            message: message.into(),
            location,
            diagnostics: Vec::new(),
        }
    }

    /// Returns this error as a diagnostic with the given severity.
    #[must_use]
    pub fn to_diagnostic(&self, severity: ErrorSeverity) -> ParseDiagnostic {
        ParseDiagnostic {
            severity,
            message: self.message.clone(),
            location: self.location,
        }
    }
}

/// Why a [`DocumentParser`](crate::parser::DocumentParser) stopped.
#[derive(Debug, Error)]
pub enum ParseFailure {
    /// The input is not well-formed.
    #[error(transparent)]
    Syntax(#[from] ParseError),
    /// Reading the input failed.
    #[error("I/O error while parsing: {0}")]
    Io(#[from] io::Error),
    /// The parser hit a condition it cannot express as a syntax error.
    #[error("internal parser fault: {0}")]
    Internal(String),
}

/// Errors raised to the embedder by a push session.
///
/// Cloneable so that a session in a terminal state can hand out the same
/// error on every later call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    /// The caller supplied a chunk that cannot be written (absent, or not
    /// representable in the session encoding).
    #[error("malformed chunk: {reason}")]
    MalformedChunk {
        /// What was wrong with the chunk.
        reason: String,
    },
    /// The parser reported a well-formedness error under the strict policy.
    #[error(transparent)]
    Syntax(ParseError),
    /// The parser or sink failed with something other than a syntax error.
    #[error("parse worker failed: {0}")]
    WorkerFailed(String),
    /// An option was changed after the worker had already started.
    #[error("cannot change parser options while a parse is in progress")]
    ParseInProgress,
    /// The document was already completed with `is_last`.
    #[error("the document has already been finished")]
    Finished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_location_display() {
        let loc = SourceLocation {
            line: 10,
            column: 5,
            byte_offset: 42,
        };
        assert_eq!(loc.to_string(), "10:5");
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new(
            "unexpected end of input",
            SourceLocation {
                line: 1,
                column: 15,
                byte_offset: 14,
            },
        );
        assert_eq!(
            err.to_string(),
            "parse error at 1:15: unexpected end of input"
        );
    }

    #[test]
    fn test_parse_diagnostic_display() {
        let diag = ParseDiagnostic {
            severity: ErrorSeverity::Warning,
            message: "attribute value not quoted".to_string(),
            location: SourceLocation {
                line: 3,
                column: 10,
                byte_offset: 50,
            },
        };
        assert_eq!(
            diag.to_string(),
            "warning: attribute value not quoted at 3:10"
        );
    }

    #[test]
    fn test_error_severity_display() {
        assert_eq!(ErrorSeverity::Warning.to_string(), "warning");
        assert_eq!(ErrorSeverity::Error.to_string(), "error");
        assert_eq!(ErrorSeverity::Fatal.to_string(), "fatal error");
    }

    #[test]
    fn test_diagnostic_keeps_location() {
        let location = SourceLocation {
            line: 3,
            column: 7,
            byte_offset: 40,
        };
        let err = ParseError::new("mismatched end tag", location);
        let diag = err.to_diagnostic(ErrorSeverity::Fatal);
        assert_eq!(diag.severity, ErrorSeverity::Fatal);
        assert_eq!(diag.message, err.message);
        assert_eq!(diag.location, location);
    }

    #[test]
    fn test_push_error_syntax_is_transparent() {
        let err = PushError::Syntax(ParseError::new("boom", SourceLocation::default()));
        assert_eq!(err.to_string(), "parse error at 0:0: boom");
    }

    #[test]
    fn test_parse_failure_from_io() {
        let failure = ParseFailure::from(io::Error::other("pipe closed"));
        assert_eq!(failure.to_string(), "I/O error while parsing: pipe closed");
    }
}
