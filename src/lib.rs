//! # xmlpush
//!
//! Incremental (push-style) XML parsing over a blocking parser. Feed a
//! document in arbitrary byte chunks from one thread while a dedicated
//! worker thread parses it and fires event callbacks, with per-chunk
//! backpressure, a strict or recover error policy, and idempotent shutdown.
//!
//! ## Quick Start
//!
//! ```
//! use xmlpush::{PushParseSession, EventRecorder};
//!
//! let mut session = PushParseSession::new(EventRecorder::new());
//! session.write(Some(b"<greeting>hel"), false).unwrap();
//! session.write(Some(b"lo</greeting>"), true).unwrap();
//!
//! let recorder = session.finish().unwrap();
//! assert_eq!(recorder.summaries()[2], "characters(hello)");
//! ```
//!
//! ## Layout
//!
//! - [`parser`]: the handoff stream, the parse worker, the push session, and
//!   the built-in streaming [`XmlParser`].
//! - [`sax`]: the [`DocumentSink`] callback trait and recording sinks.
//! - [`encoding`]: encoding labels and chunk transcoding.
//! - [`error`]: error and diagnostic types.

pub mod encoding;
pub mod error;
pub mod parser;
pub mod sax;

// Re-export primary types at the crate root for convenience.
pub use error::{ParseError, PushError};
pub use parser::{DocumentParser, ParseOptions, PushParseSession, XmlParser};
pub use sax::{DocumentSink, EventRecorder};
