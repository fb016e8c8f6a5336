//! Push/incremental XML parsing.
//!
//! [`PushParseSession`] accepts a document in arbitrarily sized chunks and
//! feeds them to a blocking [`DocumentParser`] running on a dedicated
//! thread, in the spirit of libxml2's push parser (`xmlCreatePushParserCtxt`
//! / `xmlParseChunk`). Unlike a buffering push parser, events reach the
//! sink while the document is still arriving.
//!
//! Each [`write`](PushParseSession::write) blocks until the parser has
//! consumed the chunk, then looks at the errors the parser reported while
//! doing so:
//!
//! - under the strict policy (the default) any new error aborts the
//!   session, which then re-raises that error on every later call;
//! - under the recover policy errors are collected and parsing continues.
//!
//! # Examples
//!
//! ```
//! use xmlpush::parser::PushParseSession;
//! use xmlpush::sax::EventRecorder;
//!
//! let mut session = PushParseSession::new(EventRecorder::new());
//! session.write(Some(b"<root>"), false).unwrap();
//! session.write(Some(b"hello"), false).unwrap();
//! session.write(Some(b"</root>"), true).unwrap();
//!
//! let recorder = session.finish().unwrap();
//! assert_eq!(
//!     recorder.summaries(),
//!     vec![
//!         "start_document",
//!         "start_element(root)",
//!         "characters(hello)",
//!         "end_element(root)",
//!         "end_document",
//!     ]
//! );
//! ```

use std::sync::Arc;

use log::{debug, trace};

use crate::encoding::{encode_chunk, UTF_8};
use crate::error::{ParseError, PushError};
use crate::parser::handoff::AckStatus;
use crate::parser::worker::{ErrorLog, ParseWorker, WorkerLifecycle};
use crate::parser::{DocumentParser, ParseOptions, XmlParser};
use crate::sax::DocumentSink;

/// A push-based (incremental) parse of one document.
///
/// The worker thread is started lazily by the first write and shut down
/// exactly once: by a write with `is_last`, by a strict-mode abort, or by
/// [`terminate`](Self::terminate) (also run on drop).
///
/// # Construction
///
/// Use [`PushParseSession::new`] for the built-in parser with default
/// options, [`PushParseSession::with_options`] to configure it, or
/// [`PushParseSession::with_parser`] to bring another [`DocumentParser`].
///
/// # Examples
///
/// Recover mode keeps going and collects errors:
///
/// ```
/// use xmlpush::parser::{ParseOptions, PushParseSession};
/// use xmlpush::sax::DefaultSink;
///
/// let opts = ParseOptions::default().recover(true);
/// let mut session = PushParseSession::with_options(DefaultSink, opts);
/// session.write(Some(b"<a><b>"), false).unwrap();
/// session.write(Some(b"</a>"), true).unwrap();
/// assert_eq!(session.errors().len(), 2);
/// ```
pub struct PushParseSession<S: DocumentSink + Send + 'static> {
    parser: Arc<dyn DocumentParser>,
    options: ParseOptions,
    /// Held here whenever no worker owns it.
    sink: Option<S>,
    worker: Option<ParseWorker<S>>,
    lifecycle: WorkerLifecycle,
    /// Errors and fault of the last worker, kept after it is gone.
    errors: ErrorLog,
    fault: Option<String>,
    /// Re-raised by every call once set.
    terminal: Option<PushError>,
    bytes_written: usize,
    /// The sink has been sent `end_document` for the current document.
    ended: bool,
}

impl<S: DocumentSink + Send + 'static> std::fmt::Debug for PushParseSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushParseSession")
            .field("options", &self.options)
            .field("lifecycle", &self.lifecycle)
            .field("worker", &self.worker)
            .field("terminal", &self.terminal)
            .field("bytes_written", &self.bytes_written)
            .finish_non_exhaustive()
    }
}

impl<S: DocumentSink + Send + 'static> PushParseSession<S> {
    /// Creates a session using the built-in XML parser with default options.
    #[must_use]
    pub fn new(sink: S) -> Self {
        Self::with_options(sink, ParseOptions::default())
    }

    /// Creates a session using the built-in XML parser.
    ///
    /// # Examples
    ///
    /// ```
    /// use xmlpush::parser::{ParseOptions, PushParseSession};
    /// use xmlpush::sax::DefaultSink;
    ///
    /// let session = PushParseSession::with_options(
    ///     DefaultSink,
    ///     ParseOptions::default().recover(true).no_blanks(true),
    /// );
    /// assert!(session.recover());
    /// ```
    #[must_use]
    pub fn with_options(sink: S, options: ParseOptions) -> Self {
        Self::with_parser(sink, XmlParser, options)
    }

    /// Creates a session around any blocking parser.
    #[must_use]
    pub fn with_parser(
        sink: S,
        parser: impl DocumentParser + 'static,
        options: ParseOptions,
    ) -> Self {
        Self {
            parser: Arc::new(parser),
            options,
            sink: Some(sink),
            worker: None,
            lifecycle: WorkerLifecycle::NotStarted,
            errors: ErrorLog::new(),
            fault: None,
            terminal: None,
            bytes_written: 0,
            ended: false,
        }
    }

    /// Writes one chunk of the document.
    ///
    /// Blocks until the parser has consumed the chunk. With `is_last` the
    /// end of the document is signalled and the worker is shut down before
    /// returning, so every callback has fired by then. The sink receives
    /// `end_document` exactly once, even if the parser stopped early.
    ///
    /// # Errors
    ///
    /// - [`PushError::MalformedChunk`] if `chunk` is `None`. The `is_last`
    ///   shutdown still happens.
    /// - [`PushError::Syntax`] under the strict policy if the parser
    ///   reported an error while consuming this chunk. The session is
    ///   aborted.
    /// - [`PushError::WorkerFailed`] if the parser or sink failed in any
    ///   other way. The session is aborted.
    /// - [`PushError::Finished`] if the document was already finished.
    ///
    /// An aborted session returns the same error on every later call.
    pub fn write(&mut self, chunk: Option<&[u8]>, is_last: bool) -> Result<&mut Self, PushError> {
        let chunk = chunk.ok_or_else(|| PushError::MalformedChunk {
            reason: "chunk must not be absent".to_string(),
        });
        self.write_chunk(chunk, is_last)
    }

    /// Writes a text chunk, encoded in the session encoding
    /// ([`ParseOptions::encoding`], UTF-8 if unset).
    ///
    /// # Errors
    ///
    /// As [`write`](Self::write); a character the session encoding cannot
    /// represent is a [`PushError::MalformedChunk`].
    ///
    /// # Examples
    ///
    /// ```
    /// use xmlpush::encoding::lookup;
    /// use xmlpush::error::PushError;
    /// use xmlpush::parser::{ParseOptions, PushParseSession};
    /// use xmlpush::sax::DefaultSink;
    ///
    /// let opts = ParseOptions::default().encoding(lookup("ISO-8859-1").unwrap());
    /// let mut session = PushParseSession::with_options(DefaultSink, opts);
    /// session.write_str("<p>café</p>", false).unwrap();
    /// let err = session.write_str("\u{2603}", true).unwrap_err();
    /// assert!(matches!(err, PushError::MalformedChunk { .. }));
    /// ```
    pub fn write_str(&mut self, text: &str, is_last: bool) -> Result<&mut Self, PushError> {
        let encoding = self.options.encoding.unwrap_or(UTF_8);
        match encode_chunk(text, encoding) {
            Ok(bytes) => self.write_chunk(Ok(&bytes), is_last),
            Err(e) => self.write_chunk(Err(PushError::MalformedChunk { reason: e.message }), is_last),
        }
    }

    fn write_chunk(
        &mut self,
        chunk: Result<&[u8], PushError>,
        is_last: bool,
    ) -> Result<&mut Self, PushError> {
        if let Some(err) = &self.terminal {
            return Err(err.clone());
        }
        self.ensure_started()?;

        let count0 = self.error_count();
        let malformed = match chunk {
            Ok(bytes) => {
                self.hand_off(bytes);
                None
            }
            Err(e) => Some(e),
        };

        if is_last {
            self.terminate();
            self.end_document();
        }

        if let Some(fault) = self.current_fault() {
            self.terminate();
            return Err(self.abort(PushError::WorkerFailed(fault)));
        }

        if !self.options.recover && self.error_count() > count0 {
            self.terminate();
            if let Some(last) = self.last_error() {
                return Err(self.abort(PushError::Syntax(last)));
            }
        }

        match malformed {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }

    fn ensure_started(&mut self) -> Result<(), PushError> {
        match self.lifecycle {
            WorkerLifecycle::Running => Ok(()),
            WorkerLifecycle::Terminated => Err(PushError::Finished),
            WorkerLifecycle::NotStarted => {
                let Some(sink) = self.sink.take() else {
                    return Err(self.abort(PushError::WorkerFailed(
                        "no sink available to start a parse".to_string(),
                    )));
                };
                match ParseWorker::start(Arc::clone(&self.parser), sink, self.options.clone()) {
                    Ok(worker) => {
                        debug!("push session started parse worker");
                        self.worker = Some(worker);
                        self.lifecycle = WorkerLifecycle::Running;
                        Ok(())
                    }
                    Err(e) => {
                        self.lifecycle = WorkerLifecycle::Terminated;
                        Err(self.abort(e))
                    }
                }
            }
        }
    }

    /// Hands one chunk to the worker and waits for it to be consumed.
    fn hand_off(&mut self, bytes: &[u8]) {
        let Some(worker) = &self.worker else { return };
        match worker.stream().put(bytes.to_vec()).wait() {
            AckStatus::Consumed => self.bytes_written += bytes.len(),
            // The parse already ended; the chunk has nowhere to go.
            AckStatus::Closed => trace!("push session: {} byte chunk dropped", bytes.len()),
        }
    }

    /// Sends `end_document` if the parser did not.
    fn end_document(&mut self) {
        if self.ended {
            return;
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.end_document();
            self.ended = true;
        }
    }

    fn abort(&mut self, error: PushError) -> PushError {
        debug!("push session aborted: {error}");
        self.terminal = Some(error.clone());
        error
    }

    /// Ends the document and shuts the worker down.
    ///
    /// Idempotent and infallible: does nothing if no worker is running.
    /// Errors surfacing during shutdown are available through
    /// [`errors`](Self::errors) and reported by [`finish`](Self::finish).
    pub fn terminate(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        debug!("push session terminating parse worker");
        // Closed is fine here: the parse may have ended on its own.
        let _ = worker.stream().put_end().wait();
        if let Some(sink) = worker.cancel() {
            self.sink = Some(sink);
        }
        self.errors = worker.errors();
        self.fault = worker.fault();
        self.ended = worker.saw_end_document();
        self.lifecycle = WorkerLifecycle::Terminated;
    }

    /// Terminates the session and returns the sink.
    ///
    /// # Errors
    ///
    /// Returns the error that aborted the session, if any. Otherwise returns
    /// [`PushError::WorkerFailed`] for a worker failure or, under the strict
    /// policy, [`PushError::Syntax`] for the last error the parser reported.
    pub fn finish(mut self) -> Result<S, PushError> {
        self.terminate();
        if let Some(err) = self.terminal.take() {
            return Err(err);
        }
        if let Some(fault) = self.fault.take() {
            return Err(PushError::WorkerFailed(fault));
        }
        if !self.options.recover {
            if let Some(last) = self.errors.last() {
                return Err(PushError::Syntax(last.clone()));
            }
        }
        self.sink
            .take()
            .ok_or_else(|| PushError::WorkerFailed("the sink was lost".to_string()))
    }

    /// Terminates the current parse and starts over with `sink`.
    ///
    /// Clears the terminal error, the recorded errors, and the byte count.
    /// Returns the previous sink, if it is still available.
    pub fn reset(&mut self, sink: S) -> Option<S> {
        self.terminate();
        self.errors = ErrorLog::new();
        self.fault = None;
        self.terminal = None;
        self.bytes_written = 0;
        self.ended = false;
        self.lifecycle = WorkerLifecycle::NotStarted;
        self.sink.replace(sink)
    }

    #[must_use]
    pub fn recover(&self) -> bool {
        self.options.recover
    }

    /// Selects the recover (`true`) or strict (`false`) policy.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::ParseInProgress`] while a worker is running.
    pub fn set_recover(&mut self, recover: bool) -> Result<(), PushError> {
        if self.lifecycle == WorkerLifecycle::Running {
            return Err(PushError::ParseInProgress);
        }
        self.options.recover = recover;
        Ok(())
    }

    #[must_use]
    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    #[must_use]
    pub fn lifecycle(&self) -> WorkerLifecycle {
        self.lifecycle
    }

    /// Bytes consumed by the parser so far.
    #[must_use]
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Every error the parser has reported, in order.
    #[must_use]
    pub fn errors(&self) -> Vec<ParseError> {
        match &self.worker {
            Some(worker) => worker.errors().as_slice().to_vec(),
            None => self.errors.as_slice().to_vec(),
        }
    }

    /// The sink, while no worker owns it.
    #[must_use]
    pub fn sink(&self) -> Option<&S> {
        self.sink.as_ref()
    }

    /// Terminates the session and returns the sink regardless of errors.
    #[must_use]
    pub fn into_sink(mut self) -> Option<S> {
        self.terminate();
        self.sink.take()
    }

    fn error_count(&self) -> usize {
        self.worker
            .as_ref()
            .map_or(self.errors.len(), ParseWorker::error_count)
    }

    fn last_error(&self) -> Option<ParseError> {
        match &self.worker {
            Some(worker) => worker.last_error(),
            None => self.errors.last().cloned(),
        }
    }

    fn current_fault(&self) -> Option<String> {
        match &self.worker {
            Some(worker) => worker.fault(),
            None => self.fault.clone(),
        }
    }
}

impl<S: DocumentSink + Send + 'static> Drop for PushParseSession<S> {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sax::{DefaultSink, EventRecorder};
    use pretty_assertions::assert_eq;

    fn recover_session() -> PushParseSession<EventRecorder> {
        PushParseSession::with_options(EventRecorder::new(), ParseOptions::default().recover(true))
    }

    #[test]
    fn test_lazy_start() {
        let mut session = PushParseSession::new(DefaultSink);
        assert_eq!(session.lifecycle(), WorkerLifecycle::NotStarted);
        assert!(session.sink().is_some());
        session.write(Some(b"<a>"), false).unwrap();
        assert_eq!(session.lifecycle(), WorkerLifecycle::Running);
        assert!(session.sink().is_none());
        session.write(Some(b"</a>"), true).unwrap();
        assert_eq!(session.lifecycle(), WorkerLifecycle::Terminated);
        assert!(session.sink().is_some());
    }

    #[test]
    fn test_chained_writes() {
        let mut session = PushParseSession::new(EventRecorder::new());
        session
            .write(Some(b"<a>"), false)
            .unwrap()
            .write(Some(b"<b/>"), false)
            .unwrap()
            .write(Some(b"</a>"), true)
            .unwrap();
        assert_eq!(session.bytes_written(), 11);
        let recorder = session.finish().unwrap();
        assert_eq!(recorder.summaries()[2], "start_element(b)");
    }

    #[test]
    fn test_single_chunk_with_is_last() {
        let mut session = PushParseSession::new(EventRecorder::new());
        session.write(Some(b"<?xml version=\"1.0\"?><doc/>"), true).unwrap();
        let recorder = session.finish().unwrap();
        assert_eq!(recorder.summaries().last().unwrap(), "end_document");
    }

    #[test]
    fn test_strict_abort_is_terminal() {
        let mut session = PushParseSession::new(DefaultSink);
        let err = session.write(Some(b"<a><b></a>"), false).unwrap_err();
        let PushError::Syntax(parse_error) = &err else {
            panic!("expected a syntax error, got {err:?}");
        };
        assert!(parse_error.message.contains("mismatched end tag"));
        assert_eq!(session.lifecycle(), WorkerLifecycle::Terminated);

        // Re-raised without touching the worker.
        assert_eq!(session.write(Some(b"<c/>"), false).unwrap_err(), err);
        assert_eq!(session.write(None, true).unwrap_err(), err);
        assert_eq!(session.finish().unwrap_err(), err);
    }

    #[test]
    fn test_strict_error_at_end_of_input() {
        let mut session = PushParseSession::new(DefaultSink);
        session.write(Some(b"<a>"), false).unwrap();
        let err = session.write(Some(b""), true).unwrap_err();
        assert!(
            matches!(&err, PushError::Syntax(e) if e.message == "premature end of data in tag a"),
            "{err:?}"
        );
    }

    #[test]
    fn test_recover_collects_errors() {
        let mut session = recover_session();
        session.write(Some(b"<a><b></a>"), false).unwrap();
        session.write(Some(b""), true).unwrap();
        let messages: Vec<_> = session.errors().into_iter().map(|e| e.message).collect();
        assert_eq!(
            messages,
            vec![
                "mismatched end tag: expected </b>, found </a>",
                "premature end of data in tag a",
            ]
        );
        let recorder = session.finish().unwrap();
        assert_eq!(recorder.errors().len(), 2);
    }

    #[test]
    fn test_absent_chunk() {
        let mut session = PushParseSession::new(DefaultSink);
        session.write(Some(b"<a>"), false).unwrap();
        let err = session.write(None, false).unwrap_err();
        assert!(matches!(err, PushError::MalformedChunk { .. }));
        // Not terminal: the document can still be completed.
        session.write(Some(b"</a>"), true).unwrap();
        assert!(session.finish().is_ok());
    }

    #[test]
    fn test_absent_last_chunk_still_terminates() {
        let mut session = recover_session();
        session.write(Some(b"<a/>"), false).unwrap();
        let err = session.write(None, true).unwrap_err();
        assert!(matches!(err, PushError::MalformedChunk { .. }));
        assert_eq!(session.lifecycle(), WorkerLifecycle::Terminated);
        assert_eq!(
            session.into_sink().unwrap().summaries().last().unwrap(),
            "end_document"
        );
    }

    #[test]
    fn test_write_after_finish() {
        let mut session = PushParseSession::new(DefaultSink);
        session.write(Some(b"<a/>"), true).unwrap();
        assert_eq!(session.write(Some(b"<b/>"), false).unwrap_err(), PushError::Finished);
    }

    #[test]
    fn test_write_after_terminate() {
        let mut session = PushParseSession::new(DefaultSink);
        session.write(Some(b"<a>"), false).unwrap();
        session.terminate();
        session.terminate();
        assert_eq!(session.write(Some(b"</a>"), true).unwrap_err(), PushError::Finished);
    }

    #[test]
    fn test_terminate_before_start() {
        let mut session = PushParseSession::new(EventRecorder::new());
        session.terminate();
        assert_eq!(session.lifecycle(), WorkerLifecycle::NotStarted);
        assert!(session.into_sink().unwrap().events.is_empty());
    }

    #[test]
    fn test_set_recover() {
        let mut session = PushParseSession::new(DefaultSink);
        assert!(!session.recover());
        session.set_recover(true).unwrap();
        assert!(session.recover());
        session.write(Some(b"<a>"), false).unwrap();
        assert_eq!(session.set_recover(false).unwrap_err(), PushError::ParseInProgress);
        assert!(session.recover());
    }

    #[test]
    fn test_reset_starts_over() {
        let mut session = PushParseSession::new(EventRecorder::new());
        let _ = session.write(Some(b"<a></b>"), false).unwrap_err();

        let old = session.reset(EventRecorder::new()).unwrap();
        assert_eq!(old.errors().len(), 1);
        assert_eq!(session.lifecycle(), WorkerLifecycle::NotStarted);
        assert!(session.errors().is_empty());

        session.write(Some(b"<ok/>"), true).unwrap();
        let fresh = session.finish().unwrap();
        assert_eq!(fresh.summaries()[1], "start_element(ok)");
    }

    #[test]
    fn test_write_str_utf8() {
        let mut session = PushParseSession::new(EventRecorder::new());
        session.write_str("<p>\u{2603}</p>", true).unwrap();
        let recorder = session.finish().unwrap();
        assert_eq!(recorder.summaries()[2], "characters(\u{2603})");
    }

    #[test]
    fn test_write_str_utf16() {
        let opts = ParseOptions::default().encoding(encoding_rs::UTF_16LE);
        let mut session = PushParseSession::with_options(EventRecorder::new(), opts);
        session.write_str("<p>", false).unwrap();
        session.write_str("\u{2603}</p>", true).unwrap();
        let recorder = session.finish().unwrap();
        assert_eq!(recorder.summaries()[2], "characters(\u{2603})");
    }

    #[test]
    fn test_utf16_code_unit_split_across_chunks() {
        let bytes: Vec<u8> = "\u{FEFF}<p>ok</p>"
            .encode_utf16()
            .flat_map(u16::to_be_bytes)
            .collect();
        let mut session = PushParseSession::new(EventRecorder::new());
        for chunk in bytes.chunks(3) {
            session.write(Some(chunk), false).unwrap();
        }
        session.write(Some(b""), true).unwrap();
        let recorder = session.finish().unwrap();
        assert_eq!(recorder.summaries()[2], "characters(ok)");
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let snowman = "\u{2603}".as_bytes();
        let mut session = PushParseSession::new(EventRecorder::new());
        session.write(Some(b"<p>"), false).unwrap();
        session.write(Some(&snowman[..1]), false).unwrap();
        session.write(Some(&snowman[1..]), false).unwrap();
        session.write(Some(b"</p>"), true).unwrap();
        let recorder = session.finish().unwrap();
        assert_eq!(recorder.summaries()[2], "characters(\u{2603})");
    }

    #[test]
    fn test_finish_reports_strict_errors_found_at_shutdown() {
        let mut session = PushParseSession::new(DefaultSink);
        session.write(Some(b"<a>"), false).unwrap();
        let err = session.finish().unwrap_err();
        assert!(matches!(err, PushError::Syntax(_)), "{err:?}");
    }

    #[test]
    fn test_last_write_ends_document_after_fatal_limit() {
        let mut session = PushParseSession::with_options(
            EventRecorder::new(),
            ParseOptions::default().recover(true).max_depth(2),
        );
        session.write(Some(b"<a><b><c>"), false).unwrap();
        session.write(Some(b"</c></b></a>"), true).unwrap();
        let recorder = session.finish().unwrap();
        assert_eq!(
            recorder.summaries(),
            vec![
                "start_document",
                "start_element(a)",
                "start_element(b)",
                "error(maximum nesting depth exceeded (2))",
                "end_document",
            ]
        );
    }

    #[test]
    fn test_end_document_is_not_repeated() {
        let mut session = PushParseSession::new(EventRecorder::new());
        session.write(Some(b"<a/>"), true).unwrap();
        let recorder = session.finish().unwrap();
        let ends = recorder
            .summaries()
            .iter()
            .filter(|s| *s == "end_document")
            .count();
        assert_eq!(ends, 1);
    }

    #[test]
    fn test_strict_unfinished_document_still_ends() {
        let mut session = PushParseSession::new(EventRecorder::new());
        session.write(Some(b"<a>"), false).unwrap();
        let err = session.write(Some(b"<b>"), true).unwrap_err();
        assert!(matches!(err, PushError::Syntax(_)), "{err:?}");
        let recorder = session.into_sink().unwrap();
        assert_eq!(recorder.summaries().last().unwrap(), "end_document");
    }

    #[test]
    fn test_drop_while_running() {
        let mut session = PushParseSession::new(DefaultSink);
        session.write(Some(b"<a><b>"), false).unwrap();
        drop(session);
    }
}
