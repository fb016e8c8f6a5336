//! Runs a blocking parse on a dedicated thread.
//!
//! A [`ParseWorker`] owns the reading side of a [`HandoffStream`] and one
//! thread that calls [`DocumentParser::parse`] against it. Every error the
//! parser reports through the sink is appended to an [`ErrorLog`] shared
//! with the controlling thread. When the parse returns, fails, or panics,
//! the stream is closed so that a writer blocked on an ack is released.
//!
//! The sink is moved into the thread and handed back by
//! [`ParseWorker::cancel`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use crate::error::{ParseError, ParseFailure, PushError, SourceLocation};
use crate::parser::handoff::{lock, HandoffStream};
use crate::parser::{DocumentParser, ParseOptions};
use crate::sax::{Attribute, DocumentSink, NamespaceDecl};

/// Name given to worker threads.
const WORKER_THREAD_NAME: &str = "xmlpush-parse";

/// Stack size for worker threads. The built-in parser recurses once per
/// nesting level.
const WORKER_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Where a worker (or a session's worker slot) is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerLifecycle {
    /// No worker has been started yet.
    NotStarted,
    /// A worker thread exists and may be parsing.
    Running,
    /// The worker has been shut down. It is never restarted.
    Terminated,
}

/// Ordered, append-only record of the errors seen during one parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorLog {
    errors: Vec<ParseError>,
}

impl ErrorLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ParseError) {
        self.errors.push(error);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&ParseError> {
        self.errors.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ParseError> {
        self.errors.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ParseError] {
        &self.errors
    }
}

impl<'a> IntoIterator for &'a ErrorLog {
    type Item = &'a ParseError;
    type IntoIter = std::slice::Iter<'a, ParseError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

/// State written by the worker thread and read by the controller.
#[derive(Default)]
struct WorkerShared {
    errors: Mutex<ErrorLog>,
    fault: Mutex<Option<String>>,
    /// The sink has been sent `end_document`.
    ended: AtomicBool,
}

impl WorkerShared {
    fn record_error(&self, error: ParseError) {
        lock(&self.errors).push(error);
    }

    fn record_fault(&self, message: String) {
        warn!("parse worker failed: {message}");
        let mut fault = lock(&self.fault);
        // The first fault is the interesting one.
        if fault.is_none() {
            *fault = Some(message);
        }
    }
}

/// Closes the stream when the worker thread leaves its body, however it
/// leaves it.
struct CloseOnDrop(HandoffStream);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Forwards every callback to the wrapped sink and logs `error` calls.
struct RecordingSink<'a, S> {
    inner: &'a mut S,
    shared: &'a WorkerShared,
}

impl<S: DocumentSink> DocumentSink for RecordingSink<'_, S> {
    fn start_document(&mut self) {
        self.inner.start_document();
    }

    fn xml_decl(&mut self, version: &str, encoding: Option<&str>, standalone: Option<bool>) {
        self.inner.xml_decl(version, encoding, standalone);
    }

    fn start_element(
        &mut self,
        name: &str,
        attributes: &[Attribute],
        prefix: Option<&str>,
        namespace_uri: Option<&str>,
        namespaces: &[NamespaceDecl],
    ) {
        self.inner
            .start_element(name, attributes, prefix, namespace_uri, namespaces);
    }

    fn end_element(&mut self, name: &str, prefix: Option<&str>, namespace_uri: Option<&str>) {
        self.inner.end_element(name, prefix, namespace_uri);
    }

    fn characters(&mut self, text: &str) {
        self.inner.characters(text);
    }

    fn cdata_block(&mut self, text: &str) {
        self.inner.cdata_block(text);
    }

    fn comment(&mut self, text: &str) {
        self.inner.comment(text);
    }

    fn processing_instruction(&mut self, target: &str, data: Option<&str>) {
        self.inner.processing_instruction(target, data);
    }

    fn warning(&mut self, message: &str, location: SourceLocation) {
        self.inner.warning(message, location);
    }

    fn error(&mut self, message: &str, location: SourceLocation) {
        self.shared.record_error(ParseError::new(message, location));
        self.inner.error(message, location);
    }

    fn end_document(&mut self) {
        self.shared.ended.store(true, Ordering::Release);
        self.inner.end_document();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// One blocking parse running on its own thread.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use xmlpush::parser::{ParseOptions, ParseWorker, XmlParser};
/// use xmlpush::sax::EventRecorder;
///
/// let mut worker =
///     ParseWorker::start(Arc::new(XmlParser), EventRecorder::new(), ParseOptions::default())
///         .unwrap();
/// let _ = worker.stream().put(b"<doc/>".to_vec()).wait();
/// let _ = worker.stream().put_end().wait();
/// let recorder = worker.cancel().unwrap();
/// assert_eq!(recorder.summaries().last().unwrap(), "end_document");
/// assert_eq!(worker.error_count(), 0);
/// ```
pub struct ParseWorker<S> {
    stream: HandoffStream,
    shared: Arc<WorkerShared>,
    handle: Option<JoinHandle<S>>,
    lifecycle: WorkerLifecycle,
}

impl<S> std::fmt::Debug for ParseWorker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseWorker")
            .field("stream", &self.stream)
            .field("lifecycle", &self.lifecycle)
            .field("error_count", &self.error_count())
            .finish_non_exhaustive()
    }
}

impl<S: DocumentSink + Send + 'static> ParseWorker<S> {
    /// Creates a fresh stream and spawns the thread that parses from it.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::WorkerFailed`] if the thread cannot be spawned.
    /// The sink is lost in that case.
    pub fn start(
        parser: Arc<dyn DocumentParser>,
        sink: S,
        options: ParseOptions,
    ) -> Result<Self, PushError> {
        let stream = HandoffStream::new();
        let shared = Arc::new(WorkerShared::default());

        let thread_stream = stream.clone();
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || run(&*parser, sink, &options, thread_stream, &thread_shared))
            .map_err(|e| PushError::WorkerFailed(format!("cannot spawn parse worker: {e}")))?;

        Ok(Self {
            stream,
            shared,
            handle: Some(handle),
            lifecycle: WorkerLifecycle::Running,
        })
    }
}

impl<S> ParseWorker<S> {
    /// The writing side of the worker's stream.
    #[must_use]
    pub fn stream(&self) -> &HandoffStream {
        &self.stream
    }

    #[must_use]
    pub fn lifecycle(&self) -> WorkerLifecycle {
        self.lifecycle
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        lock(&self.shared.errors).len()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<ParseError> {
        lock(&self.shared.errors).last().cloned()
    }

    /// A snapshot of every error logged so far.
    #[must_use]
    pub fn errors(&self) -> ErrorLog {
        lock(&self.shared.errors).clone()
    }

    /// The failure that is not a syntax error (I/O, internal fault, panic),
    /// if one happened.
    #[must_use]
    pub fn fault(&self) -> Option<String> {
        lock(&self.shared.fault).clone()
    }

    /// Whether the parser has sent `end_document` to the sink.
    #[must_use]
    pub fn saw_end_document(&self) -> bool {
        self.shared.ended.load(Ordering::Acquire)
    }

    /// Closes the stream and joins the thread, returning the sink.
    ///
    /// Only the first call returns the sink; later calls return `None`.
    /// `None` on the first call means the thread died outside the parse,
    /// which is also recorded as a fault.
    pub fn cancel(&mut self) -> Option<S> {
        self.stream.close();
        let handle = self.handle.take()?;
        self.lifecycle = WorkerLifecycle::Terminated;
        match handle.join() {
            Ok(sink) => Some(sink),
            Err(payload) => {
                self.shared.record_fault(format!(
                    "parse worker panicked: {}",
                    panic_message(&*payload)
                ));
                None
            }
        }
    }
}

impl<S> Drop for ParseWorker<S> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            // Never leave a thread parked on a stream nobody will feed.
            let _ = self.cancel();
        }
    }
}

/// Thread body.
fn run<S: DocumentSink>(
    parser: &dyn DocumentParser,
    mut sink: S,
    options: &ParseOptions,
    stream: HandoffStream,
    shared: &WorkerShared,
) -> S {
    let _close = CloseOnDrop(stream.clone());
    debug!("parse worker started");

    let mut reader = stream.reader();
    let result = {
        let mut recording = RecordingSink {
            inner: &mut sink,
            shared,
        };
        panic::catch_unwind(AssertUnwindSafe(|| {
            parser.parse(&mut reader, &mut recording, options)
        }))
    };

    match result {
        Ok(Ok(())) => debug!("parse worker finished"),
        Ok(Err(ParseFailure::Syntax(error))) => {
            debug!("parse worker stopped: {error}");
            shared.record_error(error.clone());
            let forwarded = panic::catch_unwind(AssertUnwindSafe(|| {
                sink.error(&error.message, error.location);
            }));
            if let Err(payload) = forwarded {
                shared.record_fault(format!("sink panicked: {}", panic_message(&*payload)));
            }
        }
        Ok(Err(ParseFailure::Io(e))) => shared.record_fault(format!("I/O error: {e}")),
        Ok(Err(ParseFailure::Internal(message))) => shared.record_fault(message),
        Err(payload) => shared.record_fault(format!(
            "parser panicked: {}",
            panic_message(&*payload)
        )),
    }
    sink
}
