//! Single-slot blocking byte stream between one writer and one reader.
//!
//! The writer hands over one chunk at a time with [`HandoffStream::put`] and
//! gets back a [`PendingAck`] that resolves once the reader is done with the
//! chunk. "Done" is observed lazily: a chunk is acknowledged when the reader
//! asks for more bytes after having drained it. Everything the reader did
//! with those bytes (in particular, any error it reported) therefore
//! happens before the writer wakes up.
//!
//! ```text
//!  writer                         slot                      reader
//!  put(chunk) ──────────────▶ [pending] ──── read() ──▶ [current] ──▶ bytes
//!  ack.wait() ◀──── Consumed ─────────────── read() after drain ─┘
//! ```
//!
//! [`HandoffStream::close`] is the only way to unblock a stuck pair. It
//! resolves every outstanding ack and makes all later reads return 0.

use std::io::{self, Read};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use log::trace;

/// How a handed-off chunk ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// The reader consumed every byte of the chunk (or reached the
    /// end-of-stream marker).
    Consumed,
    /// The stream closed before the chunk was fully consumed.
    Closed,
}

/// A one-shot handle resolving when its chunk has been consumed or the
/// stream has closed.
#[derive(Debug)]
pub struct PendingAck {
    rx: Receiver<AckStatus>,
}

impl PendingAck {
    fn channel() -> (SyncSender<AckStatus>, Self) {
        let (tx, rx) = mpsc::sync_channel(1);
        (tx, Self { rx })
    }

    /// Blocks until the chunk is resolved.
    ///
    /// A stream that is dropped without resolving the ack counts as closed.
    #[must_use]
    pub fn wait(self) -> AckStatus {
        self.rx.recv().unwrap_or(AckStatus::Closed)
    }
}

enum Item {
    Chunk(Vec<u8>),
    EndOfStream,
}

/// The chunk the reader is currently draining.
struct Current {
    data: Vec<u8>,
    pos: usize,
    ack: SyncSender<AckStatus>,
}

#[derive(Default)]
struct Slot {
    /// Handed over by the writer, not yet picked up by the reader.
    pending: Option<(Item, SyncSender<AckStatus>)>,
    current: Option<Current>,
    closed: bool,
    /// The end-of-stream marker has been read.
    drained: bool,
}

impl Slot {
    fn is_occupied(&self) -> bool {
        self.pending.is_some() || self.current.is_some()
    }
}

struct Shared {
    slot: Mutex<Slot>,
    changed: Condvar,
}

/// Locks `mutex`, ignoring poisoning.
///
/// Every critical section in this crate leaves its data consistent before
/// anything that can panic runs, so a poisoned lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn resolve(ack: &SyncSender<AckStatus>, status: AckStatus) {
    // The receiver may already be gone; nobody is waiting then.
    let _ = ack.try_send(status);
}

/// A bounded, blocking byte stream with exactly one item in flight.
///
/// Cloning yields another handle to the same stream, so one side can be
/// moved to the reader thread.
///
/// # Examples
///
/// ```
/// use std::io::Read;
/// use std::thread;
/// use xmlpush::parser::{AckStatus, HandoffStream};
///
/// let stream = HandoffStream::new();
/// let mut reader = stream.reader();
/// let consumer = thread::spawn(move || {
///     let mut text = String::new();
///     reader.read_to_string(&mut text).unwrap();
///     text
/// });
///
/// assert_eq!(stream.put(b"<a>".to_vec()).wait(), AckStatus::Consumed);
/// assert_eq!(stream.put(b"</a>".to_vec()).wait(), AckStatus::Consumed);
/// assert_eq!(stream.put_end().wait(), AckStatus::Consumed);
/// assert_eq!(consumer.join().unwrap(), "<a></a>");
/// ```
#[derive(Clone)]
pub struct HandoffStream {
    shared: Arc<Shared>,
}

impl Default for HandoffStream {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandoffStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = lock(&self.shared.slot);
        f.debug_struct("HandoffStream")
            .field("occupied", &slot.is_occupied())
            .field("closed", &slot.closed)
            .field("drained", &slot.drained)
            .finish()
    }
}

impl HandoffStream {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::default()),
                changed: Condvar::new(),
            }),
        }
    }

    /// Hands `chunk` to the reader.
    ///
    /// Blocks while a previous chunk is still outstanding. Never fails: on a
    /// closed (or fully drained) stream the returned ack is already
    /// resolved as [`AckStatus::Closed`].
    pub fn put(&self, chunk: Vec<u8>) -> PendingAck {
        trace!("handoff: put {} byte chunk", chunk.len());
        self.enqueue(Item::Chunk(chunk))
    }

    /// Hands the end-of-stream marker to the reader.
    pub fn put_end(&self) -> PendingAck {
        trace!("handoff: put end of stream");
        self.enqueue(Item::EndOfStream)
    }

    fn enqueue(&self, item: Item) -> PendingAck {
        let (tx, ack) = PendingAck::channel();
        let mut slot = lock(&self.shared.slot);
        loop {
            if slot.closed || slot.drained {
                resolve(&tx, AckStatus::Closed);
                return ack;
            }
            if !slot.is_occupied() {
                slot.pending = Some((item, tx));
                self.shared.changed.notify_all();
                return ack;
            }
            slot = self
                .shared
                .changed
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Reads bytes from the current chunk, blocking until one is available.
    ///
    /// Returns 0 once the end-of-stream marker has been read, after
    /// [`close`](Self::close), or when `buf` is empty.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let mut slot = lock(&self.shared.slot);
        loop {
            if let Some(current) = slot.current.as_mut() {
                if current.pos < current.data.len() {
                    let n = buf.len().min(current.data.len() - current.pos);
                    buf[..n].copy_from_slice(&current.data[current.pos..current.pos + n]);
                    current.pos += n;
                    return n;
                }
                // Drained on an earlier call; the reader is done with it.
                if let Some(done) = slot.current.take() {
                    trace!("handoff: {} byte chunk consumed", done.data.len());
                    resolve(&done.ack, AckStatus::Consumed);
                }
                self.shared.changed.notify_all();
                continue;
            }
            if slot.closed || slot.drained {
                return 0;
            }
            if let Some((item, ack)) = slot.pending.take() {
                match item {
                    Item::Chunk(data) => {
                        slot.current = Some(Current { data, pos: 0, ack });
                    }
                    Item::EndOfStream => {
                        slot.drained = true;
                        resolve(&ack, AckStatus::Consumed);
                        self.shared.changed.notify_all();
                        return 0;
                    }
                }
                continue;
            }
            slot = self
                .shared
                .changed
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Closes the stream, waking any blocked reader or writer. Idempotent.
    ///
    /// The chunk being read resolves [`AckStatus::Consumed`] if all of its
    /// bytes were handed out, [`AckStatus::Closed`] otherwise. A chunk the
    /// reader never picked up resolves `Closed`.
    pub fn close(&self) {
        let mut slot = lock(&self.shared.slot);
        if slot.closed {
            return;
        }
        slot.closed = true;
        if let Some(current) = slot.current.take() {
            let status = if current.pos >= current.data.len() {
                AckStatus::Consumed
            } else {
                AckStatus::Closed
            };
            resolve(&current.ack, status);
        }
        if let Some((_, ack)) = slot.pending.take() {
            resolve(&ack, AckStatus::Closed);
        }
        trace!("handoff: closed");
        self.shared.changed.notify_all();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.shared.slot).closed
    }

    /// Returns a [`Read`] adapter over this stream.
    #[must_use]
    pub fn reader(&self) -> HandoffReader {
        HandoffReader {
            stream: self.clone(),
        }
    }
}

/// The reading side of a [`HandoffStream`] as a [`Read`].
#[derive(Debug, Clone)]
pub struct HandoffReader {
    stream: HandoffStream,
}

impl Read for HandoffReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.stream.read(buf))
    }
}
