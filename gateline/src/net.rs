//! Reactor-facing contracts and per-port byte streams.
//!
//! The socket multiplexer, the registered socket, and the producer-side
//! outbound queue are external collaborators. The pipeline reaches them
//! through the traits and types here; the integration tests provide
//! scripted implementations.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bytes::{Buf, BytesMut};

use crate::metrics;

/// Opaque per-connection handle used in reactor callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(pub u32);

/// Contract of the socket multiplexer.
pub trait Network: Send + Sync {
    /// Re-schedule the port for servicing even without socket readiness.
    fn nudge_channel(&self, port: PortId);
    /// Adjust the connection's outbound queued-bytes accounting.
    /// Positive when ciphertext enters the write stage, negative as it
    /// drains to the socket.
    fn update_queued(&self, delta: i64, port: PortId);
}

/// Contract of the registered non-blocking socket.
pub trait Channel: Send + Sync {
    /// Read available bytes. `WouldBlock` (or `Ok(0)`) means nothing to
    /// read right now.
    fn read(&self, dst: &mut [u8]) -> io::Result<usize>;
    /// Write bytes without blocking; a short count means the kernel
    /// send buffer is full.
    fn write(&self, src: &[u8]) -> io::Result<usize>;
    /// Drop write-readiness interest once the outbound pipeline drains.
    fn disable_write_interest(&self);
}

/// Per-port inbound byte stream.
///
/// Filled by the bounded socket read in `run()` and drained by the
/// framer. Handlers of the stream always see contiguous bytes;
/// unconsumed bytes are retained via O(1) `advance`.
pub struct ReadStream {
    buf: BytesMut,
}

impl ReadStream {
    pub fn new(capacity: usize) -> Self {
        ReadStream {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Append received bytes. Grows the buffer if necessary.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// The buffered, not-yet-framed bytes.
    pub fn data(&self) -> &[u8] {
        &self.buf[..]
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume `n` bytes from the front.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.buf.len());
        self.buf.advance(n.min(self.buf.len()));
    }
}

/// Serialized size sentinel for messages that produce no bytes.
pub const EMPTY_MESSAGE_LENGTH: usize = usize::MAX;

/// A deferred-serializable outbound message.
///
/// Producers queue these on the [`WriteStream`]; the serializer asks for
/// the size first so it can pack small messages into a shared pooled
/// container and fragment large ones.
pub trait OutboundMessage: Send {
    /// Exact serialized size in bytes, or [`EMPTY_MESSAGE_LENGTH`] for a
    /// message that serializes to nothing.
    fn serialized_size(&self) -> usize;
    /// Serialize into `dst`, which is exactly `serialized_size()` long.
    fn serialize(&self, dst: &mut [u8]);
}

/// Per-port outbound queue plus the producer-visible backpressure flag.
pub struct WriteStream {
    queued: Mutex<VecDeque<Box<dyn OutboundMessage>>>,
    backpressure: AtomicBool,
}

impl WriteStream {
    pub fn new() -> Self {
        WriteStream {
            queued: Mutex::new(VecDeque::new()),
            backpressure: AtomicBool::new(false),
        }
    }

    /// Queue a message for serialization on the next service pass.
    pub fn enqueue(&self, msg: Box<dyn OutboundMessage>) {
        self.queued.lock().unwrap().push_back(msg);
    }

    /// Whether producers should hold off queuing more data.
    pub fn backpressure(&self) -> bool {
        self.backpressure.load(Ordering::Acquire)
    }

    /// Swap and own the queued messages (serializer entry point).
    pub(crate) fn swap_queued(&self) -> VecDeque<Box<dyn OutboundMessage>> {
        std::mem::take(&mut *self.queued.lock().unwrap())
    }

    /// Signal that a socket write came up short.
    pub(crate) fn check_backpressure_started(&self) {
        if !self.backpressure.swap(true, Ordering::AcqRel) {
            metrics::BACKPRESSURE_STARTED.increment();
        }
    }

    /// Clear the flag once the outbound pipeline is empty.
    pub(crate) fn check_backpressure_ended(&self) {
        self.backpressure.store(false, Ordering::Release);
    }
}

impl Default for WriteStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_stream_append_consume() {
        let mut stream = ReadStream::new(16);
        stream.append(b"hello ");
        stream.append(b"world");
        assert_eq!(stream.data(), b"hello world");
        stream.consume(6);
        assert_eq!(stream.data(), b"world");
        stream.consume(5);
        assert!(stream.is_empty());
    }

    #[test]
    fn backpressure_toggles_once() {
        let stream = WriteStream::new();
        assert!(!stream.backpressure());
        stream.check_backpressure_started();
        stream.check_backpressure_started();
        assert!(stream.backpressure());
        stream.check_backpressure_ended();
        assert!(!stream.backpressure());
    }
}
