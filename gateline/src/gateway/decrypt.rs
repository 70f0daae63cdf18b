use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;

use crate::buffer::BufCont;
use crate::codec::RecordDecrypter;
use crate::error::Error;
use crate::frame::TLS_HEADER_LEN;
use crate::gateway::{ErrorSlot, PoolHandle, PoolTask, ReadGateway, StageQueue};
use crate::metrics;
use crate::parser::MessageParser;

/// First crypto-pool stage: unwraps TLS records into the port's
/// persistent destination buffer and parses out complete application
/// messages, forwarding each batch to the [`ReadGateway`].
pub struct DecryptionGateway {
    this: Weak<DecryptionGateway>,
    pool: PoolHandle,
    queue: StageQueue<BufCont>,
    errors: ErrorSlot,
    state: Mutex<DecryptState>,
    read_gateway: Arc<ReadGateway>,
}

/// Decrypter, parser, and destination buffer move together: the worker
/// holds all three for the duration of one record, and the parser's
/// cross-record carryover lives in the destination buffer's lifetime.
struct DecryptState {
    decrypter: Box<dyn RecordDecrypter>,
    parser: MessageParser,
    /// Sized to one TLS packet; `None` once the port unregisters.
    dst: Option<BufCont>,
}

impl DecryptionGateway {
    pub(crate) fn new(
        decrypter: Box<dyn RecordDecrypter>,
        dst: BufCont,
        read_gateway: Arc<ReadGateway>,
        pool: PoolHandle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| DecryptionGateway {
            this: this.clone(),
            pool,
            queue: StageQueue::new(),
            errors: ErrorSlot::new(),
            state: Mutex::new(DecryptState {
                decrypter,
                parser: MessageParser::new(),
                dst: Some(dst),
            }),
            read_gateway,
        })
    }

    /// Queue one complete TLS frame for decryption. Frames with an
    /// empty payload are dropped silently.
    pub fn enqueue(&self, frame: BufCont) {
        if frame.len() <= TLS_HEADER_LEN {
            frame.discard();
            return;
        }
        if self.queue.push(frame) {
            self.submit();
        }
    }

    /// First worker error since the last poll, if any.
    pub fn poll_error(&self) -> Option<Error> {
        self.errors.take()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Teardown: release the destination buffer and drop queued frames.
    /// An in-flight worker finishes its current record; its output is
    /// dropped by the reactor.
    pub(crate) fn unregister(&self) {
        self.queue.clear();
        if let Some(dst) = self.state.lock().unwrap().dst.take() {
            dst.discard();
        }
    }

    fn submit(&self) {
        if let Some(task) = self.this.upgrade() {
            self.pool.submit(task);
        }
    }

    fn process(&self, frame: &BufCont, messages: &mut Vec<Bytes>) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let DecryptState {
            decrypter,
            parser,
            dst,
        } = &mut *state;
        let Some(dst) = dst.as_mut() else {
            // Port unregistered mid-flight; the record's output would be
            // dropped anyway.
            return Ok(());
        };

        let buf = dst.bytes_mut();
        decrypter.unwrap(frame.as_slice(), buf)?;
        metrics::BYTES_DECRYPTED.add(buf.len() as u64);

        while let Some(message) = parser.next_message(buf) {
            messages.push(message);
        }
        buf.clear();
        Ok(())
    }
}

impl PoolTask for DecryptionGateway {
    fn run_once(&self) {
        if let Some(frame) = self.queue.pop() {
            let mut messages = Vec::new();
            let result = self.process(&frame, &mut messages);
            frame.discard();
            match result {
                Ok(()) => {
                    metrics::FRAMES_DECRYPTED.increment();
                    self.read_gateway.enqueue(messages);
                }
                Err(err) => self.errors.record(err),
            }
        }
        if self.queue.finish_with(|| {}) {
            self.submit();
        }
    }
}
