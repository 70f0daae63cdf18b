use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, Weak};

use crate::buffer::BufCont;
use crate::error::Error;
use crate::gateway::{ErrorSlot, PoolHandle, PoolTask, StageQueue};
use crate::metrics;
use crate::net::{Channel, Network, PortId, WriteStream};

/// Ciphertext handed from the encryption stage to the write stage.
/// Ownership of the container transfers with it; the write gateway
/// releases it once the socket has taken every byte.
pub struct EncryptionResult {
    cont: BufCont,
    bytes_encrypted: usize,
}

impl EncryptionResult {
    pub(crate) fn new(cont: BufCont, bytes_encrypted: usize) -> Self {
        EncryptionResult {
            cont,
            bytes_encrypted,
        }
    }

    pub fn bytes_encrypted(&self) -> usize {
        self.bytes_encrypted
    }
}

/// Outcome of fully draining one ciphertext container, kept for
/// accounting observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    /// Bytes pending in the container at the start of its final write.
    pub bytes_queued: usize,
    /// Bytes the final write put on the socket.
    pub bytes_written: usize,
}

/// Last crypto-pool stage: drains ciphertext containers to the
/// non-blocking socket.
///
/// Unlike the other gateways this worker retains the FIFO head across a
/// partial write: a short count means the kernel send buffer is full,
/// and the remainder must go out first on the next run to keep the byte
/// stream in order.
pub struct WriteGateway {
    this: Weak<WriteGateway>,
    pool: PoolHandle,
    queue: StageQueue<EncryptionResult>,
    errors: ErrorSlot,
    channel: Arc<dyn Channel>,
    network: Arc<dyn Network>,
    write_stream: Arc<WriteStream>,
    port: PortId,
    completed: Mutex<VecDeque<WriteResult>>,
}

impl WriteGateway {
    pub(crate) fn new(
        channel: Arc<dyn Channel>,
        network: Arc<dyn Network>,
        write_stream: Arc<WriteStream>,
        port: PortId,
        pool: PoolHandle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| WriteGateway {
            this: this.clone(),
            pool,
            queue: StageQueue::new(),
            errors: ErrorSlot::new(),
            channel,
            network,
            write_stream,
            port,
            completed: Mutex::new(VecDeque::new()),
        })
    }

    pub(crate) fn enqueue(&self, result: EncryptionResult) {
        if self.queue.push(result) {
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

    /// Drain result of the oldest fully written container.
    pub fn take_completed(&self) -> Option<WriteResult> {
        self.completed.lock().unwrap().pop_front()
    }

    pub(crate) fn unregister(&self) {
        self.queue.clear();
    }

    fn submit(&self) {
        if let Some(task) = self.this.upgrade() {
            self.pool.submit(task);
        }
    }
}

impl PoolTask for WriteGateway {
    fn run_once(&self) {
        if let Some(mut result) = self.queue.pop() {
            let bytes_queued = result.cont.len();
            let wrote = match self.channel.write(result.cont.as_slice()) {
                Ok(n) => Ok(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
                Err(e) => Err(e),
            };
            match wrote {
                Ok(bytes_written) => {
                    result.cont.advance(bytes_written);
                    if bytes_written > 0 {
                        metrics::BYTES_WRITTEN.add(bytes_written as u64);
                        self.network.update_queued(-(bytes_written as i64), self.port);
                    }
                    if bytes_written < bytes_queued {
                        metrics::SHORT_WRITES.increment();
                        self.write_stream.check_backpressure_started();
                    }
                    if result.cont.is_empty() {
                        let EncryptionResult { cont, .. } = result;
                        cont.discard();
                        self.completed.lock().unwrap().push_back(WriteResult {
                            bytes_queued,
                            bytes_written,
                        });
                    } else {
                        // Kernel buffer full: the head stays put and the
                        // resubmitted worker retries the remainder.
                        self.queue.push_front(result);
                    }
                }
                Err(err) => {
                    let EncryptionResult { cont, .. } = result;
                    cont.discard();
                    self.errors.record(Error::Io(err));
                }
            }
        }
        if self.queue.finish_with(|| {
            self.channel.disable_write_interest();
            self.network.nudge_channel(self.port);
        }) {
            self.submit();
        }
    }
}
