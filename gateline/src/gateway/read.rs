use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;

use crate::error::Error;
use crate::gateway::{ErrorSlot, PoolHandle, PoolTask, StageQueue};
use crate::handler::MessageHandler;
use crate::metrics;
use crate::net::{Network, PortId};

/// Second crypto-pool stage: delivers decrypted message batches to the
/// application handler, keeping delivery off the I/O thread while
/// preserving frame order.
pub struct ReadGateway {
    this: Weak<ReadGateway>,
    pool: PoolHandle,
    queue: StageQueue<Vec<Bytes>>,
    errors: ErrorSlot,
    handler: Arc<dyn MessageHandler>,
    network: Arc<dyn Network>,
    port: PortId,
    /// Messages delivered per drained batch, in drain order.
    delivered: Mutex<VecDeque<usize>>,
}

impl ReadGateway {
    pub(crate) fn new(
        handler: Arc<dyn MessageHandler>,
        network: Arc<dyn Network>,
        port: PortId,
        pool: PoolHandle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| ReadGateway {
            this: this.clone(),
            pool,
            queue: StageQueue::new(),
            errors: ErrorSlot::new(),
            handler,
            network,
            port,
            delivered: Mutex::new(VecDeque::new()),
        })
    }

    /// Queue one batch of parsed messages (one decrypted record's worth).
    pub(crate) fn enqueue(&self, messages: Vec<Bytes>) {
        if self.queue.push(messages) {
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

    /// Delivered-message count of the oldest undrained batch.
    pub fn take_delivered(&self) -> Option<usize> {
        self.delivered.lock().unwrap().pop_front()
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

impl PoolTask for ReadGateway {
    fn run_once(&self) {
        if let Some(batch) = self.queue.pop() {
            let mut count = 0u64;
            let mut failure = None;
            for message in batch {
                match self.handler.handle_message(message, self.port) {
                    Ok(()) => count += 1,
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            metrics::MESSAGES_DELIVERED.add(count);
            match failure {
                None => self.delivered.lock().unwrap().push_back(count as usize),
                Some(err) => self.errors.record(Error::Handler(err)),
            }
        }
        // When the backlog is gone, nudge the reactor so the I/O thread
        // drains results and observes end-of-stream conditions.
        if self
            .queue
            .finish_with(|| self.network.nudge_channel(self.port))
        {
            self.submit();
        }
    }
}
