use std::sync::{Arc, Mutex, Weak};

use crate::buffer::BufCont;
use crate::codec::RecordEncrypter;
use crate::error::Error;
use crate::gateway::{
    EncryptionResult, ErrorSlot, PoolHandle, PoolTask, StageQueue, WriteGateway,
};
use crate::metrics;
use crate::net::{Network, PortId};

/// Third crypto-pool stage: wraps serialized plaintext fragments into
/// ciphertext containers and forwards them to the [`WriteGateway`],
/// charging the connection's queued-bytes accounting as ciphertext
/// enters the write path.
pub struct EncryptionGateway {
    this: Weak<EncryptionGateway>,
    pool: PoolHandle,
    queue: StageQueue<BufCont>,
    errors: ErrorSlot,
    encrypter: Mutex<Box<dyn RecordEncrypter>>,
    write_gateway: Arc<WriteGateway>,
    network: Arc<dyn Network>,
    port: PortId,
}

impl EncryptionGateway {
    pub(crate) fn new(
        encrypter: Box<dyn RecordEncrypter>,
        write_gateway: Arc<WriteGateway>,
        network: Arc<dyn Network>,
        port: PortId,
        pool: PoolHandle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| EncryptionGateway {
            this: this.clone(),
            pool,
            queue: StageQueue::new(),
            errors: ErrorSlot::new(),
            encrypter: Mutex::new(encrypter),
            write_gateway,
            network,
            port,
        })
    }

    /// Queue one plaintext fragment (at most the port's fragment bound).
    pub(crate) fn enqueue(&self, fragment: BufCont) {
        if self.queue.push(fragment) {
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

    pub(crate) fn unregister(&self) {
        self.queue.clear();
    }

    fn submit(&self) {
        if let Some(task) = self.this.upgrade() {
            self.pool.submit(task);
        }
    }
}

impl PoolTask for EncryptionGateway {
    fn run_once(&self) {
        if let Some(fragment) = self.queue.pop() {
            let result = self.encrypter.lock().unwrap().wrap(fragment.as_slice());
            fragment.discard();
            match result {
                Ok(ciphertext) => {
                    let bytes_encrypted = ciphertext.len();
                    metrics::FRAGMENTS_ENCRYPTED.increment();
                    metrics::BYTES_ENCRYPTED.add(bytes_encrypted as u64);
                    self.network.update_queued(bytes_encrypted as i64, self.port);
                    self.write_gateway
                        .enqueue(EncryptionResult::new(ciphertext, bytes_encrypted));
                }
                Err(err) => self.errors.record(Error::Crypto(err)),
            }
        }
        if self.queue.finish_with(|| {}) {
            self.submit();
        }
    }
}
