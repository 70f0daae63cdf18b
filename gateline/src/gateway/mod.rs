//! Single-flight gateways and the shared crypto pool.
//!
//! A gateway is a FIFO work queue bound to one pipeline stage. Producers
//! append under the queue mutex; whichever producer performs the 0→1
//! transition of the in-flight flag submits exactly one worker task to
//! the crypto pool. The worker drains one item, then, under the same
//! mutex producers publish through, either resubmits itself or clears
//! the flag. The two rules together make lost wakeups impossible and
//! keep at most one worker per gateway runnable at any instant, which is
//! what preserves per-connection FIFO order without per-record locking.

mod decrypt;
mod encrypt;
mod read;
mod write;

pub use decrypt::DecryptionGateway;
pub use encrypt::EncryptionGateway;
pub use read::ReadGateway;
pub use write::{EncryptionResult, WriteGateway, WriteResult};

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::error::Error;
use crate::metrics;

/// A reusable unit of gateway work. Each gateway is its own descriptor:
/// single-flight guarantees a descriptor is never in the pool twice, so
/// resubmission is an `Arc` clone rather than a fresh closure.
pub trait PoolTask: Send + Sync {
    /// Drain at most one queued item, then resubmit or go idle.
    fn run_once(&self);
}

enum PoolJob {
    Run(Arc<dyn PoolTask>),
    Shutdown,
}

/// Cheaply cloneable submission handle to the crypto pool.
#[derive(Clone)]
pub struct PoolHandle {
    tx: Sender<PoolJob>,
}

impl PoolHandle {
    /// Submit one task. A disconnected pool means shutdown is underway;
    /// the task is dropped, as its port is being torn down anyway.
    pub fn submit(&self, task: Arc<dyn PoolTask>) {
        let _ = self.tx.send(PoolJob::Run(task));
    }
}

/// Shared pool of crypto worker threads, used by every TLS port's
/// decryption, read, encryption, and write gateways.
pub struct CryptoPool {
    handle: PoolHandle,
    workers: Vec<thread::JoinHandle<()>>,
}

impl CryptoPool {
    /// Launch `threads` workers (0 = number of CPUs).
    pub fn new(threads: usize) -> CryptoPool {
        let threads = if threads == 0 {
            thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        } else {
            threads
        };
        let (tx, rx) = crossbeam_channel::unbounded();
        let workers = (0..threads)
            .map(|i| {
                let rx: Receiver<PoolJob> = rx.clone();
                thread::Builder::new()
                    .name(format!("gateline-crypto-{i}"))
                    .spawn(move || {
                        metrics::set_thread_shard(i + 1);
                        while let Ok(job) = rx.recv() {
                            match job {
                                PoolJob::Run(task) => {
                                    metrics::CRYPTO_TASKS.increment();
                                    task.run_once();
                                }
                                PoolJob::Shutdown => break,
                            }
                        }
                    })
                    .expect("failed to spawn crypto worker")
            })
            .collect();
        CryptoPool {
            handle: PoolHandle { tx },
            workers,
        }
    }

    /// Submission handle for wiring into ports.
    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// Stop all workers after they finish their current task. Queued
    /// tasks ahead of the shutdown markers still run.
    pub fn shutdown(self) {
        for _ in &self.workers {
            let _ = self.handle.tx.send(PoolJob::Shutdown);
        }
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

/// Holds the first connection-fatal error a gateway worker hits, for
/// the I/O thread to pick up on its next service pass.
pub(crate) struct ErrorSlot {
    first: Mutex<Option<Error>>,
}

impl ErrorSlot {
    pub(crate) fn new() -> Self {
        ErrorSlot {
            first: Mutex::new(None),
        }
    }

    /// Record an error; later errors on the same gateway are dropped
    /// (the connection dies on the first one).
    pub(crate) fn record(&self, err: Error) {
        metrics::PIPELINE_ERRORS.increment();
        let mut slot = self.first.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub(crate) fn take(&self) -> Option<Error> {
        self.first.lock().unwrap().take()
    }
}

/// The single-flight FIFO at the core of every gateway.
pub(crate) struct StageQueue<T> {
    q: Mutex<VecDeque<T>>,
    in_flight: AtomicBool,
}

impl<T> StageQueue<T> {
    pub(crate) fn new() -> Self {
        StageQueue {
            q: Mutex::new(VecDeque::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Append an item. Returns true when the caller performed the 0→1
    /// flag transition and must submit the gateway's task. The flag is
    /// claimed under the same mutex the item is published through.
    pub(crate) fn push(&self, item: T) -> bool {
        let mut q = self.q.lock().unwrap();
        q.push_back(item);
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn pop(&self) -> Option<T> {
        self.q.lock().unwrap().pop_front()
    }

    /// Return a partially processed item to the head (write gateway
    /// retry after a short write).
    pub(crate) fn push_front(&self, item: T) {
        self.q.lock().unwrap().push_front(item);
    }

    /// Worker epilogue. Under the mutex: if more work is queued, keep
    /// the flag and return true (resubmit); otherwise run `on_idle`,
    /// clear the flag, and return false.
    pub(crate) fn finish_with(&self, on_idle: impl FnOnce()) -> bool {
        let q = self.q.lock().unwrap();
        if q.is_empty() {
            on_idle();
            self.in_flight.store(false, Ordering::Release);
            false
        } else {
            true
        }
    }

    /// Empty means no queued items and no worker mid-item.
    pub(crate) fn is_empty(&self) -> bool {
        !self.in_flight.load(Ordering::Acquire) && self.q.lock().unwrap().is_empty()
    }

    /// Drop all queued items (teardown; containers release on drop).
    pub(crate) fn clear(&self) {
        self.q.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_push_claims_the_flag() {
        let q: StageQueue<u32> = StageQueue::new();
        assert!(q.push(1), "first producer schedules the worker");
        assert!(!q.push(2), "flag already claimed");
        assert!(!q.is_empty());
    }

    #[test]
    fn finish_resubmits_while_backlogged() {
        let q: StageQueue<u32> = StageQueue::new();
        q.push(1);
        q.push(2);
        assert_eq!(q.pop(), Some(1));
        assert!(q.finish_with(|| panic!("not idle")));
        assert_eq!(q.pop(), Some(2));
        let mut idled = false;
        assert!(!q.finish_with(|| idled = true));
        assert!(idled);
        assert!(q.is_empty());
    }

    #[test]
    fn push_after_clear_reclaims_flag() {
        let q: StageQueue<u32> = StageQueue::new();
        q.push(1);
        q.pop();
        q.finish_with(|| {});
        assert!(q.push(2), "flag was released, producer claims again");
    }

    #[test]
    fn push_front_preserves_head() {
        let q: StageQueue<u32> = StageQueue::new();
        q.push(1);
        q.push(2);
        let head = q.pop().unwrap();
        q.push_front(head);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
    }

    #[test]
    fn error_slot_keeps_first() {
        let slot = ErrorSlot::new();
        slot.record(Error::Framing("first".into()));
        slot.record(Error::Framing("second".into()));
        match slot.take() {
            Some(Error::Framing(msg)) => assert_eq!(msg, "first"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(slot.take().is_none());
    }

    #[test]
    fn pool_runs_submitted_tasks() {
        use std::sync::atomic::AtomicUsize;

        struct Probe {
            runs: AtomicUsize,
        }
        impl PoolTask for Probe {
            fn run_once(&self) {
                self.runs.fetch_add(1, Ordering::AcqRel);
            }
        }

        let pool = CryptoPool::new(2);
        let probe = Arc::new(Probe {
            runs: AtomicUsize::new(0),
        });
        for _ in 0..8 {
            pool.handle().submit(Arc::clone(&probe) as Arc<dyn PoolTask>);
        }
        pool.shutdown();
        assert_eq!(probe.runs.load(Ordering::Acquire), 8);
    }
}
