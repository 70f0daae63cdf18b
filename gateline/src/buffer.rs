//! Pooled buffer containers.
//!
//! Every buffer that traverses the pipeline is a [`BufCont`]: a byte
//! buffer with a logical capacity, released exactly once. Containers
//! come from a [`BufferPool`] free list ([`acquire`](BufferPool::acquire)
//! for the shared default size, [`acquire_exact`](BufferPool::acquire_exact)
//! for exact capacity) or wrap an existing frozen buffer
//! ([`BufCont::wrap`]). The pool counts outstanding containers so tests
//! can assert the no-leak invariant.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Buf, Bytes, BytesMut};

use crate::metrics;

/// A pool of reusable byte buffers with leak accounting.
///
/// Cloning is cheap; all clones share one free list. Discarded
/// containers return their storage to the free list when it matches the
/// pool's default size, up to `max_free` retained buffers.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    free: Mutex<Vec<BytesMut>>,
    buf_size: usize,
    max_free: usize,
    outstanding: AtomicUsize,
}

impl BufferPool {
    /// Create a pool handing out `buf_size`-byte containers, retaining
    /// at most `max_free` buffers on the free list.
    pub fn new(buf_size: usize, max_free: usize) -> Self {
        BufferPool {
            shared: Arc::new(PoolShared {
                free: Mutex::new(Vec::new()),
                buf_size,
                max_free,
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Acquire a cleared container with the pool's default capacity.
    pub fn acquire(&self) -> BufCont {
        self.take(self.shared.buf_size)
    }

    /// Acquire a cleared container with exactly `n` bytes of logical
    /// capacity.
    pub fn acquire_exact(&self, n: usize) -> BufCont {
        self.take(n)
    }

    /// Number of containers acquired and not yet released.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    /// Default container capacity.
    pub fn buf_size(&self) -> usize {
        self.shared.buf_size
    }

    fn take(&self, limit: usize) -> BufCont {
        let storage = if limit <= self.shared.buf_size {
            // Free-list buffers all have at least buf_size capacity.
            self.shared.free.lock().unwrap().pop()
        } else {
            None
        };
        let buf = storage.unwrap_or_else(|| BytesMut::with_capacity(limit));
        self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
        metrics::CONTAINERS_ACQUIRED.increment();
        metrics::CONTAINERS_OUTSTANDING.increment();
        BufCont {
            payload: Payload::Owned(buf),
            limit,
            pool: Some(Arc::clone(&self.shared)),
        }
    }
}

impl PoolShared {
    fn release(&self, storage: Option<BytesMut>) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        metrics::CONTAINERS_OUTSTANDING.decrement();
        if let Some(mut buf) = storage {
            // Only default-size storage is recycled; exact-capacity
            // allocations (frame containers) just drop.
            if buf.capacity() >= self.buf_size {
                let mut free = self.free.lock().unwrap();
                if free.len() < self.max_free {
                    buf.clear();
                    free.push(buf);
                }
            }
        }
    }
}

enum Payload {
    /// Mutable storage being filled (framer, decrypt destination,
    /// serializer fast path, ciphertext).
    Owned(BytesMut),
    /// Read-only view of a heap serialization (serializer slow path).
    Frozen(Bytes),
}

/// A byte buffer container moving through the pipeline.
///
/// The filled region (`as_slice`) is the payload; `remaining_mut` is
/// unfilled logical capacity. Release with [`discard`](Self::discard);
/// dropping a container releases it too, so error paths cannot leak.
pub struct BufCont {
    payload: Payload,
    limit: usize,
    pool: Option<Arc<PoolShared>>,
}

impl BufCont {
    /// Wrap an existing frozen buffer as an unpooled container.
    /// Discard is a no-op beyond dropping the reference.
    pub fn wrap(bytes: Bytes) -> Self {
        BufCont {
            limit: bytes.len(),
            payload: Payload::Frozen(bytes),
            pool: None,
        }
    }

    /// Bytes of payload currently in the container.
    pub fn len(&self) -> usize {
        match &self.payload {
            Payload::Owned(b) => b.len(),
            Payload::Frozen(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The filled payload region.
    pub fn as_slice(&self) -> &[u8] {
        match &self.payload {
            Payload::Owned(b) => &b[..],
            Payload::Frozen(b) => &b[..],
        }
    }

    /// Unfilled logical capacity.
    pub fn remaining_mut(&self) -> usize {
        self.limit - self.len()
    }

    /// Whether the container has been filled to its logical capacity.
    pub fn is_full(&self) -> bool {
        self.remaining_mut() == 0
    }

    /// Append `src` to the payload. Must fit in `remaining_mut`.
    pub fn put_slice(&mut self, src: &[u8]) {
        debug_assert!(src.len() <= self.remaining_mut());
        match &mut self.payload {
            Payload::Owned(b) => b.extend_from_slice(src),
            Payload::Frozen(_) => panic!("put_slice on a wrapped container"),
        }
    }

    /// Consume `n` payload bytes from the front (partial socket write).
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.limit -= n;
        match &mut self.payload {
            Payload::Owned(b) => b.advance(n),
            Payload::Frozen(b) => b.advance(n),
        }
    }

    /// Release the container. Pooled storage returns to the free list.
    pub fn discard(self) {}

    /// Mutable access to owned storage, for in-crate fill paths
    /// (decrypt destination, serializer fast path).
    pub(crate) fn bytes_mut(&mut self) -> &mut BytesMut {
        match &mut self.payload {
            Payload::Owned(b) => b,
            Payload::Frozen(_) => panic!("bytes_mut on a wrapped container"),
        }
    }
}

impl std::fmt::Debug for BufCont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufCont")
            .field("len", &self.len())
            .field("limit", &self.limit)
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl Drop for BufCont {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let storage = match std::mem::replace(&mut self.payload, Payload::Frozen(Bytes::new()))
            {
                Payload::Owned(b) => Some(b),
                Payload::Frozen(_) => None,
            };
            pool.release(storage);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_discard_accounting() {
        let pool = BufferPool::new(64, 8);
        assert_eq!(pool.outstanding(), 0);
        let a = pool.acquire();
        let b = pool.acquire_exact(16);
        assert_eq!(pool.outstanding(), 2);
        a.discard();
        assert_eq!(pool.outstanding(), 1);
        drop(b); // Drop backstop releases too.
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn default_size_storage_is_recycled() {
        let pool = BufferPool::new(64, 8);
        let mut a = pool.acquire();
        a.put_slice(b"xyz");
        let ptr = a.as_slice().as_ptr();
        a.discard();
        let b = pool.acquire();
        // Recycled storage comes back cleared.
        assert_eq!(b.len(), 0);
        assert_eq!(b.as_slice().as_ptr(), ptr);
    }

    #[test]
    fn exact_oversize_not_recycled() {
        let pool = BufferPool::new(64, 8);
        let a = pool.acquire_exact(256);
        assert_eq!(a.remaining_mut(), 256);
        a.discard();
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn fill_and_advance() {
        let pool = BufferPool::new(16, 4);
        let mut c = pool.acquire_exact(8);
        c.put_slice(b"abcd");
        assert_eq!(c.remaining_mut(), 4);
        c.put_slice(b"efgh");
        assert!(c.is_full());
        c.advance(3);
        assert_eq!(c.as_slice(), b"defgh");
        assert!(c.is_full());
    }

    #[test]
    fn wrapped_container_reads_and_advances() {
        let c0 = BufCont::wrap(Bytes::from_static(b"hello world"));
        let mut c = c0;
        assert_eq!(c.len(), 11);
        assert_eq!(c.remaining_mut(), 0);
        c.advance(6);
        assert_eq!(c.as_slice(), b"world");
        c.discard();
    }
}
