//! Pipeline metrics.
//!
//! Counters for record, message, and byte flow through the four
//! gateways, plus backpressure and error events, exposed through
//! metriken. Storage is sharded by thread: each crypto worker pins a
//! shard at startup via [`set_thread_shard`], so workers never contend
//! on a line. Within a shard, counters live in cache-line lanes grouped
//! by the stage that bumps them: a worker draining the inbound stages
//! touches one line, the outbound stages another, and pool/error
//! bookkeeping a third.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

use metriken::{metric, Gauge};

const SHARDS: usize = 16;

thread_local! {
    /// Shard pinned by `set_thread_shard()`. Threads that never pin
    /// (the reactor thread, producers) write shard 0.
    static SHARD: Cell<usize> = const { Cell::new(0) };
}

/// Pin the current thread to a counter shard. Crypto workers call this
/// at startup so each writes its own lanes.
pub(crate) fn set_thread_shard(id: usize) {
    SHARD.set(id % SHARDS);
}

/// One shard of the inbound-stage counters. The decryption and read
/// gateway workers bump these together while draining a record, so
/// they share a line within the shard.
#[repr(C, align(128))]
struct InboundLane {
    frames_decrypted: AtomicU64,
    bytes_decrypted: AtomicU64,
    messages_delivered: AtomicU64,
}

impl InboundLane {
    #[allow(clippy::declare_interior_mutable_const)]
    const ZERO: InboundLane = InboundLane {
        frames_decrypted: AtomicU64::new(0),
        bytes_decrypted: AtomicU64::new(0),
        messages_delivered: AtomicU64::new(0),
    };
}

/// One shard of the outbound-stage counters, bumped by the encryption
/// and write gateway workers.
#[repr(C, align(128))]
struct OutboundLane {
    fragments_encrypted: AtomicU64,
    bytes_encrypted: AtomicU64,
    bytes_written: AtomicU64,
    short_writes: AtomicU64,
}

impl OutboundLane {
    #[allow(clippy::declare_interior_mutable_const)]
    const ZERO: OutboundLane = OutboundLane {
        fragments_encrypted: AtomicU64::new(0),
        bytes_encrypted: AtomicU64::new(0),
        bytes_written: AtomicU64::new(0),
        short_writes: AtomicU64::new(0),
    };
}

/// One shard of the cross-stage counters: pool activity, errors, and
/// producer-visible events.
#[repr(C, align(128))]
struct ControlLane {
    crypto_tasks: AtomicU64,
    pipeline_errors: AtomicU64,
    backpressure_started: AtomicU64,
    containers_acquired: AtomicU64,
}

impl ControlLane {
    #[allow(clippy::declare_interior_mutable_const)]
    const ZERO: ControlLane = ControlLane {
        crypto_tasks: AtomicU64::new(0),
        pipeline_errors: AtomicU64::new(0),
        backpressure_started: AtomicU64::new(0),
        containers_acquired: AtomicU64::new(0),
    };
}

static INBOUND: [InboundLane; SHARDS] = [InboundLane::ZERO; SHARDS];
static OUTBOUND: [OutboundLane; SHARDS] = [OutboundLane::ZERO; SHARDS];
static CONTROL: [ControlLane; SHARDS] = [ControlLane::ZERO; SHARDS];

/// Handle to one sharded counter: writes go to the calling thread's
/// shard of the owning lane, reads sum every shard. Implements
/// [`metriken::Metric`] for exposition.
pub struct Counter {
    cell: fn(usize) -> &'static AtomicU64,
}

impl Counter {
    #[inline]
    pub fn increment(&self) {
        self.add(1);
    }

    #[inline]
    pub fn add(&self, value: u64) {
        (self.cell)(SHARD.get()).fetch_add(value, Ordering::Relaxed);
    }

    /// Current value, aggregated across shards.
    pub fn value(&self) -> u64 {
        (0..SHARDS)
            .map(|shard| (self.cell)(shard).load(Ordering::Relaxed))
            .sum()
    }
}

impl metriken::Metric for Counter {
    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn value(&self) -> Option<metriken::Value<'_>> {
        Some(metriken::Value::Counter(Counter::value(self)))
    }
}

// ── Inbound stages ───────────────────────────────────────────────

#[metric(
    name = "gateline/frames/decrypted",
    description = "TLS records decrypted"
)]
pub static FRAMES_DECRYPTED: Counter = Counter {
    cell: |shard| &INBOUND[shard].frames_decrypted,
};

#[metric(name = "gateline/bytes/decrypted", description = "Plaintext bytes produced")]
pub static BYTES_DECRYPTED: Counter = Counter {
    cell: |shard| &INBOUND[shard].bytes_decrypted,
};

#[metric(
    name = "gateline/messages/delivered",
    description = "Application messages delivered to the handler"
)]
pub static MESSAGES_DELIVERED: Counter = Counter {
    cell: |shard| &INBOUND[shard].messages_delivered,
};

// ── Outbound stages ──────────────────────────────────────────────

#[metric(
    name = "gateline/fragments/encrypted",
    description = "Plaintext fragments encrypted"
)]
pub static FRAGMENTS_ENCRYPTED: Counter = Counter {
    cell: |shard| &OUTBOUND[shard].fragments_encrypted,
};

#[metric(name = "gateline/bytes/encrypted", description = "Ciphertext bytes produced")]
pub static BYTES_ENCRYPTED: Counter = Counter {
    cell: |shard| &OUTBOUND[shard].bytes_encrypted,
};

#[metric(name = "gateline/bytes/written", description = "Ciphertext bytes written to sockets")]
pub static BYTES_WRITTEN: Counter = Counter {
    cell: |shard| &OUTBOUND[shard].bytes_written,
};

#[metric(
    name = "gateline/writes/short",
    description = "Socket writes that drained only part of a ciphertext container"
)]
pub static SHORT_WRITES: Counter = Counter {
    cell: |shard| &OUTBOUND[shard].short_writes,
};

// ── Pool, errors, events ─────────────────────────────────────────

#[metric(
    name = "gateline/crypto/tasks",
    description = "Tasks executed on the crypto pool"
)]
pub static CRYPTO_TASKS: Counter = Counter {
    cell: |shard| &CONTROL[shard].crypto_tasks,
};

#[metric(
    name = "gateline/errors/pipeline",
    description = "Connection-fatal pipeline errors recorded by workers"
)]
pub static PIPELINE_ERRORS: Counter = Counter {
    cell: |shard| &CONTROL[shard].pipeline_errors,
};

#[metric(
    name = "gateline/backpressure/started",
    description = "Backpressure onsets signaled to producers"
)]
pub static BACKPRESSURE_STARTED: Counter = Counter {
    cell: |shard| &CONTROL[shard].backpressure_started,
};

#[metric(
    name = "gateline/pool/acquired",
    description = "Buffer containers acquired from the pool"
)]
pub static CONTAINERS_ACQUIRED: Counter = Counter {
    cell: |shard| &CONTROL[shard].containers_acquired,
};

#[metric(
    name = "gateline/pool/outstanding",
    description = "Buffer containers acquired and not yet released"
)]
pub static CONTAINERS_OUTSTANDING: Gauge = Gauge::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_read() {
        let before = FRAMES_DECRYPTED.value();
        FRAMES_DECRYPTED.increment();
        FRAMES_DECRYPTED.add(4);
        assert_eq!(FRAMES_DECRYPTED.value() - before, 5);
    }

    #[test]
    fn counters_in_one_lane_are_independent() {
        let delivered = MESSAGES_DELIVERED.value();
        let decrypted = BYTES_DECRYPTED.value();
        MESSAGES_DELIVERED.add(3);
        assert_eq!(MESSAGES_DELIVERED.value() - delivered, 3);
        assert_eq!(BYTES_DECRYPTED.value() - decrypted, 0);
    }

    #[test]
    fn aggregates_across_pinned_threads() {
        use std::thread;

        let before = BYTES_WRITTEN.value();
        let handles: Vec<_> = (0..4)
            .map(|shard| {
                thread::spawn(move || {
                    set_thread_shard(shard);
                    for _ in 0..500 {
                        BYTES_WRITTEN.increment();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(BYTES_WRITTEN.value() - before, 2000);
    }

    #[test]
    fn metriken_exposition() {
        use metriken::Metric;

        let before = SHORT_WRITES.value();
        SHORT_WRITES.add(2);
        match Metric::value(&SHORT_WRITES) {
            Some(metriken::Value::Counter(v)) => assert_eq!(v - before, 2),
            _ => panic!("counter did not expose a counter value"),
        }
    }
}
