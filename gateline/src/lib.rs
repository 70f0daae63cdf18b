//! gateline — staged TLS record pipeline for reactor-driven connections.
//!
//! A [`TlsPort`] sits between a non-blocking socket and an application
//! message handler. Inbound, the I/O thread reframes the TLS record
//! stream and hands complete records to a shared crypto pool, where they
//! are decrypted, reassembled into length-prefixed messages, and
//! delivered to the handler. Outbound, queued messages are serialized
//! into pooled buffers on the I/O thread, then encrypted and written to
//! the socket on the pool. Every stage is a single-flight FIFO gateway,
//! so per-connection order is total while no connection can monopolize
//! the pool or block another.
//!
//! The reactor, the socket, and the handler are reached through the
//! [`Network`], [`Channel`], and [`MessageHandler`] traits. The
//! production record codec is backed by rustls (feature `tls`, on by
//! default); any codec implementing [`RecordDecrypter`] and
//! [`RecordEncrypter`] plugs in the same way.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gateline::{BufferPool, Config, CryptoPool, PortId, TlsPort};
//! # fn wire(
//! #     network: Arc<dyn gateline::Network>,
//! #     channel: Arc<dyn gateline::Channel>,
//! #     handler: Arc<dyn gateline::MessageHandler>,
//! #     decrypter: Box<dyn gateline::RecordDecrypter>,
//! #     encrypter: Box<dyn gateline::RecordEncrypter>,
//! # ) -> Result<(), gateline::Error> {
//! let config = Config::default();
//! let crypto = CryptoPool::new(config.crypto_threads);
//! let pool = BufferPool::new(config.pool_buffer_size, config.pool_buffer_count);
//!
//! let mut port = TlsPort::new(
//!     PortId(0),
//!     network,
//!     channel,
//!     handler,
//!     decrypter,
//!     encrypter,
//!     pool,
//!     crypto.handle(),
//!     &config,
//! );
//!
//! // The reactor drives the port whenever the socket is readable or
//! // the port has been nudged:
//! port.set_running();
//! port.run()?;
//! # Ok(())
//! # }
//! ```

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod metrics;
pub(crate) mod serializer;

// ── Public modules ──────────────────────────────────────────────────────
pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod gateway;
pub mod handler;
pub mod net;
pub mod parser;
pub mod port;

// ── Re-exports: Core types ──────────────────────────────────────────────

/// A per-connection TLS pipeline bound to one socket.
pub use port::TlsPort;
/// Shared pool of crypto worker threads.
pub use gateway::CryptoPool;
/// Cheaply cloneable submission handle to the crypto pool.
pub use gateway::PoolHandle;
/// Outcome of fully draining one ciphertext container.
pub use gateway::WriteResult;

// ── Re-exports: Buffers ─────────────────────────────────────────────────

/// A byte buffer container moving through the pipeline.
pub use buffer::BufCont;
/// Pool of reusable byte buffers with leak accounting.
pub use buffer::BufferPool;

// ── Re-exports: Contracts ───────────────────────────────────────────────

/// Contract of the registered non-blocking socket.
pub use net::Channel;
/// Contract of the socket multiplexer.
pub use net::Network;
/// A deferred-serializable outbound message.
pub use net::OutboundMessage;
/// Opaque per-connection handle used in reactor callbacks.
pub use net::PortId;
/// Per-port outbound queue plus the backpressure flag.
pub use net::WriteStream;
/// Serialized size sentinel for messages that produce no bytes.
pub use net::EMPTY_MESSAGE_LENGTH;
/// Contract of the application message handler.
pub use handler::MessageHandler;
/// Decrypt half of the TLS codec contract.
pub use codec::RecordDecrypter;
/// Encrypt half of the TLS codec contract.
pub use codec::RecordEncrypter;

// ── Re-exports: Configuration and errors ────────────────────────────────

/// Configuration for a port's pipeline resources.
pub use config::Config;
/// Builder for [`Config`] with `build()` validation.
pub use config::ConfigBuilder;
/// Largest plaintext fragment handed to `wrap` in one call.
pub use config::MAX_FRAGMENT;
/// Connection-fatal pipeline errors.
pub use error::Error;
/// Errors returned by the record codec.
pub use error::CodecError;
/// Error returned by the application handler.
pub use error::HandlerError;

// ── Re-exports: Wire format ─────────────────────────────────────────────

/// Largest payload a TLS record header may declare.
pub use frame::MAX_RECORD_PAYLOAD;
/// Size of a TLS record header.
pub use frame::TLS_HEADER_LEN;
/// Extracts length-prefixed messages from a decrypted byte stream.
pub use parser::MessageParser;
/// Size of the message length prefix.
pub use parser::MESSAGE_HEADER_LEN;

// ── Re-exports: TLS (feature-gated) ─────────────────────────────────────

/// Split a post-handshake rustls session into codec halves.
#[cfg(feature = "tls")]
pub use codec::split_session;
/// rustls-backed decrypt half.
#[cfg(feature = "tls")]
pub use codec::TlsDecrypter;
/// rustls-backed encrypt half.
#[cfg(feature = "tls")]
pub use codec::TlsEncrypter;
/// TLS session kind — server (inbound) or client (outbound).
#[cfg(feature = "tls")]
pub use codec::TlsSession;
