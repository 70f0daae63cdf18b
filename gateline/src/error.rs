use std::io;

use thiserror::Error;

/// Connection-fatal pipeline errors.
///
/// Any of these terminates the connection: the I/O thread observes the
/// first error on its next service pass and schedules teardown. There is
/// no retry; a failed record fails the connection.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed TLS record header (e.g. a length field past the record
    /// maximum). Raised by the framer before any allocation happens.
    #[error("framing: {0}")]
    Framing(String),
    /// Record unwrap or wrap failed in the codec.
    #[error("crypto: {0}")]
    Crypto(#[from] CodecError),
    /// The application handler rejected a message.
    #[error("handler: {0}")]
    Handler(#[from] HandlerError),
    /// Socket write failed (closed or reset).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Invalid configuration value.
    #[error("config: {0}")]
    Config(String),
}

/// Errors returned by [`RecordDecrypter::unwrap`](crate::codec::RecordDecrypter)
/// and [`RecordEncrypter::wrap`](crate::codec::RecordEncrypter).
#[derive(Debug, Error)]
pub enum CodecError {
    /// TLS-level failure (bad MAC, malformed record, protocol violation).
    #[cfg(feature = "tls")]
    #[error("tls: {0}")]
    Tls(#[from] rustls::Error),
    /// I/O plumbing failure inside the codec.
    #[error("codec I/O: {0}")]
    Io(#[from] io::Error),
    /// Any other codec-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Error returned by [`MessageHandler::handle_message`](crate::handler::MessageHandler).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        HandlerError(msg.into())
    }
}
