//! Record codec contract and the rustls production binding.
//!
//! The pipeline never talks to a TLS library directly; it drives the two
//! halves of the codec contract. `unwrap` consumes exactly one TLS
//! record and appends the cleartext to a destination buffer; `wrap`
//! encrypts one plaintext fragment into a pooled ciphertext container.
//! Single-flight scheduling guarantees at most one caller per half at
//! any instant.
//!
//! The rustls binding (feature `tls`) adapts a post-handshake
//! server or client connection. rustls keeps read and write state on one
//! object, so the two halves share it behind a lock; the lock is
//! uncontended except when one connection encrypts and decrypts at the
//! same instant.

use bytes::BytesMut;

use crate::buffer::BufCont;
use crate::error::CodecError;

/// Decrypt half of the TLS codec contract.
pub trait RecordDecrypter: Send {
    /// Consume one complete TLS record and append its plaintext to
    /// `dst`. The codec may buffer handshake-level output internally.
    fn unwrap(&mut self, record: &[u8], dst: &mut BytesMut) -> Result<(), CodecError>;
}

/// Encrypt half of the TLS codec contract.
pub trait RecordEncrypter: Send {
    /// Encrypt one plaintext fragment of at most
    /// [`MAX_FRAGMENT`](crate::config::MAX_FRAGMENT) bytes, returning a
    /// pooled ciphertext container.
    fn wrap(&mut self, fragment: &[u8]) -> Result<BufCont, CodecError>;
}

#[cfg(feature = "tls")]
pub use tls::{split_session, TlsDecrypter, TlsEncrypter, TlsSession};

#[cfg(feature = "tls")]
mod tls {
    use std::io::{self, Read as _, Write as _};
    use std::sync::{Arc, Mutex};

    use bytes::BytesMut;
    use rustls::{ClientConnection, ServerConnection};

    use crate::buffer::{BufCont, BufferPool};
    use crate::error::CodecError;

    /// TLS session kind — server (inbound) or client (outbound).
    pub enum TlsSession {
        Server(ServerConnection),
        Client(ClientConnection),
    }

    impl TlsSession {
        fn read_tls(&mut self, rd: &mut dyn io::Read) -> io::Result<usize> {
            match self {
                TlsSession::Server(c) => c.read_tls(rd),
                TlsSession::Client(c) => c.read_tls(rd),
            }
        }

        fn write_tls(&mut self, wr: &mut dyn io::Write) -> io::Result<usize> {
            match self {
                TlsSession::Server(c) => c.write_tls(wr),
                TlsSession::Client(c) => c.write_tls(wr),
            }
        }

        fn process_new_packets(&mut self) -> Result<rustls::IoState, rustls::Error> {
            match self {
                TlsSession::Server(c) => c.process_new_packets(),
                TlsSession::Client(c) => c.process_new_packets(),
            }
        }

        fn reader(&mut self) -> rustls::Reader<'_> {
            match self {
                TlsSession::Server(c) => c.reader(),
                TlsSession::Client(c) => c.reader(),
            }
        }

        fn writer(&mut self) -> rustls::Writer<'_> {
            match self {
                TlsSession::Server(c) => c.writer(),
                TlsSession::Client(c) => c.writer(),
            }
        }

        fn wants_write(&self) -> bool {
            match self {
                TlsSession::Server(c) => c.wants_write(),
                TlsSession::Client(c) => c.wants_write(),
            }
        }
    }

    impl From<ServerConnection> for TlsSession {
        fn from(c: ServerConnection) -> Self {
            TlsSession::Server(c)
        }
    }

    impl From<ClientConnection> for TlsSession {
        fn from(c: ClientConnection) -> Self {
            TlsSession::Client(c)
        }
    }

    /// Split a post-handshake session into the two codec halves the
    /// pipeline drives independently.
    pub fn split_session(
        session: impl Into<TlsSession>,
        pool: BufferPool,
    ) -> (TlsDecrypter, TlsEncrypter) {
        let session = Arc::new(Mutex::new(session.into()));
        (
            TlsDecrypter {
                session: Arc::clone(&session),
                scratch: vec![0u8; 16384],
            },
            TlsEncrypter {
                session,
                pool,
                write_buf: Vec::new(),
            },
        )
    }

    /// rustls-backed decrypt half.
    pub struct TlsDecrypter {
        session: Arc<Mutex<TlsSession>>,
        scratch: Vec<u8>,
    }

    impl super::RecordDecrypter for TlsDecrypter {
        fn unwrap(&mut self, record: &[u8], dst: &mut BytesMut) -> Result<(), CodecError> {
            let mut session = self.session.lock().unwrap();

            let mut cursor = io::Cursor::new(record);
            while (cursor.position() as usize) < record.len() {
                if session.read_tls(&mut cursor)? == 0 {
                    return Err(CodecError::Other(
                        "codec refused record bytes without consuming them".into(),
                    ));
                }
            }

            let state = session.process_new_packets()?;
            if state.plaintext_bytes_to_read() == 0 {
                return Ok(());
            }

            let mut reader = session.reader();
            loop {
                match reader.read(self.scratch.as_mut_slice()) {
                    Ok(0) => break,
                    Ok(n) => dst.extend_from_slice(&self.scratch[..n]),
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(CodecError::Io(e)),
                }
            }
            Ok(())
        }
    }

    /// rustls-backed encrypt half.
    pub struct TlsEncrypter {
        session: Arc<Mutex<TlsSession>>,
        pool: BufferPool,
        /// Ciphertext scratch; reused across records.
        write_buf: Vec<u8>,
    }

    impl super::RecordEncrypter for TlsEncrypter {
        fn wrap(&mut self, fragment: &[u8]) -> Result<BufCont, CodecError> {
            debug_assert!(fragment.len() <= crate::config::MAX_FRAGMENT);
            let mut session = self.session.lock().unwrap();

            session.writer().write_all(fragment)?;

            self.write_buf.clear();
            while session.wants_write() {
                session.write_tls(&mut self.write_buf)?;
            }

            let mut cont = self.pool.acquire_exact(self.write_buf.len());
            cont.put_slice(&self.write_buf);
            Ok(cont)
        }
    }
}
