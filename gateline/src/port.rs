//! The TLS port: one connection's staged pipeline.
//!
//! The reactor invokes [`TlsPort::run`] whenever the socket is readable
//! or the port has been nudged. `run()` performs a bounded socket read,
//! reframes and queues decryption work, serializes and queues
//! encryption work, and returns; it never blocks on crypto. Everything
//! heavier happens on the crypto pool, stage by stage, in strict
//! per-connection FIFO order.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::buffer::BufferPool;
use crate::codec::{RecordDecrypter, RecordEncrypter};
use crate::config::{Config, MAX_FRAGMENT};
use crate::error::Error;
use crate::frame::Framer;
use crate::gateway::{
    DecryptionGateway, EncryptionGateway, PoolHandle, ReadGateway, WriteGateway, WriteResult,
};
use crate::handler::MessageHandler;
use crate::net::{Channel, Network, OutboundMessage, PortId, ReadStream, WriteStream};
use crate::serializer::Serializer;

/// A per-connection TLS pipeline between a non-blocking socket and an
/// application message handler.
pub struct TlsPort {
    id: PortId,
    network: Arc<dyn Network>,
    channel: Arc<dyn Channel>,
    handler: Arc<dyn MessageHandler>,
    pool: BufferPool,
    read_stream: ReadStream,
    read_scratch: Vec<u8>,
    write_stream: Arc<WriteStream>,
    framer: Framer,
    serializer: Serializer,
    decryption: Arc<DecryptionGateway>,
    read: Arc<ReadGateway>,
    encryption: Arc<EncryptionGateway>,
    write: Arc<WriteGateway>,
    running: AtomicBool,
}

impl TlsPort {
    /// Build a port over a completed TLS session. `decrypter` and
    /// `encrypter` are the session's two codec halves; `crypto` is the
    /// shared pool every port's gateways submit to.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: PortId,
        network: Arc<dyn Network>,
        channel: Arc<dyn Channel>,
        handler: Arc<dyn MessageHandler>,
        decrypter: Box<dyn RecordDecrypter>,
        encrypter: Box<dyn RecordEncrypter>,
        pool: BufferPool,
        crypto: PoolHandle,
        config: &Config,
    ) -> TlsPort {
        // The session may report a larger application buffer, but the
        // codec never encrypts more than 2^14 bytes per record, so cap
        // fragments there.
        let app_buffer_size = config.app_buffer_size.min(MAX_FRAGMENT);

        let write_stream = Arc::new(WriteStream::new());
        let write = WriteGateway::new(
            Arc::clone(&channel),
            Arc::clone(&network),
            Arc::clone(&write_stream),
            id,
            crypto.clone(),
        );
        let encryption = EncryptionGateway::new(
            encrypter,
            Arc::clone(&write),
            Arc::clone(&network),
            id,
            crypto.clone(),
        );
        let read = ReadGateway::new(
            Arc::clone(&handler),
            Arc::clone(&network),
            id,
            crypto.clone(),
        );
        let dst = pool.acquire_exact(config.packet_buffer_size);
        let decryption = DecryptionGateway::new(decrypter, dst, Arc::clone(&read), crypto);

        TlsPort {
            id,
            network,
            channel,
            handler,
            pool,
            read_stream: ReadStream::new(config.read_chunk_size),
            read_scratch: vec![0u8; config.read_chunk_size],
            write_stream,
            framer: Framer::new(),
            serializer: Serializer::new(app_buffer_size),
            decryption,
            read,
            encryption,
            write,
            running: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    /// The outbound queue producers write to.
    pub fn write_stream(&self) -> &Arc<WriteStream> {
        &self.write_stream
    }

    /// Queue an outbound message for the next service pass.
    pub fn queue_message(&self, message: Box<dyn OutboundMessage>) {
        self.write_stream.enqueue(message);
    }

    /// Marked by the reactor before dispatching `run()`; the reactor
    /// guarantees at most one concurrent `run()` per port.
    pub fn set_running(&self) {
        self.running.store(true, Ordering::Release);
    }

    /// One service pass. On error the connection must be torn down; no
    /// retry is attempted.
    pub fn run(&mut self) -> Result<(), Error> {
        debug_assert!(self.running.load(Ordering::Acquire));
        let result = self.service();
        // Producers may resume once the outbound pipeline has drained.
        if self.encryption.is_empty() && self.write.is_empty() {
            self.write_stream.check_backpressure_ended();
        }
        self.running.store(false, Ordering::Release);
        result
    }

    fn service(&mut self) -> Result<(), Error> {
        self.poll_errors()?;

        let mut bytes_read = 0;
        let max_read = self.handler.max_read();
        if max_read > 0 {
            bytes_read = self.fill_read_stream(max_read)?;
        }
        if bytes_read > 0 {
            self.queue_decryption_tasks()?;
        }

        let responses_ready =
            self.serializer
                .build_encryption_tasks(&self.write_stream, &self.pool, &self.encryption);

        if bytes_read > 0 || responses_ready {
            self.network.nudge_channel(self.id);
        }
        Ok(())
    }

    /// Surface the first worker error recorded since the last pass, in
    /// pipeline order.
    fn poll_errors(&self) -> Result<(), Error> {
        if let Some(err) = self.decryption.poll_error() {
            return Err(err);
        }
        if let Some(err) = self.read.poll_error() {
            return Err(err);
        }
        if let Some(err) = self.encryption.poll_error() {
            return Err(err);
        }
        if let Some(err) = self.write.poll_error() {
            return Err(err);
        }
        Ok(())
    }

    /// Bounded, non-blocking socket read into the read stream.
    fn fill_read_stream(&mut self, limit: usize) -> Result<usize, Error> {
        let mut total = 0;
        while total < limit {
            let want = (limit - total).min(self.read_scratch.len());
            match self.channel.read(&mut self.read_scratch[..want]) {
                Ok(0) => break,
                Ok(n) => {
                    self.read_stream.append(&self.read_scratch[..n]);
                    total += n;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(total)
    }

    /// Drain the read stream into complete TLS frames and queue each
    /// for decryption.
    fn queue_decryption_tasks(&mut self) -> Result<(), Error> {
        while let Some(frame) = self.framer.next_frame(&mut self.read_stream, &self.pool)? {
            self.decryption.enqueue(frame);
        }
        Ok(())
    }

    /// Whether every stage has drained.
    pub fn gateways_empty(&self) -> bool {
        self.decryption.is_empty()
            && self.read.is_empty()
            && self.encryption.is_empty()
            && self.write.is_empty()
    }

    /// Delivered-message count of the oldest undrained inbound batch.
    pub fn take_delivered(&self) -> Option<usize> {
        self.read.take_delivered()
    }

    /// Drain result of the oldest fully written ciphertext container.
    pub fn take_write_result(&self) -> Option<WriteResult> {
        self.write.take_completed()
    }

    /// Reactor unregistration hook: releases the decrypt destination
    /// buffer and drops queued work. In-flight pool tasks finish on
    /// their own; their output is dropped.
    pub fn unregistered(&self) {
        self.decryption.unregister();
        self.read.unregister();
        self.encryption.unregister();
        self.write.unregister();
    }
}
