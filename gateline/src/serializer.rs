//! Outbound message serialization.
//!
//! Runs inline on the I/O thread each service pass. Small messages are
//! packed back to back into one shared pooled container (no garbage,
//! one encrypt call for the lot); a message that doesn't fit flushes
//! the shared container and is serialized to its own heap buffer, then
//! emitted as wrapped fragments no larger than the port's fragment
//! bound, since the codec encrypts at most 2^14 plaintext bytes per
//! record.

use std::sync::Arc;

use bytes::Bytes;

use crate::buffer::{BufCont, BufferPool};
use crate::gateway::EncryptionGateway;
use crate::net::{OutboundMessage, WriteStream, EMPTY_MESSAGE_LENGTH};

pub(crate) struct Serializer {
    /// Largest fragment handed to the encrypter in one call.
    app_buffer_size: usize,
}

impl Serializer {
    pub(crate) fn new(app_buffer_size: usize) -> Self {
        Serializer { app_buffer_size }
    }

    /// Swap and own the outbound queue, serialize everything on it, and
    /// feed the encryption gateway. Returns true when there was queued
    /// work, so the caller can request another reactor pass.
    pub(crate) fn build_encryption_tasks(
        &self,
        stream: &WriteStream,
        pool: &BufferPool,
        encryption: &Arc<EncryptionGateway>,
    ) -> bool {
        let mut queued = stream.swap_queued();
        if queued.is_empty() {
            return false;
        }

        let mut out: Option<BufCont> = None;
        while let Some(message) = queued.pop_front() {
            let size = message.serialized_size();
            if size == EMPTY_MESSAGE_LENGTH {
                continue;
            }

            let mut cont = match out.take() {
                Some(cont) => cont,
                None => pool.acquire(),
            };

            // Fast path: serialize straight into the shared container.
            if size <= cont.remaining_mut() {
                serialize_into(&mut cont, message.as_ref(), size);
                out = Some(cont);
                continue;
            }

            // Flush what the shared container already holds.
            if !cont.is_empty() {
                encryption.enqueue(cont);
            } else {
                cont.discard();
            }

            // Slow path: own heap buffer, emitted as bounded fragments.
            let mut heap = vec![0u8; size];
            message.serialize(&mut heap);
            let bytes = Bytes::from(heap);
            let mut offset = 0;
            while offset < bytes.len() {
                let end = (offset + self.app_buffer_size).min(bytes.len());
                encryption.enqueue(BufCont::wrap(bytes.slice(offset..end)));
                offset = end;
            }
        }

        if let Some(cont) = out {
            if !cont.is_empty() {
                encryption.enqueue(cont);
            } else {
                cont.discard();
            }
        }
        true
    }
}

fn serialize_into(cont: &mut BufCont, message: &dyn OutboundMessage, size: usize) {
    let buf = cont.bytes_mut();
    let start = buf.len();
    buf.resize(start + size, 0);
    message.serialize(&mut buf[start..start + size]);
}
