//! Length-prefixed application message parser.
//!
//! The cleartext stream carries messages as a 4-byte big-endian payload
//! length followed by the payload. One TLS record may contain zero, one,
//! or many messages, and a message may span records, so the parser keeps
//! carryover (a partial header and/or a partially filled body) across
//! calls. Each call fully drains the source buffer: bytes that do not
//! yet form a complete message move into the parser's carryover state,
//! which lets the caller reuse the shared destination buffer for the
//! next record.

use bytes::{Buf, Bytes, BytesMut};

/// Size of the message length prefix.
pub const MESSAGE_HEADER_LEN: usize = 4;

struct PartialMessage {
    buf: BytesMut,
    needed: usize,
}

/// Extracts length-prefixed messages from a decrypted byte stream.
pub struct MessageParser {
    header: [u8; MESSAGE_HEADER_LEN],
    header_filled: usize,
    partial: Option<PartialMessage>,
}

impl MessageParser {
    pub fn new() -> Self {
        MessageParser {
            header: [0; MESSAGE_HEADER_LEN],
            header_filled: 0,
            partial: None,
        }
    }

    /// Extract the next complete message from `src`, consuming the bytes
    /// it examines. Returns `None` once `src` holds no complete message;
    /// leftover bytes have then been moved into carryover.
    pub fn next_message(&mut self, src: &mut BytesMut) -> Option<Bytes> {
        // Finish a body carried over from previous records first.
        if let Some(partial) = &mut self.partial {
            let take = partial.needed.min(src.len());
            partial.buf.extend_from_slice(&src[..take]);
            src.advance(take);
            partial.needed -= take;
            if partial.needed > 0 {
                return None;
            }
            let done = self.partial.take();
            return done.map(|p| p.buf.freeze());
        }

        if self.header_filled < MESSAGE_HEADER_LEN {
            let take = (MESSAGE_HEADER_LEN - self.header_filled).min(src.len());
            self.header[self.header_filled..self.header_filled + take]
                .copy_from_slice(&src[..take]);
            src.advance(take);
            self.header_filled += take;
            if self.header_filled < MESSAGE_HEADER_LEN {
                return None;
            }
        }

        let len = u32::from_be_bytes(self.header) as usize;
        if src.len() >= len {
            self.header_filled = 0;
            return Some(src.split_to(len).freeze());
        }

        // Body incomplete: start carryover with whatever arrived.
        let mut buf = BytesMut::with_capacity(len);
        buf.extend_from_slice(&src[..]);
        let needed = len - src.len();
        src.advance(src.len());
        self.header_filled = 0;
        self.partial = Some(PartialMessage { buf, needed });
        None
    }

    /// Whether the parser holds a partial header or body.
    pub fn has_carryover(&self) -> bool {
        self.header_filled > 0 || self.partial.is_some()
    }
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new()
    }
}
