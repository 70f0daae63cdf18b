//! TLS record framing.
//!
//! The framer runs inline on the I/O thread each time the reactor
//! services the port: it drains the read stream into complete TLS
//! records, each handed to the decryption gateway as one pooled
//! container. Record boundaries can land anywhere in the byte stream,
//! so both the 5-byte header and the body survive partial reads.

use crate::buffer::{BufCont, BufferPool};
use crate::error::Error;
use crate::net::ReadStream;

/// Size of a TLS record header.
pub const TLS_HEADER_LEN: usize = 5;

/// Largest payload a record header may declare: 2^14 plaintext plus
/// expansion allowance. Anything larger fails the connection before a
/// pooled allocation is made.
pub const MAX_RECORD_PAYLOAD: usize = (1 << 14) + 256;

/// Reframes the inbound byte stream into TLS records.
pub struct Framer {
    header: [u8; TLS_HEADER_LEN],
    header_filled: usize,
    frame: Option<BufCont>,
}

impl Framer {
    pub fn new() -> Self {
        Framer {
            header: [0; TLS_HEADER_LEN],
            header_filled: 0,
            frame: None,
        }
    }

    /// Drain the next complete record from `stream`, if one is fully
    /// buffered. Call in a loop until it returns `Ok(None)`.
    pub fn next_frame(
        &mut self,
        stream: &mut ReadStream,
        pool: &BufferPool,
    ) -> Result<Option<BufCont>, Error> {
        if self.frame.is_none() && !self.start_frame(stream, pool)? {
            return Ok(None);
        }
        let Some(frame) = self.frame.as_mut() else {
            return Ok(None);
        };

        let take = frame.remaining_mut().min(stream.len());
        frame.put_slice(&stream.data()[..take]);
        stream.consume(take);

        if frame.is_full() {
            Ok(self.frame.take())
        } else {
            Ok(None)
        }
    }

    /// Whether a partially received record is being held.
    pub fn holds_partial(&self) -> bool {
        self.header_filled > 0 || self.frame.is_some()
    }

    /// Parse the header and allocate the frame container. Returns false
    /// while the header itself is still partial.
    fn start_frame(&mut self, stream: &mut ReadStream, pool: &BufferPool) -> Result<bool, Error> {
        let take = (TLS_HEADER_LEN - self.header_filled).min(stream.len());
        self.header[self.header_filled..self.header_filled + take]
            .copy_from_slice(&stream.data()[..take]);
        stream.consume(take);
        self.header_filled += take;
        if self.header_filled < TLS_HEADER_LEN {
            return Ok(false);
        }

        // Bytes 3-4: big-endian payload length. Content type is not
        // validated here; the codec rejects garbage records.
        let len = u16::from_be_bytes([self.header[3], self.header[4]]) as usize;
        if len > MAX_RECORD_PAYLOAD {
            return Err(Error::Framing(format!(
                "record payload length {len} exceeds maximum {MAX_RECORD_PAYLOAD}"
            )));
        }

        let mut cont = pool.acquire_exact(TLS_HEADER_LEN + len);
        cont.put_slice(&self.header);
        self.header_filled = 0;
        self.frame = Some(cont);
        Ok(true)
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(payload: &[u8]) -> Vec<u8> {
        let mut v = vec![23, 3, 3];
        v.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        v.extend_from_slice(payload);
        v
    }

    fn pool() -> BufferPool {
        BufferPool::new(1024, 8)
    }

    #[test]
    fn whole_record_in_one_pass() {
        let pool = pool();
        let mut stream = ReadStream::new(64);
        let mut framer = Framer::new();
        stream.append(&record(b"payload"));

        let frame = framer.next_frame(&mut stream, &pool).unwrap().unwrap();
        assert_eq!(&frame.as_slice()[TLS_HEADER_LEN..], b"payload");
        assert!(framer.next_frame(&mut stream, &pool).unwrap().is_none());
        assert!(!framer.holds_partial());
        frame.discard();
    }

    #[test]
    fn header_split_across_reads() {
        let pool = pool();
        let mut stream = ReadStream::new(64);
        let mut framer = Framer::new();
        let rec = record(b"abc");

        stream.append(&rec[..3]);
        assert!(framer.next_frame(&mut stream, &pool).unwrap().is_none());
        assert!(framer.holds_partial());

        stream.append(&rec[3..]);
        let frame = framer.next_frame(&mut stream, &pool).unwrap().unwrap();
        assert_eq!(&frame.as_slice()[TLS_HEADER_LEN..], b"abc");
        frame.discard();
    }

    #[test]
    fn body_split_across_reads() {
        let pool = pool();
        let mut stream = ReadStream::new(64);
        let mut framer = Framer::new();
        let rec = record(&[7u8; 100]);

        stream.append(&rec[..40]);
        assert!(framer.next_frame(&mut stream, &pool).unwrap().is_none());
        assert!(framer.holds_partial());
        assert!(stream.is_empty(), "partial body drained into the frame");

        stream.append(&rec[40..]);
        let frame = framer.next_frame(&mut stream, &pool).unwrap().unwrap();
        assert_eq!(frame.len(), rec.len());
        frame.discard();
    }

    #[test]
    fn back_to_back_records() {
        let pool = pool();
        let mut stream = ReadStream::new(64);
        let mut framer = Framer::new();
        stream.append(&record(b"one"));
        stream.append(&record(b"two"));

        let a = framer.next_frame(&mut stream, &pool).unwrap().unwrap();
        let b = framer.next_frame(&mut stream, &pool).unwrap().unwrap();
        assert_eq!(&a.as_slice()[TLS_HEADER_LEN..], b"one");
        assert_eq!(&b.as_slice()[TLS_HEADER_LEN..], b"two");
        a.discard();
        b.discard();
    }

    #[test]
    fn oversized_length_is_a_framing_error() {
        let pool = pool();
        let mut stream = ReadStream::new(64);
        let mut framer = Framer::new();
        // Declares 0xffff payload bytes, past the record maximum.
        stream.append(&[23, 3, 3, 0xff, 0xff]);

        let err = framer.next_frame(&mut stream, &pool).unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
        assert_eq!(pool.outstanding(), 0, "no allocation for a bad length");
    }

    #[test]
    fn zero_payload_record_completes_immediately() {
        let pool = pool();
        let mut stream = ReadStream::new(64);
        let mut framer = Framer::new();
        stream.append(&record(b""));

        let frame = framer.next_frame(&mut stream, &pool).unwrap().unwrap();
        assert_eq!(frame.len(), TLS_HEADER_LEN);
        assert!(!framer.holds_partial());
        frame.discard();
    }
}
