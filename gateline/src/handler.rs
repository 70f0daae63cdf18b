use bytes::Bytes;

use crate::error::HandlerError;
use crate::net::PortId;

/// Contract of the application message handler.
///
/// Called from crypto-pool threads, one message at a time, in strict
/// arrival order for a given connection. Implementations may mutate
/// connection state but must not block on the same connection's write
/// path; an error terminates the connection.
pub trait MessageHandler: Send + Sync {
    /// Consume one complete application message.
    fn handle_message(&self, message: Bytes, port: PortId) -> Result<(), HandlerError>;

    /// Upper bound on bytes pulled from the socket in one service pass.
    /// Returning 0 pauses reading for this pass.
    fn max_read(&self) -> usize {
        1 << 20
    }
}
