//! Error types for the protocol layer.
//!
//! Each crate in matchsync defines its own error enum. A `ProtocolError`
//! always means a frame could not be turned into a message (or back), never
//! that the network or a session misbehaved.

use crate::Opcode;

/// Errors that can occur while framing, encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is shorter than its fixed header.
    #[error("truncated frame: {len} bytes")]
    Truncated {
        /// Length of the frame that was received.
        len: usize,
    },

    /// The frame starts with an opcode this server does not know.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),

    /// The opcode is known but not valid in this direction (for example a
    /// client sending a server-only message).
    #[error("unexpected opcode {0:?}")]
    UnexpectedOpcode(Opcode),

    /// The message is structurally valid but violates a protocol rule.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The JSON codec failed to encode or decode a body.
    #[cfg(feature = "json")]
    #[error("json codec: {0}")]
    Json(#[source] serde_json::Error),

    /// The bincode codec failed to encode or decode a body.
    #[cfg(feature = "bincode")]
    #[error("bincode codec: {0}")]
    Bincode(#[source] bincode::Error),
}
