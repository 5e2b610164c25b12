//! Codec trait and implementations for serializing message bodies.
//!
//! A codec only ever sees the body of a frame; the opcode header in front of
//! it is written and parsed by [`WireMessage`](crate::WireMessage). Swapping
//! the codec therefore never changes how frames are dispatched.
//!
//! Two codecs ship with the crate:
//!
//! - [`BincodeCodec`] — compact binary, the production default
//!   (feature `bincode`).
//! - [`JsonCodec`] — human-readable, handy when inspecting traffic
//!   (feature `json`).

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns the codec-specific [`ProtocolError`] variant if the value
    /// can't be represented in this format.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns the codec-specific [`ProtocolError`] variant if the bytes are
    /// malformed, incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// BincodeCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses bincode's default (fixed-width, little-endian)
/// encoding.
///
/// ```rust
/// use matchsync_protocol::{BincodeCodec, Codec, PositionUpdate};
///
/// let codec = BincodeCodec;
/// let bytes = codec.encode(&PositionUpdate { x: 1.5, y: 2.0 }).unwrap();
/// assert_eq!(bytes.len(), 8);
///
/// let decoded: PositionUpdate = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, PositionUpdate { x: 1.5, y: 2.0 });
/// ```
#[cfg(feature = "bincode")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

#[cfg(feature = "bincode")]
impl Codec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(value).map_err(ProtocolError::Bincode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        bincode::deserialize(data).map_err(ProtocolError::Bincode)
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Json)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Json)
    }
}
