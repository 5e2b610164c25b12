//! Wire protocol for matchsync.
//!
//! This crate defines the "language" that clients and the server speak:
//!
//! - **Messages** ([`ClientMessage`], [`ServerMessage`] and their bodies) —
//!   one variant per opcode.
//! - **Framing** ([`WireMessage`], [`Opcode`]) — the `[opcode][body]` frame
//!   layout.
//! - **Codec** ([`Codec`] trait, [`BincodeCodec`], [`JsonCodec`]) — how
//!   bodies are converted to/from bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw frames) and the session
//! core. It doesn't know about connections or sessions.
//!
//! ```text
//! Transport (frame) → Protocol (ClientMessage) → MessageRouter → Session
//! ```

mod codec;
mod error;
mod message;

pub use codec::Codec;
#[cfg(feature = "bincode")]
pub use codec::BincodeCodec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use message::{
    ClientMessage, JoinAck, JoinRequest, MatchConfirmed, MatchId, OPCODE_LEN, Opcode, Outcome,
    ParticipantState, PositionUpdate, ServerMessage, StateSnapshot, UserId, WireMessage,
};
