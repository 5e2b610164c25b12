//! Participant state for matchsync.
//!
//! This crate holds everything the server knows about one connected client:
//!
//! 1. **Trust** — deciding whether a Join's token vouches for the identity
//!    it claims ([`TokenVerifier`]).
//! 2. **Per-connection state** — identity, position, liveness and the
//!    outbound queue ([`ParticipantHandle`]).
//!
//! # How it fits in the stack
//!
//! ```text
//! Session Layer (above)      ← groups handles into two-player sessions
//!     ↕
//! Participant Layer (this)   ← who a connection is and where it stands
//!     ↕
//! Protocol Layer (below)     ← UserId, ServerMessage types
//! ```

mod auth;
mod error;
mod handle;

pub use auth::{
    DEFAULT_DEV_MARKER, DevTokenVerifier, PlainTextDecryptor, TimestampTokenVerifier,
    TokenDecryptor, TokenVerifier,
};
pub use error::ParticipantError;
pub use handle::{Outbound, OutboundReceiver, OutboundSender, ParticipantHandle};
