//! Unified error type for the matchsync server.

use matchsync_participant::ParticipantError;
use matchsync_protocol::ProtocolError;
use matchsync_session::SessionError;
use matchsync_transport::TransportError;

use crate::config::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert layer errors
/// automatically.
#[derive(Debug, thiserror::Error)]
pub enum MatchsyncError {
    /// Bind, accept, handshake or I/O failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A Join token was rejected.
    #[error(transparent)]
    Participant(#[from] ParticipantError),

    /// A session operation was refused.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
