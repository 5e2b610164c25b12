//! Error types for the session layer.

use matchsync_protocol::MatchId;

use crate::SessionPhase;

/// Errors that can occur during session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session already has two participants.
    #[error("session {0} is full")]
    CapacityExceeded(MatchId),

    /// This handle is already a participant of the session.
    #[error("already registered in session {0}")]
    AlreadyRegistered(MatchId),

    /// This handle already belongs to another session.
    #[error("already in session {0}")]
    AlreadyInSession(MatchId),

    /// The handle has no authenticated identity yet.
    #[error("participant has no identity")]
    Unidentified,

    /// The handle's connection is gone or being closed.
    #[error("participant is disconnected")]
    Disconnected,

    /// The handle does not belong to any live session.
    #[error("participant is not in a session")]
    NotInSession,

    /// The session is in a phase that doesn't allow this operation.
    #[error("session {match_id} is {phase}")]
    InvalidPhase {
        match_id: MatchId,
        phase: SessionPhase,
    },

    /// The session has ended; it accepts no further mutation.
    #[error("session {0} is closed")]
    Closed(MatchId),
}
