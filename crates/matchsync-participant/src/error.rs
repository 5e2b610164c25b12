//! Error types for the participant layer.

use matchsync_protocol::UserId;

/// Errors raised while establishing who a participant is.
#[derive(Debug, thiserror::Error)]
pub enum ParticipantError {
    /// The token was rejected by the [`TokenVerifier`](crate::TokenVerifier).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The token decoded fine but its timestamp is outside the validity
    /// window.
    #[error("token expired: timestamp is {skew_secs}s away from server time")]
    TokenExpired {
        /// Absolute distance between the token's timestamp and now.
        skew_secs: u64,
    },

    /// The token could not be decoded at all.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The connection already authenticated as a different user.
    #[error("connection is {assigned}, cannot re-identify as {claimed}")]
    IdentityConflict {
        /// Identity assigned by the first successful join.
        assigned: UserId,
        /// Identity claimed by the conflicting join.
        claimed: UserId,
    },
}
