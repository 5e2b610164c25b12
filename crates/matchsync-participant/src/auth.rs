//! Token verification at the trust boundary.
//!
//! matchsync never issues tokens. A client obtains one from the platform's
//! login service and presents it in its Join, together with the identity it
//! claims. The server only answers one question: "is this token good enough
//! to trust that claim?" That question is the [`TokenVerifier`] trait.
//!
//! Two verifiers ship with the crate:
//!
//! - [`DevTokenVerifier`] — accepts any token containing a fixed marker.
//!   Development only.
//! - [`TimestampTokenVerifier`] — the token is base64 of an encrypted
//!   RFC 3339 timestamp; it is accepted while that timestamp is within the
//!   validity window of the server clock. Decryption is delegated to a
//!   [`TokenDecryptor`].

use std::future::Future;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use matchsync_protocol::UserId;

use crate::ParticipantError;

/// Decides whether a Join's token vouches for the identity it claims.
///
/// `Send + Sync + 'static` because one verifier is shared by every
/// connection task for the lifetime of the server.
///
/// # Example
///
/// ```rust
/// use matchsync_participant::{ParticipantError, TokenVerifier};
/// use matchsync_protocol::UserId;
///
/// /// Only lets user 1 in.
/// struct OnlyOne;
///
/// impl TokenVerifier for OnlyOne {
///     async fn verify(&self, _token: &str, claimed: UserId) -> Result<(), ParticipantError> {
///         if claimed == UserId(1) {
///             Ok(())
///         } else {
///             Err(ParticipantError::AuthFailed("not user 1".into()))
///         }
///     }
/// }
/// ```
pub trait TokenVerifier: Send + Sync + 'static {
    /// Returns `Ok(())` when `token` is acceptable for `claimed`.
    fn verify(
        &self,
        token: &str,
        claimed: UserId,
    ) -> impl Future<Output = Result<(), ParticipantError>> + Send;
}

// ---------------------------------------------------------------------------
// DevTokenVerifier
// ---------------------------------------------------------------------------

/// Marker accepted by [`DevTokenVerifier::default`].
pub const DEFAULT_DEV_MARKER: &str = "dummytoken";

/// Accepts any token that contains the configured marker.
///
/// Never use this in production.
#[derive(Debug, Clone)]
pub struct DevTokenVerifier {
    marker: String,
}

impl DevTokenVerifier {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl Default for DevTokenVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_DEV_MARKER)
    }
}

impl TokenVerifier for DevTokenVerifier {
    async fn verify(&self, token: &str, claimed: UserId) -> Result<(), ParticipantError> {
        if token.contains(&self.marker) {
            tracing::debug!(%claimed, "development token accepted");
            Ok(())
        } else {
            Err(ParticipantError::AuthFailed("missing development marker".into()))
        }
    }
}

// ---------------------------------------------------------------------------
// TimestampTokenVerifier
// ---------------------------------------------------------------------------

/// Turns the raw (base64-decoded) token bytes into plaintext.
///
/// The cipher itself is outside matchsync; deployments plug theirs in here.
pub trait TokenDecryptor: Send + Sync + 'static {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ParticipantError>;
}

/// A [`TokenDecryptor`] that returns its input unchanged. For tests and for
/// platforms that sign rather than encrypt their tokens upstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextDecryptor;

impl TokenDecryptor for PlainTextDecryptor {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ParticipantError> {
        Ok(ciphertext.to_vec())
    }
}

/// Accepts tokens whose decrypted timestamp is within `window` of now, in
/// either direction (client clocks may run ahead).
#[derive(Debug, Clone)]
pub struct TimestampTokenVerifier<D = PlainTextDecryptor> {
    decryptor: D,
    window: Duration,
}

impl<D: TokenDecryptor> TimestampTokenVerifier<D> {
    pub fn new(decryptor: D, window: Duration) -> Self {
        Self { decryptor, window }
    }

    /// The acceptable clock skew.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Verifies `token` against an explicit "now".
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<(), ParticipantError> {
        let raw = STANDARD
            .decode(token.trim())
            .map_err(|e| ParticipantError::MalformedToken(format!("base64: {e}")))?;
        let plain = self.decryptor.decrypt(&raw)?;
        let text = String::from_utf8(plain)
            .map_err(|_| ParticipantError::MalformedToken("payload is not utf-8".into()))?;
        let issued = DateTime::parse_from_rfc3339(text.trim())
            .map_err(|e| ParticipantError::MalformedToken(format!("timestamp: {e}")))?;

        let skew_ms = (now - issued.with_timezone(&Utc))
            .num_milliseconds()
            .unsigned_abs();
        if u128::from(skew_ms) > self.window.as_millis() {
            return Err(ParticipantError::TokenExpired {
                skew_secs: skew_ms / 1000,
            });
        }
        Ok(())
    }
}

impl<D: TokenDecryptor> TokenVerifier for TimestampTokenVerifier<D> {
    async fn verify(&self, token: &str, claimed: UserId) -> Result<(), ParticipantError> {
        self.verify_at(token, Utc::now())?;
        tracing::debug!(%claimed, "timestamp token accepted");
        Ok(())
    }
}
