//! # matchsync
//!
//! Real-time session server for two-player matches.
//!
//! Clients connect over a secure byte stream, join a match by id with a
//! token from the platform's login service, stream their position while the
//! match runs and receive the shared state on a fixed tick. When the match
//! ends both sides learn how, and the server closes their connections.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use matchsync::prelude::*;
//!
//! # async fn run() -> Result<(), MatchsyncError> {
//! let config = ServerConfig::load(None)?;
//! let server = MatchServerBuilder::from_config(&config)?
//!     .build_tcp(config.auth.verifier(), BincodeCodec)
//!     .await?;
//! server.run().await
//! # }
//! ```

pub mod config;
mod error;
mod handler;
mod router;
mod server;

pub use config::{ConfigError, ConfiguredVerifier, ServerConfig};
pub use error::MatchsyncError;
pub use router::MessageRouter;
pub use server::{MatchServer, MatchServerBuilder};

pub use matchsync_participant::{
    DevTokenVerifier, ParticipantError, ParticipantHandle, TimestampTokenVerifier, TokenDecryptor,
    TokenVerifier,
};
pub use matchsync_protocol::{
    BincodeCodec, ClientMessage, Codec, JsonCodec, MatchId, ServerMessage, UserId, WireMessage,
};
pub use matchsync_session::{
    Session, SessionConfig, SessionError, SessionOutcome, SessionPhase, SessionRegistry,
};
pub use matchsync_transport::{
    Connection, FramedTransport, TlsAcceptor, Transport, TransportError, WebSocketTransport,
    load_tls_acceptor,
};

/// Everything needed to configure and run a server.
pub mod prelude {
    pub use crate::config::{AuthMode, CodecKind, TransportKind};
    pub use crate::{
        BincodeCodec, ConfiguredVerifier, JsonCodec, MatchServer, MatchServerBuilder,
        MatchsyncError, ServerConfig, SessionConfig, TokenVerifier,
    };
}
