//! Transport abstraction layer for matchsync.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract over
//! the byte-stream protocols a client can reach the server with. Every
//! transport can optionally be wrapped in TLS (see [`load_tls_acceptor`]).
//!
//! # Transports
//!
//! - [`FramedTransport`] — TCP with 4-byte length-prefixed frames
//! - [`WebSocketTransport`] — one binary WebSocket message per frame
//!   (feature `websocket`, on by default)

mod error;
mod framed;
mod listener;
mod tls;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use framed::{FramedConnection, FramedTransport};
pub use tls::{TlsAcceptor, load_tls_acceptor};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
///
/// Handshakes run in the background; `accept` only yields connections that
/// are ready to carry frames, and is cancel-safe.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// The address the transport is listening on.
    fn local_addr(&self) -> SocketAddr;

    /// Stops accepting new connections. Established connections are
    /// unaffected.
    fn shutdown(&self);
}

/// A single connection that can send and receive whole frames.
///
/// The send and receive halves are independent: a task parked in
/// [`recv`](Self::recv) never blocks another task calling
/// [`send`](Self::send).
pub trait Connection: Send + Sync + 'static {
    /// Sends one frame to the remote peer.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
