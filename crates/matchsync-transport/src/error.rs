/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The TLS or WebSocket handshake for a single connection failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Certificate or key material could not be loaded.
    #[error("tls configuration: {0}")]
    Tls(String),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
