//! `MatchServer` builder and server loop.
//!
//! This is the entry point for running a matchsync server. It ties together
//! all the layers: transport → protocol → router → session.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use matchsync_participant::TokenVerifier;
use matchsync_protocol::Codec;
use matchsync_session::{SessionConfig, SessionRegistry};
use matchsync_transport::{
    FramedTransport, TlsAcceptor, Transport, TransportError, WebSocketTransport, load_tls_acceptor,
};

use crate::config::ServerConfig;
use crate::handler::handle_connection;
use crate::{MatchsyncError, MessageRouter};

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<V, K> {
    pub(crate) router: MessageRouter<V>,
    pub(crate) codec: K,
    pub(crate) idle_timeout: Duration,
}

/// Builder for configuring and starting a matchsync server.
///
/// # Example
///
/// ```rust,no_run
/// use matchsync::{BincodeCodec, DevTokenVerifier, MatchServerBuilder};
///
/// # async fn run() -> Result<(), matchsync::MatchsyncError> {
/// let server = MatchServerBuilder::new()
///     .bind("0.0.0.0:10140")
///     .build_tcp(DevTokenVerifier::default(), BincodeCodec)
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct MatchServerBuilder {
    bind_addr: String,
    session_config: SessionConfig,
    idle_timeout: Duration,
    max_frame_bytes: usize,
    tls: Option<TlsAcceptor>,
}

impl MatchServerBuilder {
    /// Creates a new builder with default settings (plaintext, local only).
    pub fn new() -> Self {
        let defaults = ServerConfig::default();
        Self {
            bind_addr: "127.0.0.1:10140".to_string(),
            session_config: defaults.session_config(),
            idle_timeout: defaults.idle_timeout(),
            max_frame_bytes: defaults.max_frame_bytes,
            tls: None,
        }
    }

    /// Creates a builder from a loaded configuration, reading the TLS
    /// certificate and key if the config names them.
    pub fn from_config(config: &ServerConfig) -> Result<Self, MatchsyncError> {
        let tls = match &config.tls {
            Some(tls) => Some(load_tls_acceptor(&tls.cert_path, &tls.key_path)?),
            None => None,
        };
        Ok(Self {
            bind_addr: config.bind.clone(),
            session_config: config.session_config(),
            idle_timeout: config.idle_timeout(),
            max_frame_bytes: config.max_frame_bytes,
            tls,
        })
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Sets how long a connection may stay silent before it is closed.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the largest frame the TCP transport accepts.
    pub fn max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    /// Terminates TLS on every accepted connection.
    pub fn tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Binds a length-prefixed TCP listener and builds the server.
    pub async fn build_tcp<V, K>(
        self,
        verifier: V,
        codec: K,
    ) -> Result<MatchServer<FramedTransport, V, K>, MatchsyncError>
    where
        V: TokenVerifier,
        K: Codec,
    {
        let transport =
            FramedTransport::bind(&self.bind_addr, self.tls.clone(), self.max_frame_bytes).await?;
        Ok(self.build_with(transport, verifier, codec))
    }

    /// Binds a WebSocket listener and builds the server.
    pub async fn build_websocket<V, K>(
        self,
        verifier: V,
        codec: K,
    ) -> Result<MatchServer<WebSocketTransport, V, K>, MatchsyncError>
    where
        V: TokenVerifier,
        K: Codec,
    {
        let transport = WebSocketTransport::bind(&self.bind_addr, self.tls.clone()).await?;
        Ok(self.build_with(transport, verifier, codec))
    }

    /// Builds the server on an already-bound transport.
    pub fn build_with<T, V, K>(self, transport: T, verifier: V, codec: K) -> MatchServer<T, V, K>
    where
        T: Transport,
        V: TokenVerifier,
        K: Codec,
    {
        let registry = SessionRegistry::new(self.session_config);
        let state = Arc::new(ServerState {
            router: MessageRouter::new(registry, verifier),
            codec,
            idle_timeout: self.idle_timeout,
        });
        MatchServer { transport, state }
    }
}

impl Default for MatchServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound matchsync server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct MatchServer<T, V, K> {
    transport: T,
    state: Arc<ServerState<V, K>>,
}

impl<T, V, K> MatchServer<T, V, K>
where
    T: Transport,
    V: TokenVerifier,
    K: Codec,
{
    /// Creates a new builder.
    pub fn builder() -> MatchServerBuilder {
        MatchServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// The registry every connection of this server joins sessions through.
    pub fn registry(&self) -> SessionRegistry {
        self.state.router.registry().clone()
    }

    /// Runs the accept loop until Ctrl-C.
    pub async fn run(self) -> Result<(), MatchsyncError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Runs the accept loop until `shutdown` completes, then stops
    /// accepting and ends every live session with ABORTED.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), MatchsyncError>
    where
        F: Future<Output = ()> + Send,
    {
        tracing::info!(addr = %self.local_addr(), "matchsync server running");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(handle_connection(conn, state));
                    }
                    Err(TransportError::Shutdown) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        self.transport.shutdown();
        self.state.router.registry().shutdown().await;
        tracing::info!("matchsync server stopped");
        Ok(())
    }
}
