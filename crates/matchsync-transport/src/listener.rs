//! Shared accept loop: TCP accept, then TLS and protocol handshakes off the
//! hot path, then hand-off of ready connections through a channel.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::tls::{BoxedStream, TlsAcceptor, secure};
use crate::{ConnectionId, TransportError};

/// Counter for generating unique connection IDs across all transports.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Upper bound on TLS + protocol handshake time for one connection.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connections that finished their handshake but were not accepted yet.
const READY_QUEUE: usize = 128;

/// Pause after a failed `accept` (e.g. out of file descriptors). Doubles
/// per consecutive failure.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
/// Longest pause between `accept` retries.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// A bound listener whose handshakes are driven by a background task.
pub(crate) struct Listener<C> {
    local_addr: SocketAddr,
    ready: mpsc::Receiver<C>,
    task: JoinHandle<()>,
}

impl<C: Send + 'static> Listener<C> {
    /// Binds `addr` and starts accepting. `upgrade` turns a (possibly TLS)
    /// stream into a ready connection.
    pub(crate) async fn bind<F, Fut>(
        addr: &str,
        tls: Option<TlsAcceptor>,
        upgrade: F,
    ) -> Result<Self, TransportError>
    where
        F: Fn(BoxedStream, ConnectionId) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<C, TransportError>> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        let local_addr = listener
            .local_addr()
            .map_err(TransportError::AcceptFailed)?;
        let (tx, ready) = mpsc::channel(READY_QUEUE);

        let task = tokio::spawn(accept_loop(listener, tls, upgrade, tx));

        Ok(Self {
            local_addr,
            ready,
            task,
        })
    }

    pub(crate) async fn next(&mut self) -> Result<C, TransportError> {
        self.ready.recv().await.ok_or(TransportError::Shutdown)
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn shutdown(&self) {
        self.task.abort();
    }
}

impl<C> Drop for Listener<C> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop<C, F, Fut>(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    upgrade: F,
    ready: mpsc::Sender<C>,
) where
    C: Send + 'static,
    F: Fn(BoxedStream, ConnectionId) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Result<C, TransportError>> + Send + 'static,
{
    let mut backoff = None;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => {
                backoff = None;
                accepted
            }
            Err(e) => {
                let delay = next_backoff(backoff);
                backoff = Some(delay);
                tracing::error!(error = %e, retry_ms = delay.as_millis() as u64, "tcp accept failed");
                tokio::time::sleep(delay).await;
                continue;
            }
        };
        let _ = stream.set_nodelay(true);

        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        let tls = tls.clone();
        let upgrade = upgrade.clone();
        let ready = ready.clone();

        tokio::spawn(async move {
            let handshake = async {
                let stream = secure(stream, tls.as_ref()).await?;
                upgrade(stream, id).await
            };
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake).await {
                Ok(Ok(conn)) => {
                    tracing::debug!(%id, %peer, "connection ready");
                    let _ = ready.send(conn).await;
                }
                Ok(Err(e)) => {
                    tracing::warn!(%id, %peer, error = %e, "handshake failed");
                }
                Err(_) => {
                    tracing::warn!(%id, %peer, "handshake timed out");
                }
            }
        });
    }
}

fn next_backoff(previous: Option<Duration>) -> Duration {
    match previous {
        None => ACCEPT_BACKOFF_MIN,
        Some(delay) => (delay * 2).min(ACCEPT_BACKOFF_MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_backoff_starts_small_and_doubles() {
        let first = next_backoff(None);
        assert_eq!(first, ACCEPT_BACKOFF_MIN);
        assert_eq!(next_backoff(Some(first)), ACCEPT_BACKOFF_MIN * 2);
    }

    #[test]
    fn test_next_backoff_is_capped() {
        let mut delay = next_backoff(None);
        for _ in 0..20 {
            delay = next_backoff(Some(delay));
        }
        assert_eq!(delay, ACCEPT_BACKOFF_MAX);
    }
}
