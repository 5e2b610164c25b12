//! Per-connection handler: reader loop, writer task and cleanup.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Create the participant handle and its outbound queue
//!   2. Spawn the writer, which drains the queue onto the connection
//!   3. Loop: receive frames → decode → [`MessageRouter::dispatch`]
//!   4. On peer close, error, idle timeout or a server-side close (the
//!      session ended): close the connection and deregister the participant
//!
//! [`MessageRouter::dispatch`]: crate::MessageRouter::dispatch

use std::sync::Arc;

use matchsync_participant::{Outbound, OutboundReceiver, ParticipantHandle, TokenVerifier};
use matchsync_protocol::{ClientMessage, Codec, ProtocolError, WireMessage};
use matchsync_session::SessionRegistry;
use matchsync_transport::Connection;

use crate::server::ServerState;

/// Deregisters the participant when the handler exits, panics included.
///
/// Deregistration needs the registry lock, so `drop` hands it to a task.
struct ParticipantGuard {
    handle: Arc<ParticipantHandle>,
    registry: SessionRegistry,
}

impl Drop for ParticipantGuard {
    fn drop(&mut self) {
        let handle = Arc::clone(&self.handle);
        let registry = self.registry.clone();
        tokio::spawn(async move {
            registry.deregister_participant(&handle).await;
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C, V, K>(conn: C, state: Arc<ServerState<V, K>>)
where
    C: Connection,
    V: TokenVerifier,
    K: Codec,
{
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::info!(%conn_id, "connection accepted");

    let (handle, outbound) = ParticipantHandle::channel(conn_id);
    let handle = Arc::new(handle);
    tokio::spawn(write_outbound(Arc::clone(&conn), outbound, Arc::clone(&state)));

    let _guard = ParticipantGuard {
        handle: Arc::clone(&handle),
        registry: state.router.registry().clone(),
    };

    loop {
        let received = tokio::select! {
            biased;
            () = handle.closed() => {
                tracing::info!(%conn_id, "connection closed by server");
                break;
            }
            received = tokio::time::timeout(state.idle_timeout, conn.recv()) => received,
        };
        let frame = match received {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                tracing::info!(%conn_id, "connection closed by peer");
                break;
            }
            Ok(Err(e)) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
            Err(_) => {
                tracing::info!(%conn_id, timeout_secs = state.idle_timeout.as_secs(), "connection idle, closing");
                break;
            }
        };

        let message = match ClientMessage::decode(&state.codec, &frame) {
            Ok(message) => message,
            Err(ProtocolError::UnknownOpcode(opcode)) => {
                tracing::info!(%conn_id, opcode, "no handler for opcode");
                continue;
            }
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "dropping undecodable frame");
                continue;
            }
        };

        state.router.dispatch(&handle, message).await;
    }

    // Anything already queued is flushed before the socket closes.
    handle.close();
    // _guard drops here → deregistration fires.
}

/// Drains `handle`'s outbound queue onto the connection until a
/// [`Outbound::Close`] or a send failure.
async fn write_outbound<C, V, K>(
    conn: Arc<C>,
    mut outbound: OutboundReceiver,
    state: Arc<ServerState<V, K>>,
) where
    C: Connection,
    V: TokenVerifier,
    K: Codec,
{
    let conn_id = conn.id();
    while let Some(item) = outbound.recv().await {
        let message = match item {
            Outbound::Message(message) => message,
            Outbound::Close => break,
        };
        let frame = match message.encode(&state.codec) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(%conn_id, opcode = ?message.opcode(), error = %e, "failed to encode message");
                continue;
            }
        };
        if let Err(e) = conn.send(&frame).await {
            tracing::debug!(%conn_id, error = %e, "send failed, writer stopping");
            break;
        }
    }
    // Dropping the receiver makes later sends on the handle fail, which is
    // how the session notices the connection is gone.
    drop(outbound);
    if let Err(e) = conn.close().await {
        tracing::debug!(%conn_id, error = %e, "close failed");
    }
    tracing::debug!(%conn_id, "writer finished");
}
