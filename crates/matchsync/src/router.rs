//! Dispatch of decoded client messages to participant and session
//! operations.
//!
//! One exhaustive match over [`ClientMessage`]: adding an opcode means adding
//! a variant and a case here. Replies go through the participant's outbound
//! queue, so they are ordered with whatever the session already queued (a
//! joining participant sees MatchConfirmed before its JoinAck).

use std::sync::Arc;

use matchsync_participant::{ParticipantHandle, TokenVerifier};
use matchsync_protocol::{ClientMessage, JoinRequest, MatchId, PositionUpdate, ServerMessage};
use matchsync_session::{SessionError, SessionRegistry};

/// Routes one connection's inbound messages.
///
/// Shared by every connection task; holds no per-connection state.
#[derive(Debug)]
pub struct MessageRouter<V> {
    registry: SessionRegistry,
    verifier: V,
}

impl<V: TokenVerifier> MessageRouter<V> {
    pub fn new(registry: SessionRegistry, verifier: V) -> Self {
        Self { registry, verifier }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Handles one message from `handle`'s connection.
    pub async fn dispatch(&self, handle: &Arc<ParticipantHandle>, message: ClientMessage) {
        match message {
            ClientMessage::Join(join) => self.on_join(handle, join).await,
            ClientMessage::PositionUpdate(pos) => self.on_position_update(handle, pos),
            ClientMessage::Abort => self.on_abort(handle).await,
            ClientMessage::KeepAlive => {
                handle.send(ServerMessage::ack(true));
            }
        }
    }

    async fn on_join(&self, handle: &Arc<ParticipantHandle>, join: JoinRequest) {
        let conn_id = handle.connection_id();
        let Some(match_id) = join.match_id.filter(|id| !id.is_empty()).map(MatchId::from) else {
            tracing::debug!(%conn_id, "join without match id dropped");
            return;
        };

        if let Err(e) = self.verifier.verify(&join.external_token, join.user_id).await {
            tracing::debug!(%conn_id, user_id = %join.user_id, error = %e, "join token rejected");
            return;
        }
        if let Err(e) = handle.assign_identity(join.user_id) {
            tracing::debug!(%conn_id, error = %e, "join rejected");
            handle.send(ServerMessage::ack(false));
            return;
        }

        let accepted = match self.registry.register_participant(handle, match_id).await {
            Ok(_) => true,
            // Repeating a join for the session we're already in changes nothing.
            Err(SessionError::AlreadyRegistered(_)) => true,
            Err(e) => {
                tracing::debug!(%conn_id, user_id = %join.user_id, error = %e, "join refused");
                false
            }
        };
        handle.send(ServerMessage::ack(accepted));
    }

    fn on_position_update(&self, handle: &Arc<ParticipantHandle>, pos: PositionUpdate) {
        if handle.session_id().is_none() {
            tracing::debug!(conn_id = %handle.connection_id(), "position update outside a session dropped");
            return;
        }
        handle.set_position(pos.x, pos.y);
        handle.send(ServerMessage::ack(true));
    }

    async fn on_abort(&self, handle: &Arc<ParticipantHandle>) {
        if handle.session_id().is_none() {
            tracing::debug!(conn_id = %handle.connection_id(), "abort outside a session dropped");
            return;
        }
        // Acknowledge before ending: the session closes this connection.
        handle.send(ServerMessage::ack(true));
        if let Err(e) = self.registry.abort(handle).await {
            tracing::debug!(conn_id = %handle.connection_id(), error = %e, "abort ignored");
        }
    }
}
