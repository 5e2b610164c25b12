//! Server-side state for one connected client.
//!
//! A [`ParticipantHandle`] is created when a connection is accepted and
//! dropped when that connection's task ends. It is shared (`Arc`) between
//! the connection task, which owns the inbound side, and the session the
//! participant joined, which broadcasts through its outbound queue.
//!
//! The handle never points at its session directly: it only remembers the
//! match id, and the registry resolves it. Removing a session from the
//! registry therefore can't leave a dangling reference behind.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use matchsync_protocol::{MatchId, ParticipantState, ServerMessage, UserId};
use matchsync_transport::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ParticipantError;

/// An item on a participant's outbound queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Encode and send this message.
    Message(ServerMessage),
    /// Flush everything queued before this, then close the connection.
    Close,
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Per-connection participant state.
///
/// `position` is written only by the participant's own connection task.
/// `alive` and the session binding are written by session lifecycle code
/// while it holds the session lock.
///
/// Once [`close`](Self::close) is called the handle is finished: its
/// connection task stops reading and nothing may register it again.
#[derive(Debug)]
pub struct ParticipantHandle {
    connection_id: ConnectionId,
    identity: OnceLock<UserId>,
    /// x in the high 32 bits, y in the low 32 bits (both `f32::to_bits`).
    position: AtomicU64,
    alive: AtomicBool,
    session: Mutex<Option<MatchId>>,
    outbound: OutboundSender,
    closed: CancellationToken,
}

impl ParticipantHandle {
    /// Creates a live, unidentified handle at the origin.
    pub fn new(connection_id: ConnectionId, outbound: OutboundSender) -> Self {
        Self {
            connection_id,
            identity: OnceLock::new(),
            position: AtomicU64::new(pack(0.0, 0.0)),
            alive: AtomicBool::new(true),
            session: Mutex::new(None),
            outbound,
            closed: CancellationToken::new(),
        }
    }

    /// Creates a handle together with the receiving end of its outbound
    /// queue.
    pub fn channel(connection_id: ConnectionId) -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(connection_id, tx), rx)
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    // -- Identity ---------------------------------------------------------

    /// The authenticated identity, `None` until a join succeeded.
    pub fn identity(&self) -> Option<UserId> {
        self.identity.get().copied()
    }

    /// Records the identity proven by a verified token.
    ///
    /// The identity is set once per connection. Re-asserting the same
    /// identity is accepted; claiming a different one is an error.
    pub fn assign_identity(&self, claimed: UserId) -> Result<(), ParticipantError> {
        let assigned = *self.identity.get_or_init(|| claimed);
        if assigned == claimed {
            Ok(())
        } else {
            Err(ParticipantError::IdentityConflict { assigned, claimed })
        }
    }

    // -- Position ---------------------------------------------------------

    pub fn position(&self) -> (f32, f32) {
        unpack(self.position.load(Ordering::Acquire))
    }

    pub fn set_position(&self, x: f32, y: f32) {
        self.position.store(pack(x, y), Ordering::Release);
    }

    // -- Liveness ---------------------------------------------------------

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Marks the participant as gone. Returns `true` if it was alive before.
    pub fn mark_dead(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    // -- Session binding --------------------------------------------------

    /// The match this participant currently belongs to.
    pub fn session_id(&self) -> Option<MatchId> {
        self.session_slot().clone()
    }

    /// Binds the participant to `match_id`, replacing any previous binding.
    pub fn bind_session(&self, match_id: MatchId) {
        *self.session_slot() = Some(match_id);
    }

    /// Clears the binding if it still points at `match_id`.
    pub fn unbind_session(&self, match_id: &MatchId) -> bool {
        let mut slot = self.session_slot();
        if slot.as_ref() == Some(match_id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    fn session_slot(&self) -> MutexGuard<'_, Option<MatchId>> {
        // The slot is a plain value; a panic elsewhere can't leave it torn.
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- Outbound ---------------------------------------------------------

    /// Queues a message for this participant's connection.
    ///
    /// Returns `false` if the connection's writer is gone, i.e. the
    /// connection is closed.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.outbound.send(Outbound::Message(message)).is_ok()
    }

    /// Asks the writer to close the connection once everything queued so far
    /// has been sent, and tells the reader to stop.
    pub fn close(&self) {
        self.closed.cancel();
        let _ = self.outbound.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// This participant's entry in a state snapshot.
    pub fn state(&self) -> ParticipantState {
        let (x, y) = self.position();
        ParticipantState {
            identity: self.identity().unwrap_or_default(),
            x,
            y,
            alive: self.is_alive(),
        }
    }
}

fn pack(x: f32, y: f32) -> u64 {
    (u64::from(x.to_bits()) << 32) | u64::from(y.to_bits())
}

fn unpack(bits: u64) -> (f32, f32) {
    (f32::from_bits((bits >> 32) as u32), f32::from_bits(bits as u32))
}
