//! A two-player session: participant slots, phase state machine, tick
//! broadcast and termination.
//!
//! Every mutation of phase, outcome and participant list happens under the
//! session's own lock. Code that also needs the registry lock takes it
//! first; a session never calls into the registry while holding its lock.

use std::sync::{Arc, Weak};

use matchsync_participant::ParticipantHandle;
use matchsync_protocol::{MatchConfirmed, MatchId, Outcome, ServerMessage, StateSnapshot};
use matchsync_tick::{TickConfig, TickControl, TickHandle, TickInfo, TickScheduler};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::registry::RegistryShared;
use crate::{SessionConfig, SessionError, SessionOutcome, SessionPhase};

/// Participants per session.
pub const SESSION_CAPACITY: usize = 2;

/// One matched pair of participants and its lifecycle.
///
/// Created by [`SessionRegistry`](crate::SessionRegistry); shared between
/// the registry and the session's own tick task (which only holds a weak
/// reference).
#[derive(Debug)]
pub struct Session {
    id: MatchId,
    config: SessionConfig,
    registry: Weak<RegistryShared>,
    inner: Mutex<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    phase: SessionPhase,
    outcome: SessionOutcome,
    /// Join order.
    participants: Vec<Arc<ParticipantHandle>>,
    started_at: Option<Instant>,
    ticker: Option<TickHandle>,
}

impl Session {
    pub(crate) fn new(id: MatchId, config: SessionConfig, registry: Weak<RegistryShared>) -> Arc<Self> {
        Arc::new(Self {
            id,
            config,
            registry,
            inner: Mutex::new(SessionInner {
                phase: SessionPhase::Waiting,
                outcome: SessionOutcome::Unset,
                participants: Vec::with_capacity(SESSION_CAPACITY),
                started_at: None,
                ticker: None,
            }),
        })
    }

    pub fn id(&self) -> &MatchId {
        &self.id
    }

    pub async fn phase(&self) -> SessionPhase {
        self.inner.lock().await.phase
    }

    pub async fn outcome(&self) -> SessionOutcome {
        self.inner.lock().await.outcome
    }

    pub async fn participant_count(&self) -> usize {
        self.inner.lock().await.participants.len()
    }

    /// Whether a tick timer is currently owned by this session.
    pub async fn has_ticker(&self) -> bool {
        self.inner.lock().await.ticker.is_some()
    }

    /// The state every participant would receive if a tick fired now.
    pub async fn snapshot(&self) -> StateSnapshot {
        Self::build_snapshot(&*self.inner.lock().await)
    }

    // -- Joining ---------------------------------------------------------

    /// Adds `handle` to the session. The second participant activates it.
    pub(crate) async fn admit(self: &Arc<Self>, handle: &Arc<ParticipantHandle>) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;

        if inner.participants.iter().any(|p| Arc::ptr_eq(p, handle)) {
            return Err(SessionError::AlreadyRegistered(self.id.clone()));
        }
        if !handle.is_alive() || handle.is_closed() {
            return Err(SessionError::Disconnected);
        }
        match inner.phase {
            SessionPhase::Waiting => {}
            SessionPhase::Active => return Err(SessionError::CapacityExceeded(self.id.clone())),
            SessionPhase::Ending | SessionPhase::Closed => {
                return Err(SessionError::Closed(self.id.clone()));
            }
        }
        if inner.participants.len() >= SESSION_CAPACITY {
            return Err(SessionError::CapacityExceeded(self.id.clone()));
        }

        inner.participants.push(Arc::clone(handle));
        handle.bind_session(self.id.clone());
        tracing::info!(
            match_id = %self.id,
            user_id = %handle.identity().unwrap_or_default(),
            participants = inner.participants.len(),
            "participant joined"
        );

        if inner.participants.len() == SESSION_CAPACITY {
            self.activate(&mut inner);
        }
        Ok(())
    }

    /// WAITING → ACTIVE: record the start, confirm the match to both
    /// participants, then start the one tick timer.
    fn activate(self: &Arc<Self>, inner: &mut SessionInner) {
        debug_assert!(inner.phase.can_transition_to(SessionPhase::Active));
        debug_assert!(inner.ticker.is_none());

        inner.phase = SessionPhase::Active;
        inner.started_at = Some(Instant::now());

        let confirmed = ServerMessage::MatchConfirmed(MatchConfirmed {
            match_id: self.id.clone(),
            starting: true,
            tick_interval_ms: u32::try_from(self.config.tick_interval_ms).unwrap_or(u32::MAX),
            participants: inner
                .participants
                .iter()
                .map(|p| p.identity().unwrap_or_default())
                .collect(),
        });
        for p in &inner.participants {
            p.send(confirmed.clone());
        }

        let session = Arc::downgrade(self);
        let tick_config = TickConfig {
            initial_jitter_us: self.config.initial_jitter_us,
            ..TickConfig::with_interval(self.config.tick_interval())
        };
        inner.ticker = Some(TickScheduler::start(tick_config, move |info| {
            let session = Weak::clone(&session);
            async move {
                match session.upgrade() {
                    Some(session) => session.on_tick(info).await,
                    None => TickControl::Stop,
                }
            }
        }));

        tracing::info!(
            match_id = %self.id,
            tick_interval_ms = self.config.tick_interval_ms,
            "session active"
        );
    }

    // -- Ticking ---------------------------------------------------------

    async fn on_tick(&self, info: TickInfo) -> TickControl {
        let mut inner = self.inner.lock().await;
        if inner.phase != SessionPhase::Active {
            return TickControl::Stop;
        }

        let alive = inner.participants.iter().filter(|p| p.is_alive()).count();
        if alive < SESSION_CAPACITY {
            tracing::debug!(match_id = %self.id, tick = info.tick, alive, "participant lost, ending");
            self.conclude(&mut inner, SessionOutcome::Aborted);
            drop(inner);
            self.retire().await;
            return TickControl::Stop;
        }

        let snapshot = ServerMessage::StateSnapshot(Self::build_snapshot(&inner));
        for p in &inner.participants {
            if p.is_alive() && !p.send(snapshot.clone()) {
                // Excluded from the next tick; that tick ends the session.
                p.mark_dead();
                tracing::debug!(
                    match_id = %self.id,
                    conn_id = %p.connection_id(),
                    "outbound queue closed, participant marked dead"
                );
            }
        }
        tracing::trace!(match_id = %self.id, tick = info.tick, "snapshot broadcast");
        TickControl::Continue
    }

    fn build_snapshot(inner: &SessionInner) -> StateSnapshot {
        StateSnapshot {
            elapsed_ms: inner
                .started_at
                .map(|t| u64::try_from(t.elapsed().as_millis()).unwrap_or(u64::MAX))
                .unwrap_or(0),
            participants: inner.participants.iter().map(|p| p.state()).collect(),
        }
    }

    // -- Ending ----------------------------------------------------------

    /// → ENDING → CLOSED, in one critical section.
    ///
    /// Returns `false` (and changes nothing) if the session already ended.
    fn conclude(&self, inner: &mut SessionInner, outcome: SessionOutcome) -> bool {
        if !inner.phase.is_open() {
            return false;
        }

        inner.phase = SessionPhase::Ending;
        debug_assert_eq!(inner.outcome, SessionOutcome::Unset);
        inner.outcome = outcome;
        if let Some(ticker) = inner.ticker.take() {
            ticker.cancel();
        }
        tracing::info!(match_id = %self.id, %outcome, "session ending");

        let snapshot = ServerMessage::StateSnapshot(Self::build_snapshot(inner));
        for p in &inner.participants {
            p.send(snapshot.clone());
        }
        let result = ServerMessage::Outcome(Outcome {
            success: outcome.is_success(),
        });
        for p in &inner.participants {
            p.send(result.clone());
        }
        // Dead before unbound: a handle seen without a session is already
        // known to be gone.
        for p in inner.participants.drain(..) {
            p.mark_dead();
            p.close();
            p.unbind_session(&self.id);
        }

        debug_assert!(inner.phase.can_transition_to(SessionPhase::Closed));
        inner.phase = SessionPhase::Closed;
        tracing::info!(match_id = %self.id, "session closed");
        true
    }

    /// Ends the session with `outcome` if it is in one of `allowed` phases.
    pub(crate) async fn end(&self, outcome: SessionOutcome, allowed: &[SessionPhase]) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        if !allowed.contains(&inner.phase) {
            return Err(match inner.phase {
                SessionPhase::Ending | SessionPhase::Closed => SessionError::Closed(self.id.clone()),
                phase => SessionError::InvalidPhase {
                    match_id: self.id.clone(),
                    phase,
                },
            });
        }
        self.conclude(&mut inner, outcome);
        Ok(())
    }

    /// Handles the loss of `handle`'s connection. Returns `true` if the
    /// session is closed afterwards.
    ///
    /// While waiting, the participant simply leaves (and an empty session
    /// ends, ABORTED, with nobody to notify). While active, the loss ends
    /// the session: the remaining participant gets the final snapshot with
    /// the lost one marked not-alive, then the outcome.
    pub(crate) async fn participant_lost(&self, handle: &Arc<ParticipantHandle>) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(index) = inner.participants.iter().position(|p| Arc::ptr_eq(p, handle)) else {
            return inner.phase == SessionPhase::Closed;
        };
        handle.mark_dead();

        match inner.phase {
            SessionPhase::Waiting => {
                inner.participants.remove(index);
                handle.unbind_session(&self.id);
                tracing::info!(match_id = %self.id, conn_id = %handle.connection_id(), "participant left");
                if inner.participants.is_empty() {
                    self.conclude(&mut inner, SessionOutcome::Aborted);
                }
            }
            SessionPhase::Active => {
                tracing::info!(match_id = %self.id, conn_id = %handle.connection_id(), "participant lost");
                self.conclude(&mut inner, SessionOutcome::Aborted);
            }
            SessionPhase::Ending | SessionPhase::Closed => {}
        }
        inner.phase == SessionPhase::Closed
    }

    pub(crate) async fn is_open(&self) -> bool {
        self.inner.lock().await.phase.is_open()
    }

    // -- Entry points for callers outside the registry --------------------

    /// Ends the session with ABORTED (from WAITING or ACTIVE) and removes it
    /// from its registry.
    pub async fn abort(self: &Arc<Self>) -> Result<(), SessionError> {
        self.end(SessionOutcome::Aborted, &[SessionPhase::Waiting, SessionPhase::Active])
            .await?;
        self.retire().await;
        Ok(())
    }

    /// Ends an ACTIVE session with SUCCESS and removes it from its registry.
    ///
    /// This is where gameplay-defined win conditions plug in.
    pub async fn mark_completed(self: &Arc<Self>) -> Result<(), SessionError> {
        self.end(SessionOutcome::Success, &[SessionPhase::Active]).await?;
        self.retire().await;
        Ok(())
    }

    /// Removes this session's registry entry. Must not be called with the
    /// session lock held.
    async fn retire(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_if_same(&self.id, self).await;
        }
    }
}
