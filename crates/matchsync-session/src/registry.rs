//! Session registry: maps match ids to live sessions and routes
//! participants into them.

use std::collections::HashMap;
use std::sync::Arc;

use matchsync_participant::ParticipantHandle;
use matchsync_protocol::MatchId;
use tokio::sync::Mutex;

use crate::session::Session;
use crate::{SessionConfig, SessionError, SessionOutcome, SessionPhase};

/// Maps each match id to at most one live [`Session`].
///
/// Cheap to clone; clones share the same table. Create one per server and
/// hand clones to every connection task.
///
/// Registration and deregistration hold the table lock for their whole
/// duration, so concurrent joins for a never-seen match id always end up in
/// the same session.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    shared: Arc<RegistryShared>,
}

#[derive(Debug)]
pub(crate) struct RegistryShared {
    sessions: Mutex<HashMap<MatchId, Arc<Session>>>,
    config: SessionConfig,
}

impl RegistryShared {
    /// Drops the entry for `id` if it still refers to `session`.
    pub(crate) async fn remove_if_same(&self, id: &MatchId, session: &Session) {
        let mut sessions = self.sessions.lock().await;
        if sessions
            .get(id)
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), session))
        {
            sessions.remove(id);
            tracing::debug!(match_id = %id, remaining = sessions.len(), "session removed");
        }
    }
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                sessions: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Puts `handle` into the session for `match_id`, creating the session
    /// if none is live.
    ///
    /// An entry that has already ended counts as absent and is replaced.
    ///
    /// # Errors
    /// - [`SessionError::Unidentified`] if the handle never authenticated.
    /// - [`SessionError::Disconnected`] if its connection is gone or closing.
    /// - [`SessionError::AlreadyRegistered`] if it is already in this session.
    /// - [`SessionError::AlreadyInSession`] if it is in a different session.
    /// - [`SessionError::CapacityExceeded`] if the session is full.
    pub async fn register_participant(
        &self,
        handle: &Arc<ParticipantHandle>,
        match_id: MatchId,
    ) -> Result<Arc<Session>, SessionError> {
        if handle.identity().is_none() {
            return Err(SessionError::Unidentified);
        }
        if let Some(current) = handle.session_id() {
            return Err(if current == match_id {
                SessionError::AlreadyRegistered(current)
            } else {
                SessionError::AlreadyInSession(current)
            });
        }
        // Checked after the binding: `conclude` marks a handle dead before
        // unbinding it.
        if !handle.is_alive() || handle.is_closed() {
            return Err(SessionError::Disconnected);
        }

        let mut sessions = self.shared.sessions.lock().await;

        let mut existing = sessions.get(&match_id).cloned();
        if let Some(session) = &existing {
            if !session.is_open().await {
                existing = None;
            }
        }
        let session = match existing {
            Some(session) => session,
            None => {
                let session = Session::new(
                    match_id.clone(),
                    self.shared.config.clone(),
                    Arc::downgrade(&self.shared),
                );
                if sessions.insert(match_id.clone(), Arc::clone(&session)).is_some() {
                    tracing::debug!(%match_id, "replaced ended session");
                }
                tracing::info!(%match_id, sessions = sessions.len(), "session created");
                session
            }
        };

        if let Err(e) = session.admit(handle).await {
            tracing::debug!(%match_id, error = %e, "join rejected");
            return Err(e);
        }
        Ok(session)
    }

    /// Removes `handle` from its session, if any. Called when the
    /// participant's connection is gone.
    ///
    /// A no-op when the handle is not in a session.
    pub async fn deregister_participant(&self, handle: &Arc<ParticipantHandle>) {
        let Some(match_id) = handle.session_id() else {
            return;
        };

        let mut sessions = self.shared.sessions.lock().await;
        let Some(session) = sessions.get(&match_id).cloned() else {
            handle.unbind_session(&match_id);
            return;
        };
        if session.participant_lost(handle).await {
            sessions.remove(&match_id);
            tracing::debug!(%match_id, remaining = sessions.len(), "session removed");
        }
    }

    /// Ends `handle`'s session with ABORTED, from WAITING or ACTIVE.
    pub async fn abort(&self, handle: &Arc<ParticipantHandle>) -> Result<(), SessionError> {
        let match_id = handle.session_id().ok_or(SessionError::NotInSession)?;
        self.end(
            &match_id,
            SessionOutcome::Aborted,
            &[SessionPhase::Waiting, SessionPhase::Active],
        )
        .await
    }

    /// Ends the ACTIVE session `match_id` with SUCCESS.
    pub async fn mark_completed(&self, match_id: &MatchId) -> Result<(), SessionError> {
        self.end(match_id, SessionOutcome::Success, &[SessionPhase::Active])
            .await
    }

    async fn end(
        &self,
        match_id: &MatchId,
        outcome: SessionOutcome,
        allowed: &[SessionPhase],
    ) -> Result<(), SessionError> {
        let mut sessions = self.shared.sessions.lock().await;
        let session = sessions
            .get(match_id)
            .cloned()
            .ok_or(SessionError::NotInSession)?;
        session.end(outcome, allowed).await?;
        sessions.remove(match_id);
        Ok(())
    }

    /// Looks up the session registered for `match_id`.
    pub async fn get(&self, match_id: &MatchId) -> Option<Arc<Session>> {
        self.shared.sessions.lock().await.get(match_id).cloned()
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.shared.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Ends every live session with ABORTED and empties the table.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.shared.sessions.lock().await.drain().collect();
        let count = drained.len();
        for (_, session) in drained {
            let _ = session
                .end(
                    SessionOutcome::Aborted,
                    &[SessionPhase::Waiting, SessionPhase::Active],
                )
                .await;
        }
        tracing::info!(sessions = count, "session registry shut down");
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
