//! Session configuration and state machine.

use std::fmt;
use std::time::Duration;

/// Settings shared by every session a registry creates.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Broadcast period while a session is active.
    pub tick_interval_ms: u64,

    /// Random delay (0–max µs) added before a session's first tick.
    pub initial_jitter_us: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            initial_jitter_us: 0,
        }
    }
}

impl SessionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// SessionPhase
// ---------------------------------------------------------------------------

/// The lifecycle phase of a session.
///
/// ```text
/// Waiting ──▶ Active ──▶ Ending ──▶ Closed
///    │                     ▲
///    └─────────────────────┘
/// ```
///
/// - **Waiting**: zero or one participant, no timer.
/// - **Active**: two participants, exactly one tick timer running.
/// - **Ending**: the outcome is decided, the final broadcast is going out.
/// - **Closed**: terminal. Connections closed, participants released.
///
/// Ending is always entered and left within one critical section, so
/// outside observers normally see Waiting, Active or Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Waiting,
    Active,
    Ending,
    Closed,
}

impl SessionPhase {
    /// Returns `true` if the session can still gain participants or end.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Waiting | Self::Active)
    }

    /// Returns `true` if transitioning to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Waiting, Self::Active)
                | (Self::Waiting, Self::Ending)
                | (Self::Active, Self::Ending)
                | (Self::Ending, Self::Closed)
        )
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "Waiting"),
            Self::Active => write!(f, "Active"),
            Self::Ending => write!(f, "Ending"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionOutcome
// ---------------------------------------------------------------------------

/// How a session ended. Set once, on entry to [`SessionPhase::Ending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionOutcome {
    #[default]
    Unset,
    Success,
    Aborted,
}

impl SessionOutcome {
    /// The `success` flag clients receive in the Outcome message.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => write!(f, "Unset"),
            Self::Success => write!(f, "Success"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}
