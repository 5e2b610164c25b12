//! Session lifecycle management for matchsync.
//!
//! A session is one matched pair of participants. It waits for its second
//! participant, then broadcasts the shared state on a fixed tick until it
//! ends, and finally tells both sides how it ended and closes their
//! connections.
//!
//! # Key types
//!
//! - [`SessionRegistry`] — match id → session table, the only way in
//! - [`Session`] — participant slots, phase machine, tick broadcast
//! - [`SessionPhase`] / [`SessionOutcome`] — lifecycle state
//! - [`SessionConfig`] — tick settings shared by every session

mod config;
mod error;
mod registry;
mod session;

pub use config::{SessionConfig, SessionOutcome, SessionPhase};
pub use error::SessionError;
pub use registry::SessionRegistry;
pub use session::{SESSION_CAPACITY, Session};
