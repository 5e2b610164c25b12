//! Message types for matchsync's wire format.
//!
//! Every frame is `[opcode: u16 little-endian][body]`. The opcode picks the
//! message kind; the body is that message's payload encoded with the
//! configured [`Codec`]. Messages without fields (Abort, KeepAlive) have an
//! empty body.
//!
//! Opcode values are fixed by the deployed client and must never be
//! renumbered.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Codec, ProtocolError};

/// Size of the opcode header in front of every body.
pub const OPCODE_LEN: usize = 2;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// The identifier a client claims when it joins, trusted once its token has
/// been verified.
///
/// Serialized as the bare integer (`#[serde(transparent)]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U-{}", self.0)
    }
}

/// External match identifier. Two clients presenting the same id are put in
/// the same session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(String);

impl MatchId {
    /// Wraps a raw identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MatchId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MatchId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

/// The first field of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Reserved; never valid on the wire.
    Invalid = 0,
    Join = 1,
    /// Join acknowledgement, also the generic ack for PositionUpdate, Abort
    /// and KeepAlive.
    JoinAck = 2,
    Abort = 3,
    PositionUpdate = 4,
    StateSnapshot = 5,
    MatchConfirmed = 6,
    Outcome = 7,
    KeepAlive = 8,
}

impl Opcode {
    /// Returns the numeric wire value.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Invalid,
            1 => Self::Join,
            2 => Self::JoinAck,
            3 => Self::Abort,
            4 => Self::PositionUpdate,
            5 => Self::StateSnapshot,
            6 => Self::MatchConfirmed,
            7 => Self::Outcome,
            8 => Self::KeepAlive,
            other => return Err(ProtocolError::UnknownOpcode(other)),
        })
    }
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// Body of a Join frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// `None` or an empty string both mean "no match id"; such a join is
    /// dropped by the server.
    pub match_id: Option<String>,
    pub external_token: String,
    pub user_id: UserId,
}

/// Body of a PositionUpdate frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub x: f32,
    pub y: f32,
}

/// Every message a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Join(JoinRequest),
    PositionUpdate(PositionUpdate),
    Abort,
    KeepAlive,
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// Body of a JoinAck frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinAck {
    pub success: bool,
}

/// Sent once to both participants when a session becomes active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchConfirmed {
    pub match_id: MatchId,
    pub starting: bool,
    pub tick_interval_ms: u32,
    /// Identifiers of both participants, in join order.
    pub participants: Vec<UserId>,
}

/// One participant's entry in a [`StateSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticipantState {
    pub identity: UserId,
    pub x: f32,
    pub y: f32,
    pub alive: bool,
}

/// Periodic (and final) broadcast of the shared session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Milliseconds since the session became active.
    pub elapsed_ms: u64,
    pub participants: Vec<ParticipantState>,
}

/// Terminal result of a session, sent once before the connection closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
}

/// Every message the server may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    JoinAck(JoinAck),
    MatchConfirmed(MatchConfirmed),
    StateSnapshot(StateSnapshot),
    Outcome(Outcome),
}

impl ServerMessage {
    /// The acknowledgement used for every accepted request.
    pub fn ack(success: bool) -> Self {
        Self::JoinAck(JoinAck { success })
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// A message that can be written to and read from a single frame.
pub trait WireMessage: Sized {
    /// The opcode this message is framed with.
    fn opcode(&self) -> Opcode;

    /// Encodes the whole frame: opcode header followed by the body.
    fn encode<C: Codec>(&self, codec: &C) -> Result<Vec<u8>, ProtocolError>;

    /// Decodes a whole frame.
    ///
    /// # Errors
    /// [`ProtocolError::Truncated`] if the header is incomplete,
    /// [`ProtocolError::UnknownOpcode`] for an unassigned opcode,
    /// [`ProtocolError::UnexpectedOpcode`] for an opcode that belongs to the
    /// other direction, or the codec's error for a malformed body.
    fn decode<C: Codec>(codec: &C, frame: &[u8]) -> Result<Self, ProtocolError>;
}

fn split_header(frame: &[u8]) -> Result<(Opcode, &[u8]), ProtocolError> {
    if frame.len() < OPCODE_LEN {
        return Err(ProtocolError::Truncated { len: frame.len() });
    }
    let (header, body) = frame.split_at(OPCODE_LEN);
    let opcode = Opcode::try_from(u16::from_le_bytes([header[0], header[1]]))?;
    Ok((opcode, body))
}

fn with_header(opcode: Opcode, body: Vec<u8>) -> Vec<u8> {
    let mut frame = Vec::with_capacity(OPCODE_LEN + body.len());
    frame.extend_from_slice(&opcode.as_u16().to_le_bytes());
    frame.extend_from_slice(&body);
    frame
}

impl WireMessage for ClientMessage {
    fn opcode(&self) -> Opcode {
        match self {
            Self::Join(_) => Opcode::Join,
            Self::PositionUpdate(_) => Opcode::PositionUpdate,
            Self::Abort => Opcode::Abort,
            Self::KeepAlive => Opcode::KeepAlive,
        }
    }

    fn encode<C: Codec>(&self, codec: &C) -> Result<Vec<u8>, ProtocolError> {
        let body = match self {
            Self::Join(join) => codec.encode(join)?,
            Self::PositionUpdate(pos) => codec.encode(pos)?,
            Self::Abort | Self::KeepAlive => Vec::new(),
        };
        Ok(with_header(self.opcode(), body))
    }

    fn decode<C: Codec>(codec: &C, frame: &[u8]) -> Result<Self, ProtocolError> {
        let (opcode, body) = split_header(frame)?;
        match opcode {
            Opcode::Join => Ok(Self::Join(codec.decode(body)?)),
            Opcode::PositionUpdate => Ok(Self::PositionUpdate(codec.decode(body)?)),
            Opcode::Abort => Ok(Self::Abort),
            Opcode::KeepAlive => Ok(Self::KeepAlive),
            other => Err(ProtocolError::UnexpectedOpcode(other)),
        }
    }
}

impl WireMessage for ServerMessage {
    fn opcode(&self) -> Opcode {
        match self {
            Self::JoinAck(_) => Opcode::JoinAck,
            Self::MatchConfirmed(_) => Opcode::MatchConfirmed,
            Self::StateSnapshot(_) => Opcode::StateSnapshot,
            Self::Outcome(_) => Opcode::Outcome,
        }
    }

    fn encode<C: Codec>(&self, codec: &C) -> Result<Vec<u8>, ProtocolError> {
        let body = match self {
            Self::JoinAck(ack) => codec.encode(ack)?,
            Self::MatchConfirmed(confirmed) => codec.encode(confirmed)?,
            Self::StateSnapshot(snapshot) => codec.encode(snapshot)?,
            Self::Outcome(outcome) => codec.encode(outcome)?,
        };
        Ok(with_header(self.opcode(), body))
    }

    fn decode<C: Codec>(codec: &C, frame: &[u8]) -> Result<Self, ProtocolError> {
        let (opcode, body) = split_header(frame)?;
        match opcode {
            Opcode::JoinAck => Ok(Self::JoinAck(codec.decode(body)?)),
            Opcode::MatchConfirmed => Ok(Self::MatchConfirmed(codec.decode(body)?)),
            Opcode::StateSnapshot => Ok(Self::StateSnapshot(codec.decode(body)?)),
            Opcode::Outcome => Ok(Self::Outcome(codec.decode(body)?)),
            other => Err(ProtocolError::UnexpectedOpcode(other)),
        }
    }
}
