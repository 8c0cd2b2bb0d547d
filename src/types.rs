//! Shared types for the LASTCLICK room engine.
//!
//! These types form the data model used across all modules: identifiers,
//! lifecycle enums, inbound commands, debug commands, public room views,
//! and the engine error taxonomy. They are kept free of engine logic so
//! that the engine, the event bus, and external collaborators can all
//! depend on them without circular references.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Player identifier. Owned by the external player-account collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub i64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id of the form `alpha_t1_<uuid>`.
    pub fn generate(kind: RoomKind, tier: u8) -> Self {
        Self(format!("{kind}_t{tier}_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Game-type tag of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Alpha,
    Blitz,
}

impl RoomKind {
    /// All known kinds (useful for seeding).
    pub const ALL: &'static [RoomKind] = &[RoomKind::Alpha, RoomKind::Blitz];
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomKind::Alpha => write!(f, "alpha"),
            RoomKind::Blitz => write!(f, "blitz"),
        }
    }
}

/// Lifecycle state of a room. Rounds cycle through these forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundState {
    WaitingForPlayers,
    Countdown,
    SurvivalPhase,
    Liquidated,
    RoundComplete,
}

impl RoundState {
    /// Coarse phase name shown in room listings.
    pub fn phase(&self) -> &'static str {
        match self {
            RoundState::WaitingForPlayers => "waiting",
            RoundState::Countdown => "active",
            RoundState::SurvivalPhase | RoundState::Liquidated => "survival",
            RoundState::RoundComplete => "finished",
        }
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundState::WaitingForPlayers => write!(f, "WAITING_FOR_PLAYERS"),
            RoundState::Countdown => write!(f, "COUNTDOWN"),
            RoundState::SurvivalPhase => write!(f, "SURVIVAL_PHASE"),
            RoundState::Liquidated => write!(f, "LIQUIDATED"),
            RoundState::RoundComplete => write!(f, "ROUND_COMPLETE"),
        }
    }
}

/// Membership state of a player inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberState {
    Joined,
    Active,
    Eliminated,
    Winner,
    Top3,
    Left,
    Disconnected,
}

impl MemberState {
    /// Whether a member in this state ends the round without a payout slot
    /// and therefore receives consolation shards.
    pub fn earns_consolation(&self) -> bool {
        matches!(
            self,
            MemberState::Eliminated | MemberState::Left | MemberState::Disconnected
        )
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberState::Joined => write!(f, "JOINED"),
            MemberState::Active => write!(f, "ACTIVE"),
            MemberState::Eliminated => write!(f, "ELIMINATED"),
            MemberState::Winner => write!(f, "WINNER"),
            MemberState::Top3 => write!(f, "TOP3"),
            MemberState::Left => write!(f, "LEFT"),
            MemberState::Disconnected => write!(f, "DISCONNECTED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Inbound player command type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    JoinRoom,
    Pulse,
    LeaveRoom,
    Disconnect,
    Reconnect,
}

/// A command sent by (or on behalf of) a player.
///
/// `timestamp_ms` is the sender's clock and is kept for diagnostics; the
/// engine applies every command at its own server time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub player_id: PlayerId,
    pub room_id: RoomId,
    pub timestamp_ms: i64,
}

impl Command {
    pub fn new(kind: CommandKind, player_id: PlayerId, room_id: RoomId, timestamp_ms: i64) -> Self {
        Self {
            kind,
            player_id,
            room_id,
            timestamp_ms,
        }
    }

    pub fn join(player_id: PlayerId, room_id: RoomId, timestamp_ms: i64) -> Self {
        Self::new(CommandKind::JoinRoom, player_id, room_id, timestamp_ms)
    }

    pub fn pulse(player_id: PlayerId, room_id: RoomId, timestamp_ms: i64) -> Self {
        Self::new(CommandKind::Pulse, player_id, room_id, timestamp_ms)
    }

    pub fn leave(player_id: PlayerId, room_id: RoomId, timestamp_ms: i64) -> Self {
        Self::new(CommandKind::LeaveRoom, player_id, room_id, timestamp_ms)
    }

    pub fn disconnect(player_id: PlayerId, room_id: RoomId, timestamp_ms: i64) -> Self {
        Self::new(CommandKind::Disconnect, player_id, room_id, timestamp_ms)
    }

    pub fn reconnect(player_id: PlayerId, room_id: RoomId, timestamp_ms: i64) -> Self {
        Self::new(CommandKind::Reconnect, player_id, room_id, timestamp_ms)
    }
}

/// Operator/test commands. Not part of normal play.
///
/// Commands with an optional `room_id` apply to every eligible room when
/// it is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebugCommand {
    ForceLiquidation { room_id: Option<RoomId> },
    ForceDisconnect { player_id: PlayerId },
    ForceTop3 { room_id: Option<RoomId> },
    InjectLatency { lag_ms: i64 },
    MassElimination { count: usize, room_id: Option<RoomId> },
    SetPulseWindow { window_ms: Option<i64> },
    ForceCountdownEnd { room_id: Option<RoomId> },
}

// ---------------------------------------------------------------------------
// Public room views
// ---------------------------------------------------------------------------

/// Public summary of a room, as shown in the room list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub kind: RoomKind,
    pub tier: u8,
    pub state: RoundState,
    pub phase: String,
    pub members: usize,
    pub pool: u64,
}

/// Full snapshot of one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub kind: RoomKind,
    pub tier: u8,
    pub state: RoundState,
    pub round: u64,
    pub pool: u64,
    pub alive: usize,
    pub total: usize,
    /// Countdown remaining during COUNTDOWN, survival remaining otherwise.
    pub timer_ms: i64,
    pub margin_ratio: f64,
    pub volatility_mul: f64,
    pub winner_id: Option<PlayerId>,
    pub top3: Vec<PlayerId>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons the engine rejects a command or a configuration request.
///
/// None of these are fatal: the scheduler either ignores the command or
/// turns the error into a targeted `error` event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Unknown room: {0}")]
    UnknownRoom(RoomId),

    #[error("Room already exists: {0}")]
    DuplicateRoom(RoomId),

    #[error("Unknown tier: {0}")]
    UnknownTier(u8),

    #[error("Player {0} is not seated in any room")]
    NotSeated(PlayerId),

    #[error("Player {player} is already seated in room {room}")]
    AlreadySeated { player: PlayerId, room: RoomId },

    #[error("Room {room} is not accepting players ({state})")]
    JoinClosed { room: RoomId, state: RoundState },

    #[error("Room {room} is full ({max} players)")]
    RoomFull { room: RoomId, max: usize },

    #[error("Insufficient stars for player {player}: need {needed}, have {available}")]
    InsufficientFunds {
        player: PlayerId,
        needed: u64,
        available: u64,
    },

    #[error("Player {player} cannot act in state {state}")]
    InvalidMemberState { player: PlayerId, state: MemberState },

    #[error("Room {room} is not live ({state})")]
    RoundNotLive { room: RoomId, state: RoundState },

    #[error("Engine service has stopped")]
    ServiceStopped,
}

impl EngineError {
    /// Whether this rejection should be reported to the player rather than
    /// silently ignored.
    pub fn is_player_facing(&self) -> bool {
        matches!(self, EngineError::InsufficientFunds { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
