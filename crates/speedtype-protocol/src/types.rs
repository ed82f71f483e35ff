//! Event types for the realtime wire format.
//!
//! Everything in this module travels between browser and server. The
//! serde attributes pin the exact JSON shape the frontend expects, so the
//! tests below assert on JSON values rather than on round-trips.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identity of a player, equal to the transport's connection id.
///
/// `#[serde(transparent)]` makes `PlayerId(42)` serialize as `42`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// Opaque identifier of a race room.
///
/// Generated server-side from a random source; clients only echo it back.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wraps an identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
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
// RaceState
// ---------------------------------------------------------------------------

/// The lifecycle state of a race room.
///
/// Transitions only move forward, one step at a time:
///
/// ```text
/// waiting → countdown → active → finished
/// ```
///
/// A finished room is destroyed, never reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaceState {
    /// Accepting joins, no passage activity.
    Waiting,
    /// Start is committed; clients count down. No joins.
    Countdown,
    /// Progress updates are accepted.
    Active,
    /// Results are frozen.
    Finished,
}

impl RaceState {
    /// Returns `true` if new players may join.
    pub fn is_joinable(&self) -> bool {
        matches!(self, Self::Waiting)
    }

    /// Returns `true` if progress updates are accepted.
    pub fn accepts_progress(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// The only state reachable from this one, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Waiting => Some(Self::Countdown),
            Self::Countdown => Some(Self::Active),
            Self::Active => Some(Self::Finished),
            Self::Finished => None,
        }
    }

    /// Returns `true` if moving to `target` is a legal single step.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }
}

impl fmt::Display for RaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Waiting => "waiting",
            Self::Countdown => "countdown",
            Self::Active => "active",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Payload structs
// ---------------------------------------------------------------------------

/// A player as shown in the room lobby and progress bars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub player_id: PlayerId,
    pub display_name: String,
    pub chars_correct: u32,
    pub chars_total: u32,
    pub finished: bool,
}

/// One ranked row of the leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// 1-based position.
    pub rank: u32,
    pub player_id: PlayerId,
    pub display_name: String,
    pub chars_correct: u32,
    pub chars_total: u32,
    pub errors: u32,
    pub finished: bool,
    /// Milliseconds from race start to completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_time_ms: Option<u64>,
    /// Words per minute (5 characters per word), one decimal.
    pub wpm: f64,
    /// Correct characters as a percentage of typed characters, one decimal.
    pub accuracy: f64,
}

/// Why a race ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// Every connected player completed the passage.
    AllFinished,
    /// The maximum race duration elapsed.
    Timeout,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Events a browser sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Join a specific room, or any open room (creating one if needed)
    /// when `room_id` is absent.
    JoinRoom {
        #[serde(default)]
        room_id: Option<RoomId>,
        display_name: String,
        /// Token from an earlier `room-joined`, used to resume a race
        /// after a dropped connection when the server allows it.
        #[serde(default)]
        rejoin_token: Option<String>,
    },

    /// Host asks to start before the player threshold is reached.
    StartRace { room_id: RoomId },

    /// Typing progress. The server stamps the receive time.
    ProgressUpdate {
        room_id: RoomId,
        chars_correct: u32,
        chars_total: u32,
    },

    LeaveRoom { room_id: RoomId },
}

/// Events the server sends to browsers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Sent only to the joining player.
    RoomJoined {
        room_id: RoomId,
        player_id: PlayerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rejoin_token: Option<String>,
    },

    /// Lobby/lifecycle snapshot, broadcast on every membership or
    /// state change.
    RoomState {
        room_id: RoomId,
        state: RaceState,
        players: Vec<PlayerSnapshot>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passage: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host_id: Option<PlayerId>,
        /// Server clock (ms) when the countdown ends.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        countdown_ends_at: Option<u64>,
        /// Server clock (ms) when this snapshot was taken.
        server_time: u64,
    },

    /// Countdown elapsed. `start_timestamp` is on the server clock and is
    /// the reference every client computes elapsed time from.
    RaceStarted {
        room_id: RoomId,
        start_timestamp: u64,
        passage: String,
    },

    LeaderboardUpdate {
        room_id: RoomId,
        entries: Vec<LeaderboardEntry>,
    },

    RaceFinished {
        room_id: RoomId,
        final_results: Vec<LeaderboardEntry>,
        reason: FinishReason,
    },

    /// A request was rejected. `code` follows HTTP conventions.
    Error { code: u16, message: String },
}

// =========================================================================
// Tests
// =========================================================================
