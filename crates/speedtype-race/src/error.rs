//! Error types for the race layer.

use speedtype_protocol::{PlayerId, RoomId};

/// Errors that can occur during room and race operations.
#[derive(Debug, thiserror::Error)]
pub enum RaceError {
    /// The room cannot be created: inconsistent settings or no passage.
    #[error("invalid room config: {0}")]
    InvalidConfig(String),

    /// The room does not exist (never created, or already retired).
    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    /// The player cap is reached.
    #[error("room {0} is full")]
    RoomFull(RoomId),

    /// The race is committed (countdown or later); no new joins.
    #[error("race in room {0} has already started")]
    RaceAlreadyActive(RoomId),

    /// A progress update was older than what is already recorded.
    /// Logged, never surfaced to the client.
    #[error("stale progress from player {0}: {1}")]
    StaleProgress(PlayerId, &'static str),

    /// The race hit its maximum duration and was finished forcibly.
    #[error("race in room {0} timed out")]
    Timeout(RoomId),

    /// The player is already in a room (this one or another).
    #[error("player {0} already in room {1}")]
    AlreadyInRoom(PlayerId, RoomId),

    /// The player is not a member of the room.
    #[error("player {0} not in room {1}")]
    NotInRoom(PlayerId, RoomId),

    /// Only the host may start the race early.
    #[error("player {0} is not the host of room {1}")]
    NotHost(PlayerId, RoomId),

    /// The room's command queue is closed (room shutting down).
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),
}
