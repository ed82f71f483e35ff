//! Race room configuration.

use std::time::Duration;

use crate::RaceError;

/// Settings for a race room.
///
/// All values are supplied by the server's configuration; nothing here
/// is hardcoded into the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceConfig {
    /// Joined players needed to start the countdown automatically.
    pub min_players: usize,

    /// Maximum players allowed in the room.
    pub max_players: usize,

    /// Time between entering countdown and the race going active.
    pub countdown: Duration,

    /// Maximum race duration; the race is finished forcibly after this.
    pub race_timeout: Duration,

    /// How long an empty (or finished) room lingers before it is retired.
    pub grace_period: Duration,

    /// Upper bound on leaderboard broadcasts per second for one room.
    pub broadcast_rate_hz: u32,

    /// Lets a player who dropped mid-race resume with their rejoin token.
    pub allow_rejoin: bool,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            min_players: 2,
            max_players: 8,
            countdown: Duration::from_secs(3),
            race_timeout: Duration::from_secs(120),
            grace_period: Duration::from_secs(30),
            broadcast_rate_hz: 10,
            allow_rejoin: false,
        }
    }
}

impl RaceConfig {
    /// Largest accepted `max_players`. Each member has at most one
    /// command queued at its room, so this keeps a room's queue from
    /// filling up.
    pub const MAX_ROOM_SIZE: usize = 100;

    /// Highest accepted broadcast rate.
    pub const MAX_BROADCAST_RATE_HZ: u32 = 60;

    /// Longest accepted display name, in characters.
    pub const MAX_NAME_CHARS: usize = 32;

    /// Solo practice: the countdown starts as soon as one player joins.
    pub fn solo() -> Self {
        Self {
            min_players: 1,
            ..Self::default()
        }
    }

    /// Checks the settings are consistent.
    ///
    /// # Errors
    /// Returns [`RaceError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), RaceError> {
        if self.min_players == 0 {
            return Err(RaceError::InvalidConfig(
                "min_players must be at least 1".into(),
            ));
        }
        if self.max_players < self.min_players {
            return Err(RaceError::InvalidConfig(format!(
                "max_players ({}) is below min_players ({})",
                self.max_players, self.min_players
            )));
        }
        if self.max_players > Self::MAX_ROOM_SIZE {
            return Err(RaceError::InvalidConfig(format!(
                "max_players must be at most {}",
                Self::MAX_ROOM_SIZE
            )));
        }
        if self.countdown.is_zero() {
            return Err(RaceError::InvalidConfig(
                "countdown must be non-zero".into(),
            ));
        }
        if self.race_timeout.is_zero() {
            return Err(RaceError::InvalidConfig(
                "race_timeout must be non-zero".into(),
            ));
        }
        if !(1..=Self::MAX_BROADCAST_RATE_HZ).contains(&self.broadcast_rate_hz)
        {
            return Err(RaceError::InvalidConfig(format!(
                "broadcast_rate_hz must be within 1..={}",
                Self::MAX_BROADCAST_RATE_HZ
            )));
        }
        Ok(())
    }
}
