//! A player in a race room and their typing progress.

use speedtype_protocol::{PlayerId, PlayerSnapshot};

use crate::{RaceConfig, RaceError};

/// Live typing progress of one player.
///
/// All timestamps are on the [`RaceClock`](crate::RaceClock).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    /// Characters typed correctly (never decreases).
    pub chars_correct: u32,
    /// Characters typed in total, including mistakes.
    pub chars_total: u32,
    /// `chars_total - chars_correct`.
    pub errors: u32,
    /// Milliseconds from race start to the last accepted update.
    pub elapsed_ms: u64,
    /// When the last accepted update arrived. Breaks ties between
    /// players at the same position.
    pub updated_at: Option<u64>,
    /// When the player completed the passage.
    pub finished_at: Option<u64>,
}

impl Progress {
    /// Returns `true` once the passage is complete.
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// A member of a race room.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    /// When the player joined (room clock).
    pub joined_at: u64,
    pub progress: Progress,
}

impl Player {
    /// Creates a player with a cleaned-up display name.
    pub fn new(id: PlayerId, display_name: &str, joined_at: u64) -> Self {
        Self {
            id,
            display_name: clean_name(id, display_name),
            joined_at,
            progress: Progress::default(),
        }
    }

    /// Applies a progress report received at `at`.
    ///
    /// `chars_correct` is clamped to the passage length and `chars_total`
    /// never drops below `chars_correct`. Returns `true` if this report
    /// completed the passage.
    ///
    /// # Errors
    /// [`RaceError::StaleProgress`] if the report predates the race start,
    /// arrives after the player finished, or moves `chars_correct`
    /// backwards. The recorded progress is left untouched.
    pub fn record_progress(
        &mut self,
        chars_correct: u32,
        chars_total: u32,
        at: u64,
        started_at: u64,
        passage_len: u32,
    ) -> Result<bool, RaceError> {
        if at < started_at {
            return Err(RaceError::StaleProgress(self.id, "before race start"));
        }
        if self.progress.is_finished() {
            return Err(RaceError::StaleProgress(self.id, "already finished"));
        }

        let correct = chars_correct.min(passage_len);
        if correct < self.progress.chars_correct {
            return Err(RaceError::StaleProgress(self.id, "progress went backwards"));
        }

        let progress = &mut self.progress;
        progress.updated_at = Some(at);
        progress.chars_correct = correct;
        progress.chars_total = chars_total.max(correct).max(progress.chars_total);
        progress.errors = progress.chars_total - correct;
        progress.elapsed_ms = at - started_at;

        if correct == passage_len {
            progress.finished_at = Some(at);
            return Ok(true);
        }
        Ok(false)
    }

    /// Lobby/progress-bar view of this player.
    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            player_id: self.id,
            display_name: self.display_name.clone(),
            chars_correct: self.progress.chars_correct,
            chars_total: self.progress.chars_total,
            finished: self.progress.is_finished(),
        }
    }
}

/// Trims the name, caps its length, and substitutes a default when blank.
fn clean_name(id: PlayerId, name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return format!("Player {}", id.0);
    }
    trimmed.chars().take(RaceConfig::MAX_NAME_CHARS).collect()
}
