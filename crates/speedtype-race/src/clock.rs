//! The server's race clock.

use tokio::time::Instant;

/// Monotonic millisecond clock shared by every room in the process.
///
/// All timestamps on the wire (start timestamp, `serverTime`, finish
/// times) are milliseconds since this clock's origin. Built on Tokio's
/// `Instant` so paused-time tests drive it deterministically.
#[derive(Debug, Clone, Copy)]
pub struct RaceClock {
    origin: Instant,
}

impl RaceClock {
    /// Starts a clock at zero.
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the origin.
    pub fn now_ms(&self) -> u64 {
        self.at(Instant::now())
    }

    /// Milliseconds from the origin to `instant` (0 if it precedes it).
    pub fn at(&self, instant: Instant) -> u64 {
        instant.saturating_duration_since(self.origin).as_millis() as u64
    }
}

impl Default for RaceClock {
    fn default() -> Self {
        Self::start()
    }
}
