//! Broadcast pacing: coalesces leaderboard updates per room.
//!
//! Every accepted keystroke marks the leaderboard dirty, but at most one
//! leaderboard broadcast goes out per pacing interval. Bursts between two
//! flushes collapse into a single broadcast of the latest state.
//!
//! The pacer is awaited inside the room actor's `select!` loop:
//!
//! ```ignore
//! tokio::select! {
//!     Some(cmd) = rx.recv() => { /* may call pacer.mark_dirty() */ }
//!     _ = pacer.wait_for_flush() => broadcast_leaderboard(),
//! }
//! ```

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::trace;

pub(crate) struct BroadcastPacer {
    interval: Duration,
    /// Earliest instant the next flush may fire.
    next_allowed: Instant,
    dirty: bool,
    /// Updates folded into the pending flush, for tracing.
    coalesced: u64,
}

impl BroadcastPacer {
    /// `rate_hz` must be non-zero (enforced by `RaceConfig::validate`).
    pub(crate) fn new(rate_hz: u32) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / rate_hz.max(1) as f64),
            next_allowed: Instant::now(),
            dirty: false,
            coalesced: 0,
        }
    }

    /// Records that the leaderboard changed.
    pub(crate) fn mark_dirty(&mut self) {
        if self.dirty {
            self.coalesced += 1;
        }
        self.dirty = true;
    }

    /// Drops any pending flush (the race ended and results went out).
    pub(crate) fn clear(&mut self) {
        self.dirty = false;
        self.coalesced = 0;
    }

    #[cfg(test)]
    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Resolves when a flush is both pending and allowed.
    ///
    /// Pends forever while nothing is dirty. Cancel-safe: state only
    /// changes after the sleep completes.
    pub(crate) async fn wait_for_flush(&mut self) {
        if !self.dirty {
            std::future::pending::<()>().await;
        }
        time::sleep_until(self.next_allowed).await;

        trace!(coalesced = self.coalesced, "leaderboard flush");
        self.dirty = false;
        self.coalesced = 0;
        self.next_allowed = Instant::now() + self.interval;
    }
}
