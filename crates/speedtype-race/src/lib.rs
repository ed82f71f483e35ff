//! Race rooms for SpeedType.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns its
//! players, its race state machine and its timers. The [`RaceStore`]
//! keeps handles to the live rooms and enforces one room per player.
//!
//! # Key types
//!
//! - [`RaceStore`]: creates/retires rooms, routes players
//! - [`RoomHandle`]: send commands to a running room actor
//! - [`RaceConfig`]: player limits and timer durations
//! - [`leaderboard::compute`]: deterministic ranking of a room's players
//! - [`PassageSource`]: where race text comes from

mod clock;
mod config;
mod error;
pub mod leaderboard;
mod pacer;
mod passage;
mod player;
mod room;
mod store;

pub use clock::RaceClock;
pub use config::RaceConfig;
pub use error::RaceError;
pub use passage::{FixedPassage, Passage, PassageSource, QuoteList};
pub use player::{Player, Progress};
pub use room::{JoinTicket, PlayerSender, RoomHandle, RoomInfo};
pub use store::RaceStore;
