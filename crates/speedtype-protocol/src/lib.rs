//! Wire protocol for the SpeedType race server.
//!
//! This crate defines what clients and the server say to each other:
//!
//! - **Events** ([`ClientEvent`], [`ServerEvent`]) and the values they
//!   carry ([`RoomId`], [`PlayerId`], [`RaceState`], [`LeaderboardEntry`]).
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how events become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (frames) → Protocol (events) → Race (rooms, players)
//! ```
//!
//! Every event is a JSON object tagged by an `"event"` field whose value
//! is the kebab-case event name, with camelCase payload fields:
//!
//! ```json
//! {"event":"progress-update","roomId":"9f2c41d07ab35e18","charsCorrect":12,"charsTotal":13}
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    ClientEvent, FinishReason, LeaderboardEntry, PlayerId, PlayerSnapshot,
    RaceState, RoomId, ServerEvent,
};
