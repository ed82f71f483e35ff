//! # SpeedType
//!
//! Realtime multiplayer typing-race server.
//!
//! Players connect over WebSocket, get grouped into race rooms, receive a
//! shared passage after a countdown, and stream their typing progress.
//! The server owns every room's lifecycle and broadcasts a paced live
//! leaderboard until the race finishes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use speedtype::prelude::*;
//!
//! # async fn run() -> Result<(), SpeedTypeError> {
//! let config = ServerConfig::from_env()?;
//! let server = SpeedTypeServer::builder().config(config).build().await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::{ConfigError, ServerConfig};
pub use error::SpeedTypeError;
pub use server::{SpeedTypeServer, SpeedTypeServerBuilder};

pub mod prelude {
    pub use crate::{
        ConfigError, ServerConfig, SpeedTypeError, SpeedTypeServer,
        SpeedTypeServerBuilder,
    };
    pub use speedtype_protocol::{
        ClientEvent, FinishReason, LeaderboardEntry, PlayerId, RaceState, RoomId,
        ServerEvent,
    };
    pub use speedtype_race::{
        FixedPassage, PassageSource, QuoteList, RaceConfig, RaceError,
    };
    pub use speedtype_transport::OriginPolicy;
}
