//! Unified error type for the SpeedType server.

use speedtype_protocol::ProtocolError;
use speedtype_race::RaceError;
use speedtype_transport::TransportError;

use crate::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum SpeedTypeError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode or decode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A race-level error (room not found, full, already active).
    #[error(transparent)]
    Race(#[from] RaceError),

    /// The environment holds an unusable setting.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
