//! Error types for the protocol layer.
//!
//! When you see a `ProtocolError` the problem is in turning events into
//! bytes or back, not in networking or race rules.

/// Errors that can occur while encoding or decoding wire events.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, an unknown `event` tag,
    /// missing fields or wrong field types.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),
}
