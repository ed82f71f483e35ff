//! Codec trait and implementations for serializing/deserializing events.
//!
//! The server is written against the [`Codec`] trait, not against JSON,
//! so the handler and tests can swap formats without touching race logic.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes Rust values to bytes and decodes bytes back.
///
/// `Send + Sync + 'static` because a single codec instance lives in the
/// server state and is used from every connection task.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value can't be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or
    /// don't match the expected shape.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Browser clients speak JSON natively, so this is the production codec.
///
/// ```rust
/// use speedtype_protocol::{ClientEvent, Codec, JsonCodec, RoomId};
///
/// let codec = JsonCodec;
/// let bytes = br#"{"event":"leave-room","roomId":"abc"}"#;
/// let event: ClientEvent = codec.decode(bytes).unwrap();
/// assert_eq!(event, ClientEvent::LeaveRoom { room_id: RoomId::new("abc") });
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{ClientEvent, ServerEvent};

    #[test]
    fn test_json_codec_encodes_server_event_as_utf8() {
        let bytes = JsonCodec
            .encode(&ServerEvent::Error {
                code: 404,
                message: "room abc not found".into(),
            })
            .unwrap();
        let text = std::str::from_utf8(&bytes).expect("json is utf-8");
        assert!(text.contains(r#""event":"error""#));
    }

    #[test]
    fn test_json_codec_decode_garbage_is_decode_error() {
        let result: Result<ClientEvent, _> = JsonCodec.decode(b"not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
