//! Realtime transport gateway for the SpeedType race server.
//!
//! Provides the [`Transport`] and [`Connection`] traits the server's
//! accept loop is written against, the per-connection identity
//! ([`ConnectionId`]) the race layer uses as a player identity, and the
//! [`OriginPolicy`] consulted during the WebSocket handshake.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
mod origin;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use origin::OriginPolicy;
#[cfg(feature = "websocket")]
pub use websocket::{
    PendingConnection, WebSocketConnection, WebSocketTransport,
};

use std::fmt;

/// Opaque identifier for a connection.
///
/// Assigned once by the transport when the handshake completes and never
/// reused for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One item read from a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// An application payload.
    Data(Vec<u8>),
    /// A control frame proving the peer is still there.
    Heartbeat,
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Stops accepting new connections.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// A single client connection that carries encoded events both ways.
///
/// Sending and receiving are independent: a task blocked in
/// [`recv`](Connection::recv) must not stall another task pushing
/// server events through [`send`](Connection::send).
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends one encoded event to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Asks the peer to prove it is alive. The answer shows up as
    /// [`Incoming::Heartbeat`] on the receiving side.
    async fn ping(&self) -> Result<(), Self::Error>;

    /// Receives the next payload or heartbeat from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Incoming>, Self::Error>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ConnectionId::new(1), "alice");
        map.insert(ConnectionId::new(2), "bob");
        assert_eq!(map[&ConnectionId::new(1)], "alice");
        assert_ne!(ConnectionId::new(1), ConnectionId::new(2));
    }
}
