//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

use crate::{
    Connection, ConnectionId, Incoming, OriginPolicy, Transport,
    TransportError,
};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Default limit on how long a peer may take to upgrade.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
    origins: OriginPolicy,
    handshake_timeout: Duration,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    ///
    /// Every origin is admitted until [`with_origins`](Self::with_origins)
    /// narrows it.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self {
            listener,
            origins: OriginPolicy::Any,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    /// Restricts which `Origin` headers may complete the handshake.
    pub fn with_origins(mut self, origins: OriginPolicy) -> Self {
        self.origins = origins;
        self
    }

    /// Sets how long a peer may take to complete the upgrade.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts the next TCP peer without upgrading it.
    ///
    /// The accept loop calls this and hands the result to its own task,
    /// so a peer that stalls mid-handshake holds up nobody else.
    pub async fn accept_pending(
        &mut self,
    ) -> Result<PendingConnection, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::trace!(%addr, "tcp peer accepted");
        Ok(PendingConnection {
            stream,
            addr,
            origins: self.origins.clone(),
            timeout: self.handshake_timeout,
        })
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        self.accept_pending().await?.handshake().await
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A TCP peer that has not finished the WebSocket upgrade yet.
pub struct PendingConnection {
    stream: TcpStream,
    addr: SocketAddr,
    origins: OriginPolicy,
    timeout: Duration,
}

impl PendingConnection {
    /// The peer's address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs the upgrade and the origin check, bounded by the handshake
    /// timeout.
    pub async fn handshake(
        self,
    ) -> Result<WebSocketConnection, TransportError> {
        let Self {
            stream,
            addr,
            origins,
            timeout,
        } = self;

        let mut rejected: Option<String> = None;
        let check_origin = |req: &Request, resp: Response| {
            let origin = req
                .headers()
                .get("origin")
                .and_then(|value| value.to_str().ok());
            if origins.allows(origin) {
                Ok(resp)
            } else {
                rejected = origin.map(str::to_string);
                let mut deny = ErrorResponse::new(Some(
                    "origin not allowed".to_string(),
                ));
                *deny.status_mut() = StatusCode::FORBIDDEN;
                Err(deny)
            }
        };

        let handshake = tokio::time::timeout(
            timeout,
            tokio_tungstenite::accept_hdr_async(stream, check_origin),
        )
        .await
        .map_err(|_| {
            tracing::debug!(%addr, "handshake timed out");
            TransportError::HandshakeTimeout(addr)
        })?;

        if let Some(origin) = rejected {
            tracing::warn!(%addr, %origin, "origin rejected");
            return Err(TransportError::OriginRejected(origin));
        }

        let ws = handshake.map_err(|e| {
            TransportError::AcceptFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;

        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );
        tracing::debug!(%id, %addr, "accepted WebSocket connection");

        let (sink, stream) = ws.split();
        Ok(WebSocketConnection {
            id,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }
}

/// A single WebSocket connection.
///
/// The socket is split so a reader parked in [`recv`](Connection::recv)
/// never holds the lock the writer needs.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    async fn send_frame(&self, msg: Message) -> Result<(), TransportError> {
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    /// Sends UTF-8 payloads as text frames (what browser clients expect
    /// for JSON) and anything else as a binary frame.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let msg = match std::str::from_utf8(data) {
            Ok(text) => Message::text(text.to_string()),
            Err(_) => Message::binary(data.to_vec()),
        };
        self.send_frame(msg).await
    }

    /// Browsers answer pings on their own, so no client code is needed
    /// for the pong to come back.
    async fn ping(&self) -> Result<(), Self::Error> {
        self.send_frame(Message::Ping(Default::default())).await
    }

    async fn recv(&self) -> Result<Option<Incoming>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Incoming::Data(
                        text.as_bytes().to_vec(),
                    )));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(Incoming::Data(data.into())));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    return Ok(Some(Incoming::Heartbeat));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink
            .lock()
            .await
            .send(Message::Close(None))
            .await
            .map_err(|e| {
                TransportError::ConnectionClosed(e.to_string())
            })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
