//! `SpeedTypeServer` builder and server loop.
//!
//! This is the entry point for running a race server. It ties together
//! all the layers: transport → protocol → race store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use speedtype_protocol::JsonCodec;
use speedtype_race::{PassageSource, QuoteList, RaceClock, RaceConfig, RaceStore};
use speedtype_transport::{OriginPolicy, Transport, TransportError, WebSocketTransport};
use tokio::sync::Mutex;

use crate::handler::handle_connection;
use crate::{ConfigError, ServerConfig, SpeedTypeError};

/// How often retired rooms are swept out of the store.
const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. The store
/// only holds room handles, so the lock is never held across a race timer.
pub(crate) struct ServerState {
    pub(crate) store: Mutex<RaceStore>,
    pub(crate) codec: JsonCodec,
    /// Same clock as the store's; stamps progress routed straight to a room.
    pub(crate) clock: RaceClock,
    pub(crate) idle_timeout: Duration,
    pub(crate) ping_interval: Duration,
}

/// Builder for configuring and starting a SpeedType server.
///
/// # Example
///
/// ```rust,no_run
/// use speedtype::prelude::*;
///
/// # async fn run() -> Result<(), SpeedTypeError> {
/// let server = SpeedTypeServer::builder()
///     .bind("127.0.0.1:3001")
///     .race_config(RaceConfig::solo())
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct SpeedTypeServerBuilder {
    bind_addr: String,
    origins: OriginPolicy,
    race_config: RaceConfig,
    passages: Box<dyn PassageSource>,
    idle_timeout: Duration,
    ping_interval: Duration,
    handshake_timeout: Duration,
}

impl SpeedTypeServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        let defaults = ServerConfig::default();
        Self {
            bind_addr: "127.0.0.1:3001".to_string(),
            origins: defaults.origins,
            race_config: defaults.race,
            passages: Box::new(QuoteList::default()),
            idle_timeout: defaults.idle_timeout,
            ping_interval: defaults.ping_interval,
            handshake_timeout: defaults.handshake_timeout,
        }
    }

    /// Applies a whole [`ServerConfig`], typically from the environment.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.bind_addr = config.bind_addr();
        self.origins = config.origins;
        self.race_config = config.race;
        self.idle_timeout = config.idle_timeout;
        self.ping_interval = config.ping_interval;
        self.handshake_timeout = config.handshake_timeout;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Restricts which browser origins may connect.
    pub fn origins(mut self, origins: OriginPolicy) -> Self {
        self.origins = origins;
        self
    }

    /// Sets the settings used for every room the server creates.
    pub fn race_config(mut self, config: RaceConfig) -> Self {
        self.race_config = config;
        self
    }

    /// Replaces the built-in quote list.
    pub fn passages(mut self, source: impl PassageSource) -> Self {
        self.passages = Box::new(source);
        self
    }

    /// Sets how long a connection may stay silent before it is closed.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets how often each client is pinged. Keep it below the idle
    /// timeout.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets how long a peer may take to complete the WebSocket upgrade.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Validates the settings and binds the listener.
    pub async fn build(self) -> Result<SpeedTypeServer, SpeedTypeError> {
        self.race_config.validate()?;
        if self.ping_interval.is_zero() || self.ping_interval >= self.idle_timeout {
            return Err(ConfigError::Invalid {
                key: "PING_INTERVAL_SECS",
                value: format!("{:?}", self.ping_interval),
                reason: "must be non-zero and below the idle timeout".into(),
            }
            .into());
        }

        let transport = WebSocketTransport::bind(&self.bind_addr)
            .await?
            .with_origins(self.origins)
            .with_handshake_timeout(self.handshake_timeout);

        let store = RaceStore::with_source(self.race_config, self.passages);
        let state = Arc::new(ServerState {
            clock: store.clock(),
            store: Mutex::new(store),
            codec: JsonCodec,
            idle_timeout: self.idle_timeout,
            ping_interval: self.ping_interval,
        });

        Ok(SpeedTypeServer { transport, state })
    }
}

impl Default for SpeedTypeServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound SpeedType server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct SpeedTypeServer {
    transport: WebSocketTransport,
    state: Arc<ServerState>,
}

impl SpeedTypeServer {
    /// Creates a new builder.
    pub fn builder() -> SpeedTypeServerBuilder {
        SpeedTypeServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs the server until the process is terminated.
    pub async fn run(self) -> Result<(), SpeedTypeError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` resolves, then stops every
    /// room.
    ///
    /// Each accepted peer gets its own task, which runs the WebSocket
    /// handshake and then the handler, so a slow peer never holds up the
    /// loop. A background task sweeps retired rooms out of the store.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), SpeedTypeError> {
        tracing::info!(addr = ?self.local_addr().ok(), "SpeedType server running");

        let reaper = tokio::spawn(reap_rooms(Arc::clone(&self.state)));
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.transport.accept_pending() => match accepted {
                    Ok(pending) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            let conn = match pending.handshake().await {
                                Ok(conn) => conn,
                                // Already logged by the transport.
                                Err(TransportError::OriginRejected(_)) => return,
                                Err(e) => {
                                    tracing::debug!(error = %e, "handshake failed");
                                    return;
                                }
                            };
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(
                                    error = %e,
                                    "connection ended with error"
                                );
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        tracing::info!("shutting down");
        reaper.abort();
        self.state.store.lock().await.shutdown().await;
        self.transport.shutdown().await?;
        Ok(())
    }
}

/// Periodically drops rooms whose grace period has elapsed.
async fn reap_rooms(state: Arc<ServerState>) {
    let mut interval = tokio::time::interval(REAP_INTERVAL);
    loop {
        interval.tick().await;
        let reaped = state.store.lock().await.reap_retired();
        if !reaped.is_empty() {
            tracing::debug!(count = reaped.len(), "swept retired rooms");
        }
    }
}
