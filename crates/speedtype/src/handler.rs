//! Per-connection handler: decode client events, route them to the race
//! store, and stream room events back.
//!
//! Each accepted connection gets its own Tokio task running this handler,
//! plus a writer task that drains the player's outbound queue onto the
//! socket. Rooms only ever `try_send` into that queue, so a slow socket
//! never holds up a race.
//!
//! The flow is:
//!   1. Assign `PlayerId` = connection id
//!   2. Loop: receive frames → decode `ClientEvent` → dispatch
//!   3. On close or idle timeout, the membership guard removes the player
//!
//! The writer pings the client every `ping_interval`. A browser answers
//! on its own, and the pong counts as activity, so a player who is only
//! watching the race stays connected.

use std::sync::Arc;
use std::time::Duration;

use speedtype_protocol::{ClientEvent, Codec, JsonCodec, PlayerId, RoomId, ServerEvent};
use speedtype_race::{PlayerSender, RaceError, RoomHandle};
use speedtype_transport::{Connection, Incoming, WebSocketConnection};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::SpeedTypeError;
use crate::server::ServerState;

/// Outbound events buffered per player before new ones are dropped.
const OUTBOUND_QUEUE: usize = 128;

/// Drop guard that takes the player out of their room when the handler
/// exits.
///
/// This ensures cleanup happens even if the handler panics. Since `Drop`
/// is synchronous, we spawn a fire-and-forget task for the async lock.
struct MembershipGuard {
    player_id: PlayerId,
    state: Arc<ServerState>,
}

impl Drop for MembershipGuard {
    fn drop(&mut self) {
        let player_id = self.player_id;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut store = state.store.lock().await;
            if let Some(room_id) = store.disconnect(player_id).await {
                tracing::info!(%player_id, %room_id, "player left on disconnect");
            }
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    conn: WebSocketConnection,
    state: Arc<ServerState>,
) -> Result<(), SpeedTypeError> {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    let player_id = PlayerId(conn_id.into_inner());
    tracing::info!(%conn_id, %player_id, "player connected");

    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    let writer = tokio::spawn(write_events(
        Arc::clone(&conn),
        state.codec,
        rx,
        state.ping_interval,
    ));
    let _guard = MembershipGuard {
        player_id,
        state: Arc::clone(&state),
    };

    let mut session = Session {
        player_id,
        outbound: tx,
        room: None,
    };

    loop {
        let data = match time::timeout(state.idle_timeout, conn.recv()).await {
            Ok(Ok(Some(Incoming::Data(data)))) => data,
            Ok(Ok(Some(Incoming::Heartbeat))) => {
                tracing::trace!(%player_id, "heartbeat");
                continue;
            }
            Ok(Ok(None)) => {
                tracing::info!(%player_id, "connection closed cleanly");
                break;
            }
            Ok(Err(e)) => {
                tracing::debug!(%player_id, error = %e, "recv error");
                break;
            }
            Err(_) => {
                tracing::info!(%player_id, "connection idle, closing");
                break;
            }
        };

        let event: ClientEvent = match state.codec.decode(&data) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(%player_id, error = %e, "malformed event");
                session.reply_error(400, format!("malformed event: {e}"));
                continue;
            }
        };

        session.dispatch(&state, event).await;
    }

    writer.abort();
    let _ = conn.close().await;
    // _guard drops here → the player leaves their room.
    Ok(())
}

/// Encodes queued events and writes them to the socket, in order, and
/// pings the client every `ping_interval`.
async fn write_events(
    conn: Arc<WebSocketConnection>,
    codec: JsonCodec,
    mut rx: mpsc::Receiver<ServerEvent>,
    ping_interval: Duration,
) {
    let mut ping = time::interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let bytes = match codec.encode(&event) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode event");
                        continue;
                    }
                };
                if let Err(e) = conn.send(&bytes).await {
                    tracing::debug!(
                        conn_id = %conn.id(),
                        error = %e,
                        "send failed, writer stopping"
                    );
                    break;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = conn.ping().await {
                    tracing::debug!(
                        conn_id = %conn.id(),
                        error = %e,
                        "ping failed, writer stopping"
                    );
                    break;
                }
            }
        }
    }
}

/// What one connection knows about itself between events.
struct Session {
    player_id: PlayerId,
    outbound: PlayerSender,
    /// The room joined through this connection, for routing progress
    /// without touching the store lock.
    room: Option<RoomHandle>,
}

impl Session {
    async fn dispatch(&mut self, state: &ServerState, event: ClientEvent) {
        let result = match event {
            ClientEvent::JoinRoom {
                room_id,
                display_name,
                rejoin_token,
            } => self.join(state, room_id, &display_name, rejoin_token).await,
            ClientEvent::StartRace { room_id } => {
                state.store.lock().await.start(self.player_id, &room_id).await
            }
            ClientEvent::ProgressUpdate {
                room_id,
                chars_correct,
                chars_total,
            } => self.progress(state, &room_id, chars_correct, chars_total).await,
            ClientEvent::LeaveRoom { room_id } => self.leave(state, &room_id).await,
        };

        if let Err(e) = result {
            tracing::debug!(player_id = %self.player_id, error = %e, "event rejected");
            self.reply_error(error_code(&e), e.to_string());
        }
    }

    async fn join(
        &mut self,
        state: &ServerState,
        room_id: Option<RoomId>,
        display_name: &str,
        rejoin_token: Option<String>,
    ) -> Result<(), RaceError> {
        let (handle, ticket) = state
            .store
            .lock()
            .await
            .join(
                self.player_id,
                display_name,
                room_id,
                rejoin_token,
                self.outbound.clone(),
            )
            .await?;
        tracing::info!(
            player_id = %self.player_id,
            room_id = %ticket.room_id,
            "joined room"
        );
        self.room = Some(handle);
        Ok(())
    }

    async fn progress(
        &self,
        state: &ServerState,
        room_id: &RoomId,
        chars_correct: u32,
        chars_total: u32,
    ) -> Result<(), RaceError> {
        match &self.room {
            Some(handle) if handle.room_id() == room_id => {
                let at = state.clock.now_ms();
                handle
                    .submit_progress(self.player_id, chars_correct, chars_total, at)
                    .await
            }
            _ => {
                state
                    .store
                    .lock()
                    .await
                    .submit_progress(
                        self.player_id,
                        room_id,
                        chars_correct,
                        chars_total,
                    )
                    .await
            }
        }
    }

    async fn leave(
        &mut self,
        state: &ServerState,
        room_id: &RoomId,
    ) -> Result<(), RaceError> {
        state.store.lock().await.leave(self.player_id, room_id).await?;
        self.room = None;
        tracing::info!(player_id = %self.player_id, %room_id, "left room");
        Ok(())
    }

    /// Queues an `error` event for this player. Never blocks.
    fn reply_error(&self, code: u16, message: String) {
        if self
            .outbound
            .try_send(ServerEvent::Error { code, message })
            .is_err()
        {
            tracing::warn!(player_id = %self.player_id, code, "error event dropped");
        }
    }
}

/// Maps a race error onto the `code` of an `error` event.
fn error_code(error: &RaceError) -> u16 {
    match error {
        RaceError::RoomNotFound(_) => 404,
        RaceError::NotHost(..) | RaceError::NotInRoom(..) => 403,
        RaceError::RoomFull(_)
        | RaceError::RaceAlreadyActive(_)
        | RaceError::AlreadyInRoom(..) => 409,
        RaceError::Unavailable(_) | RaceError::InvalidConfig(_) => 503,
        RaceError::StaleProgress(..) | RaceError::Timeout(_) => 500,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let room = || RoomId::new("abc");
        assert_eq!(error_code(&RaceError::RoomNotFound(room())), 404);
        assert_eq!(error_code(&RaceError::NotHost(PlayerId(1), room())), 403);
        assert_eq!(error_code(&RaceError::RoomFull(room())), 409);
        assert_eq!(error_code(&RaceError::RaceAlreadyActive(room())), 409);
        assert_eq!(error_code(&RaceError::AlreadyInRoom(PlayerId(1), room())), 409);
        assert_eq!(error_code(&RaceError::Unavailable(room())), 503);
    }
}
