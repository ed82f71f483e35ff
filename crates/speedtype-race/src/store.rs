//! Race store: creates, tracks, and routes players to race rooms.

use std::collections::HashMap;

use rand::Rng;
use speedtype_protocol::{PlayerId, RoomId};
use tokio::sync::mpsc;

use crate::passage::{self, PassageSource};
use crate::room::{RoomNotice, spawn_room};
use crate::{
    JoinTicket, PlayerSender, RaceClock, RaceConfig, RaceError, RoomHandle, RoomInfo,
};

/// Command channel size for room actors. Comfortably above
/// [`RaceConfig::MAX_ROOM_SIZE`], since every member has at most one
/// command queued.
const ROOM_CHANNEL_SIZE: usize = 256;

/// A live room as the store sees it.
struct RoomEntry {
    handle: RoomHandle,
    /// Creation order; anonymous joins fill the oldest open room first.
    seq: u64,
    /// Whether the room last reported taking new players.
    open: bool,
}

/// Owns every live room and the player → room index.
///
/// This is the entry point for race operations from the server layer.
/// Per-room state lives in the room actors; the store only keeps handles
/// and what the actors report, so holding it locked never waits on a race
/// timer or on rooms a request does not touch.
pub struct RaceStore {
    rooms: HashMap<RoomId, RoomEntry>,
    next_seq: u64,
    /// A player is in at most one room at a time.
    player_rooms: HashMap<PlayerId, RoomId>,
    passages: Box<dyn PassageSource>,
    default_config: RaceConfig,
    clock: RaceClock,
    /// Room actors report openness changes and retirement here.
    notices_tx: mpsc::UnboundedSender<RoomNotice>,
    notices_rx: mpsc::UnboundedReceiver<RoomNotice>,
}

impl RaceStore {
    /// Creates an empty store. Rooms created implicitly by
    /// [`join`](Self::join) use `default_config`.
    pub fn new(default_config: RaceConfig, passages: impl PassageSource) -> Self {
        Self::with_source(default_config, Box::new(passages))
    }

    /// Like [`new`](Self::new), for a source that is already boxed.
    pub fn with_source(
        default_config: RaceConfig,
        passages: Box<dyn PassageSource>,
    ) -> Self {
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        Self {
            rooms: HashMap::new(),
            next_seq: 0,
            player_rooms: HashMap::new(),
            passages,
            default_config,
            clock: RaceClock::start(),
            notices_tx,
            notices_rx,
        }
    }

    /// Replaces the clock shared by every room created afterwards.
    pub fn with_clock(mut self, clock: RaceClock) -> Self {
        self.clock = clock;
        self
    }

    /// The clock every room timestamps with.
    pub fn clock(&self) -> RaceClock {
        self.clock
    }

    pub fn default_config(&self) -> &RaceConfig {
        &self.default_config
    }

    /// Creates a room in the `Waiting` state with a freshly selected
    /// passage and returns its id.
    ///
    /// # Errors
    /// [`RaceError::InvalidConfig`] if `config` is invalid or no passage
    /// could be selected. No room is created in that case.
    pub fn create_room(&mut self, config: RaceConfig) -> Result<RoomId, RaceError> {
        config.validate()?;
        let passage = passage::select(self.passages.as_ref())
            .ok_or_else(|| RaceError::InvalidConfig("no passage available".into()))?;

        let room_id = self.fresh_room_id();
        let handle = spawn_room(
            room_id.clone(),
            config,
            passage,
            self.clock,
            self.notices_tx.clone(),
            ROOM_CHANNEL_SIZE,
        );
        let seq = self.next_seq;
        self.next_seq += 1;
        self.rooms.insert(
            room_id.clone(),
            RoomEntry {
                handle,
                seq,
                open: true,
            },
        );
        tracing::info!(%room_id, rooms = self.rooms.len(), "room created");
        Ok(room_id)
    }

    /// Looks up a live room.
    pub fn get_room(&self, room_id: &RoomId) -> Result<RoomHandle, RaceError> {
        self.rooms
            .get(room_id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| RaceError::RoomNotFound(room_id.clone()))
    }

    /// Shuts a room down and forgets it. Removing an unknown room is a
    /// no-op.
    pub async fn remove_room(&mut self, room_id: &RoomId) {
        let Some(entry) = self.rooms.remove(room_id) else {
            return;
        };
        let _ = entry.handle.shutdown().await;
        self.player_rooms.retain(|_, rid| rid != room_id);
        tracing::info!(%room_id, "room removed");
    }

    /// Ids of every live room, sorted.
    pub fn list_active_rooms(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Handles to every live room, for querying them without the store.
    pub fn room_handles(&self) -> Vec<RoomHandle> {
        self.rooms.values().map(|entry| entry.handle.clone()).collect()
    }

    /// Snapshots of every room in `handles` that still answers, oldest
    /// first.
    ///
    /// Asks each room in turn, so callers sharing the store behind a lock
    /// should take [`room_handles`](Self::room_handles) and release the
    /// lock before calling this.
    pub async fn room_infos(handles: Vec<RoomHandle>) -> Vec<RoomInfo> {
        let mut infos = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(info) = handle.info().await {
                infos.push(info);
            }
        }
        infos.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.room_id.cmp(&b.room_id))
        });
        infos
    }

    /// Puts a player into a room.
    ///
    /// With a `room_id`, joins that room. Without one, joins the oldest
    /// room still accepting players, or creates a new room if none is.
    /// A `rejoin_token` is only honoured together with a `room_id`.
    ///
    /// # Errors
    /// [`RaceError::AlreadyInRoom`] if the player is already in a room,
    /// [`RaceError::RoomNotFound`] for an unknown room, and whatever the
    /// room itself refuses with (full, race already running).
    pub async fn join(
        &mut self,
        player_id: PlayerId,
        display_name: &str,
        room_id: Option<RoomId>,
        rejoin_token: Option<String>,
        sender: PlayerSender,
    ) -> Result<(RoomHandle, JoinTicket), RaceError> {
        self.reap_retired();

        if let Some(current) = self.player_rooms.get(&player_id) {
            return Err(RaceError::AlreadyInRoom(player_id, current.clone()));
        }

        if let Some(room_id) = room_id {
            let handle = self.get_room(&room_id)?;
            let ticket = handle
                .join(player_id, display_name, rejoin_token, sender)
                .await?;
            self.player_rooms.insert(player_id, room_id);
            return Ok((handle, ticket));
        }

        for (room_id, handle) in self.open_rooms() {
            match handle
                .join(player_id, display_name, None, sender.clone())
                .await
            {
                Ok(ticket) => {
                    self.player_rooms.insert(player_id, room_id);
                    return Ok((handle, ticket));
                }
                // Filled or started since its last report; its notice is
                // on the way.
                Err(e) => {
                    tracing::debug!(%room_id, error = %e, "open room refused join");
                    if let Some(entry) = self.rooms.get_mut(&room_id) {
                        entry.open = false;
                    }
                }
            }
        }

        let room_id = self.create_room(self.default_config.clone())?;
        let handle = self.get_room(&room_id)?;
        let ticket = handle.join(player_id, display_name, None, sender).await?;
        self.player_rooms.insert(player_id, room_id);
        Ok((handle, ticket))
    }

    /// Takes a player out of `room_id`.
    pub async fn leave(
        &mut self,
        player_id: PlayerId,
        room_id: &RoomId,
    ) -> Result<(), RaceError> {
        let handle = self.member_room(player_id, room_id)?;
        self.player_rooms.remove(&player_id);
        handle.leave(player_id).await
    }

    /// Takes a player out of whatever room they are in, if any. Used
    /// when a connection goes away.
    pub async fn disconnect(&mut self, player_id: PlayerId) -> Option<RoomId> {
        let room_id = self.player_rooms.remove(&player_id)?;
        if let Some(entry) = self.rooms.get(&room_id) {
            if let Err(e) = entry.handle.leave(player_id).await {
                tracing::debug!(
                    %player_id,
                    %room_id,
                    error = %e,
                    "leave on disconnect failed"
                );
            }
        }
        Some(room_id)
    }

    /// Host-initiated race start.
    pub async fn start(
        &self,
        player_id: PlayerId,
        room_id: &RoomId,
    ) -> Result<(), RaceError> {
        self.member_room(player_id, room_id)?.start(player_id).await
    }

    /// Forwards a progress report, stamped with the current race clock.
    pub async fn submit_progress(
        &self,
        player_id: PlayerId,
        room_id: &RoomId,
        chars_correct: u32,
        chars_total: u32,
    ) -> Result<(), RaceError> {
        let at = self.clock.now_ms();
        self.member_room(player_id, room_id)?
            .submit_progress(player_id, chars_correct, chars_total, at)
            .await
    }

    /// Returns the room `player_id` is in, checking that it is `room_id`.
    pub fn member_room(
        &self,
        player_id: PlayerId,
        room_id: &RoomId,
    ) -> Result<RoomHandle, RaceError> {
        let handle = self.get_room(room_id)?;
        if self.player_rooms.get(&player_id) != Some(room_id) {
            return Err(RaceError::NotInRoom(player_id, room_id.clone()));
        }
        Ok(handle)
    }

    /// The room a player is currently in.
    pub fn player_room(&self, player_id: PlayerId) -> Option<&RoomId> {
        self.player_rooms.get(&player_id)
    }

    /// Applies what the rooms have reported: drops every room whose grace
    /// period has elapsed and returns their ids, and refreshes which rooms
    /// take new players. A retired room is removed exactly once.
    pub fn reap_retired(&mut self) -> Vec<RoomId> {
        let mut reaped = Vec::new();
        while let Ok(notice) = self.notices_rx.try_recv() {
            match notice {
                RoomNotice::Open { room_id, open } => {
                    if let Some(entry) = self.rooms.get_mut(&room_id) {
                        entry.open = open;
                    }
                }
                RoomNotice::Retired(room_id) => {
                    if self.rooms.remove(&room_id).is_none() {
                        continue;
                    }
                    self.player_rooms.retain(|_, rid| *rid != room_id);
                    tracing::info!(%room_id, rooms = self.rooms.len(), "room retired");
                    reaped.push(room_id);
                }
            }
        }
        reaped
    }

    /// Rooms last reported as taking new players, oldest first.
    fn open_rooms(&self) -> Vec<(RoomId, RoomHandle)> {
        let mut open: Vec<(u64, RoomId, RoomHandle)> = self
            .rooms
            .iter()
            .filter(|(_, entry)| entry.open)
            .map(|(id, entry)| (entry.seq, id.clone(), entry.handle.clone()))
            .collect();
        open.sort_by_key(|(seq, _, _)| *seq);
        open.into_iter().map(|(_, id, handle)| (id, handle)).collect()
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Stops every room.
    pub async fn shutdown(&mut self) {
        for (_, entry) in self.rooms.drain() {
            let _ = entry.handle.shutdown().await;
        }
        self.player_rooms.clear();
        tracing::info!("race store shut down");
    }

    fn fresh_room_id(&self) -> RoomId {
        loop {
            let id = generate_room_id();
            if !self.rooms.contains_key(&id) {
                return id;
            }
        }
    }
}

/// 64 random bits as 16 hex characters.
fn generate_room_id() -> RoomId {
    let bytes: [u8; 8] = rand::rng().random();
    RoomId::new(bytes.iter().map(|b| format!("{b:02x}")).collect::<String>())
}
