//! Room actor: one Tokio task per race, owning its state machine.
//!
//! Every join, leave, start and progress update for a room goes through
//! the room's command channel and is handled one at a time by the actor.
//! That serialization is the whole concurrency story for a room: no locks
//! around race state, and different rooms never contend.
//!
//! The actor also owns the room's timers (countdown, race timeout,
//! retirement, broadcast pacing) as plain deadlines awaited in its
//! `select!` loop. When the actor stops, they are gone with it.

use std::collections::HashMap;

use rand::Rng;
use speedtype_protocol::{
    FinishReason, LeaderboardEntry, PlayerId, RaceState, RoomId, ServerEvent,
};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};

use crate::pacer::BroadcastPacer;
use crate::{Passage, Player, RaceClock, RaceConfig, RaceError, leaderboard};

/// Channel for delivering server events to one player's connection.
///
/// Bounded: a client that stops reading has events dropped for it
/// instead of stalling the room.
pub type PlayerSender = mpsc::Sender<ServerEvent>;

/// What a successful join hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTicket {
    pub room_id: RoomId,
    pub player_id: PlayerId,
    /// Present only when the room allows rejoining.
    pub rejoin_token: Option<String>,
}

/// What a room actor tells the store without being asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RoomNotice {
    /// The room started or stopped taking new players.
    Open { room_id: RoomId, open: bool },
    /// The grace period ran out; the actor has stopped.
    Retired(RoomId),
}

/// Commands sent to a room actor through its channel.
pub(crate) enum RoomCommand {
    Join {
        player_id: PlayerId,
        display_name: String,
        rejoin_token: Option<String>,
        sender: PlayerSender,
        reply: oneshot::Sender<Result<JoinTicket, RaceError>>,
    },
    Leave {
        player_id: PlayerId,
        reply: oneshot::Sender<Result<(), RaceError>>,
    },
    Start {
        player_id: PlayerId,
        reply: oneshot::Sender<Result<(), RaceError>>,
    },
    /// Rejected updates are logged, not reported; the reply only
    /// acknowledges that the update was handled.
    Progress {
        player_id: PlayerId,
        chars_correct: u32,
        chars_total: u32,
        at: u64,
        reply: oneshot::Sender<()>,
    },
    GetInfo {
        reply: oneshot::Sender<RoomInfo>,
    },
    Shutdown,
}

/// A snapshot of a room, computed on request.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub state: RaceState,
    pub player_count: usize,
    pub max_players: usize,
    pub host: Option<PlayerId>,
    pub passage: Passage,
    pub created_at: u64,
    pub last_activity: u64,
    pub started_at: Option<u64>,
    /// Current ranking, recomputed from the players for this snapshot.
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// Handle to a running room actor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// Returns the room's identifier.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Asks the room to admit a player.
    pub async fn join(
        &self,
        player_id: PlayerId,
        display_name: &str,
        rejoin_token: Option<String>,
        sender: PlayerSender,
    ) -> Result<JoinTicket, RaceError> {
        self.request(|reply| RoomCommand::Join {
            player_id,
            display_name: display_name.to_string(),
            rejoin_token,
            sender,
            reply,
        })
        .await?
    }

    /// Removes a player from the room.
    pub async fn leave(&self, player_id: PlayerId) -> Result<(), RaceError> {
        self.request(|reply| RoomCommand::Leave { player_id, reply })
            .await?
    }

    /// Host-initiated start of the countdown.
    pub async fn start(&self, player_id: PlayerId) -> Result<(), RaceError> {
        self.request(|reply| RoomCommand::Start { player_id, reply })
            .await?
    }

    /// Hands a progress update stamped at `at` (race clock) to the room
    /// and waits until it has been handled.
    ///
    /// A caller therefore has at most one update queued, so a flooding
    /// client cannot fill the room's queue. Only fails if the room is
    /// gone.
    pub async fn submit_progress(
        &self,
        player_id: PlayerId,
        chars_correct: u32,
        chars_total: u32,
        at: u64,
    ) -> Result<(), RaceError> {
        self.request(|reply| RoomCommand::Progress {
            player_id,
            chars_correct,
            chars_total,
            at,
            reply,
        })
        .await
    }

    /// Requests a snapshot of the room.
    pub async fn info(&self) -> Result<RoomInfo, RaceError> {
        self.request(|reply| RoomCommand::GetInfo { reply }).await
    }

    /// Tells the room to stop. Its timers are dropped with it.
    pub async fn shutdown(&self) -> Result<(), RaceError> {
        self.sender
            .send(RoomCommand::Shutdown)
            .await
            .map_err(|_| RaceError::Unavailable(self.room_id.clone()))
    }

    /// Sends a command carrying a reply channel and waits for the answer.
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, RaceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(command(reply_tx))
            .await
            .map_err(|_| RaceError::Unavailable(self.room_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| RaceError::Unavailable(self.room_id.clone()))
    }
}

/// The internal room actor state. Runs inside a Tokio task.
struct RoomActor {
    room_id: RoomId,
    config: RaceConfig,
    state: RaceState,
    passage: Passage,
    /// Passage length in characters.
    passage_len: u32,
    clock: RaceClock,
    created_at: u64,
    last_activity: u64,
    started_at: Option<u64>,
    /// Members in join order; the first one is the host.
    players: Vec<Player>,
    senders: HashMap<PlayerId, PlayerSender>,
    rejoin_tokens: HashMap<PlayerId, String>,
    /// Players who dropped mid-race, keyed by rejoin token.
    departed: HashMap<String, Player>,
    /// Players who finished and then left; their results still count.
    finishers: Vec<Player>,
    /// Last openness reported to the store.
    open: bool,
    countdown_deadline: Option<Instant>,
    race_deadline: Option<Instant>,
    retire_deadline: Option<Instant>,
    pacer: BroadcastPacer,
    receiver: mpsc::Receiver<RoomCommand>,
    notices: mpsc::UnboundedSender<RoomNotice>,
}

impl RoomActor {
    /// Runs the actor loop until shutdown, retirement, or every handle
    /// being dropped.
    async fn run(mut self) {
        tracing::info!(room_id = %self.room_id, "room actor started");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                _ = wait_until(self.countdown_deadline) => self.begin_race(),
                _ = wait_until(self.race_deadline) => {
                    self.finish(FinishReason::Timeout);
                }
                _ = self.pacer.wait_for_flush() => self.broadcast_leaderboard(),
                _ = wait_until(self.retire_deadline) => {
                    self.retire();
                    break;
                }
            }
            self.report_openness();
        }

        tracing::info!(room_id = %self.room_id, "room actor stopped");
    }

    /// Returns `false` when the actor should stop.
    fn handle_command(&mut self, cmd: RoomCommand) -> bool {
        match cmd {
            RoomCommand::Join {
                player_id,
                display_name,
                rejoin_token,
                sender,
                reply,
            } => {
                let result =
                    self.handle_join(player_id, &display_name, rejoin_token, sender);
                let _ = reply.send(result);
            }
            RoomCommand::Leave { player_id, reply } => {
                let _ = reply.send(self.handle_leave(player_id));
            }
            RoomCommand::Start { player_id, reply } => {
                let _ = reply.send(self.handle_start(player_id));
            }
            RoomCommand::Progress {
                player_id,
                chars_correct,
                chars_total,
                at,
                reply,
            } => {
                self.handle_progress(player_id, chars_correct, chars_total, at);
                let _ = reply.send(());
            }
            RoomCommand::GetInfo { reply } => {
                let _ = reply.send(self.info());
            }
            RoomCommand::Shutdown => {
                tracing::info!(room_id = %self.room_id, "room shutting down");
                self.countdown_deadline = None;
                self.race_deadline = None;
                self.retire_deadline = None;
                return false;
            }
        }
        true
    }

    fn handle_join(
        &mut self,
        player_id: PlayerId,
        display_name: &str,
        rejoin_token: Option<String>,
        sender: PlayerSender,
    ) -> Result<JoinTicket, RaceError> {
        if self.position(player_id).is_some() {
            return Err(RaceError::AlreadyInRoom(player_id, self.room_id.clone()));
        }

        if let Some(token) = rejoin_token {
            if let Some(ticket) = self.try_rejoin(player_id, token, &sender) {
                return Ok(ticket);
            }
        }

        // Once racing, the answer is always "already active"; a full room
        // still in the lobby or countdown reports being full.
        if matches!(self.state, RaceState::Active | RaceState::Finished) {
            return Err(RaceError::RaceAlreadyActive(self.room_id.clone()));
        }
        if self.players.len() >= self.config.max_players {
            return Err(RaceError::RoomFull(self.room_id.clone()));
        }
        if !self.state.is_joinable() {
            return Err(RaceError::RaceAlreadyActive(self.room_id.clone()));
        }

        let now = self.clock.now_ms();
        self.players.push(Player::new(player_id, display_name, now));
        self.last_activity = now;
        self.retire_deadline = None;
        let ticket = self.admit(player_id, sender, None);

        tracing::info!(
            room_id = %self.room_id,
            %player_id,
            players = self.players.len(),
            "player joined"
        );
        self.broadcast_room_state();

        if self.players.len() >= self.config.min_players {
            self.begin_countdown();
        }
        Ok(ticket)
    }

    /// Restores a departed player under a new connection, if the room
    /// allows it and the token matches.
    fn try_rejoin(
        &mut self,
        player_id: PlayerId,
        token: String,
        sender: &PlayerSender,
    ) -> Option<JoinTicket> {
        let resumable = matches!(self.state, RaceState::Countdown | RaceState::Active);
        if !self.config.allow_rejoin || !resumable {
            return None;
        }
        let mut player = self.departed.remove(&token)?;
        let previous = player.id;
        player.id = player_id;
        self.players.push(player);
        self.last_activity = self.clock.now_ms();
        self.retire_deadline = None;
        let ticket = self.admit(player_id, sender.clone(), Some(token));

        tracing::info!(
            room_id = %self.room_id,
            %player_id,
            %previous,
            "player rejoined"
        );
        self.broadcast_room_state();
        if let Some(start_timestamp) = self.started_at {
            self.send_to(
                player_id,
                ServerEvent::RaceStarted {
                    room_id: self.room_id.clone(),
                    start_timestamp,
                    passage: self.passage.to_string(),
                },
            );
            self.pacer.mark_dirty();
        }
        Some(ticket)
    }

    /// Registers the player's channel, issues a rejoin token when the
    /// room allows rejoining, and tells the player they are in.
    fn admit(
        &mut self,
        player_id: PlayerId,
        sender: PlayerSender,
        token: Option<String>,
    ) -> JoinTicket {
        let rejoin_token = self
            .config
            .allow_rejoin
            .then(|| token.unwrap_or_else(generate_token));
        if let Some(token) = &rejoin_token {
            self.rejoin_tokens.insert(player_id, token.clone());
        }
        self.senders.insert(player_id, sender);

        let ticket = JoinTicket {
            room_id: self.room_id.clone(),
            player_id,
            rejoin_token,
        };
        self.send_to(
            player_id,
            ServerEvent::RoomJoined {
                room_id: ticket.room_id.clone(),
                player_id,
                rejoin_token: ticket.rejoin_token.clone(),
            },
        );
        ticket
    }

    fn handle_leave(&mut self, player_id: PlayerId) -> Result<(), RaceError> {
        let index = self
            .position(player_id)
            .ok_or_else(|| RaceError::NotInRoom(player_id, self.room_id.clone()))?;
        let player = self.players.remove(index);
        self.senders.remove(&player_id);
        self.last_activity = self.clock.now_ms();

        tracing::info!(
            room_id = %self.room_id,
            %player_id,
            players = self.players.len(),
            "player left"
        );

        let resumable = matches!(self.state, RaceState::Countdown | RaceState::Active);
        let token = self.rejoin_tokens.remove(&player_id);
        if player.progress.is_finished() {
            if self.state == RaceState::Active {
                self.finishers.push(player);
            }
        } else if let Some(token) = token.filter(|_| resumable) {
            self.departed.insert(token, player);
        }

        if self.players.is_empty() {
            self.arm_retirement();
        } else {
            self.broadcast_room_state();
        }

        if self.state == RaceState::Active {
            self.pacer.mark_dirty();
            if self.all_finished() {
                self.finish(FinishReason::AllFinished);
            }
        }
        Ok(())
    }

    fn handle_start(&mut self, player_id: PlayerId) -> Result<(), RaceError> {
        if self.position(player_id).is_none() {
            return Err(RaceError::NotInRoom(player_id, self.room_id.clone()));
        }
        if !self.state.is_joinable() {
            return Err(RaceError::RaceAlreadyActive(self.room_id.clone()));
        }
        if self.host() != Some(player_id) {
            return Err(RaceError::NotHost(player_id, self.room_id.clone()));
        }
        tracing::info!(room_id = %self.room_id, %player_id, "host started the race");
        self.begin_countdown();
        Ok(())
    }

    fn handle_progress(
        &mut self,
        player_id: PlayerId,
        chars_correct: u32,
        chars_total: u32,
        at: u64,
    ) {
        if !self.state.accepts_progress() {
            tracing::debug!(
                room_id = %self.room_id,
                %player_id,
                state = %self.state,
                "progress outside active race dropped"
            );
            return;
        }
        let Some(started_at) = self.started_at else {
            return;
        };
        let passage_len = self.passage_len;
        let Some(player) = self.players.iter_mut().find(|p| p.id == player_id) else {
            tracing::warn!(
                room_id = %self.room_id,
                %player_id,
                "progress from non-member dropped"
            );
            return;
        };

        let recorded = player.record_progress(
            chars_correct,
            chars_total,
            at,
            started_at,
            passage_len,
        );
        match recorded {
            Ok(completed) => {
                self.last_activity = at;
                self.pacer.mark_dirty();
                if completed {
                    tracing::info!(
                        room_id = %self.room_id,
                        %player_id,
                        finish_ms = at - started_at,
                        "player finished"
                    );
                    if self.all_finished() {
                        self.finish(FinishReason::AllFinished);
                    }
                }
            }
            Err(e) => {
                tracing::debug!(
                    room_id = %self.room_id,
                    error = %e,
                    "progress rejected"
                );
            }
        }
    }

    fn begin_countdown(&mut self) {
        if !self.advance(RaceState::Countdown) {
            return;
        }
        self.countdown_deadline = Some(Instant::now() + self.config.countdown);
        tracing::info!(
            room_id = %self.room_id,
            players = self.players.len(),
            countdown_ms = self.config.countdown.as_millis() as u64,
            "countdown started"
        );
        self.broadcast_room_state();
    }

    fn begin_race(&mut self) {
        self.countdown_deadline = None;
        if !self.advance(RaceState::Active) {
            return;
        }
        let now = Instant::now();
        let start_timestamp = self.clock.at(now);
        self.started_at = Some(start_timestamp);
        self.race_deadline = Some(now + self.config.race_timeout);

        tracing::info!(
            room_id = %self.room_id,
            start_timestamp,
            players = self.players.len(),
            "race started"
        );
        self.broadcast_room_state();
        self.broadcast(ServerEvent::RaceStarted {
            room_id: self.room_id.clone(),
            start_timestamp,
            passage: self.passage.to_string(),
        });
        self.pacer.mark_dirty();
    }

    fn finish(&mut self, reason: FinishReason) {
        if !self.advance(RaceState::Finished) {
            return;
        }
        self.race_deadline = None;
        self.pacer.clear();
        self.departed.clear();

        match reason {
            FinishReason::AllFinished => {
                tracing::info!(room_id = %self.room_id, "race finished");
            }
            FinishReason::Timeout => {
                let error = RaceError::Timeout(self.room_id.clone());
                tracing::warn!(
                    room_id = %self.room_id,
                    %error,
                    "race forcibly finished"
                );
            }
        }

        let final_results = self.standings();
        self.broadcast_room_state();
        self.broadcast(ServerEvent::RaceFinished {
            room_id: self.room_id.clone(),
            final_results,
            reason,
        });
        self.arm_retirement();
    }

    fn retire(&mut self) {
        tracing::info!(
            room_id = %self.room_id,
            state = %self.state,
            "grace period elapsed, retiring room"
        );
        let _ = self.notices.send(RoomNotice::Retired(self.room_id.clone()));
    }

    /// Tells the store when the room starts or stops taking new players.
    fn report_openness(&mut self) {
        let open =
            self.state.is_joinable() && self.players.len() < self.config.max_players;
        if open == self.open {
            return;
        }
        self.open = open;
        let _ = self.notices.send(RoomNotice::Open {
            room_id: self.room_id.clone(),
            open,
        });
    }

    /// Moves one step forward in the lifecycle. Anything else is refused.
    fn advance(&mut self, target: RaceState) -> bool {
        if !self.state.can_transition_to(target) {
            tracing::warn!(
                room_id = %self.room_id,
                from = %self.state,
                to = %target,
                "illegal state transition ignored"
            );
            return false;
        }
        self.state = target;
        true
    }

    /// Starts the grace-period timer unless it is already running.
    fn arm_retirement(&mut self) {
        if self.retire_deadline.is_none() {
            self.retire_deadline = Some(Instant::now() + self.config.grace_period);
            tracing::debug!(
                room_id = %self.room_id,
                grace_ms = self.config.grace_period.as_millis() as u64,
                "room retirement scheduled"
            );
        }
    }

    fn all_finished(&self) -> bool {
        !self.players.is_empty()
            && self.players.iter().all(|p| p.progress.is_finished())
    }

    fn position(&self, player_id: PlayerId) -> Option<usize> {
        self.players.iter().position(|p| p.id == player_id)
    }

    fn host(&self) -> Option<PlayerId> {
        self.players.first().map(|p| p.id)
    }

    /// Ranking over current members and anyone who finished and left.
    fn standings(&self) -> Vec<LeaderboardEntry> {
        leaderboard::compute(
            self.players.iter().chain(&self.finishers),
            self.started_at,
        )
    }

    fn broadcast_room_state(&self) {
        let passage =
            (self.state != RaceState::Waiting).then(|| self.passage.to_string());
        self.broadcast(ServerEvent::RoomState {
            room_id: self.room_id.clone(),
            state: self.state,
            players: self.players.iter().map(Player::snapshot).collect(),
            passage,
            host_id: self.host(),
            countdown_ends_at: self.countdown_deadline.map(|at| self.clock.at(at)),
            server_time: self.clock.now_ms(),
        });
    }

    fn broadcast_leaderboard(&self) {
        if self.state != RaceState::Active {
            return;
        }
        self.broadcast(ServerEvent::LeaderboardUpdate {
            room_id: self.room_id.clone(),
            entries: self.standings(),
        });
    }

    fn broadcast(&self, event: ServerEvent) {
        for (player_id, sender) in &self.senders {
            self.deliver(*player_id, sender, event.clone());
        }
    }

    fn send_to(&self, player_id: PlayerId, event: ServerEvent) {
        if let Some(sender) = self.senders.get(&player_id) {
            self.deliver(player_id, sender, event);
        }
    }

    /// Never blocks: a full queue drops the event for that player only.
    fn deliver(&self, player_id: PlayerId, sender: &PlayerSender, event: ServerEvent) {
        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    room_id = %self.room_id,
                    %player_id,
                    "outbound queue full, event dropped"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::trace!(
                    room_id = %self.room_id,
                    %player_id,
                    "player channel closed"
                );
            }
        }
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.room_id.clone(),
            state: self.state,
            player_count: self.players.len(),
            max_players: self.config.max_players,
            host: self.host(),
            passage: self.passage.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            started_at: self.started_at,
            leaderboard: self.standings(),
        }
    }
}

/// Resolves at `deadline`, or never if there is none.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Random 128-bit rejoin token as 32 hex characters.
fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Spawns a room actor and returns a handle to it.
///
/// The room starts empty, so its retirement timer is armed right away
/// and cancelled by the first join.
pub(crate) fn spawn_room(
    room_id: RoomId,
    config: RaceConfig,
    passage: Passage,
    clock: RaceClock,
    notices: mpsc::UnboundedSender<RoomNotice>,
    channel_size: usize,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(channel_size);
    let now = clock.now_ms();

    let actor = RoomActor {
        room_id: room_id.clone(),
        passage_len: passage.chars().count() as u32,
        passage,
        state: RaceState::Waiting,
        clock,
        created_at: now,
        last_activity: now,
        started_at: None,
        players: Vec::new(),
        senders: HashMap::new(),
        rejoin_tokens: HashMap::new(),
        departed: HashMap::new(),
        finishers: Vec::new(),
        open: true,
        countdown_deadline: None,
        race_deadline: None,
        retire_deadline: Some(Instant::now() + config.grace_period),
        pacer: BroadcastPacer::new(config.broadcast_rate_hz),
        config,
        receiver: rx,
        notices,
    };

    tokio::spawn(actor.run());

    RoomHandle {
        room_id,
        sender: tx,
    }
}
