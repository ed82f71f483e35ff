//! Integration tests for race rooms, driven through the store on paused
//! Tokio time so every timer fires deterministically.

use std::time::Duration;

use speedtype_protocol::{
    FinishReason, LeaderboardEntry, PlayerId, RaceState, RoomId, ServerEvent,
};
use speedtype_race::{FixedPassage, PlayerSender, RaceConfig, RaceError, RaceStore};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

const PASSAGE: &str = "THE QUICK BROWN FOX";

// =========================================================================
// Helpers
// =========================================================================

fn pid(id: u64) -> PlayerId {
    PlayerId(id)
}

fn store(config: RaceConfig) -> RaceStore {
    RaceStore::new(config, FixedPassage(PASSAGE.into()))
}

/// Two to start, room for four, default timers.
fn duel() -> RaceConfig {
    RaceConfig {
        min_players: 2,
        max_players: 4,
        ..RaceConfig::default()
    }
}

fn channel() -> (PlayerSender, mpsc::Receiver<ServerEvent>) {
    mpsc::channel(256)
}

async fn next_event(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    time::timeout(Duration::from_secs(600), rx.recv())
        .await
        .expect("no event within 600s")
        .expect("event channel closed")
}

async fn race_started(rx: &mut mpsc::Receiver<ServerEvent>) -> (u64, String) {
    loop {
        if let ServerEvent::RaceStarted {
            start_timestamp,
            passage,
            ..
        } = next_event(rx).await
        {
            return (start_timestamp, passage);
        }
    }
}

async fn race_finished(
    rx: &mut mpsc::Receiver<ServerEvent>,
) -> (Vec<LeaderboardEntry>, FinishReason) {
    loop {
        if let ServerEvent::RaceFinished {
            final_results,
            reason,
            ..
        } = next_event(rx).await
        {
            return (final_results, reason);
        }
    }
}

fn order(entries: &[LeaderboardEntry]) -> Vec<PlayerId> {
    entries.iter().map(|e| e.player_id).collect()
}

/// Joins players 1 and 2 into one fresh room and returns its id.
async fn seat_two(
    store: &mut RaceStore,
) -> (RoomId, mpsc::Receiver<ServerEvent>, mpsc::Receiver<ServerEvent>) {
    let (tx1, rx1) = channel();
    let (tx2, rx2) = channel();
    let (room, _) = store.join(pid(1), "ada", None, None, tx1).await.unwrap();
    let room_id = room.room_id().clone();
    store
        .join(pid(2), "bob", Some(room_id.clone()), None, tx2)
        .await
        .unwrap();
    (room_id, rx1, rx2)
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_two_player_race_ranks_earlier_finisher_first() {
    let mut store = store(duel());
    let (room_id, mut rx1, mut rx2) = seat_two(&mut store).await;

    let room = store.get_room(&room_id).unwrap();
    assert_eq!(room.info().await.unwrap().state, RaceState::Countdown);

    let (start, passage) = race_started(&mut rx1).await;
    assert_eq!(passage, PASSAGE);
    assert_eq!(race_started(&mut rx2).await.0, start);

    // Both overshoot the 19-character passage; the count is clamped.
    time::advance(Duration::from_secs(4)).await;
    store.submit_progress(pid(2), &room_id, 20, 20).await.unwrap();
    time::advance(Duration::from_millis(1500)).await;
    store.submit_progress(pid(1), &room_id, 20, 21).await.unwrap();

    let (results, reason) = race_finished(&mut rx1).await;
    assert_eq!(reason, FinishReason::AllFinished);
    assert_eq!(order(&results), vec![pid(2), pid(1)]);
    assert_eq!(results[0].rank, 1);
    assert_eq!(results[0].chars_correct, 19);
    assert!(results[0].finished && results[1].finished);
    assert!(results[0].finish_time_ms < results[1].finish_time_ms);

    let (other_view, _) = race_finished(&mut rx2).await;
    assert_eq!(other_view, results);

    let info = room.info().await.unwrap();
    assert_eq!(info.state, RaceState::Finished);
    assert_eq!(info.leaderboard, results, "results are reproducible from final state");
}

#[tokio::test(start_paused = true)]
async fn test_countdown_never_ends_early() {
    let mut store = store(RaceConfig {
        countdown: Duration::from_secs(5),
        ..duel()
    });
    let entered = Instant::now();
    let (_room_id, mut rx1, _rx2) = seat_two(&mut store).await;

    let ends_at = loop {
        if let ServerEvent::RoomState {
            state: RaceState::Countdown,
            countdown_ends_at: Some(at),
            passage,
            ..
        } = next_event(&mut rx1).await
        {
            assert_eq!(passage.as_deref(), Some(PASSAGE));
            break at;
        }
    };

    let (start, _) = race_started(&mut rx1).await;
    assert!(Instant::now() - entered >= Duration::from_secs(5));
    assert!(start >= ends_at);
}

#[tokio::test(start_paused = true)]
async fn test_race_times_out() {
    let mut store = store(RaceConfig {
        race_timeout: Duration::from_secs(10),
        ..duel()
    });
    let (room_id, mut rx1, _rx2) = seat_two(&mut store).await;
    race_started(&mut rx1).await;
    let started = Instant::now();

    time::advance(Duration::from_secs(1)).await;
    store.submit_progress(pid(2), &room_id, 5, 5).await.unwrap();

    let (results, reason) = race_finished(&mut rx1).await;
    assert_eq!(reason, FinishReason::Timeout);
    assert!(Instant::now() - started >= Duration::from_secs(10));
    assert_eq!(order(&results), vec![pid(2), pid(1)]);
    assert!(results.iter().all(|e| !e.finished));
}

#[tokio::test(start_paused = true)]
async fn test_last_runner_leaving_finishes_race() {
    let mut store = store(duel());
    let (room_id, mut rx1, _rx2) = seat_two(&mut store).await;
    race_started(&mut rx1).await;

    store.submit_progress(pid(1), &room_id, 19, 19).await.unwrap();
    store.leave(pid(2), &room_id).await.unwrap();

    let (results, reason) = race_finished(&mut rx1).await;
    assert_eq!(reason, FinishReason::AllFinished);
    assert_eq!(order(&results), vec![pid(1)]);
}

#[tokio::test(start_paused = true)]
async fn test_finisher_who_leaves_keeps_their_result() {
    let mut store = store(duel());
    let (room_id, mut rx1, mut rx2) = seat_two(&mut store).await;
    race_started(&mut rx1).await;

    time::advance(Duration::from_secs(3)).await;
    store.submit_progress(pid(1), &room_id, 19, 19).await.unwrap();
    store.leave(pid(1), &room_id).await.unwrap();

    time::advance(Duration::from_secs(2)).await;
    store.submit_progress(pid(2), &room_id, 19, 20).await.unwrap();

    let (results, reason) = race_finished(&mut rx2).await;
    assert_eq!(reason, FinishReason::AllFinished);
    assert_eq!(order(&results), vec![pid(1), pid(2)]);
    assert!(results[0].finished);
    assert_eq!(results[0].display_name, "ada");
}

// =========================================================================
// Joins
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_join_rejected_once_race_committed() {
    let mut store = store(duel());
    let (room_id, mut rx1, _rx2) = seat_two(&mut store).await;
    let (tx3, _rx3) = channel();

    let during_countdown = store
        .join(pid(3), "cy", Some(room_id.clone()), None, tx3.clone())
        .await;
    assert!(matches!(during_countdown, Err(RaceError::RaceAlreadyActive(_))));

    race_started(&mut rx1).await;
    let during_race = store.join(pid(3), "cy", Some(room_id), None, tx3).await;
    assert!(matches!(during_race, Err(RaceError::RaceAlreadyActive(_))));
    assert_eq!(store.player_room(pid(3)), None);
}

#[tokio::test(start_paused = true)]
async fn test_full_room_rejects_join() {
    let mut store = store(RaceConfig {
        min_players: 2,
        max_players: 2,
        ..RaceConfig::default()
    });
    let (room_id, _rx1, _rx2) = seat_two(&mut store).await;
    let (tx3, _rx3) = channel();

    let result = store.join(pid(3), "cy", Some(room_id), None, tx3).await;
    assert!(matches!(result, Err(RaceError::RoomFull(_))));
}

#[tokio::test(start_paused = true)]
async fn test_join_unknown_room() {
    let mut store = store(duel());
    let (tx, _rx) = channel();
    let result = store
        .join(pid(1), "ada", Some(RoomId::new("ffffffffffffffff")), None, tx)
        .await;
    assert!(matches!(result, Err(RaceError::RoomNotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_joiner_hears_room_joined_first() {
    let mut store = store(duel());
    let (tx, mut rx) = channel();
    let (_, ticket) = store.join(pid(7), "ada", None, None, tx).await.unwrap();
    assert_eq!(ticket.rejoin_token, None);

    match next_event(&mut rx).await {
        ServerEvent::RoomJoined {
            room_id, player_id, ..
        } => {
            assert_eq!(room_id, ticket.room_id);
            assert_eq!(player_id, pid(7));
        }
        other => panic!("expected room-joined, got {other:?}"),
    }
    match next_event(&mut rx).await {
        ServerEvent::RoomState {
            state,
            players,
            passage,
            host_id,
            ..
        } => {
            assert_eq!(state, RaceState::Waiting);
            assert_eq!(players.len(), 1);
            assert_eq!(passage, None, "passage stays hidden in the lobby");
            assert_eq!(host_id, Some(pid(7)));
        }
        other => panic!("expected room-state, got {other:?}"),
    }
}

// =========================================================================
// Host start
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_only_host_can_start() {
    let mut store = store(RaceConfig {
        min_players: 3,
        ..duel()
    });
    let (room_id, mut rx1, _rx2) = seat_two(&mut store).await;

    let err = store.start(pid(2), &room_id).await.unwrap_err();
    assert!(matches!(err, RaceError::NotHost(..)));

    store.start(pid(1), &room_id).await.unwrap();
    let info = store.get_room(&room_id).unwrap().info().await.unwrap();
    assert_eq!(info.state, RaceState::Countdown);

    let again = store.start(pid(1), &room_id).await;
    assert!(matches!(again, Err(RaceError::RaceAlreadyActive(_))));
    race_started(&mut rx1).await;
}

#[tokio::test(start_paused = true)]
async fn test_host_passes_to_next_player_on_leave() {
    let mut store = store(RaceConfig {
        min_players: 3,
        ..duel()
    });
    let (room_id, _rx1, _rx2) = seat_two(&mut store).await;

    store.leave(pid(1), &room_id).await.unwrap();
    let info = store.get_room(&room_id).unwrap().info().await.unwrap();
    assert_eq!(info.host, Some(pid(2)));
    store.start(pid(2), &room_id).await.unwrap();
}

// =========================================================================
// Progress
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_stale_progress_is_ignored() {
    let mut store = store(duel());
    let (room_id, mut rx1, _rx2) = seat_two(&mut store).await;
    let room = store.get_room(&room_id).unwrap();

    // Before the race starts nothing is recorded.
    store.submit_progress(pid(1), &room_id, 3, 3).await.unwrap();
    race_started(&mut rx1).await;
    let board = room.info().await.unwrap().leaderboard;
    assert!(board.iter().all(|e| e.chars_correct == 0));

    time::advance(Duration::from_millis(500)).await;
    store.submit_progress(pid(1), &room_id, 10, 10).await.unwrap();
    time::advance(Duration::from_millis(100)).await;
    store.submit_progress(pid(1), &room_id, 8, 12).await.unwrap();

    let board = room.info().await.unwrap().leaderboard;
    let ada = board.iter().find(|e| e.player_id == pid(1)).unwrap();
    assert_eq!(ada.chars_correct, 10);
    assert_eq!(ada.chars_total, 10);
    assert_eq!(ada.rank, 1);
}

#[tokio::test(start_paused = true)]
async fn test_leaderboard_broadcasts_are_paced() {
    let mut store = store(duel());
    let (room_id, mut rx1, _rx2) = seat_two(&mut store).await;
    race_started(&mut rx1).await;

    for typed in 1..=15 {
        store
            .submit_progress(pid(1), &room_id, typed, typed)
            .await
            .unwrap();
    }
    time::sleep(Duration::from_millis(350)).await;

    let mut updates = Vec::new();
    while let Ok(event) = rx1.try_recv() {
        if let ServerEvent::LeaderboardUpdate { entries, .. } = event {
            updates.push(entries);
        }
    }
    assert!(!updates.is_empty());
    assert!(
        updates.len() <= 5,
        "15 updates in one tick coalesce, got {}",
        updates.len()
    );
    let latest = updates.last().unwrap();
    assert_eq!(latest[0].player_id, pid(1));
    assert_eq!(latest[0].chars_correct, 15);
}

// =========================================================================
// Retirement
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_empty_room_retired_once_after_grace() {
    let mut store = store(duel());
    let (tx, _rx) = channel();
    let (room, _) = store.join(pid(1), "ada", None, None, tx).await.unwrap();
    let room_id = room.room_id().clone();

    store.leave(pid(1), &room_id).await.unwrap();

    time::sleep(Duration::from_secs(29)).await;
    assert!(store.reap_retired().is_empty());
    assert!(store.get_room(&room_id).is_ok(), "room survives the grace period");

    time::sleep(Duration::from_secs(2)).await;
    assert_eq!(store.reap_retired(), vec![room_id.clone()]);
    assert!(store.reap_retired().is_empty());
    assert!(matches!(
        store.get_room(&room_id),
        Err(RaceError::RoomNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_cancels_retirement() {
    let mut store = store(RaceConfig {
        min_players: 3,
        ..duel()
    });
    let (tx, _rx) = channel();
    let (room, _) = store.join(pid(1), "ada", None, None, tx).await.unwrap();
    let room_id = room.room_id().clone();
    store.leave(pid(1), &room_id).await.unwrap();

    time::sleep(Duration::from_secs(20)).await;
    let (tx, _rx) = channel();
    store
        .join(pid(2), "bob", Some(room_id.clone()), None, tx)
        .await
        .unwrap();

    time::sleep(Duration::from_secs(60)).await;
    assert!(store.reap_retired().is_empty());
    assert_eq!(store.list_active_rooms(), vec![room_id]);
}

#[tokio::test(start_paused = true)]
async fn test_finished_room_retired_after_grace() {
    let mut store = store(RaceConfig::solo());
    let (tx, mut rx) = channel();
    let (room, _) = store.join(pid(1), "ada", None, None, tx).await.unwrap();
    let room_id = room.room_id().clone();

    race_started(&mut rx).await;
    store.submit_progress(pid(1), &room_id, 19, 19).await.unwrap();
    race_finished(&mut rx).await;

    time::sleep(Duration::from_secs(31)).await;
    assert_eq!(store.reap_retired(), vec![room_id]);
    assert_eq!(store.player_room(pid(1)), None);
}

#[tokio::test(start_paused = true)]
async fn test_removed_room_stops_answering() {
    let mut store = store(duel());
    let room_id = store.create_room(duel()).unwrap();
    let handle = store.get_room(&room_id).unwrap();

    store.remove_room(&room_id).await;
    store.remove_room(&room_id).await;

    assert!(matches!(handle.info().await, Err(RaceError::Unavailable(_))));
    assert_eq!(store.room_count(), 0);
}

// =========================================================================
// Rejoin
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_rejoin_token_restores_progress() {
    let mut store = store(RaceConfig {
        allow_rejoin: true,
        ..duel()
    });
    let (tx1, _rx1) = channel();
    let (tx2, mut rx2) = channel();
    let (room, ticket) = store.join(pid(1), "ada", None, None, tx1).await.unwrap();
    let room_id = room.room_id().clone();
    let token = ticket.rejoin_token.expect("rejoin enabled");
    store
        .join(pid(2), "bob", Some(room_id.clone()), None, tx2)
        .await
        .unwrap();
    race_started(&mut rx2).await;

    store.submit_progress(pid(1), &room_id, 7, 8).await.unwrap();
    store.disconnect(pid(1)).await;

    let (tx3, mut rx3) = channel();
    let (_, resumed) = store
        .join(pid(3), "ada", Some(room_id.clone()), Some(token.clone()), tx3)
        .await
        .unwrap();
    assert_eq!(resumed.rejoin_token, Some(token));

    let (_, passage) = race_started(&mut rx3).await;
    assert_eq!(passage, PASSAGE);

    let board = room.info().await.unwrap().leaderboard;
    assert_eq!(order(&board), vec![pid(3), pid(2)]);
    assert_eq!(board[0].chars_correct, 7);
    assert_eq!(board[0].display_name, "ada");
}

#[tokio::test(start_paused = true)]
async fn test_unknown_rejoin_token_is_refused_mid_race() {
    let mut store = store(RaceConfig {
        allow_rejoin: true,
        ..duel()
    });
    let (room_id, mut rx1, _rx2) = seat_two(&mut store).await;
    race_started(&mut rx1).await;

    let (tx3, _rx3) = channel();
    let result = store
        .join(pid(3), "eve", Some(room_id), Some("not-a-token".into()), tx3)
        .await;
    assert!(matches!(result, Err(RaceError::RaceAlreadyActive(_))));
}
