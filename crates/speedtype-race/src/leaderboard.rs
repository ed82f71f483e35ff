//! Progress aggregation: players in, ranked leaderboard out.
//!
//! Everything here is a pure function of its arguments, so a leaderboard
//! recomputed from the same players is always identical.
//!
//! Ranking:
//! 1. finished players, earliest finish first;
//! 2. then unfinished players, most correct characters first;
//! 3. equal positions go to the earliest last update;
//! 4. anything still tied is ordered by player id.

use std::cmp::Ordering;

use speedtype_protocol::LeaderboardEntry;

use crate::Player;

/// Characters per word for WPM.
const CHARS_PER_WORD: f64 = 5.0;

/// Ranks `players` and builds leaderboard rows.
///
/// `started_at` is the race start on the room clock; before the race
/// starts every speed figure is zero.
pub fn compute<'a, I>(players: I, started_at: Option<u64>) -> Vec<LeaderboardEntry>
where
    I: IntoIterator<Item = &'a Player>,
{
    let mut ranked: Vec<&Player> = players.into_iter().collect();
    ranked.sort_by(|a, b| compare(a, b));

    ranked
        .into_iter()
        .enumerate()
        .map(|(i, player)| entry(i as u32 + 1, player, started_at))
        .collect()
}

/// Total ranking order between two players (`Less` ranks higher).
pub fn compare(a: &Player, b: &Player) -> Ordering {
    let (pa, pb) = (&a.progress, &b.progress);
    let by_progress = match (pa.finished_at, pb.finished_at) {
        (Some(fa), Some(fb)) => fa.cmp(&fb),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => pb
            .chars_correct
            .cmp(&pa.chars_correct)
            .then_with(|| earliest_first(pa.updated_at, pb.updated_at)),
    };
    by_progress.then_with(|| a.id.cmp(&b.id))
}

/// `None` (never updated) sorts after any timestamp.
fn earliest_first(a: Option<u64>, b: Option<u64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn entry(rank: u32, player: &Player, started_at: Option<u64>) -> LeaderboardEntry {
    let p = &player.progress;
    let elapsed_ms = match (started_at, p.finished_at.or(p.updated_at)) {
        (Some(start), Some(at)) => at.saturating_sub(start),
        _ => 0,
    };

    LeaderboardEntry {
        rank,
        player_id: player.id,
        display_name: player.display_name.clone(),
        chars_correct: p.chars_correct,
        chars_total: p.chars_total,
        errors: p.errors,
        finished: p.is_finished(),
        finish_time_ms: match (started_at, p.finished_at) {
            (Some(start), Some(done)) => Some(done.saturating_sub(start)),
            _ => None,
        },
        wpm: words_per_minute(p.chars_correct, elapsed_ms),
        accuracy: accuracy(p.chars_correct, p.chars_total),
    }
}

fn words_per_minute(chars_correct: u32, elapsed_ms: u64) -> f64 {
    if elapsed_ms == 0 {
        return 0.0;
    }
    let minutes = elapsed_ms as f64 / 60_000.0;
    round1(chars_correct as f64 / CHARS_PER_WORD / minutes)
}

fn accuracy(chars_correct: u32, chars_total: u32) -> f64 {
    if chars_total == 0 {
        return 100.0;
    }
    round1(chars_correct as f64 * 100.0 / chars_total as f64)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use speedtype_protocol::PlayerId;

    use super::*;
    use crate::Progress;

    fn player(id: u64, progress: Progress) -> Player {
        Player {
            id: PlayerId(id),
            display_name: format!("p{id}"),
            joined_at: 0,
            progress,
        }
    }

    fn at(chars_correct: u32, updated_at: u64) -> Progress {
        Progress {
            chars_correct,
            chars_total: chars_correct,
            updated_at: Some(updated_at),
            ..Progress::default()
        }
    }

    fn done(chars: u32, finished_at: u64) -> Progress {
        Progress {
            finished_at: Some(finished_at),
            ..at(chars, finished_at)
        }
    }

    fn order(entries: &[LeaderboardEntry]) -> Vec<u64> {
        entries.iter().map(|e| e.player_id.0).collect()
    }

    #[test]
    fn test_finished_players_rank_by_finish_time() {
        let players = [
            player(1, done(19, 9_000)),
            player(2, done(19, 7_000)),
            player(3, at(18, 6_000)),
        ];
        let board = compute(&players, Some(1_000));
        assert_eq!(order(&board), vec![2, 1, 3]);
        assert_eq!(
            board.iter().map(|e| e.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(board[0].finish_time_ms, Some(6_000));
        assert_eq!(board[2].finish_time_ms, None);
    }

    #[test]
    fn test_unfinished_rank_by_chars_then_earliest_update() {
        let players = [
            player(1, at(10, 5_000)),
            player(2, at(12, 6_000)),
            player(3, at(10, 4_000)),
        ];
        let board = compute(&players, Some(1_000));
        assert_eq!(order(&board), vec![2, 3, 1]);
    }

    #[test]
    fn test_later_update_at_same_position_ranks_lower() {
        // ada reaches 10 first but reports again at 10 after bob gets there.
        let mut ada = player(1, Progress::default());
        let mut bob = player(2, Progress::default());
        ada.record_progress(10, 10, 2_000, 1_000, 19).unwrap();
        bob.record_progress(10, 10, 3_000, 1_000, 19).unwrap();
        ada.record_progress(10, 11, 5_000, 1_000, 19).unwrap();

        let board = compute([&ada, &bob], Some(1_000));
        assert_eq!(order(&board), vec![2, 1]);
    }

    #[test]
    fn test_full_ties_fall_back_to_player_id() {
        let players = [
            player(9, Progress::default()),
            player(4, Progress::default()),
            player(6, at(0, 2_000)),
        ];
        let board = compute(&players, None);
        assert_eq!(order(&board), vec![6, 4, 9]);
    }

    #[test]
    fn test_ranking_ignores_input_order() {
        let a = [
            player(1, at(7, 3_000)),
            player(2, done(19, 8_000)),
            player(3, at(7, 2_500)),
            player(4, at(11, 4_000)),
        ];
        let mut b = a.clone();
        b.reverse();
        assert_eq!(compute(&a, Some(0)), compute(&b, Some(0)));
        assert_eq!(order(&compute(&a, Some(0))), vec![2, 4, 3, 1]);
    }

    #[test]
    fn test_speed_and_accuracy_figures() {
        // 50 correct chars (10 words) in 30 s → 20 WPM; 50/64 typed → 78.1%.
        let progress = Progress {
            chars_correct: 50,
            chars_total: 64,
            errors: 14,
            updated_at: Some(31_000),
            ..Progress::default()
        };
        let board = compute(&[player(1, progress)], Some(1_000));
        assert_eq!(board[0].wpm, 20.0);
        assert_eq!(board[0].accuracy, 78.1);
        assert_eq!(board[0].errors, 14);
    }

    #[test]
    fn test_before_start_figures_are_zero() {
        let board = compute(&[player(1, Progress::default())], None);
        assert_eq!(board[0].wpm, 0.0);
        assert_eq!(board[0].accuracy, 100.0);
        assert!(!board[0].finished);
    }
}
