//! Post-game bookkeeping: rating updates and match history.

use crate::error::StoreError;
use crate::store::{MatchHistoryRow, Outcome, RatingRecord, ResultStore};
use log::{error, info};
use shared::{MatchId, PlayerId};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub const K_FACTOR: f64 = 32.0;

/// Final result of a match, handed to the recorder when the match finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub match_id: MatchId,
    /// Participants in paddle order.
    pub players: Vec<PlayerId>,
    /// Final score per paddle, same order as `players`.
    pub scores: Vec<u32>,
    /// Index of the winning paddle.
    pub winner: usize,
}

/// Expected score of a player rated `rating` against `opponent`.
pub fn expected_score(rating: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf(f64::from(opponent - rating) / 400.0))
}

/// Rating after one match, rounded to the nearest integer.
pub fn next_rating(rating: i32, opponent: i32, outcome: Outcome) -> i32 {
    let expected = expected_score(rating, opponent);
    (f64::from(rating) + K_FACTOR * (outcome.points() - expected)).round() as i32
}

/// Milliseconds since the Unix epoch, 0 for a clock set before it.
fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

pub struct ResultRecorder {
    store: Arc<dyn ResultStore>,
}

impl ResultRecorder {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self { store }
    }

    /// Records the result on the blocking pool. Failures are logged and never
    /// reach the caller.
    pub fn spawn(self: &Arc<Self>, result: MatchResult) {
        let recorder = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = recorder.record(&result) {
                error!("Failed to record result of match {}: {}", result.match_id, e);
            }
        });
    }

    /// Applies a two-participant result: updates both ratings, appends one
    /// history row per participant and recomputes aggregate stats.
    pub fn record(&self, result: &MatchResult) -> Result<(), StoreError> {
        let (a, b, score_a, score_b) =
            match (result.players.as_slice(), result.scores.as_slice()) {
                ([a, b], [score_a, score_b]) => (*a, *b, *score_a, *score_b),
                (players, scores) => {
                    return Err(StoreError::Unavailable(format!(
                        "cannot rate a match with {} participants and {} scores",
                        players.len(),
                        scores.len()
                    )))
                }
            };

        let rating_a = self.ensure_rating(a)?.rating;
        let rating_b = self.ensure_rating(b)?.rating;

        let outcome_a = Outcome::from_scores(score_a, score_b);
        let outcome_b = Outcome::from_scores(score_b, score_a);
        let new_a = next_rating(rating_a, rating_b, outcome_a);
        let new_b = next_rating(rating_b, rating_a, outcome_b);

        let recorded_at = unix_millis();
        for (player, opponent, own, theirs, rating, outcome) in [
            (a, b, score_a, score_b, new_a, outcome_a),
            (b, a, score_b, score_a, new_b, outcome_b),
        ] {
            self.store.append_history(MatchHistoryRow {
                match_id: result.match_id,
                player_id: player,
                opponent_id: opponent,
                own_score: own,
                opponent_score: theirs,
                rating,
                outcome,
                recorded_at,
            })?;
        }

        self.refresh_stats(a, new_a)?;
        self.refresh_stats(b, new_b)?;

        info!(
            "Recorded match {}: player {} {} -> {}, player {} {} -> {}",
            result.match_id, a, rating_a, new_a, b, rating_b, new_b
        );
        Ok(())
    }

    fn ensure_rating(&self, player: PlayerId) -> Result<RatingRecord, StoreError> {
        match self.store.rating(player)? {
            Some(record) => Ok(record),
            None => {
                let record = RatingRecord::new(player);
                self.store.upsert_rating(record.clone())?;
                Ok(record)
            }
        }
    }

    fn refresh_stats(&self, player: PlayerId, rating: i32) -> Result<(), StoreError> {
        let history = self.store.history(player)?;
        let played = history.len() as u32;
        let wins = history
            .iter()
            .filter(|row| row.outcome == Outcome::Win)
            .count() as f64;
        let win_rate = if played == 0 {
            0.0
        } else {
            wins / f64::from(played) * 100.0
        };

        self.store.upsert_rating(RatingRecord {
            player_id: player,
            rating,
            matches_played: played,
            win_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, DEFAULT_RATING};
    use assert_approx_eq::assert_approx_eq;

    struct BrokenStore;

    impl ResultStore for BrokenStore {
        fn rating(&self, _: PlayerId) -> Result<Option<RatingRecord>, StoreError> {
            Err(StoreError::Unavailable("disk on fire".to_string()))
        }
        fn upsert_rating(&self, _: RatingRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk on fire".to_string()))
        }
        fn append_history(&self, _: MatchHistoryRow) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk on fire".to_string()))
        }
        fn history(&self, _: PlayerId) -> Result<Vec<MatchHistoryRow>, StoreError> {
            Err(StoreError::Unavailable("disk on fire".to_string()))
        }
    }

    fn result(scores: Vec<u32>, winner: usize) -> MatchResult {
        MatchResult {
            match_id: 11,
            players: vec![1, 2],
            scores,
            winner,
        }
    }

    #[test]
    fn test_expected_score_is_symmetric() {
        assert_approx_eq!(expected_score(1000, 1000), 0.5, 1e-9);
        let strong = expected_score(1400, 1000);
        let weak = expected_score(1000, 1400);
        assert_approx_eq!(strong + weak, 1.0, 1e-9);
        assert_approx_eq!(strong, 10.0 / 11.0, 1e-9);
    }

    #[test]
    fn test_next_rating_equal_players() {
        assert_eq!(next_rating(1000, 1000, Outcome::Win), 1016);
        assert_eq!(next_rating(1000, 1000, Outcome::Loss), 984);
        assert_eq!(next_rating(1000, 1000, Outcome::Draw), 1000);
    }

    #[test]
    fn test_record_creates_ratings_and_history() {
        let store = Arc::new(MemoryStore::new());
        let recorder = ResultRecorder::new(store.clone());

        recorder.record(&result(vec![10, 6], 0)).unwrap();

        let winner = store.rating(1).unwrap().unwrap();
        let loser = store.rating(2).unwrap().unwrap();
        assert_eq!(winner.rating, DEFAULT_RATING + 16);
        assert_eq!(loser.rating, DEFAULT_RATING - 16);
        assert_eq!(winner.matches_played, 1);
        assert_approx_eq!(winner.win_rate, 100.0, 1e-9);
        assert_approx_eq!(loser.win_rate, 0.0, 1e-9);

        let rows = store.history(1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].opponent_id, 2);
        assert_eq!(rows[0].own_score, 10);
        assert_eq!(rows[0].opponent_score, 6);
        assert_eq!(rows[0].outcome, Outcome::Win);
        assert_eq!(store.history(2).unwrap()[0].outcome, Outcome::Loss);
    }

    #[test]
    fn test_history_rows_are_timestamped() {
        let store = Arc::new(MemoryStore::new());
        let recorder = ResultRecorder::new(store.clone());

        let before = unix_millis();
        recorder.record(&result(vec![10, 6], 0)).unwrap();
        let after = unix_millis();

        let row = &store.history(1).unwrap()[0];
        assert!(row.recorded_at >= before && row.recorded_at <= after);
        assert_eq!(row.recorded_at, store.history(2).unwrap()[0].recorded_at);
    }

    #[test]
    fn test_win_rate_recomputed_from_history() {
        let store = Arc::new(MemoryStore::new());
        let recorder = ResultRecorder::new(store.clone());

        recorder.record(&result(vec![10, 2], 0)).unwrap();
        recorder.record(&result(vec![3, 10], 1)).unwrap();

        let first = store.rating(1).unwrap().unwrap();
        assert_eq!(first.matches_played, 2);
        assert_approx_eq!(first.win_rate, 50.0, 1e-9);
    }

    #[test]
    fn test_draw_is_supported() {
        let store = Arc::new(MemoryStore::new());
        let recorder = ResultRecorder::new(store.clone());

        recorder.record(&result(vec![4, 4], 0)).unwrap();
        assert_eq!(store.rating(1).unwrap().unwrap().rating, DEFAULT_RATING);
        assert_eq!(store.history(2).unwrap()[0].outcome, Outcome::Draw);
    }

    #[test]
    fn test_store_failure_is_reported() {
        let recorder = ResultRecorder::new(Arc::new(BrokenStore));
        assert!(matches!(
            recorder.record(&result(vec![10, 0], 0)),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn test_quad_result_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let recorder = ResultRecorder::new(store.clone());
        let quad = MatchResult {
            match_id: 1,
            players: vec![1, 2, 3, 4],
            scores: vec![10, 0, 0, 0],
            winner: 0,
        };
        assert!(recorder.record(&quad).is_err());
        assert_eq!(store.history_len(), 0);
    }

    #[test]
    fn test_mismatched_scores_are_rejected() {
        let store = Arc::new(MemoryStore::new());
        let recorder = ResultRecorder::new(store.clone());

        assert!(matches!(
            recorder.record(&result(vec![10], 0)),
            Err(StoreError::Unavailable(_))
        ));
        assert!(recorder.record(&result(vec![10, 2, 3], 0)).is_err());
        assert_eq!(store.history_len(), 0);
        assert!(store.rating(1).unwrap().is_none());
    }
}
