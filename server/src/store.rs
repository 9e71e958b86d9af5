//! Collaborators the match server calls into: the user directory that names
//! players and the result store that keeps ratings and match history.

use crate::error::StoreError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shared::{MatchId, PlayerId};
use std::collections::HashMap;

/// Rating given to a player the first time one of their matches is recorded.
pub const DEFAULT_RATING: i32 = 1000;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
    Draw,
}

impl Outcome {
    /// Classifies a final score from one participant's point of view.
    pub fn from_scores(own: u32, opponent: u32) -> Self {
        match own.cmp(&opponent) {
            std::cmp::Ordering::Greater => Outcome::Win,
            std::cmp::Ordering::Less => Outcome::Loss,
            std::cmp::Ordering::Equal => Outcome::Draw,
        }
    }

    /// Actual score used by the rating formula.
    pub fn points(self) -> f64 {
        match self {
            Outcome::Win => 1.0,
            Outcome::Loss => 0.0,
            Outcome::Draw => 0.5,
        }
    }
}

/// One participant's row for a finished match. Rows are never updated.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchHistoryRow {
    pub match_id: MatchId,
    pub player_id: PlayerId,
    pub opponent_id: PlayerId,
    pub own_score: u32,
    pub opponent_score: u32,
    /// Rating after this match was applied.
    pub rating: i32,
    pub outcome: Outcome,
    pub recorded_at: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RatingRecord {
    pub player_id: PlayerId,
    pub rating: i32,
    pub matches_played: u32,
    /// Percentage of recorded matches won, 0 to 100.
    pub win_rate: f64,
}

impl RatingRecord {
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            rating: DEFAULT_RATING,
            matches_played: 0,
            win_rate: 0.0,
        }
    }
}

/// Resolves display names for players.
pub trait UserDirectory: Send + Sync {
    fn display_name(&self, player: PlayerId) -> Result<String, StoreError>;
}

/// Persists ratings and the append-only match history.
pub trait ResultStore: Send + Sync {
    fn rating(&self, player: PlayerId) -> Result<Option<RatingRecord>, StoreError>;
    fn upsert_rating(&self, record: RatingRecord) -> Result<(), StoreError>;
    fn append_history(&self, row: MatchHistoryRow) -> Result<(), StoreError>;
    /// Every row recorded for the player, oldest first.
    fn history(&self, player: PlayerId) -> Result<Vec<MatchHistoryRow>, StoreError>;
}

/// In-process implementation of both collaborators.
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<PlayerId, String>>,
    ratings: Mutex<HashMap<PlayerId, RatingRecord>>,
    history: Mutex<Vec<MatchHistoryRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_user(&self, player: PlayerId, name: impl Into<String>) {
        self.users.lock().insert(player, name.into());
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }
}

impl UserDirectory for MemoryStore {
    fn display_name(&self, player: PlayerId) -> Result<String, StoreError> {
        self.users
            .lock()
            .get(&player)
            .cloned()
            .ok_or(StoreError::UnknownUser(player))
    }
}

impl ResultStore for MemoryStore {
    fn rating(&self, player: PlayerId) -> Result<Option<RatingRecord>, StoreError> {
        Ok(self.ratings.lock().get(&player).cloned())
    }

    fn upsert_rating(&self, record: RatingRecord) -> Result<(), StoreError> {
        self.ratings.lock().insert(record.player_id, record);
        Ok(())
    }

    fn append_history(&self, row: MatchHistoryRow) -> Result<(), StoreError> {
        self.history.lock().push(row);
        Ok(())
    }

    fn history(&self, player: PlayerId) -> Result<Vec<MatchHistoryRow>, StoreError> {
        Ok(self
            .history
            .lock()
            .iter()
            .filter(|row| row.player_id == player)
            .cloned()
            .collect())
    }
}
