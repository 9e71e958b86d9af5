//! Error types for the match server.

use shared::{MatchId, Mode, PlayerId};
use thiserror::Error;

/// Failures reported by the storage collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("unknown user {0}")]
    UnknownUser(PlayerId),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// The server loop has stopped and no longer accepts commands.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("match server is not running")]
pub struct ServerClosed;

/// Rejected requests to create a match.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LobbyError {
    #[error("{mode:?} match needs {expected} participants, got {got}")]
    WrongParticipantCount {
        mode: Mode,
        expected: usize,
        got: usize,
    },

    #[error("player {0} listed more than once")]
    DuplicateParticipant(PlayerId),

    #[error("player {player} is already in match {match_id}")]
    AlreadyInMatch { player: PlayerId, match_id: MatchId },
}
