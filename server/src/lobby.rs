//! The lobby service: matchmaking queues plus the match registry behind one
//! set of operations.

use crate::error::LobbyError;
use crate::game::{Match, MatchRules, Participant};
use crate::matchmaking::{JoinOutcome, MatchmakingQueues};
use crate::registry::MatchRegistry;
use crate::store::UserDirectory;
use log::{debug, info};
use shared::{MatchId, Mode, PlayerId, QueueStatus};
use std::collections::HashSet;
use std::sync::Arc;

/// Name shown for players the user directory cannot resolve.
pub fn fallback_name(player: PlayerId) -> String {
    format!("Player {}", player)
}

pub struct Lobby {
    pub queues: MatchmakingQueues,
    pub registry: MatchRegistry,
    directory: Arc<dyn UserDirectory>,
}

impl Lobby {
    pub fn new(rules: MatchRules, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            queues: MatchmakingQueues::new(),
            registry: MatchRegistry::new(rules),
            directory,
        }
    }

    /// Queues a player, opening a match once a full group has arrived.
    ///
    /// A player who already belongs to an active match is answered with that
    /// match instead of being queued.
    pub fn join(&mut self, mode: Mode, player: PlayerId) -> QueueStatus {
        if let Some(match_id) = self.registry.active_match_of(player) {
            return QueueStatus::Matched { match_id };
        }

        match self.queues.join(mode, player) {
            JoinOutcome::Waiting => {
                debug!(
                    "Player {} waiting for {:?} ({} queued)",
                    player,
                    mode,
                    self.queues.waiting(mode)
                );
                QueueStatus::Waiting
            }
            JoinOutcome::Formed(group) => {
                let match_id = self.open_match(mode, &group);
                self.queues.assign(mode, &group, match_id);
                QueueStatus::Matched { match_id }
            }
        }
    }

    pub fn status(&mut self, mode: Mode, player: PlayerId) -> QueueStatus {
        self.queues.status(mode, player)
    }

    pub fn cancel(&mut self, mode: Mode, player: PlayerId) {
        if self.queues.cancel(mode, player) {
            debug!("Player {} left the {:?} queue", player, mode);
        }
    }

    /// Removes a finished or abandoned match along with any assignment to it
    /// that its players never collected.
    pub fn evict(&mut self, match_id: MatchId) -> Option<Match> {
        self.queues.forget_match(match_id);
        self.registry.remove(match_id)
    }

    /// Opens a match for an explicit participant list, e.g. the next round
    /// of a tournament bracket. Listed players leave any queue they are in.
    pub fn create_match(&mut self, mode: Mode, players: &[PlayerId]) -> Result<MatchId, LobbyError> {
        if players.len() != mode.participants() {
            return Err(LobbyError::WrongParticipantCount {
                mode,
                expected: mode.participants(),
                got: players.len(),
            });
        }

        let mut seen = HashSet::new();
        for &player in players {
            if !seen.insert(player) {
                return Err(LobbyError::DuplicateParticipant(player));
            }
            if let Some(match_id) = self.registry.active_match_of(player) {
                return Err(LobbyError::AlreadyInMatch { player, match_id });
            }
        }

        for &player in players {
            self.queues.withdraw(player);
        }
        Ok(self.open_match(mode, players))
    }

    fn open_match(&mut self, mode: Mode, players: &[PlayerId]) -> MatchId {
        let participants = players.iter().map(|&id| self.resolve(id)).collect();
        self.registry.create(mode, participants)
    }

    fn resolve(&self, player: PlayerId) -> Participant {
        match self.directory.display_name(player) {
            Ok(name) => Participant {
                id: player,
                name,
                name_is_fallback: false,
            },
            Err(e) => {
                info!("No display name for player {}: {}", player, e);
                Participant {
                    id: player,
                    name: fallback_name(player),
                    name_is_fallback: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn lobby() -> Lobby {
        let store = MemoryStore::new();
        store.register_user(1, "alice");
        Lobby::new(MatchRules::default(), Arc::new(store))
    }

    #[test]
    fn test_duo_join_and_status() {
        let mut lobby = lobby();
        assert_eq!(lobby.join(Mode::Duo, 1), QueueStatus::Waiting);
        let matched = lobby.join(Mode::Duo, 2);
        let QueueStatus::Matched { match_id } = matched else {
            panic!("Expected a match, got {:?}", matched);
        };

        assert_eq!(lobby.status(Mode::Duo, 1), matched);
        assert_eq!(lobby.status(Mode::Duo, 2), matched);
        assert_eq!(lobby.status(Mode::Duo, 1), QueueStatus::Waiting);
        assert_eq!(lobby.status(Mode::Duo, 2), QueueStatus::Waiting);
        assert!(lobby.registry.get(match_id).is_some());
    }

    #[test]
    fn test_names_fall_back_when_unknown() {
        let mut lobby = lobby();
        lobby.join(Mode::Duo, 1);
        let QueueStatus::Matched { match_id } = lobby.join(Mode::Duo, 2) else {
            panic!("Expected a match");
        };

        let names = lobby.registry.get(match_id).unwrap().names();
        assert_eq!(names["p1"], "alice");
        assert_eq!(names["p2"], "Player 2");
    }

    #[test]
    fn test_join_while_in_match_returns_it() {
        let mut lobby = lobby();
        lobby.join(Mode::Duo, 1);
        let matched = lobby.join(Mode::Duo, 2);

        assert_eq!(lobby.join(Mode::Duo, 1), matched);
        assert_eq!(lobby.join(Mode::Quad, 2), matched);
        assert_eq!(lobby.queues.waiting(Mode::Duo), 0);
        assert_eq!(lobby.queues.waiting(Mode::Quad), 0);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut lobby = lobby();
        lobby.join(Mode::Quad, 1);
        lobby.cancel(Mode::Quad, 1);
        lobby.cancel(Mode::Quad, 1);
        lobby.cancel(Mode::Duo, 7);
        assert_eq!(lobby.queues.waiting(Mode::Quad), 0);
    }

    #[test]
    fn test_create_match_validates_participants() {
        let mut lobby = lobby();
        assert_eq!(
            lobby.create_match(Mode::Quad, &[1, 2]),
            Err(LobbyError::WrongParticipantCount {
                mode: Mode::Quad,
                expected: 4,
                got: 2,
            })
        );
        assert_eq!(
            lobby.create_match(Mode::Duo, &[3, 3]),
            Err(LobbyError::DuplicateParticipant(3))
        );

        let match_id = lobby.create_match(Mode::Duo, &[1, 2]).unwrap();
        assert_eq!(
            lobby.create_match(Mode::Duo, &[2, 5]),
            Err(LobbyError::AlreadyInMatch {
                player: 2,
                match_id,
            })
        );
        assert_eq!(lobby.registry.len(), 1);
    }

    #[test]
    fn test_create_match_withdraws_queued_players() {
        let mut lobby = lobby();
        lobby.join(Mode::Duo, 1);
        lobby.create_match(Mode::Duo, &[1, 2]).unwrap();
        assert!(!lobby.queues.is_waiting(Mode::Duo, 1));
        assert_eq!(lobby.join(Mode::Duo, 3), QueueStatus::Waiting);
    }

    #[test]
    fn test_player_queued_in_both_modes_gets_one_match() {
        let mut lobby = lobby();
        lobby.join(Mode::Duo, 1);
        lobby.join(Mode::Quad, 1);
        let QueueStatus::Matched { match_id: duo } = lobby.join(Mode::Duo, 2) else {
            panic!("Expected a duo match");
        };

        for player in 3..=5 {
            assert_eq!(lobby.join(Mode::Quad, player), QueueStatus::Waiting);
        }
        let QueueStatus::Matched { match_id: quad } = lobby.join(Mode::Quad, 6) else {
            panic!("Expected a quad match");
        };

        assert_eq!(lobby.registry.get(duo).unwrap().players(), vec![1, 2]);
        assert_eq!(lobby.registry.get(quad).unwrap().players(), vec![3, 4, 5, 6]);
        assert_eq!(lobby.registry.active_match_of(1), Some(duo));
    }

    #[test]
    fn test_evicted_match_is_not_reported() {
        let mut lobby = lobby();
        lobby.join(Mode::Duo, 1);
        let QueueStatus::Matched { match_id } = lobby.join(Mode::Duo, 2) else {
            panic!("Expected a match");
        };

        assert!(lobby.evict(match_id).is_some());
        assert!(lobby.evict(match_id).is_none());
        assert_eq!(lobby.status(Mode::Duo, 1), QueueStatus::Waiting);

        assert_eq!(lobby.join(Mode::Duo, 2), QueueStatus::Waiting);
        assert_eq!(lobby.status(Mode::Duo, 2), QueueStatus::Waiting);
        assert!(lobby.queues.is_waiting(Mode::Duo, 2));
    }
}
