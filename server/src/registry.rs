//! Process-wide table of active matches
//!
//! The registry owns every live [`Match`] and hands out monotonically
//! increasing match ids that are never reused. It also tracks which player
//! belongs to which match so that the one-active-match-per-player invariant
//! can be checked without scanning all matches.

use crate::game::{Match, MatchRules, Participant};
use log::info;
use shared::{MatchId, Mode, PlayerId};
use std::collections::HashMap;

pub struct MatchRegistry {
    /// Active matches indexed by id
    matches: HashMap<MatchId, Match>,
    /// Participant to match index
    members: HashMap<PlayerId, MatchId>,
    /// Next id handed out by [`MatchRegistry::create`]
    next_match_id: MatchId,
    rules: MatchRules,
}

impl MatchRegistry {
    /// Creates an empty registry whose matches all follow `rules`
    pub fn new(rules: MatchRules) -> Self {
        Self {
            matches: HashMap::new(),
            members: HashMap::new(),
            next_match_id: 1,
            rules,
        }
    }

    pub fn rules(&self) -> MatchRules {
        self.rules
    }

    /// Inserts a new match in `WaitingForReady` and returns its id
    ///
    /// Participant order defines paddle order. Callers validate the
    /// participant list beforehand.
    pub fn create(&mut self, mode: Mode, participants: Vec<Participant>) -> MatchId {
        let match_id = self.next_match_id;
        self.next_match_id += 1;

        for participant in &participants {
            self.members.insert(participant.id, match_id);
        }
        let players: Vec<PlayerId> = participants.iter().map(|p| p.id).collect();
        self.matches
            .insert(match_id, Match::new(match_id, mode, participants, self.rules));

        info!("Match {} created ({:?}) for players {:?}", match_id, mode, players);
        match_id
    }

    pub fn get(&self, match_id: MatchId) -> Option<&Match> {
        self.matches.get(&match_id)
    }

    pub fn get_mut(&mut self, match_id: MatchId) -> Option<&mut Match> {
        self.matches.get_mut(&match_id)
    }

    /// Removes a match and releases its participants
    pub fn remove(&mut self, match_id: MatchId) -> Option<Match> {
        let removed = self.matches.remove(&match_id)?;
        for player in removed.players() {
            if self.members.get(&player) == Some(&match_id) {
                self.members.remove(&player);
            }
        }
        Some(removed)
    }

    /// Id of the non-terminal match the player currently belongs to
    pub fn active_match_of(&self, player: PlayerId) -> Option<MatchId> {
        let match_id = *self.members.get(&player)?;
        self.matches
            .get(&match_id)
            .filter(|m| !m.state().is_terminal())
            .map(|m| m.id)
    }

    pub fn ids(&self) -> Vec<MatchId> {
        self.matches.keys().copied().collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Match> {
        self.matches.values_mut()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}
