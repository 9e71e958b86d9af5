//! FIFO waiting queues for the duo and quad modes.
//!
//! Cancellation is lazy: a player's queue entry carries a ticket and only the
//! entry whose ticket matches the player's current one counts as waiting.
//! Stale entries are skipped when groups are drawn from the front, and the
//! entry list is compacted once stale entries outnumber live ones.

use shared::{MatchId, Mode, PlayerId, QueueStatus};
use std::collections::{HashMap, VecDeque};

/// Outcome of a join request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Player is waiting for enough others.
    Waiting,
    /// Player completed a group. Participants in join order, joiner last.
    Formed(Vec<PlayerId>),
}

/// Stale entries tolerated before a queue is compacted.
const COMPACT_SLACK: usize = 16;

#[derive(Debug, Default)]
struct Queue {
    order: VecDeque<(PlayerId, u64)>,
    tickets: HashMap<PlayerId, u64>,
}

impl Queue {
    fn contains(&self, player: PlayerId) -> bool {
        self.tickets.contains_key(&player)
    }

    fn len(&self) -> usize {
        self.tickets.len()
    }

    fn push(&mut self, player: PlayerId, ticket: u64) {
        self.order.push_back((player, ticket));
        self.tickets.insert(player, ticket);
    }

    fn remove(&mut self, player: PlayerId) -> bool {
        let removed = self.tickets.remove(&player).is_some();
        if self.order.len() > 2 * self.tickets.len() + COMPACT_SLACK {
            self.compact();
        }
        removed
    }

    /// Drops entries whose ticket is no longer current.
    fn compact(&mut self) {
        let tickets = &self.tickets;
        self.order
            .retain(|(player, ticket)| tickets.get(player) == Some(ticket));
    }

    /// Takes the oldest valid entry.
    fn pop(&mut self) -> Option<PlayerId> {
        while let Some((player, ticket)) = self.order.pop_front() {
            if self.tickets.get(&player) == Some(&ticket) {
                self.tickets.remove(&player);
                return Some(player);
            }
        }
        None
    }
}

#[derive(Debug, Default)]
pub struct MatchmakingQueues {
    duo: Queue,
    quad: Queue,
    next_ticket: u64,
    /// Assignments not yet collected through [`MatchmakingQueues::status`].
    assignments: HashMap<(Mode, PlayerId), MatchId>,
}

impl MatchmakingQueues {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, mode: Mode) -> &Queue {
        match mode {
            Mode::Duo => &self.duo,
            Mode::Quad => &self.quad,
        }
    }

    fn queue_mut(&mut self, mode: Mode) -> &mut Queue {
        match mode {
            Mode::Duo => &mut self.duo,
            Mode::Quad => &mut self.quad,
        }
    }

    pub fn is_waiting(&self, mode: Mode, player: PlayerId) -> bool {
        self.queue(mode).contains(player)
    }

    pub fn waiting(&self, mode: Mode) -> usize {
        self.queue(mode).len()
    }

    /// Enqueues a player. When the queue then holds a full group, the group
    /// is removed from the front and returned, and its members leave the
    /// other queue too. Joining twice is a no-op.
    ///
    /// Any uncollected assignment of the player is discarded: the caller only
    /// queues players who are not in an active match.
    pub fn join(&mut self, mode: Mode, player: PlayerId) -> JoinOutcome {
        self.assignments.remove(&(Mode::Duo, player));
        self.assignments.remove(&(Mode::Quad, player));

        if self.is_waiting(mode, player) {
            return JoinOutcome::Waiting;
        }

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let queue = self.queue_mut(mode);
        queue.push(player, ticket);

        if queue.len() < mode.participants() {
            return JoinOutcome::Waiting;
        }

        let group: Vec<PlayerId> = std::iter::from_fn(|| queue.pop())
            .take(mode.participants())
            .collect();
        for &member in &group {
            self.withdraw(member);
        }
        JoinOutcome::Formed(group)
    }

    /// Remembers the match a formed group was placed in so that every member
    /// can collect it once.
    pub fn assign(&mut self, mode: Mode, players: &[PlayerId], match_id: MatchId) {
        for player in players {
            self.assignments.insert((mode, *player), match_id);
        }
    }

    /// Reports a pending assignment exactly once; afterwards the player reads
    /// as waiting again until they rejoin or cancel.
    pub fn status(&mut self, mode: Mode, player: PlayerId) -> QueueStatus {
        match self.assignments.remove(&(mode, player)) {
            Some(match_id) => QueueStatus::Matched { match_id },
            None => QueueStatus::Waiting,
        }
    }

    /// Drops uncollected assignments to a match that has been evicted.
    pub fn forget_match(&mut self, match_id: MatchId) {
        self.assignments.retain(|_, assigned| *assigned != match_id);
    }

    /// Removes a waiting player. Returns whether they were queued.
    pub fn cancel(&mut self, mode: Mode, player: PlayerId) -> bool {
        self.queue_mut(mode).remove(player)
    }

    /// Removes a player from both queues.
    pub fn withdraw(&mut self, player: PlayerId) {
        self.duo.remove(player);
        self.quad.remove(player);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duo_forms_on_second_join() {
        let mut queues = MatchmakingQueues::new();
        assert_eq!(queues.join(Mode::Duo, 1), JoinOutcome::Waiting);
        assert!(queues.is_waiting(Mode::Duo, 1));
        assert_eq!(queues.join(Mode::Duo, 2), JoinOutcome::Formed(vec![1, 2]));
        assert_eq!(queues.waiting(Mode::Duo), 0);
    }

    #[test]
    fn test_quad_needs_four() {
        let mut queues = MatchmakingQueues::new();
        for player in 1..=3 {
            assert_eq!(queues.join(Mode::Quad, player), JoinOutcome::Waiting);
        }
        assert_eq!(queues.join(Mode::Duo, 9), JoinOutcome::Waiting);
        assert_eq!(
            queues.join(Mode::Quad, 4),
            JoinOutcome::Formed(vec![1, 2, 3, 4])
        );
        assert_eq!(queues.waiting(Mode::Duo), 1);
    }

    #[test]
    fn test_duplicate_join_is_ignored() {
        let mut queues = MatchmakingQueues::new();
        queues.join(Mode::Duo, 1);
        assert_eq!(queues.join(Mode::Duo, 1), JoinOutcome::Waiting);
        assert_eq!(queues.waiting(Mode::Duo), 1);
    }

    #[test]
    fn test_cancelled_entries_are_skipped() {
        let mut queues = MatchmakingQueues::new();
        queues.join(Mode::Duo, 1);
        assert!(queues.cancel(Mode::Duo, 1));
        assert!(!queues.cancel(Mode::Duo, 1));
        assert_eq!(queues.join(Mode::Duo, 2), JoinOutcome::Waiting);
        assert_eq!(queues.join(Mode::Duo, 3), JoinOutcome::Formed(vec![2, 3]));
    }

    #[test]
    fn test_rejoin_after_cancel_goes_to_back() {
        let mut queues = MatchmakingQueues::new();
        queues.join(Mode::Quad, 1);
        queues.join(Mode::Quad, 2);
        queues.cancel(Mode::Quad, 1);
        queues.join(Mode::Quad, 3);
        queues.join(Mode::Quad, 1);
        assert_eq!(
            queues.join(Mode::Quad, 4),
            JoinOutcome::Formed(vec![2, 3, 1, 4])
        );
    }

    #[test]
    fn test_status_reports_match_once() {
        let mut queues = MatchmakingQueues::new();
        queues.join(Mode::Duo, 1);
        if let JoinOutcome::Formed(group) = queues.join(Mode::Duo, 2) {
            queues.assign(Mode::Duo, &group, 42);
        }

        assert_eq!(
            queues.status(Mode::Duo, 1),
            QueueStatus::Matched { match_id: 42 }
        );
        assert_eq!(queues.status(Mode::Duo, 1), QueueStatus::Waiting);
        assert_eq!(queues.status(Mode::Quad, 2), QueueStatus::Waiting);
        assert_eq!(
            queues.status(Mode::Duo, 2),
            QueueStatus::Matched { match_id: 42 }
        );
    }

    #[test]
    fn test_withdraw_clears_both_queues() {
        let mut queues = MatchmakingQueues::new();
        queues.join(Mode::Duo, 1);
        queues.join(Mode::Quad, 1);
        queues.withdraw(1);
        assert!(!queues.is_waiting(Mode::Duo, 1));
        assert!(!queues.is_waiting(Mode::Quad, 1));
    }

    #[test]
    fn test_formed_group_leaves_other_queue() {
        let mut queues = MatchmakingQueues::new();
        queues.join(Mode::Duo, 1);
        queues.join(Mode::Quad, 1);
        assert_eq!(queues.join(Mode::Duo, 2), JoinOutcome::Formed(vec![1, 2]));
        assert!(!queues.is_waiting(Mode::Quad, 1));
        assert_eq!(queues.waiting(Mode::Quad), 0);

        for player in 3..=5 {
            assert_eq!(queues.join(Mode::Quad, player), JoinOutcome::Waiting);
        }
        assert_eq!(
            queues.join(Mode::Quad, 6),
            JoinOutcome::Formed(vec![3, 4, 5, 6])
        );
    }

    #[test]
    fn test_rejoin_discards_old_assignment() {
        let mut queues = MatchmakingQueues::new();
        queues.join(Mode::Duo, 1);
        if let JoinOutcome::Formed(group) = queues.join(Mode::Duo, 2) {
            queues.assign(Mode::Duo, &group, 1);
        }

        assert_eq!(queues.join(Mode::Duo, 2), JoinOutcome::Waiting);
        assert_eq!(queues.status(Mode::Duo, 2), QueueStatus::Waiting);
        assert_eq!(
            queues.status(Mode::Duo, 1),
            QueueStatus::Matched { match_id: 1 }
        );
    }

    #[test]
    fn test_forget_match_drops_assignments() {
        let mut queues = MatchmakingQueues::new();
        queues.assign(Mode::Duo, &[1, 2], 7);
        queues.assign(Mode::Quad, &[3, 4, 5, 6], 8);
        queues.forget_match(7);

        assert_eq!(queues.status(Mode::Duo, 1), QueueStatus::Waiting);
        assert_eq!(queues.status(Mode::Duo, 2), QueueStatus::Waiting);
        assert_eq!(
            queues.status(Mode::Quad, 3),
            QueueStatus::Matched { match_id: 8 }
        );
    }

    #[test]
    fn test_join_cancel_cycles_stay_bounded() {
        let mut queues = MatchmakingQueues::new();
        queues.join(Mode::Duo, 1);
        for _ in 0..100_000 {
            queues.join(Mode::Duo, 2);
            queues.cancel(Mode::Duo, 2);
        }

        assert!(queues.duo.order.len() <= 2 + COMPACT_SLACK + 1);
        assert_eq!(queues.waiting(Mode::Duo), 1);
        assert_eq!(queues.join(Mode::Duo, 3), JoinOutcome::Formed(vec![1, 3]));
    }
}
