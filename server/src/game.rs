//! The match aggregate: participants, state machine, readiness, countdown,
//! scoreboard and the attached connection handles.

use crate::arena::Arena;
use crate::recorder::MatchResult;
use crate::session::{send_event, HandleId, Session, TransportKind};
use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{
    paddle_key, ArenaConfig, Axis, ClientMessage, MatchId, Mode, Names, PlayerId, Scores,
    ServerEvent, BALL_RADIUS, COUNTDOWN_SECONDS, IDLE_TIMEOUT_SECONDS, PADDLE_LENGTH, TICK_RATE,
    WIN_SCORE,
};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    WaitingForReady,
    Countdown,
    Running,
    Finished,
    Abandoned,
}

impl MatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MatchState::Finished | MatchState::Abandoned)
    }
}

/// Timing and scoring rules shared by every match of a server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchRules {
    pub tick_rate: u32,
    pub win_score: u32,
    pub countdown_seconds: u32,
    pub idle_timeout_seconds: u32,
}

impl MatchRules {
    /// Fixed simulation step in seconds.
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    /// Consecutive ticks without any attached handle after which a match is
    /// abandoned.
    pub fn idle_ticks(&self) -> u32 {
        self.idle_timeout_seconds.saturating_mul(self.tick_rate)
    }
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            tick_rate: TICK_RATE,
            win_score: WIN_SCORE,
            countdown_seconds: COUNTDOWN_SECONDS,
            idle_timeout_seconds: IDLE_TIMEOUT_SECONDS,
        }
    }
}

/// What the owner of a match has to do after driving it.
#[derive(Debug, Clone, PartialEq)]
pub enum Lifecycle {
    Continue,
    Finished(MatchResult),
    Abandoned,
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub id: PlayerId,
    pub name: String,
    /// True when the user directory could not name the player.
    pub name_is_fallback: bool,
}

#[derive(Debug, Clone, Copy)]
struct Countdown {
    remaining: u32,
    ticks: u32,
}

/// Handles attached for one player: at most one per transport kind.
#[derive(Default)]
struct PlayerSlot {
    raw: Option<Box<dyn Session>>,
    fallback: Option<Box<dyn Session>>,
}

impl PlayerSlot {
    fn entry(&mut self, kind: TransportKind) -> &mut Option<Box<dyn Session>> {
        match kind {
            TransportKind::Raw => &mut self.raw,
            TransportKind::Fallback => &mut self.fallback,
        }
    }

    fn sessions(&self) -> impl Iterator<Item = &Box<dyn Session>> {
        self.raw.iter().chain(self.fallback.iter())
    }

    fn is_detached(&self) -> bool {
        self.raw.is_none() && self.fallback.is_none()
    }
}

pub struct Match {
    pub id: MatchId,
    pub mode: Mode,
    participants: Vec<Participant>,
    state: MatchState,
    scores: Vec<u32>,
    ready: BTreeSet<PlayerId>,
    countdown: Option<Countdown>,
    arena: Arena,
    slots: HashMap<PlayerId, PlayerSlot>,
    /// Ticks in a row during which no participant had a handle attached.
    idle_ticks: u32,
    rules: MatchRules,
    rng: StdRng,
}

impl Match {
    pub fn new(id: MatchId, mode: Mode, participants: Vec<Participant>, rules: MatchRules) -> Self {
        let scores = vec![0; participants.len()];
        let slots = participants
            .iter()
            .map(|p| (p.id, PlayerSlot::default()))
            .collect();

        Self {
            id,
            mode,
            participants,
            state: MatchState::WaitingForReady,
            scores,
            ready: BTreeSet::new(),
            countdown: None,
            arena: Arena::new(mode),
            slots,
            idle_ticks: 0,
            rules,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn state(&self) -> MatchState {
        self.state
    }

    pub fn players(&self) -> Vec<PlayerId> {
        self.participants.iter().map(|p| p.id).collect()
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Zero-based paddle index of a participant.
    pub fn paddle_index(&self, player: PlayerId) -> Option<usize> {
        self.participants.iter().position(|p| p.id == player)
    }

    pub fn is_participant(&self, player: PlayerId) -> bool {
        self.paddle_index(player).is_some()
    }

    pub fn score_values(&self) -> &[u32] {
        &self.scores
    }

    pub fn ready_ids(&self) -> Vec<PlayerId> {
        self.ready.iter().copied().collect()
    }

    pub fn countdown_remaining(&self) -> Option<u32> {
        self.countdown.map(|c| c.remaining)
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    /// Number of handles currently attached for a player.
    pub fn handle_count(&self, player: PlayerId) -> usize {
        self.slots
            .get(&player)
            .map(|slot| slot.sessions().count())
            .unwrap_or(0)
    }

    pub fn has_handle(&self, player: PlayerId, handle: HandleId) -> bool {
        self.slots
            .get(&player)
            .is_some_and(|slot| slot.sessions().any(|s| s.id() == handle))
    }

    pub fn scores(&self) -> Scores {
        self.scores
            .iter()
            .enumerate()
            .map(|(index, score)| (paddle_key(index), *score))
            .collect()
    }

    pub fn names(&self) -> Names {
        self.participants
            .iter()
            .enumerate()
            .map(|(index, p)| (paddle_key(index), p.name.clone()))
            .collect()
    }

    pub fn config(&self) -> ArenaConfig {
        ArenaConfig {
            mode: self.mode,
            width: self.arena.width,
            height: self.arena.height,
            paddle_length: PADDLE_LENGTH,
            ball_radius: BALL_RADIUS,
            win_score: self.rules.win_score,
        }
    }

    fn state_event(&self, config: Option<ArenaConfig>) -> ServerEvent {
        ServerEvent::State {
            state: self.arena.snapshot(),
            scores: self.scores(),
            names: self.names(),
            config,
        }
    }

    fn ready_event(&self) -> ServerEvent {
        ServerEvent::Ready {
            ready_count: self.ready.len(),
            total: self.participants.len(),
            ready_ids: self.ready_ids(),
        }
    }

    /// Sends an event to every attached handle of every participant.
    pub fn broadcast(&self, event: &ServerEvent) {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode event for match {}: {}", self.id, e);
                return;
            }
        };
        for slot in self.slots.values() {
            for session in slot.sessions() {
                session.send(&frame);
            }
        }
    }

    /// Replaces a synthesized display name with one the player supplied.
    pub fn adopt_name(&mut self, player: PlayerId, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        if let Some(p) = self
            .participants
            .iter_mut()
            .find(|p| p.id == player && p.name_is_fallback)
        {
            p.name = name.to_string();
            p.name_is_fallback = false;
        }
    }

    /// Binds a connection handle to a participant's slot and sends it the
    /// current state together with the arena config.
    ///
    /// A handle of the same transport kind already bound for the player is
    /// closed and replaced. Non-participants are ignored.
    pub fn attach(&mut self, player: PlayerId, session: Box<dyn Session>) {
        let initial = self.state_event(Some(self.config()));
        let Some(slot) = self.slots.get_mut(&player) else {
            return;
        };

        send_event(session.as_ref(), &initial);
        let kind = session.kind();
        let handle = session.id();
        if let Some(previous) = slot.entry(kind).replace(session) {
            previous.close("Replaced by a newer connection");
        }
        info!(
            "Player {} attached {:?} handle {} to match {}",
            player, kind, handle, self.id
        );
    }

    /// Unbinds a handle. When it was the player's last one their readiness is
    /// cleared, a running countdown is cancelled, and the match is abandoned
    /// once no participant has any handle left.
    pub fn detach(&mut self, player: PlayerId, handle: HandleId) -> Lifecycle {
        if self.state.is_terminal() {
            return Lifecycle::Continue;
        }
        let Some(slot) = self.slots.get_mut(&player) else {
            return Lifecycle::Continue;
        };

        let removed = [TransportKind::Raw, TransportKind::Fallback]
            .into_iter()
            .any(|kind| {
                let entry = slot.entry(kind);
                if entry.as_ref().map(|s| s.id()) == Some(handle) {
                    *entry = None;
                    true
                } else {
                    false
                }
            });
        if !removed || !slot.is_detached() {
            return Lifecycle::Continue;
        }

        info!("Player {} detached from match {}", player, self.id);

        if self.is_unattended() {
            self.abandon();
            return Lifecycle::Abandoned;
        }

        let was_ready = self.ready.remove(&player);
        if self.state == MatchState::Countdown {
            self.countdown = None;
            self.state = MatchState::WaitingForReady;
            info!("Match {} countdown cancelled", self.id);
        }
        if was_ready {
            self.broadcast(&self.ready_event());
        }
        Lifecycle::Continue
    }

    /// Applies one client message. Messages that do not fit the current
    /// state are ignored.
    pub fn handle_message(&mut self, player: PlayerId, handle: HandleId, message: ClientMessage) {
        let Some(index) = self.paddle_index(player) else {
            return;
        };
        if self.state.is_terminal() {
            return;
        }

        match message {
            ClientMessage::Whoami => {
                let Some(session) = self
                    .slots
                    .get(&player)
                    .and_then(|slot| slot.sessions().find(|s| s.id() == handle))
                else {
                    return;
                };
                send_event(&**session, &ServerEvent::Identify { index: index + 1 });
            }
            ClientMessage::Ready => self.mark_ready(player),
            ClientMessage::Paddle { axis, value } => {
                if self.accepts_axis(index, axis) {
                    self.arena.set_paddle(index, value);
                } else {
                    debug!(
                        "Ignoring {:?} paddle input from player {} in match {}",
                        axis, player, self.id
                    );
                }
            }
        }
    }

    /// Duo paddles are vertical whatever axis the client names; quad paddles
    /// 1-2 move along `y` and 3-4 along `x`.
    fn accepts_axis(&self, index: usize, axis: Axis) -> bool {
        match self.mode {
            Mode::Duo => true,
            Mode::Quad if index < 2 => axis == Axis::Y,
            Mode::Quad => axis == Axis::X,
        }
    }

    fn mark_ready(&mut self, player: PlayerId) {
        if !matches!(
            self.state,
            MatchState::WaitingForReady | MatchState::Countdown
        ) {
            return;
        }

        self.ready.insert(player);
        self.broadcast(&self.ready_event());

        if self.state == MatchState::WaitingForReady && self.ready.len() == self.participants.len()
        {
            self.state = MatchState::Countdown;
            self.countdown = Some(Countdown {
                remaining: self.rules.countdown_seconds,
                ticks: 0,
            });
            info!("Match {} counting down", self.id);
            self.broadcast(&ServerEvent::Countdown {
                seconds: self.rules.countdown_seconds,
            });
        }
    }

    fn is_unattended(&self) -> bool {
        self.slots.values().all(PlayerSlot::is_detached)
    }

    fn abandon(&mut self) {
        self.state = MatchState::Abandoned;
        self.countdown = None;
        info!("Match {} abandoned", self.id);
    }

    /// Advances the match by one global tick. A match nobody has been
    /// attached to for the idle timeout is abandoned.
    pub fn tick(&mut self) -> Lifecycle {
        if self.state.is_terminal() {
            return Lifecycle::Continue;
        }
        if self.is_unattended() {
            self.idle_ticks += 1;
            if self.idle_ticks >= self.rules.idle_ticks() {
                debug!("Match {} idle for {} ticks", self.id, self.idle_ticks);
                self.abandon();
                return Lifecycle::Abandoned;
            }
        } else {
            self.idle_ticks = 0;
        }

        match self.state {
            MatchState::WaitingForReady => {
                self.broadcast(&self.state_event(None));
                Lifecycle::Continue
            }
            MatchState::Countdown => {
                self.advance_countdown();
                if self.state != MatchState::Running {
                    self.broadcast(&self.state_event(None));
                }
                Lifecycle::Continue
            }
            MatchState::Running => self.step(),
            MatchState::Finished | MatchState::Abandoned => Lifecycle::Continue,
        }
    }

    fn advance_countdown(&mut self) {
        let Some(countdown) = self.countdown.as_mut() else {
            return;
        };
        countdown.ticks += 1;
        if countdown.ticks < self.rules.tick_rate {
            return;
        }
        countdown.ticks = 0;
        countdown.remaining = countdown.remaining.saturating_sub(1);
        let remaining = countdown.remaining;

        if remaining > 0 {
            self.broadcast(&ServerEvent::Countdown { seconds: remaining });
            return;
        }

        self.countdown = None;
        self.arena.launch(&mut self.rng);
        self.state = MatchState::Running;
        info!("Match {} started", self.id);
        self.broadcast(&ServerEvent::Start {
            state: self.arena.snapshot(),
            scores: self.scores(),
            names: self.names(),
        });
    }

    fn step(&mut self) -> Lifecycle {
        let Some(goal) = self.arena.step(self.rules.dt()) else {
            self.broadcast(&self.state_event(None));
            return Lifecycle::Continue;
        };

        self.scores[goal.scorer] += 1;
        self.arena.launch(&mut self.rng);
        debug!(
            "Match {}: {} scored, now {:?}",
            self.id,
            paddle_key(goal.scorer),
            self.scores
        );
        self.broadcast(&self.state_event(None));

        if self.scores[goal.scorer] < self.rules.win_score {
            return Lifecycle::Continue;
        }

        self.state = MatchState::Finished;
        let winner = paddle_key(goal.scorer);
        info!("Match {} finished, winner {}", self.id, winner);
        self.broadcast(&ServerEvent::End {
            winner,
            names: self.names(),
        });

        Lifecycle::Finished(MatchResult {
            match_id: self.id,
            players: self.players(),
            scores: self.scores.clone(),
            winner: goal.scorer,
        })
    }
}
