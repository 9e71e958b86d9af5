use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type PlayerId = u64;
pub type MatchId = u64;

pub const TICK_RATE: u32 = 60;
pub const WIN_SCORE: u32 = 10;
pub const COUNTDOWN_SECONDS: u32 = 5;
/// Seconds a match may go without any attached handle before it is abandoned.
pub const IDLE_TIMEOUT_SECONDS: u32 = 30;

pub const DUO_WIDTH: f32 = 800.0;
pub const DUO_HEIGHT: f32 = 600.0;
pub const QUAD_SIZE: f32 = 600.0;

pub const PADDLE_LENGTH: f32 = 100.0;
pub const PADDLE_WIDTH: f32 = 14.0;
/// Distance from an arena edge to the playing face of the paddle guarding it.
pub const PADDLE_OFFSET: f32 = 30.0;
pub const BALL_RADIUS: f32 = 10.0;
pub const BALL_SPEED: f32 = 360.0;

/// Close reason for a connection naming an unknown match.
pub const MATCH_NOT_FOUND: &str = "Match not found";
/// Close reason for a connection whose user is not a participant.
pub const FORBIDDEN: &str = "Forbidden";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Duo,
    Quad,
}

impl Mode {
    /// Number of participants a match of this mode needs.
    pub fn participants(self) -> usize {
        match self {
            Mode::Duo => 2,
            Mode::Quad => 4,
        }
    }

    pub fn width(self) -> f32 {
        match self {
            Mode::Duo => DUO_WIDTH,
            Mode::Quad => QUAD_SIZE,
        }
    }

    pub fn height(self) -> f32 {
        match self {
            Mode::Duo => DUO_HEIGHT,
            Mode::Quad => QUAD_SIZE,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

/// Stable label of a paddle slot, derived from its zero-based join order.
pub fn paddle_key(index: usize) -> String {
    format!("p{}", index + 1)
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Ball {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

impl Ball {
    pub fn speed(&self) -> f32 {
        (self.vx * self.vx + self.vy * self.vy).sqrt()
    }
}

/// Paddle key -> value. Used for scores, display names and paddle positions.
pub type Scores = BTreeMap<String, u32>;
pub type Names = BTreeMap<String, String>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ArenaSnapshot {
    /// Participant count (2 or 4).
    pub mode: u8,
    pub paddles: BTreeMap<String, f32>,
    pub ball: Ball,
}

/// Static arena geometry, sent once with the first state a connection receives.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArenaConfig {
    pub mode: Mode,
    pub width: f32,
    pub height: f32,
    pub paddle_length: f32,
    pub ball_radius: f32,
    pub win_score: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Whoami,
    Ready,
    Paddle { axis: Axis, value: f32 },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEvent {
    Identify {
        index: usize,
    },
    Ready {
        #[serde(rename = "readyCount")]
        ready_count: usize,
        total: usize,
        #[serde(rename = "readyIds")]
        ready_ids: Vec<PlayerId>,
    },
    Countdown {
        seconds: u32,
    },
    Start {
        state: ArenaSnapshot,
        scores: Scores,
        names: Names,
    },
    State {
        state: ArenaSnapshot,
        scores: Scores,
        names: Names,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config: Option<ArenaConfig>,
    },
    End {
        winner: String,
        names: Names,
    },
    Error {
        message: String,
    },
}

/// Matchmaking answer for join and status requests.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum QueueStatus {
    Waiting,
    Matched {
        #[serde(rename = "matchId")]
        match_id: MatchId,
    },
}

/// Connection parameters of the raw transport.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub match_id: MatchId,
    pub user_id: PlayerId,
}

/// First payload on the fallback transport.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub match_id: MatchId,
    pub user_id: PlayerId,
    #[serde(default)]
    pub username: Option<String>,
}
