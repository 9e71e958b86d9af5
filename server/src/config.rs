use crate::game::MatchRules;
use shared::{COUNTDOWN_SECONDS, IDLE_TIMEOUT_SECONDS, TICK_RATE, WIN_SCORE};

/// Runtime settings of a match server process.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    /// HTTP API and raw WebSocket transport
    pub port: u16,
    /// Newline-delimited JSON fallback transport
    pub fallback_port: u16,
    pub tick_rate: u32,
    pub win_score: u32,
    pub countdown_seconds: u32,
    /// Seconds a match may run with nobody attached
    pub idle_timeout_seconds: u32,
}

impl ServerConfig {
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn fallback_addr(&self) -> String {
        format!("{}:{}", self.host, self.fallback_port)
    }

    pub fn rules(&self) -> MatchRules {
        MatchRules {
            tick_rate: self.tick_rate.max(1),
            win_score: self.win_score.max(1),
            countdown_seconds: self.countdown_seconds,
            idle_timeout_seconds: self.idle_timeout_seconds.max(1),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            fallback_port: 3001,
            tick_rate: TICK_RATE,
            win_score: WIN_SCORE,
            countdown_seconds: COUNTDOWN_SECONDS,
            idle_timeout_seconds: IDLE_TIMEOUT_SECONDS,
        }
    }
}
